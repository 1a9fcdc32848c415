//! Command-line subcommands and their handlers.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use crate::app::App;
use crate::auth::{self, ExchangeRequest};
use crate::github::{Issue, IssueState};
use crate::settings::{NotificationFrequency, Reconciliation, SyncChoice, UserSettings};
use crate::sync::{RefreshOutcome, RefreshRequest};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Manage tracked repositories
  Repo {
    #[command(subcommand)]
    command: RepoCommand,
  },
  /// Manage the labels issues are matched against
  Labels {
    #[command(subcommand)]
    command: LabelCommand,
  },
  /// Show or change settings
  Settings {
    #[command(subcommand)]
    command: SettingsCommand,
  },
  /// List issues of all tracked repositories
  Issues {
    /// Ignore cached results and record this as a check
    #[arg(long)]
    refresh: bool,
    /// Only issues created since the last check
    #[arg(long)]
    new_only: bool,
  },
  /// Check for new issues at the configured frequency until Ctrl-C
  Watch,
  /// Reconcile local settings with the settings gist
  Sync {
    /// How to settle diverging repository lists
    #[arg(long, value_enum)]
    choice: Option<SyncChoice>,
  },
  /// Sign in with GitHub
  Auth {
    #[command(subcommand)]
    command: AuthCommand,
  },
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
  /// Track a repository (URL or owner/name)
  Add { repository: String },
  /// Stop tracking a repository
  Remove { repository: String },
  /// List tracked repositories
  List,
}

#[derive(Subcommand, Debug)]
pub enum LabelCommand {
  Add { label: String },
  Remove { label: String },
  List,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
  Show,
  Set {
    #[arg(long, value_enum)]
    frequency: Option<NotificationFrequency>,
    #[arg(long)]
    hide_closed: Option<bool>,
  },
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
  /// Exchange an OAuth code for a token and store it
  Login {
    #[arg(long)]
    code: String,
    /// GitHub App installation to mint a token for
    #[arg(long)]
    installation_id: Option<String>,
  },
  /// Forget the stored token
  Logout,
  Status,
}

pub async fn run(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Auth { command } => return run_auth(app, command).await,
    Command::Sync { choice } => return run_sync(app, choice).await,
    _ => {}
  }

  let reconciliation = app.settings.load().await;
  if reconciliation.needs_user_choice {
    println!("Local settings differ from the settings gist; run `gfit sync` to choose.");
  }

  match command {
    Command::Repo { command } => run_repo(app, command).await,
    Command::Labels { command } => run_labels(app, command).await,
    Command::Settings { command } => run_settings(app, command).await,
    Command::Issues { refresh, new_only } => run_issues(app, refresh, new_only).await,
    Command::Watch => run_watch(app).await,
    Command::Auth { .. } | Command::Sync { .. } => Ok(()),
  }
}

async fn run_repo(app: &App, command: RepoCommand) -> Result<()> {
  match command {
    RepoCommand::Add { repository } => {
      let repo = app.settings.add_repository(&repository).await?;
      println!("Tracking {}", repo.key());
    }
    RepoCommand::Remove { repository } => {
      let repo = app.settings.remove_repository(&repository).await?;
      println!("Stopped tracking {}", repo.key());
    }
    RepoCommand::List => {
      let settings = app.settings.current();
      if settings.repositories.is_empty() {
        println!("No repositories tracked. Add one with `gfit repo add owner/name`.");
      }
      for repo in &settings.repositories {
        match &repo.description {
          Some(description) => println!("{}  {}", repo.key(), description),
          None => println!("{}", repo.key()),
        }
      }
    }
  }
  Ok(())
}

async fn run_labels(app: &App, command: LabelCommand) -> Result<()> {
  let settings = match command {
    LabelCommand::Add { label } => app.settings.add_label(&label).await?,
    LabelCommand::Remove { label } => app.settings.remove_label(&label).await?,
    LabelCommand::List => app.settings.current(),
  };
  for label in &settings.custom_labels {
    println!("{}", label);
  }
  Ok(())
}

async fn run_settings(app: &App, command: SettingsCommand) -> Result<()> {
  let settings = match command {
    SettingsCommand::Show => app.settings.current(),
    SettingsCommand::Set {
      frequency,
      hide_closed,
    } => {
      if frequency.is_none() && hide_closed.is_none() {
        return Err(eyre!("Nothing to set. Pass --frequency and/or --hide-closed."));
      }
      let mut settings = app.settings.current();
      if let Some(frequency) = frequency {
        settings = app.settings.set_notification_frequency(frequency).await?;
      }
      if let Some(hide) = hide_closed {
        settings = app.settings.set_hide_closed_issues(hide).await?;
      }
      settings
    }
  };
  print!("{}", describe_settings(&settings, app.settings.is_synced()));
  Ok(())
}

async fn run_issues(app: &App, refresh: bool, new_only: bool) -> Result<()> {
  let settings = app.settings.current();
  if settings.repositories.is_empty() {
    println!("No repositories tracked. Add one with `gfit repo add owner/name`.");
    return Ok(());
  }

  let request = RefreshRequest::from_settings(&settings).force_refresh(refresh);
  let outcome = app.orchestrator.refresh_all(&request).await?;
  report_problems(&outcome);

  if refresh && outcome.rate_limited_until.is_none() {
    app.settings.update_last_checked_at(app.clock.now()).await?;
  }

  let shown: Vec<&Issue> = outcome
    .issues
    .iter()
    .filter(|i| !settings.hide_closed_issues || i.state == IssueState::Open)
    .filter(|i| !new_only || i.is_new)
    .collect();

  if shown.is_empty() {
    println!("No matching issues.");
  }
  for issue in shown {
    println!("{}", format_issue(issue));
  }
  Ok(())
}

async fn run_watch(app: &App) -> Result<()> {
  let frequency = app.settings.current().notification_frequency;
  if frequency == NotificationFrequency::Never {
    println!("Notification frequency is `never`; waiting for a change or Ctrl-C.");
  } else {
    println!("Checking {} for new issues. Press Ctrl-C to stop.", frequency.as_str());
  }

  app
    .scheduler()
    .run(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
      }
    })
    .await;
  Ok(())
}

async fn run_sync(app: &App, choice: Option<SyncChoice>) -> Result<()> {
  if !app.settings.is_synced() {
    return Err(eyre!("Not signed in. Run `gfit auth login --code <code>` first."));
  }

  let Reconciliation {
    needs_user_choice,
    candidates,
    ..
  } = app.settings.load().await;

  if !needs_user_choice {
    println!("Settings are in sync.");
    return Ok(());
  }

  match (choice, candidates) {
    (Some(choice), _) => {
      let settings = app.settings.resolve(choice).await?;
      println!(
        "Settings resolved; tracking {} repositories.",
        settings.repositories.len()
      );
    }
    (None, Some(candidates)) => {
      println!("Tracked repositories differ between this device and the gist.");
      println!("Local:  {}", repository_list(&candidates.local));
      println!("Remote: {}", repository_list(&candidates.remote));
      println!("Re-run with --choice local, remote or merge.");
    }
    (None, None) => {}
  }
  Ok(())
}

async fn run_auth(app: &App, command: AuthCommand) -> Result<()> {
  match command {
    AuthCommand::Login {
      code,
      installation_id,
    } => {
      let request = ExchangeRequest {
        code: Some(code),
        installation_id,
      };
      let token = app
        .token_exchanger()?
        .exchange_code(&request)
        .await
        .map_err(|e| eyre!("Sign-in failed ({}): {}", e.status_code(), e))?;
      auth::save_token(app.storage.as_ref(), &token)?;
      info!(scope = %token.scope, "signed in");
      println!("Signed in. Settings will sync to a private gist.");
    }
    AuthCommand::Logout => {
      auth::clear_token(app.storage.as_ref())?;
      println!("Signed out.");
    }
    AuthCommand::Status => {
      if !app.github.is_authenticated() {
        println!("Not signed in.");
        return Ok(());
      }
      let user = app.github.get_authenticated_user().await?;
      println!("Signed in as {}", user.login);
    }
  }
  Ok(())
}

fn report_problems(outcome: &RefreshOutcome) {
  if let Some(reset) = outcome.rate_limited_until {
    println!(
      "GitHub API rate limit exceeded. Reset at {}. Skipped: {}",
      reset.format("%H:%M:%S UTC"),
      outcome.skipped.join(", ")
    );
  }
  if !outcome.failed.is_empty() {
    println!(
      "Could not fetch issues for: {} (see the log for details)",
      outcome.failed.join(", ")
    );
  }
}

fn format_issue(issue: &Issue) -> String {
  let marker = if issue.is_new { " [new]" } else { "" };
  let state = match issue.state {
    IssueState::Open => "",
    IssueState::Closed => " (closed)",
  };
  let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
  format!(
    "{}{}{} {}  [{}]\n    {}",
    issue.key(),
    marker,
    state,
    issue.title,
    labels.join(", "),
    issue.url
  )
}

fn repository_list(settings: &UserSettings) -> String {
  let keys: Vec<String> = settings.repositories.iter().map(|r| r.key()).collect();
  if keys.is_empty() {
    "(none)".to_string()
  } else {
    keys.join(", ")
  }
}

fn describe_settings(settings: &UserSettings, synced: bool) -> String {
  let last_checked = settings
    .last_checked_at
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| "never".to_string());
  format!(
    "repositories:       {}\nlabels:             {}\nfrequency:          {}\nhide closed issues: {}\nlast checked:       {}\ngist sync:          {}\n",
    settings.repositories.len(),
    settings.custom_labels.join(", "),
    settings.notification_frequency.as_str(),
    settings.hide_closed_issues,
    last_checked,
    if synced { "on" } else { "off" }
  )
}
