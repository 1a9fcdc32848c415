use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::auth::{self, AppCredentials, OAuthCredentials, TokenExchanger};
use crate::cache::{CacheLayer, KeyValueStore, MemoryStorage, SqliteStorage};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::github::{CachedIssueFetcher, GithubClient, IssueFetcher};
use crate::notify::{LogNotifier, MultiNotifier, Notifier, WebhookNotifier};
use crate::settings::{GistSettingsStore, RemoteSettingsStore, SettingsService};
use crate::sync::{Scheduler, SyncOrchestrator};

/// Application services, wired once at startup
pub struct App {
  pub config: Config,

  /// Settings, auth and the known-issues baseline
  pub storage: Arc<dyn KeyValueStore>,

  pub clock: Arc<dyn Clock>,

  pub github: GithubClient,

  pub settings: SettingsService,

  pub orchestrator: Arc<SyncOrchestrator>,
}

impl App {
  pub async fn new(config: Config, no_cache: bool) -> Result<Self> {
    let data_dir = config.data_dir()?;
    let storage: Arc<dyn KeyValueStore> = Arc::new(SqliteStorage::open(&data_dir)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Issue snapshots only live for this run when caching is off
    let cache_storage: Arc<dyn KeyValueStore> = if no_cache || !config.cache.enabled {
      debug!("issue cache disabled");
      Arc::new(MemoryStorage::new())
    } else {
      storage.clone()
    };
    let cache = CacheLayer::new(cache_storage, clock.clone()).with_ttl(config.cache_ttl()?);

    let api_url = &config.github.api_url;
    let github = match Config::env_token() {
      Some(token) => GithubClient::new(api_url, Some(token))?,
      None => {
        let client = GithubClient::new(api_url, auth::load_token(storage.as_ref())?)?;
        if client.is_authenticated() && !auth::verify_stored_token(storage.as_ref(), &client).await? {
          println!("Your GitHub sign-in is no longer valid. Run `gfit auth login` again.");
          GithubClient::new(api_url, None)?
        } else {
          client
        }
      }
    };

    let remote: Option<Arc<dyn RemoteSettingsStore>> = if github.is_authenticated() {
      Some(Arc::new(GistSettingsStore::new(github.clone())))
    } else {
      None
    };

    let fetcher = IssueFetcher::new(Arc::new(github.clone()));
    let issues = CachedIssueFetcher::new(fetcher, cache.clone());
    let orchestrator = Arc::new(SyncOrchestrator::new(
      issues,
      storage.clone(),
      build_notifier(&config),
    ));

    let settings = SettingsService::new(
      storage.clone(),
      Arc::new(github.clone()),
      cache,
      clock.clone(),
      remote,
    );

    info!(
      data_dir = %data_dir.display(),
      authenticated = github.is_authenticated(),
      "application initialized"
    );

    Ok(Self {
      config,
      storage,
      clock,
      github,
      settings,
      orchestrator,
    })
  }

  pub fn scheduler(&self) -> Scheduler {
    Scheduler::new(
      self.orchestrator.clone(),
      self.settings.clone(),
      self.clock.clone(),
    )
  }

  /// Exchanger for the configured OAuth app, with GitHub App credentials
  /// when both an app id and a private key are configured.
  pub fn token_exchanger(&self) -> Result<TokenExchanger> {
    let oauth = &self.config.oauth;
    let credentials = match (&oauth.client_id, self.config.client_secret()) {
      (Some(client_id), Some(client_secret)) => Some(OAuthCredentials {
        client_id: client_id.clone(),
        client_secret,
      }),
      _ => None,
    };

    let app = match (&oauth.app_id, &oauth.private_key_path) {
      (Some(app_id), Some(path)) => {
        let private_key = std::fs::read_to_string(path)
          .map_err(|e| eyre!("Failed to read private key {}: {}", path.display(), e))?;
        Some(AppCredentials {
          app_id: app_id.clone(),
          private_key,
        })
      }
      _ => None,
    };

    TokenExchanger::new(self.github.clone(), credentials, app, self.clock.clone())
  }
}

fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
  let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
  if let Some(url) = &config.notifications.webhook_url {
    notifiers.push(Arc::new(WebhookNotifier::new(url.clone())));
  }
  Arc::new(MultiNotifier::new(notifiers))
}
