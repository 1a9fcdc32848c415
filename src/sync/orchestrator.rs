//! Refreshing every tracked repository in one cycle.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{JsonStore, KeyValueStore};
use crate::github::{CachedIssueFetcher, GithubError, Issue, Repository};
use crate::notify::Notifier;
use crate::settings::UserSettings;

/// Known issues from the previous cycle, partitioned by repository key.
pub const KNOWN_ISSUES_KEY: &str = "willing-to-contribute-issues";

type Baseline = BTreeMap<String, Vec<Issue>>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("a refresh is already in progress")]
  InFlight,
}

/// Inputs of a refresh cycle.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
  pub repositories: Vec<Repository>,
  pub labels: Vec<String>,
  pub include_closed: bool,
  pub last_checked_at: Option<DateTime<Utc>>,
  /// Announce issues missing from the previous baseline
  pub notify: bool,
  /// Ignore valid cache entries
  pub force_refresh: bool,
}

impl RefreshRequest {
  pub fn from_settings(settings: &UserSettings) -> Self {
    Self {
      repositories: settings.repositories.clone(),
      labels: settings.custom_labels.clone(),
      include_closed: !settings.hide_closed_issues,
      last_checked_at: settings.last_checked_at,
      notify: false,
      force_refresh: false,
    }
  }

  pub fn notify(mut self, notify: bool) -> Self {
    self.notify = notify;
    self
  }

  pub fn force_refresh(mut self, force: bool) -> Self {
    self.force_refresh = force;
    self
  }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
  /// All gathered issues, marked
  pub issues: Vec<Issue>,
  /// Issues announced this cycle
  pub new_issues: Vec<Issue>,
  /// Set when the rate limit stopped the cycle early
  pub rate_limited_until: Option<DateTime<Utc>>,
  /// Repositories not refreshed because of the rate limit
  pub skipped: Vec<String>,
  /// Repositories whose fetch failed; they contribute no issues this cycle
  pub failed: Vec<String>,
  /// Repositories served from cache
  pub from_cache: usize,
}

/// Coordinates one refresh cycle across all tracked repositories.
///
/// Only one cycle runs at a time; a concurrent attempt fails with
/// [`SyncError::InFlight`] instead of racing on cache writes.
pub struct SyncOrchestrator {
  issues: CachedIssueFetcher,
  storage: Arc<dyn KeyValueStore>,
  notifier: Arc<dyn Notifier>,
  in_flight: tokio::sync::Mutex<()>,
}

impl SyncOrchestrator {
  pub fn new(
    issues: CachedIssueFetcher,
    storage: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      issues,
      storage,
      notifier,
      in_flight: tokio::sync::Mutex::new(()),
    }
  }

  /// Refresh every repository in order.
  ///
  /// Per-repository failures are logged and skipped. A rate limit stops the
  /// cycle; issues gathered so far are still marked, persisted and returned.
  /// Repositories that were skipped or failed keep their previous baseline.
  pub async fn refresh_all(&self, request: &RefreshRequest) -> Result<RefreshOutcome, SyncError> {
    let _guard = self.in_flight.try_lock().map_err(|_| SyncError::InFlight)?;

    if request.repositories.is_empty() {
      return Ok(RefreshOutcome::default());
    }

    let previous = self.load_known_issues();
    let mut outcome = RefreshOutcome::default();
    let mut gathered = Vec::new();

    for (index, repo) in request.repositories.iter().enumerate() {
      match self
        .issues
        .get_cached_or_fetch(
          repo,
          &request.labels,
          request.include_closed,
          request.force_refresh,
        )
        .await
      {
        Ok(result) => {
          if result.is_cached() {
            debug!(repo = %repo.key(), "using cached issues");
            outcome.from_cache += 1;
          }
          gathered.extend(result.data);
        }
        Err(GithubError::RateLimited { reset_time }) => {
          warn!(
            repo = %repo.key(),
            reset = %reset_time,
            "GitHub API rate limit exceeded, skipping remaining repositories"
          );
          outcome.rate_limited_until = Some(reset_time);
          outcome.skipped = request.repositories[index..]
            .iter()
            .map(Repository::key)
            .collect();
          break;
        }
        Err(e) => {
          warn!(repo = %repo.key(), error = %e, "error fetching issues");
          outcome.failed.push(repo.key());
        }
      }
    }

    let marked = mark_new_issues(gathered, request.last_checked_at);
    let unrefreshed: Vec<&String> = outcome.skipped.iter().chain(&outcome.failed).collect();
    self.save_known_issues(&marked, &previous, &unrefreshed);

    if request.notify {
      let previous: Vec<Issue> = previous.into_values().flatten().collect();
      outcome.new_issues = find_new_issues(&marked, &previous);
      for issue in &outcome.new_issues {
        self.notifier.notify(issue).await;
      }
    }

    info!(
      issues = marked.len(),
      new = outcome.new_issues.len(),
      cached = outcome.from_cache,
      "refresh complete"
    );
    outcome.issues = marked;
    Ok(outcome)
  }

  /// Issues known from the last cycle, without touching the network.
  pub fn known_issues(&self) -> Vec<Issue> {
    self.load_known_issues().into_values().flatten().collect()
  }

  fn load_known_issues(&self) -> Baseline {
    match self.storage.load_json::<Baseline>(KNOWN_ISSUES_KEY) {
      Ok(baseline) => baseline.unwrap_or_default(),
      Err(e) => {
        warn!(error = %e, "failed to read known issues");
        Baseline::new()
      }
    }
  }

  /// Store the new baseline. Repositories not refreshed this cycle keep their
  /// previous partition so their issues are not re-announced next time.
  fn save_known_issues(&self, issues: &[Issue], previous: &Baseline, unrefreshed: &[&String]) {
    let mut baseline = partition_by_repository(issues);
    for &key in unrefreshed {
      if let Some(old) = previous.get(key) {
        baseline.entry(key.clone()).or_insert_with(|| old.clone());
      }
    }

    if let Err(e) = self.storage.save_json(KNOWN_ISSUES_KEY, &baseline) {
      warn!(error = %e, "failed to save known issues");
    }
  }
}

fn partition_by_repository(issues: &[Issue]) -> Baseline {
  let mut baseline = Baseline::new();
  for issue in issues {
    baseline
      .entry(issue.repository.key())
      .or_default()
      .push(issue.clone());
  }
  baseline
}

/// Flag issues created after `last_checked_at`. Without a timestamp nothing
/// is new.
pub fn mark_new_issues(issues: Vec<Issue>, last_checked_at: Option<DateTime<Utc>>) -> Vec<Issue> {
  issues
    .into_iter()
    .map(|mut issue| {
      issue.is_new = last_checked_at.is_some_and(|checked| issue.created_at > checked);
      issue
    })
    .collect()
}

/// Issues in `current` whose `owner/name#number` is absent from `previous`.
pub fn find_new_issues(current: &[Issue], previous: &[Issue]) -> Vec<Issue> {
  let known: HashSet<String> = previous.iter().map(Issue::key).collect();
  current
    .iter()
    .filter(|issue| !known.contains(&issue.key()))
    .cloned()
    .collect()
}
