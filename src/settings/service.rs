//! Injectable settings service owning the repository registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

use super::gist::RemoteSettingsStore;
use super::reconcile::{self, Candidates, Reconciliation, SyncChoice};
use super::types::{NotificationFrequency, UserSettings};
use crate::cache::{CacheLayer, JsonStore, KeyValueStore};
use crate::clock::Clock;
use crate::github::{issue_cache_key, GithubClient, GithubError, RepoSlug, Repository};

pub const SETTINGS_KEY: &str = "willing-to-contribute-settings";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
  #[error("invalid repository URL: {0}")]
  InvalidRepositoryUrl(String),

  #[error("repository {0} is already tracked")]
  AlreadyTracked(String),

  #[error("repository {0} is not tracked")]
  NotTracked(String),

  #[error("repository {0} not found")]
  RepositoryNotFound(String),

  #[error("label must not be empty")]
  EmptyLabel,

  #[error("no settings conflict is waiting for a choice")]
  NoPendingChoice,

  #[error(transparent)]
  Github(#[from] GithubError),

  #[error("failed to save settings: {0}")]
  Persist(String),
}

/// Resolves `owner/name` to full repository details.
#[async_trait]
pub trait RepositoryLookup: Send + Sync {
  async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GithubError>;
}

#[async_trait]
impl RepositoryLookup for GithubClient {
  async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GithubError> {
    GithubClient::get_repository(self, owner, name).await
  }
}

struct Inner {
  storage: Arc<dyn KeyValueStore>,
  lookup: Arc<dyn RepositoryLookup>,
  cache: CacheLayer,
  clock: Arc<dyn Clock>,
  remote: Option<Arc<dyn RemoteSettingsStore>>,
  state: watch::Sender<UserSettings>,
  pending: Mutex<Option<Candidates>>,
  /// Serializes read-modify-write mutations
  write_lock: tokio::sync::Mutex<()>,
}

/// Settings service.
///
/// Every mutation is persisted locally before the new state is published to
/// subscribers; a failed save leaves the current state unchanged. When a
/// remote store is attached, saved settings are mirrored to it best-effort.
#[derive(Clone)]
pub struct SettingsService {
  inner: Arc<Inner>,
}

impl SettingsService {
  pub fn new(
    storage: Arc<dyn KeyValueStore>,
    lookup: Arc<dyn RepositoryLookup>,
    cache: CacheLayer,
    clock: Arc<dyn Clock>,
    remote: Option<Arc<dyn RemoteSettingsStore>>,
  ) -> Self {
    let initial = UserSettings::defaults_at(clock.now());
    let (state, _) = watch::channel(initial);

    Self {
      inner: Arc::new(Inner {
        storage,
        lookup,
        cache,
        clock,
        remote,
        state,
        pending: Mutex::new(None),
        write_lock: tokio::sync::Mutex::new(()),
      }),
    }
  }

  /// Current settings snapshot.
  pub fn current(&self) -> UserSettings {
    self.inner.state.borrow().clone()
  }

  /// Receive every published settings change.
  pub fn subscribe(&self) -> watch::Receiver<UserSettings> {
    self.inner.state.subscribe()
  }

  pub fn is_synced(&self) -> bool {
    self.inner.remote.is_some()
  }

  /// Load settings from local storage only. Missing or malformed settings
  /// fall back to defaults.
  pub fn load_local(&self) -> UserSettings {
    let settings = self.read_local();
    self.inner.state.send_replace(settings.clone());
    settings
  }

  fn read_local(&self) -> UserSettings {
    match self.inner.storage.load_json::<UserSettings>(SETTINGS_KEY) {
      Ok(Some(settings)) => settings,
      Ok(None) => UserSettings::defaults_at(self.inner.clock.now()),
      Err(e) => {
        warn!(error = %e, "failed to read settings, using defaults");
        UserSettings::defaults_at(self.inner.clock.now())
      }
    }
  }

  /// Load local settings and reconcile them with the remote copy.
  ///
  /// Equal repository sets adopt the remote settings; differing sets keep the
  /// local settings and leave a pending choice for [`Self::resolve`]. An
  /// unreachable or unreadable remote falls back to local settings.
  pub async fn load(&self) -> Reconciliation {
    let local = self.load_local();

    let Some(remote) = self.inner.remote.clone() else {
      return Reconciliation::local_only(local);
    };

    let remote_settings = match remote.load().await {
      Ok(Some(settings)) => settings,
      Ok(None) => return Reconciliation::local_only(local),
      Err(e) => {
        warn!(error = %e, "error loading settings from gist, using local settings");
        return Reconciliation::local_only(local);
      }
    };

    let result = reconcile::reconcile(local, remote_settings);

    if result.needs_user_choice {
      info!("local and gist repositories differ, waiting for a choice");
      *self.lock_pending() = result.candidates.clone();
      return result;
    }

    if let Err(e) = self.persist_local(&result.settings) {
      warn!(error = %e, "failed to store gist settings locally");
    }
    self.inner.state.send_replace(result.settings.clone());
    result
  }

  /// Whether a reconciliation is waiting for [`Self::resolve`].
  pub fn needs_user_choice(&self) -> bool {
    self.lock_pending().is_some()
  }

  /// Settle a pending divergence; the result is saved locally and remotely.
  pub async fn resolve(&self, choice: SyncChoice) -> Result<UserSettings, SettingsError> {
    let _guard = self.inner.write_lock.lock().await;
    let candidates = self
      .lock_pending()
      .take()
      .ok_or(SettingsError::NoPendingChoice)?;

    // Local edits made while the choice was pending count as local
    let local = self.read_local();
    let resolved = reconcile::resolve(choice, &local, &candidates.remote);
    match self.save_locked(resolved).await {
      Ok(saved) => Ok(saved),
      Err(e) => {
        *self.lock_pending() = Some(candidates);
        Err(e)
      }
    }
  }

  /// Persist and publish `settings`, then mirror them to the remote store.
  pub async fn save(&self, settings: UserSettings) -> Result<UserSettings, SettingsError> {
    let _guard = self.inner.write_lock.lock().await;
    self.save_locked(settings).await
  }

  async fn save_locked(&self, settings: UserSettings) -> Result<UserSettings, SettingsError> {
    self.persist_local(&settings)?;
    self.inner.state.send_replace(settings.clone());

    // The gist keeps its own repositories until the divergence is resolved
    if self.needs_user_choice() {
      info!("settings saved locally only, gist sync waits for a choice");
      return Ok(settings);
    }

    if let Some(remote) = &self.inner.remote {
      if let Err(e) = remote.save(&settings).await {
        warn!(error = %e, "error saving settings to gist");
      }
    }

    Ok(settings)
  }

  fn persist_local(&self, settings: &UserSettings) -> Result<(), SettingsError> {
    self
      .inner
      .storage
      .save_json(SETTINGS_KEY, settings)
      .map_err(|e| SettingsError::Persist(e.to_string()))
  }

  /// Read-modify-write against the stored settings, which other `gfit`
  /// processes may have changed since this one loaded them.
  async fn update<F>(&self, mutate: F) -> Result<UserSettings, SettingsError>
  where
    F: FnOnce(&mut UserSettings) -> Result<(), SettingsError>,
  {
    let _guard = self.inner.write_lock.lock().await;
    let mut settings = self.read_local();
    mutate(&mut settings)?;
    self.save_locked(settings).await
  }

  /// Track a repository given as a URL or `owner/name`.
  pub async fn add_repository(&self, input: &str) -> Result<Repository, SettingsError> {
    let slug: RepoSlug = input
      .parse()
      .map_err(|_| SettingsError::InvalidRepositoryUrl(input.to_string()))?;

    if self.current().find_repository(&slug.owner, &slug.name).is_some() {
      return Err(SettingsError::AlreadyTracked(slug.to_string()));
    }

    let repo = match self.inner.lookup.get_repository(&slug.owner, &slug.name).await {
      Ok(repo) => repo,
      Err(GithubError::NotFound(_)) => {
        return Err(SettingsError::RepositoryNotFound(slug.to_string()))
      }
      Err(e) => return Err(e.into()),
    };

    let added = repo.clone();
    self
      .update(move |settings| {
        // The canonical name may differ from what was typed
        if settings.repositories.iter().any(|r| r.same_as(&repo)) {
          return Err(SettingsError::AlreadyTracked(repo.key()));
        }
        settings.repositories.push(repo);
        Ok(())
      })
      .await?;

    info!(repo = %added.key(), "tracking repository");
    Ok(added)
  }

  /// Stop tracking a repository and drop its cached issues.
  pub async fn remove_repository(&self, input: &str) -> Result<Repository, SettingsError> {
    let slug: RepoSlug = input
      .parse()
      .map_err(|_| SettingsError::InvalidRepositoryUrl(input.to_string()))?;

    let mut removed = None;
    self
      .update(|settings| {
        let index = settings
          .repositories
          .iter()
          .position(|r| r.matches(&slug))
          .ok_or_else(|| SettingsError::NotTracked(slug.to_string()))?;
        removed = Some(settings.repositories.remove(index));
        Ok(())
      })
      .await?;

    let removed = removed.ok_or_else(|| SettingsError::NotTracked(slug.to_string()))?;
    if let Err(e) = self.inner.cache.evict(&issue_cache_key(&removed)) {
      warn!(repo = %removed.key(), error = %e, "failed to evict cached issues");
    }

    info!(repo = %removed.key(), "stopped tracking repository");
    Ok(removed)
  }

  pub async fn set_notification_frequency(
    &self,
    frequency: NotificationFrequency,
  ) -> Result<UserSettings, SettingsError> {
    self
      .update(|settings| {
        settings.notification_frequency = frequency;
        Ok(())
      })
      .await
  }

  /// Add a label to the tracked set. Adding a present label is a no-op.
  pub async fn add_label(&self, label: &str) -> Result<UserSettings, SettingsError> {
    let label = label.trim().to_string();
    if label.is_empty() {
      return Err(SettingsError::EmptyLabel);
    }

    self
      .update(|settings| {
        if !settings.custom_labels.contains(&label) {
          settings.custom_labels.push(label);
        }
        Ok(())
      })
      .await
  }

  pub async fn remove_label(&self, label: &str) -> Result<UserSettings, SettingsError> {
    let label = label.trim();
    self
      .update(|settings| {
        settings.custom_labels.retain(|l| l != label);
        Ok(())
      })
      .await
  }

  pub async fn set_hide_closed_issues(&self, hide: bool) -> Result<UserSettings, SettingsError> {
    self
      .update(|settings| {
        settings.hide_closed_issues = hide;
        Ok(())
      })
      .await
  }

  pub async fn update_last_checked_at(
    &self,
    timestamp: DateTime<Utc>,
  ) -> Result<UserSettings, SettingsError> {
    self
      .update(|settings| {
        settings.last_checked_at = Some(timestamp);
        Ok(())
      })
      .await
  }

  fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<Candidates>> {
    self
      .inner
      .pending
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{KeyValueStore, MemoryStorage};
  use crate::clock::testing::FakeClock;
  use crate::github::testing::repo;
  use crate::settings::gist::testing::MemoryRemote;
  use chrono::TimeZone;
  use color_eyre::eyre::eyre;

  /// Lookup that knows a fixed set of repositories.
  struct FakeLookup {
    known: Vec<Repository>,
  }

  #[async_trait]
  impl RepositoryLookup for FakeLookup {
    async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GithubError> {
      self
        .known
        .iter()
        .find(|r| r.owner.eq_ignore_ascii_case(owner) && r.name.eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| GithubError::NotFound(format!("{}/{}", owner, name)))
    }
  }

  /// Storage whose writes can be switched off.
  #[derive(Default)]
  struct FlakyStorage {
    inner: MemoryStorage,
    read_only: std::sync::atomic::AtomicBool,
  }

  impl KeyValueStore for FlakyStorage {
    fn get(&self, key: &str) -> color_eyre::Result<Option<String>> {
      self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> color_eyre::Result<()> {
      if self.read_only.load(std::sync::atomic::Ordering::SeqCst) {
        return Err(eyre!("disk full"));
      }
      self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> color_eyre::Result<()> {
      self.inner.remove(key)
    }
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
  }

  fn service_with(
    storage: Arc<dyn KeyValueStore>,
    remote: Option<Arc<dyn RemoteSettingsStore>>,
  ) -> SettingsService {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(now()));
    let lookup = Arc::new(FakeLookup {
      known: vec![repo("octocat", "Hello-World"), repo("rust-lang", "rust")],
    });
    let cache = CacheLayer::new(storage.clone(), clock.clone());
    SettingsService::new(storage, lookup, cache, clock, remote)
  }

  fn service() -> (SettingsService, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (service_with(storage.clone(), None), storage)
  }

  #[tokio::test]
  async fn test_first_load_uses_defaults() {
    let (service, _) = service();
    let settings = service.load_local();

    assert_eq!(settings, UserSettings::defaults_at(now()));
  }

  #[tokio::test]
  async fn test_add_repository_persists_and_publishes() {
    let (service, storage) = service();
    service.load_local();
    let mut updates = service.subscribe();

    let added = service
      .add_repository("https://github.com/octocat/Hello-World")
      .await
      .unwrap();

    assert_eq!(added.key(), "octocat/Hello-World");
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().repositories.len(), 1);

    let stored: UserSettings = storage.load_json(SETTINGS_KEY).unwrap().unwrap();
    assert_eq!(stored.repositories, vec![added]);
  }

  #[tokio::test]
  async fn test_add_repository_errors() {
    let (service, _) = service();
    service.load_local();
    service.add_repository("octocat/Hello-World").await.unwrap();

    assert!(matches!(
      service.add_repository("octocat/Hello-World").await,
      Err(SettingsError::AlreadyTracked(_))
    ));
    assert!(matches!(
      service.add_repository("OCTOCAT/hello-world").await,
      Err(SettingsError::AlreadyTracked(_))
    ));
    assert!(matches!(
      service.add_repository("not a url").await,
      Err(SettingsError::InvalidRepositoryUrl(_))
    ));
    assert!(matches!(
      service.add_repository("octocat/missing").await,
      Err(SettingsError::RepositoryNotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_remove_repository_evicts_cache() {
    let (service, storage) = service();
    service.load_local();
    let added = service.add_repository("octocat/Hello-World").await.unwrap();
    storage.set(&issue_cache_key(&added), "{}").unwrap();

    service.remove_repository("octocat/Hello-World").await.unwrap();

    assert!(service.current().repositories.is_empty());
    assert_eq!(storage.get(&issue_cache_key(&added)).unwrap(), None);
    assert!(matches!(
      service.remove_repository("octocat/Hello-World").await,
      Err(SettingsError::NotTracked(_))
    ));
  }

  #[tokio::test]
  async fn test_labels_and_flags() {
    let (service, _) = service();
    service.load_local();

    service.add_label("  beginner ").await.unwrap();
    service.add_label("beginner").await.unwrap();
    service.remove_label("easy").await.unwrap();
    service.set_hide_closed_issues(false).await.unwrap();
    let settings = service
      .set_notification_frequency(NotificationFrequency::Hourly)
      .await
      .unwrap();

    assert_eq!(
      settings.custom_labels,
      vec!["good first issue", "help wanted", "beginner"]
    );
    assert!(!settings.hide_closed_issues);
    assert_eq!(settings.notification_frequency, NotificationFrequency::Hourly);
    assert!(matches!(
      service.add_label("   ").await,
      Err(SettingsError::EmptyLabel)
    ));
  }

  #[tokio::test]
  async fn test_failed_save_keeps_state() {
    let storage = Arc::new(FlakyStorage::default());
    let service = service_with(storage.clone(), None);
    service.load_local();

    storage
      .read_only
      .store(true, std::sync::atomic::Ordering::SeqCst);
    let result = service.set_hide_closed_issues(false).await;

    assert!(matches!(result, Err(SettingsError::Persist(_))));
    assert!(service.current().hide_closed_issues);
  }

  #[tokio::test]
  async fn test_load_adopts_remote_with_same_repositories() {
    let storage = Arc::new(MemoryStorage::new());
    let mut local = UserSettings::defaults_at(now());
    local.repositories = vec![repo("a", "x"), repo("b", "y")];
    storage.save_json(SETTINGS_KEY, &local).unwrap();

    let mut remote_settings = local.clone();
    remote_settings.repositories.reverse();
    remote_settings.custom_labels = vec!["docs".to_string()];
    let remote = Arc::new(MemoryRemote::with(remote_settings.clone()));

    let service = service_with(storage.clone(), Some(remote));
    let result = service.load().await;

    assert!(!result.needs_user_choice);
    assert_eq!(service.current(), remote_settings);
    let stored: UserSettings = storage.load_json(SETTINGS_KEY).unwrap().unwrap();
    assert_eq!(stored, remote_settings);
  }

  #[tokio::test]
  async fn test_load_with_diverging_repositories_waits_for_choice() {
    let storage = Arc::new(MemoryStorage::new());
    let mut local = UserSettings::defaults_at(now());
    local.repositories = vec![repo("o", "a"), repo("o", "b")];
    storage.save_json(SETTINGS_KEY, &local).unwrap();

    let mut remote_settings = local.clone();
    remote_settings.repositories = vec![repo("o", "b"), repo("o", "c")];
    let remote = Arc::new(MemoryRemote::with(remote_settings));

    let service = service_with(storage.clone(), Some(remote.clone()));
    let result = service.load().await;

    assert!(result.needs_user_choice);
    assert!(service.needs_user_choice());
    assert_eq!(service.current(), local);

    let merged = service.resolve(SyncChoice::Merge).await.unwrap();
    let keys: Vec<_> = merged.repositories.iter().map(|r| r.key()).collect();
    assert_eq!(keys, vec!["o/a", "o/b", "o/c"]);
    assert!(!service.needs_user_choice());
    assert_eq!(remote.stored(), Some(merged.clone()));
    let stored: UserSettings = storage.load_json(SETTINGS_KEY).unwrap().unwrap();
    assert_eq!(stored, merged);
  }

  #[tokio::test]
  async fn test_pending_choice_keeps_gist_untouched() {
    let storage = Arc::new(MemoryStorage::new());
    let mut local = UserSettings::defaults_at(now());
    local.repositories = vec![repo("o", "a")];
    storage.save_json(SETTINGS_KEY, &local).unwrap();

    let mut remote_settings = local.clone();
    remote_settings.repositories = vec![repo("o", "gist-only")];
    let remote = Arc::new(MemoryRemote::with(remote_settings.clone()));

    let service = service_with(storage.clone(), Some(remote.clone()));
    assert!(service.load().await.needs_user_choice);

    service.add_label("docs").await.unwrap();
    service.update_last_checked_at(now()).await.unwrap();

    assert_eq!(remote.stored(), Some(remote_settings));
    assert_eq!(remote.save_count(), 0);
    let stored: UserSettings = storage.load_json(SETTINGS_KEY).unwrap().unwrap();
    assert!(stored.custom_labels.contains(&"docs".to_string()));

    // Choosing still sees the gist-only repository
    let merged = service.resolve(SyncChoice::Merge).await.unwrap();
    let keys: Vec<_> = merged.repositories.iter().map(|r| r.key()).collect();
    assert_eq!(keys, vec!["o/a", "o/gist-only"]);
    assert!(merged.custom_labels.contains(&"docs".to_string()));
    assert_eq!(remote.save_count(), 1);
  }

  #[tokio::test]
  async fn test_mutation_keeps_changes_from_other_processes() {
    let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStorage::new());
    let watcher = service_with(storage.clone(), None);
    watcher.load_local();
    let cli = service_with(storage.clone(), None);
    cli.load_local();

    cli.add_repository("octocat/Hello-World").await.unwrap();
    let settings = watcher.update_last_checked_at(now()).await.unwrap();

    assert_eq!(settings.repositories.len(), 1);
    assert_eq!(watcher.current().repositories.len(), 1);
    let stored: UserSettings = storage.load_json(SETTINGS_KEY).unwrap().unwrap();
    assert_eq!(stored.repositories.len(), 1);
    assert_eq!(stored.last_checked_at, Some(now()));
  }

  #[tokio::test]
  async fn test_unreachable_remote_falls_back_to_local() {
    let storage = Arc::new(MemoryStorage::new());
    let remote = Arc::new(MemoryRemote::default());
    *remote.unreachable.lock().unwrap() = true;

    let service = service_with(storage, Some(remote.clone()));
    let result = service.load().await;

    assert!(!result.needs_user_choice);
    assert_eq!(result.settings, UserSettings::defaults_at(now()));

    // Saving still succeeds locally
    service.add_label("docs").await.unwrap();
    assert_eq!(remote.save_count(), 0);
  }

  #[tokio::test]
  async fn test_resolve_without_conflict_fails() {
    let (service, _) = service();
    assert!(matches!(
      service.resolve(SyncChoice::KeepLocal).await,
      Err(SettingsError::NoPendingChoice)
    ));
  }
}
