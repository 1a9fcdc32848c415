//! Issue fetcher with transparent per-repository caching.

use std::sync::Arc;

use crate::cache::{CacheLayer, CacheResult};

use super::error::GithubError;
use super::fetcher::IssueFetcher;
use super::types::{Issue, Repository};

/// Storage key of a repository's cached issue list.
pub fn issue_cache_key(repository: &Repository) -> String {
  format!("issues:{}", repository.key())
}

/// Issue fetcher with per-repository TTL caching.
///
/// This wraps the underlying IssueFetcher and serves stored snapshots until
/// they expire or a refresh is forced.
#[derive(Clone)]
pub struct CachedIssueFetcher {
  inner: Arc<IssueFetcher>,
  cache: CacheLayer,
}

impl CachedIssueFetcher {
  pub fn new(inner: IssueFetcher, cache: CacheLayer) -> Self {
    Self {
      inner: Arc::new(inner),
      cache,
    }
  }

  /// Return cached issues for `repository` if still valid, otherwise fetch
  /// and store them. Cached issues are returned untouched; a failed fetch
  /// stores nothing.
  pub async fn get_cached_or_fetch(
    &self,
    repository: &Repository,
    labels: &[String],
    include_closed: bool,
    force_refresh: bool,
  ) -> Result<CacheResult<Vec<Issue>>, GithubError> {
    let key = issue_cache_key(repository);

    self
      .cache
      .fetch_list(&key, force_refresh, || {
        let inner = self.inner.clone();
        async move {
          inner
            .fetch_issues(repository, labels, include_closed)
            .await
        }
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::clock::testing::FakeClock;
  use crate::github::testing::{issue, repo, FakeSource};
  use chrono::{Duration, TimeZone, Utc};

  fn setup() -> (CachedIssueFetcher, Arc<FakeSource>, Arc<FakeClock>) {
    let source = Arc::new(FakeSource::new());
    let clock = Arc::new(FakeClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let cache = CacheLayer::new(Arc::new(MemoryStorage::new()), clock.clone())
      .with_ttl(Duration::minutes(60));
    let fetcher = CachedIssueFetcher::new(IssueFetcher::new(source.clone()), cache);
    (fetcher, source, clock)
  }

  #[tokio::test]
  async fn test_hit_returns_cached_issues() {
    let (fetcher, source, clock) = setup();
    let hello = repo("octocat", "Hello-World");
    source.set("easy", vec![issue(&hello, 1, 1)]);
    let labels = vec!["easy".to_string()];

    let first = fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();
    clock.advance(Duration::minutes(10));
    let second = fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(first.data, second.data);
    assert_eq!(source.calls(), 1);
  }

  #[tokio::test]
  async fn test_rate_limit_leaves_cache_untouched() {
    let (fetcher, source, _clock) = setup();
    let hello = repo("octocat", "Hello-World");
    source.rate_limit();
    let labels = vec!["easy".to_string()];

    let err = fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap_err();
    assert!(matches!(err, GithubError::RateLimited { .. }));

    source.clear_failure();
    let result = fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_previous_snapshot() {
    let (fetcher, source, clock) = setup();
    let hello = repo("octocat", "Hello-World");
    source.set("easy", vec![issue(&hello, 1, 1)]);
    let labels = vec!["easy".to_string()];
    fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();

    source.fail_with(GithubError::Network("connection reset".to_string()));
    assert!(fetcher
      .get_cached_or_fetch(&hello, &labels, false, true)
      .await
      .is_err());

    clock.advance(Duration::minutes(10));
    let result = fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.len(), 1);
  }

  #[tokio::test]
  async fn test_evicted_key_is_refetched() {
    let source = Arc::new(FakeSource::new());
    let clock = Arc::new(FakeClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let cache = CacheLayer::new(Arc::new(MemoryStorage::new()), clock);
    let fetcher = CachedIssueFetcher::new(IssueFetcher::new(source.clone()), cache.clone());
    let hello = repo("octocat", "Hello-World");
    let labels = vec!["easy".to_string()];

    fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();
    cache.evict(&issue_cache_key(&hello)).unwrap();
    fetcher
      .get_cached_or_fetch(&hello, &labels, false, false)
      .await
      .unwrap();

    assert_eq!(source.calls(), 2);
  }
}
