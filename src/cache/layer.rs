//! Cache layer that orchestrates time-to-live caching with network fetching.

use chrono::{DateTime, Duration, TimeZone, Utc};
use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::{JsonStore, KeyValueStore};
use super::traits::{CacheEntry, CacheResult};
use crate::clock::Clock;

/// Default time-to-live for cached lists.
pub const DEFAULT_TTL_MINUTES: i64 = 60;

/// Cache layer that manages staleness and network fetching.
///
/// This layer sits between the application and the network client,
/// serving stored snapshots until they outlive the configured TTL.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  /// How long a stored snapshot stays valid
  ttl: Duration,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      storage,
      clock,
      ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
    }
  }

  /// Set the time-to-live for cached data.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// An entry is valid iff it was written less than `ttl` ago.
  fn is_valid(&self, timestamp_ms: i64) -> bool {
    let age_ms = self.clock.now().timestamp_millis() - timestamp_ms;
    age_ms < self.ttl.num_milliseconds()
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. Unless `force_refresh`, return a valid cached entry unchanged
  /// 2. Otherwise call `fetcher` and store `{data, timestamp: now}`
  ///
  /// Fetch errors are returned as-is; nothing is written for a failed fetch.
  /// Storage failures never fail the call: unreadable entries count as a miss
  /// and a failed write is logged.
  pub async fn fetch_list<T, E, F, Fut>(
    &self,
    key: &str,
    force_refresh: bool,
    fetcher: F,
  ) -> std::result::Result<CacheResult<Vec<T>>, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Vec<T>, E>>,
  {
    if !force_refresh {
      match self.storage.load_json::<CacheEntry<Vec<T>>>(key) {
        Ok(Some(entry)) if self.is_valid(entry.timestamp) => {
          debug!(key, "using cached entry");
          return Ok(CacheResult::from_cache(
            entry.data,
            millis_to_datetime(entry.timestamp),
          ));
        }
        Ok(_) => {}
        Err(e) => warn!(key, error = %e, "failed to read cache entry"),
      }
    }

    let data = fetcher().await?;

    let entry = CacheEntry {
      data,
      timestamp: self.clock.now().timestamp_millis(),
    };
    if let Err(e) = self.storage.save_json(key, &entry) {
      warn!(key, error = %e, "failed to write cache entry");
    }

    Ok(CacheResult::from_network(entry.data))
  }

  /// Remove a cached entry.
  pub fn evict(&self, key: &str) -> Result<()> {
    debug!(key, "evicting cache entry");
    self.storage.remove(key)
  }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
  Utc
    .timestamp_millis_opt(ms)
    .single()
    .unwrap_or_default()
}
