use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::orchestrator::{RefreshOutcome, RefreshRequest, SyncError, SyncOrchestrator};
use crate::clock::Clock;
use crate::settings::{NotificationFrequency, SettingsService};

/// Background refresh at the user's notification frequency.
pub struct Scheduler {
  orchestrator: Arc<SyncOrchestrator>,
  settings: SettingsService,
  clock: Arc<dyn Clock>,
}

impl Scheduler {
  pub fn new(
    orchestrator: Arc<SyncOrchestrator>,
    settings: SettingsService,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      orchestrator,
      settings,
      clock,
    }
  }

  /// Run until `shutdown` resolves. The first refresh happens one full
  /// period after start; a frequency change restarts the period.
  pub async fn run<F>(self, shutdown: F)
  where
    F: Future<Output = ()>,
  {
    tokio::pin!(shutdown);
    let mut settings_rx = self.settings.subscribe();
    let mut frequency = settings_rx.borrow_and_update().notification_frequency;
    let mut deadline = next_deadline(frequency);
    info!(frequency = frequency.as_str(), "scheduler started");

    loop {
      tokio::select! {
        _ = &mut shutdown => {
          info!("scheduler stopped");
          break;
        }
        changed = settings_rx.changed() => {
          if changed.is_err() {
            break;
          }
          let current = settings_rx.borrow_and_update().notification_frequency;
          if current != frequency {
            info!(from = frequency.as_str(), to = current.as_str(), "frequency changed");
            frequency = current;
            deadline = next_deadline(frequency);
          }
        }
        _ = wait_for(deadline) => {
          self.tick().await;
          deadline = next_deadline(frequency);
        }
      }
    }
  }

  /// One background cycle. Returns `None` when the cycle did not run.
  ///
  /// Settings are re-read first so edits from other `gfit` commands apply.
  pub async fn tick(&self) -> Option<RefreshOutcome> {
    let request = RefreshRequest::from_settings(&self.settings.load_local()).notify(true);

    match self.orchestrator.refresh_all(&request).await {
      Ok(outcome) => {
        if let Some(reset) = outcome.rate_limited_until {
          // Skipped repositories would lose their new-issue window
          warn!(reset = %reset, "rate limited, keeping last check time");
        } else if let Err(e) = self.settings.update_last_checked_at(self.clock.now()).await {
          warn!(error = %e, "failed to record last check time");
        }
        Some(outcome)
      }
      Err(SyncError::InFlight) => {
        debug!("refresh already running, skipping tick");
        None
      }
    }
  }
}

fn next_deadline(frequency: NotificationFrequency) -> Option<Instant> {
  frequency.interval().map(|period| Instant::now() + period)
}

async fn wait_for(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}
