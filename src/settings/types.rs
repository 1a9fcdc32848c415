use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::github::Repository;

/// Labels tracked out of the box.
pub const DEFAULT_LABELS: &[&str] = &["good first issue", "help wanted", "easy"];

/// How often tracked repositories are re-checked in the background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum NotificationFrequency {
  #[serde(rename = "hourly")]
  #[value(name = "hourly")]
  Hourly,
  #[serde(rename = "6hours")]
  #[value(name = "6hours")]
  SixHours,
  #[default]
  #[serde(rename = "daily")]
  #[value(name = "daily")]
  Daily,
  #[serde(rename = "never")]
  #[value(name = "never")]
  Never,
}

impl NotificationFrequency {
  /// Refresh period, or `None` when background checks are off.
  pub fn interval(&self) -> Option<Duration> {
    match self {
      NotificationFrequency::Hourly => Some(Duration::from_secs(60 * 60)),
      NotificationFrequency::SixHours => Some(Duration::from_secs(6 * 60 * 60)),
      NotificationFrequency::Daily => Some(Duration::from_secs(24 * 60 * 60)),
      NotificationFrequency::Never => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      NotificationFrequency::Hourly => "hourly",
      NotificationFrequency::SixHours => "6hours",
      NotificationFrequency::Daily => "daily",
      NotificationFrequency::Never => "never",
    }
  }
}

/// Per-user settings, stored locally and mirrored to a gist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
  #[serde(default)]
  pub repositories: Vec<Repository>,
  #[serde(default = "default_labels")]
  pub custom_labels: Vec<String>,
  #[serde(default)]
  pub notification_frequency: NotificationFrequency,
  #[serde(default = "default_hide_closed")]
  pub hide_closed_issues: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_checked_at: Option<DateTime<Utc>>,
}

fn default_labels() -> Vec<String> {
  DEFAULT_LABELS.iter().map(|s| s.to_string()).collect()
}

fn default_hide_closed() -> bool {
  true
}

impl UserSettings {
  /// First-run settings, with `last_checked_at` set to `now`.
  pub fn defaults_at(now: DateTime<Utc>) -> Self {
    Self {
      repositories: Vec::new(),
      custom_labels: default_labels(),
      notification_frequency: NotificationFrequency::default(),
      hide_closed_issues: default_hide_closed(),
      last_checked_at: Some(now),
    }
  }

  pub fn find_repository(&self, owner: &str, name: &str) -> Option<&Repository> {
    self
      .repositories
      .iter()
      .find(|r| r.owner == owner && r.name == name)
  }
}
