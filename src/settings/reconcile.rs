//! Resolving divergence between local and gist-backed settings.

use std::collections::HashSet;

use super::types::UserSettings;
use crate::github::Repository;

/// How to settle diverging repository lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncChoice {
  /// Keep this device's settings
  #[value(name = "local")]
  KeepLocal,
  /// Take the gist's settings
  #[value(name = "remote")]
  KeepRemote,
  /// Union of both repository lists, local entries first
  #[value(name = "merge")]
  Merge,
}

/// Both sides of a divergence, kept until the user picks one.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
  pub local: UserSettings,
  pub remote: UserSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
  /// Settings to use right now
  pub settings: UserSettings,
  pub needs_user_choice: bool,
  pub candidates: Option<Candidates>,
}

impl Reconciliation {
  /// No remote copy to compare against.
  pub fn local_only(settings: UserSettings) -> Self {
    Self {
      settings,
      needs_user_choice: false,
      candidates: None,
    }
  }
}

/// Compare repository lists by `(owner, name)` membership, ignoring order.
pub fn same_repositories(a: &[Repository], b: &[Repository]) -> bool {
  let set = |repos: &[Repository]| -> HashSet<(String, String)> {
    repos
      .iter()
      .map(|r| (r.owner.clone(), r.name.clone()))
      .collect()
  };
  set(a) == set(b)
}

/// Equal repository sets let the remote copy win silently; anything else
/// needs an explicit [`SyncChoice`].
pub fn reconcile(local: UserSettings, remote: UserSettings) -> Reconciliation {
  if same_repositories(&local.repositories, &remote.repositories) {
    return Reconciliation {
      settings: remote,
      needs_user_choice: false,
      candidates: None,
    };
  }

  Reconciliation {
    settings: local.clone(),
    needs_user_choice: true,
    candidates: Some(Candidates { local, remote }),
  }
}

/// Apply a choice to a pair of diverging settings.
pub fn resolve(choice: SyncChoice, local: &UserSettings, remote: &UserSettings) -> UserSettings {
  match choice {
    SyncChoice::KeepLocal => local.clone(),
    SyncChoice::KeepRemote => remote.clone(),
    SyncChoice::Merge => UserSettings {
      repositories: merge_repositories(&local.repositories, &remote.repositories),
      ..local.clone()
    },
  }
}

/// Union by `(owner, name)`: local entries win, missing remote ones are appended.
pub fn merge_repositories(local: &[Repository], remote: &[Repository]) -> Vec<Repository> {
  let mut merged = local.to_vec();
  for repo in remote {
    if !merged.iter().any(|r| r.same_as(repo)) {
      merged.push(repo.clone());
    }
  }
  merged
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::github::testing::repo;
  use crate::settings::types::NotificationFrequency;
  use chrono::{TimeZone, Utc};

  fn settings(repos: Vec<Repository>) -> UserSettings {
    UserSettings {
      repositories: repos,
      ..UserSettings::defaults_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }
  }

  #[test]
  fn test_same_set_any_order_takes_remote() {
    let local = settings(vec![repo("a", "x"), repo("b", "y")]);
    let mut remote = settings(vec![repo("b", "y"), repo("a", "x")]);
    remote.notification_frequency = NotificationFrequency::Hourly;

    let result = reconcile(local, remote.clone());

    assert!(!result.needs_user_choice);
    assert_eq!(result.settings, remote);
    assert!(result.candidates.is_none());
  }

  #[test]
  fn test_same_set_ignores_other_repository_fields() {
    let mut described = repo("a", "x");
    described.description = Some("changed".to_string());
    described.id = "other".to_string();

    assert!(same_repositories(&[repo("a", "x")], &[described]));
  }

  #[test]
  fn test_different_sets_need_choice() {
    let local = settings(vec![repo("a", "x")]);
    let remote = settings(vec![repo("a", "x"), repo("c", "z")]);

    let result = reconcile(local.clone(), remote.clone());

    assert!(result.needs_user_choice);
    assert_eq!(result.settings, local);
    assert_eq!(
      result.candidates,
      Some(Candidates {
        local,
        remote
      })
    );
  }

  #[test]
  fn test_merge_keeps_local_copy_of_shared_repo() {
    let mut local_b = repo("o", "b");
    local_b.description = Some("local".to_string());
    let mut remote_b = repo("o", "b");
    remote_b.description = Some("remote".to_string());

    let local = settings(vec![repo("o", "a"), local_b.clone()]);
    let remote = settings(vec![remote_b, repo("o", "c")]);

    let merged = resolve(SyncChoice::Merge, &local, &remote);

    let keys: Vec<_> = merged.repositories.iter().map(|r| r.key()).collect();
    assert_eq!(keys, vec!["o/a", "o/b", "o/c"]);
    assert_eq!(merged.repositories[1], local_b);
  }

  #[test]
  fn test_keep_choices() {
    let local = settings(vec![repo("o", "a")]);
    let remote = settings(vec![repo("o", "c")]);

    assert_eq!(resolve(SyncChoice::KeepLocal, &local, &remote), local);
    assert_eq!(resolve(SyncChoice::KeepRemote, &local, &remote), remote);
  }
}
