//! Multi-label issue fetching with OR semantics.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::client::GithubClient;
use super::error::GithubError;
use super::types::{Issue, Repository, StateFilter};

/// Anything that can list a repository's issues for a single label.
#[async_trait]
pub trait IssueSource: Send + Sync {
  async fn list_issues(
    &self,
    repository: &Repository,
    label: &str,
    state: StateFilter,
  ) -> Result<Vec<Issue>, GithubError>;
}

#[async_trait]
impl IssueSource for GithubClient {
  async fn list_issues(
    &self,
    repository: &Repository,
    label: &str,
    state: StateFilter,
  ) -> Result<Vec<Issue>, GithubError> {
    GithubClient::list_issues(self, repository, label, state).await
  }
}

/// Fetches issues matching any of a set of labels.
pub struct IssueFetcher {
  source: Arc<dyn IssueSource>,
}

impl IssueFetcher {
  pub fn new(source: Arc<dyn IssueSource>) -> Self {
    Self { source }
  }

  /// Fetch issues of `repository` carrying any of `labels`.
  ///
  /// One query per label runs concurrently; results are merged and
  /// deduplicated by remote id. An empty label set fetches nothing.
  ///
  /// Any failed query fails the whole repository, so a failure is never
  /// mistaken for an empty result. `RateLimited` comes back unmodified.
  pub async fn fetch_issues(
    &self,
    repository: &Repository,
    labels: &[String],
    include_closed: bool,
  ) -> Result<Vec<Issue>, GithubError> {
    if labels.is_empty() {
      return Ok(Vec::new());
    }

    let state = if include_closed {
      StateFilter::All
    } else {
      StateFilter::Open
    };

    let queries = labels
      .iter()
      .map(|label| self.source.list_issues(repository, label, state));

    let per_label = try_join_all(queries).await?;
    let issues = dedup_by_id(per_label.into_iter().flatten());
    info!(
      repo = %repository.key(),
      count = issues.len(),
      labels = %labels.join(", "),
      "found unique issues"
    );
    Ok(issues)
  }
}

/// Deduplicate by remote id. The first occurrence keeps its position and the
/// latest copy of the issue wins.
pub fn dedup_by_id(issues: impl IntoIterator<Item = Issue>) -> Vec<Issue> {
  let mut positions: HashMap<String, usize> = HashMap::new();
  let mut unique: Vec<Issue> = Vec::new();

  for issue in issues {
    match positions.get(&issue.id) {
      Some(&index) => unique[index] = issue,
      None => {
        positions.insert(issue.id.clone(), unique.len());
        unique.push(issue);
      }
    }
  }

  unique
}
