use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// A tracked repository.
///
/// Identity is `owner/name` as supplied, never `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
  pub id: String,
  pub owner: String,
  pub name: String,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stargazers_count: Option<u64>,
}

impl Repository {
  /// `owner/name`, used as cache and lookup key.
  pub fn key(&self) -> String {
    format!("{}/{}", self.owner, self.name)
  }

  pub fn same_as(&self, other: &Repository) -> bool {
    self.owner == other.owner && self.name == other.name
  }

  pub fn matches(&self, slug: &RepoSlug) -> bool {
    self.owner == slug.owner && self.name == slug.name
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
  pub id: String,
  pub name: String,
  pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
  Open,
  Closed,
}

/// State filter for issue queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
  Open,
  All,
}

impl StateFilter {
  pub fn as_str(&self) -> &'static str {
    match self {
      StateFilter::Open => "open",
      StateFilter::All => "all",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
  pub id: String,
  pub number: u64,
  pub title: String,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<String>,
  #[serde(default)]
  pub labels: Vec<Label>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub state: IssueState,
  pub repository: Repository,
  /// Created after the last check; recomputed every refresh
  #[serde(default)]
  pub is_new: bool,
}

impl Issue {
  /// `owner/name#number`, stable identity across refreshes.
  pub fn key(&self) -> String {
    format!(
      "{}/{}#{}",
      self.repository.owner, self.repository.name, self.number
    )
  }
}

/// Authenticated GitHub user
#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
  pub login: String,
}

/// `owner/name` parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
  pub owner: String,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository URL: {0}")]
pub struct InvalidRepoSlug(pub String);

impl FromStr for RepoSlug {
  type Err = InvalidRepoSlug;

  /// Accepts `owner/repo`, `github.com/owner/repo` and
  /// `https://github.com/owner/repo`, with an optional trailing slash or `.git`.
  fn from_str(input: &str) -> Result<Self, Self::Err> {
    let invalid = || InvalidRepoSlug(input.to_string());
    let trimmed = input.trim();

    let path = if trimmed.contains("://") {
      let url = Url::parse(trimmed).map_err(|_| invalid())?;
      if url.host_str() != Some("github.com") && url.host_str() != Some("www.github.com") {
        return Err(invalid());
      }
      url.path().to_string()
    } else {
      trimmed
        .strip_prefix("www.github.com/")
        .or_else(|| trimmed.strip_prefix("github.com/"))
        .unwrap_or(trimmed)
        .to_string()
    };

    let segments: Vec<&str> = path
      .trim_matches('/')
      .split('/')
      .filter(|s| !s.is_empty())
      .collect();

    match segments.as_slice() {
      [owner, name] => {
        let name = name.strip_suffix(".git").unwrap_or(name);
        if name.is_empty() {
          return Err(invalid());
        }
        Ok(RepoSlug {
          owner: owner.to_string(),
          name: name.to_string(),
        })
      }
      _ => Err(invalid()),
    }
  }
}

impl fmt::Display for RepoSlug {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.owner, self.name)
  }
}
