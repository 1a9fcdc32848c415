//! Serde-deserializable types matching GitHub REST API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs. Conversion into
//! domain types happens immediately on ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::{Issue, IssueState, Label, Repository};

/// Color assigned to labels that arrive without one.
pub const DEFAULT_LABEL_COLOR: &str = "gray";

// ============================================================================
// Repositories
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiOwner {
  pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiRepository {
  pub id: u64,
  pub name: String,
  pub owner: ApiOwner,
  pub html_url: String,
  pub description: Option<String>,
  pub stargazers_count: Option<u64>,
}

impl From<ApiRepository> for Repository {
  fn from(repo: ApiRepository) -> Self {
    Repository {
      id: repo.id.to_string(),
      owner: repo.owner.login,
      name: repo.name,
      url: repo.html_url,
      description: repo.description.filter(|d| !d.is_empty()),
      stargazers_count: repo.stargazers_count,
    }
  }
}

// ============================================================================
// Issues
// ============================================================================

/// Labels come back either as bare names or as full objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiLabel {
  Name(String),
  Object {
    id: Option<u64>,
    name: Option<String>,
    color: Option<String>,
  },
}

impl From<ApiLabel> for Label {
  fn from(label: ApiLabel) -> Self {
    match label {
      ApiLabel::Name(name) => Label {
        id: name.clone(),
        name,
        color: DEFAULT_LABEL_COLOR.to_string(),
      },
      ApiLabel::Object { id, name, color } => {
        let name = name.unwrap_or_default();
        Label {
          id: id.map(|id| id.to_string()).unwrap_or_else(|| name.clone()),
          name,
          color: color
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_LABEL_COLOR.to_string()),
        }
      }
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiIssue {
  pub id: u64,
  pub number: u64,
  pub title: String,
  pub html_url: String,
  pub body: Option<String>,
  #[serde(default)]
  pub labels: Vec<ApiLabel>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub state: IssueState,
}

impl ApiIssue {
  pub fn into_issue(self, repository: &Repository) -> Issue {
    Issue {
      id: self.id.to_string(),
      number: self.number,
      title: self.title,
      url: self.html_url,
      body: self.body.filter(|b| !b.is_empty()),
      labels: self.labels.into_iter().map(Label::from).collect(),
      created_at: self.created_at,
      updated_at: self.updated_at,
      state: self.state,
      repository: repository.clone(),
      is_new: false,
    }
  }
}

// ============================================================================
// Gists
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ApiGistFile {
  pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiGist {
  pub id: String,
  pub description: Option<String>,
  #[serde(default)]
  pub files: HashMap<String, ApiGistFile>,
}

#[derive(Debug, Serialize)]
pub struct GistFileContent<'a> {
  pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateGistRequest<'a> {
  pub description: &'a str,
  pub public: bool,
  pub files: HashMap<&'a str, GistFileContent<'a>>,
}

#[derive(Debug, Serialize)]
pub struct UpdateGistRequest<'a> {
  pub files: HashMap<&'a str, GistFileContent<'a>>,
}

// ============================================================================
// GitHub App installation tokens
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiInstallationToken {
  pub token: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_string_label_gets_gray() {
    let label: ApiLabel = serde_json::from_str(r#""good first issue""#).unwrap();
    let label = Label::from(label);

    assert_eq!(label.id, "good first issue");
    assert_eq!(label.name, "good first issue");
    assert_eq!(label.color, "gray");
  }

  #[test]
  fn test_object_label_keeps_fields() {
    let label: ApiLabel =
      serde_json::from_str(r#"{"id": 42, "name": "help wanted", "color": "008672"}"#).unwrap();
    let label = Label::from(label);

    assert_eq!(label.id, "42");
    assert_eq!(label.name, "help wanted");
    assert_eq!(label.color, "008672");
  }

  #[test]
  fn test_object_label_missing_fields() {
    let label: ApiLabel = serde_json::from_str(r#"{"id": 5}"#).unwrap();
    let label = Label::from(label);

    assert_eq!(label.name, "");
    assert_eq!(label.color, "gray");
  }
}
