//! Settings mirrored to a private GitHub gist.

use async_trait::async_trait;
use tracing::debug;

use super::types::UserSettings;
use crate::github::{GithubClient, GithubError};

/// Description used to find the settings gist among the user's gists.
pub const GIST_DESCRIPTION: &str = "Willing to Contribute Settings";
pub const GIST_FILENAME: &str = "willing-to-contribute-settings.json";

/// Remote copy of the user's settings.
#[async_trait]
pub trait RemoteSettingsStore: Send + Sync {
  /// `Ok(None)` when no remote copy exists yet.
  async fn load(&self) -> Result<Option<UserSettings>, GithubError>;

  async fn save(&self, settings: &UserSettings) -> Result<(), GithubError>;
}

pub struct GistSettingsStore {
  client: GithubClient,
}

impl GistSettingsStore {
  pub fn new(client: GithubClient) -> Self {
    Self { client }
  }

  async fn find_gist_id(&self) -> Result<Option<String>, GithubError> {
    let gists = self.client.list_gists().await?;
    Ok(
      gists
        .into_iter()
        .find(|g| g.description.as_deref() == Some(GIST_DESCRIPTION))
        .map(|g| g.id),
    )
  }
}

#[async_trait]
impl RemoteSettingsStore for GistSettingsStore {
  async fn load(&self) -> Result<Option<UserSettings>, GithubError> {
    let Some(id) = self.find_gist_id().await? else {
      debug!("no settings gist found");
      return Ok(None);
    };

    let gist = self.client.get_gist(&id).await?;
    let Some(content) = gist
      .files
      .get(GIST_FILENAME)
      .and_then(|f| f.content.as_deref())
      .filter(|c| !c.is_empty())
    else {
      return Ok(None);
    };

    serde_json::from_str(content)
      .map(Some)
      .map_err(|e| GithubError::Malformed {
        what: format!("gist {}", id),
        message: e.to_string(),
      })
  }

  async fn save(&self, settings: &UserSettings) -> Result<(), GithubError> {
    let content = serde_json::to_string(settings).map_err(|e| GithubError::Malformed {
      what: "settings".to_string(),
      message: e.to_string(),
    })?;

    match self.find_gist_id().await? {
      Some(id) => {
        self.client.update_gist(&id, GIST_FILENAME, &content).await?;
      }
      None => {
        self
          .client
          .create_gist(GIST_DESCRIPTION, GIST_FILENAME, &content, false)
          .await?;
      }
    }

    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};
  use serde_json::json;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer) -> GithubClient {
    GithubClient::new(&server.uri(), Some("token".to_string())).unwrap()
  }

  #[tokio::test]
  async fn test_load_finds_gist_by_description() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/gists"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": "other", "description": "notes", "files": {}},
        {"id": "abc", "description": GIST_DESCRIPTION, "files": {}}
      ])))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/gists/abc"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "id": "abc",
        "description": GIST_DESCRIPTION,
        "files": {
          GIST_FILENAME: {"content": "{\"customLabels\":[\"easy\"],\"notificationFrequency\":\"hourly\"}"}
        }
      })))
      .mount(&server)
      .await;

    let store = GistSettingsStore::new(client(&server));
    let settings = store.load().await.unwrap().unwrap();

    assert_eq!(settings.custom_labels, vec!["easy"]);
  }

  #[tokio::test]
  async fn test_load_without_gist_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/gists"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
      .mount(&server)
      .await;

    let store = GistSettingsStore::new(client(&server));
    assert_eq!(store.load().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_save_creates_gist_when_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/gists"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/gists"))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({
        "id": "new", "description": GIST_DESCRIPTION, "files": {}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let store = GistSettingsStore::new(client(&server));
    let settings = UserSettings::defaults_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

    store.save(&settings).await.unwrap();
  }

  #[tokio::test]
  async fn test_save_updates_existing_gist() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/gists"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": "abc", "description": GIST_DESCRIPTION, "files": {}}
      ])))
      .mount(&server)
      .await;
    Mock::given(method("PATCH"))
      .and(path("/gists/abc"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "id": "abc", "description": GIST_DESCRIPTION, "files": {}
      })))
      .expect(1)
      .mount(&server)
      .await;

    let store = GistSettingsStore::new(client(&server));
    let settings = UserSettings::defaults_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

    store.save(&settings).await.unwrap();
  }
}
