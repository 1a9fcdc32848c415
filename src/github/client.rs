use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use super::api_types::{
  ApiGist, ApiInstallationToken, ApiIssue, ApiRepository, CreateGistRequest, GistFileContent,
  UpdateGistRequest,
};
use super::error::GithubError;
use super::types::{GithubUser, Issue, Repository, StateFilter};

/// Page size for list endpoints (GitHub's maximum).
pub const PER_PAGE: usize = 100;

const USER_AGENT: &str = concat!("gfit/", env!("CARGO_PKG_VERSION"));

/// GitHub REST API client
#[derive(Clone)]
pub struct GithubClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl GithubClient {
  pub fn new(api_url: &str, token: Option<String>) -> color_eyre::Result<Self> {
    // A trailing slash keeps Url::join from dropping the last path segment
    let base = if api_url.ends_with('/') {
      api_url.to_string()
    } else {
      format!("{}/", api_url)
    };
    let base_url = Url::parse(&base)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid GitHub API URL {}: {}", api_url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: token.filter(|t| !t.is_empty()),
    })
  }

  pub fn is_authenticated(&self) -> bool {
    self.token.is_some()
  }

  fn endpoint(&self, path: &str) -> Result<Url, GithubError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| GithubError::Network(format!("invalid endpoint {}: {}", path, e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let builder = self
      .http
      .request(method, url)
      .header(ACCEPT, "application/vnd.github+json")
      .header("X-GitHub-Api-Version", "2022-11-28");

    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send_json<T: DeserializeOwned>(
    &self,
    builder: RequestBuilder,
    what: &str,
  ) -> Result<T, GithubError> {
    let response = builder
      .send()
      .await
      .map_err(|e| GithubError::Network(e.to_string()))?;

    let response = check_status(response, what).await?;

    response.json().await.map_err(|e| GithubError::Malformed {
      what: what.to_string(),
      message: e.to_string(),
    })
  }

  /// Get repository details
  pub async fn get_repository(&self, owner: &str, name: &str) -> Result<Repository, GithubError> {
    let what = format!("repository {}/{}", owner, name);
    let url = self.endpoint(&format!("repos/{}/{}", owner, name))?;

    let repo: ApiRepository = self.send_json(self.request(Method::GET, url), &what).await?;
    Ok(repo.into())
  }

  /// List issues carrying `label`, following pagination to the last page.
  pub async fn list_issues(
    &self,
    repository: &Repository,
    label: &str,
    state: StateFilter,
  ) -> Result<Vec<Issue>, GithubError> {
    let what = format!("issues of {}", repository.key());
    let url = self.endpoint(&format!(
      "repos/{}/{}/issues",
      repository.owner, repository.name
    ))?;

    let mut all_issues = Vec::new();
    let mut page = 1u32;

    loop {
      let builder = self.request(Method::GET, url.clone()).query(&[
        ("labels", label.to_string()),
        ("state", state.as_str().to_string()),
        ("per_page", PER_PAGE.to_string()),
        ("page", page.to_string()),
      ]);

      let response: Vec<ApiIssue> = self.send_json(builder, &what).await?;
      let count = response.len();

      all_issues.extend(response.into_iter().map(|issue| issue.into_issue(repository)));

      // Check if we've fetched all issues
      if count < PER_PAGE {
        break;
      }
      page += 1;
    }

    debug!(
      repo = %repository.key(),
      label,
      count = all_issues.len(),
      "listed issues"
    );
    Ok(all_issues)
  }

  /// Get the user the token belongs to
  pub async fn get_authenticated_user(&self) -> Result<GithubUser, GithubError> {
    self.require_token()?;
    let url = self.endpoint("user")?;
    self
      .send_json(self.request(Method::GET, url), "authenticated user")
      .await
  }

  /// List all gists of the authenticated user
  pub async fn list_gists(&self) -> Result<Vec<ApiGist>, GithubError> {
    self.require_token()?;
    let url = self.endpoint("gists")?;

    let mut all_gists = Vec::new();
    let mut page = 1u32;

    loop {
      let builder = self.request(Method::GET, url.clone()).query(&[
        ("per_page", PER_PAGE.to_string()),
        ("page", page.to_string()),
      ]);

      let gists: Vec<ApiGist> = self.send_json(builder, "gists").await?;
      let count = gists.len();
      all_gists.extend(gists);

      if count < PER_PAGE {
        break;
      }
      page += 1;
    }

    Ok(all_gists)
  }

  /// Get a single gist including file contents
  pub async fn get_gist(&self, id: &str) -> Result<ApiGist, GithubError> {
    self.require_token()?;
    let url = self.endpoint(&format!("gists/{}", id))?;
    self
      .send_json(self.request(Method::GET, url), &format!("gist {}", id))
      .await
  }

  pub async fn create_gist(
    &self,
    description: &str,
    filename: &str,
    content: &str,
    public: bool,
  ) -> Result<ApiGist, GithubError> {
    self.require_token()?;
    let url = self.endpoint("gists")?;
    let body = CreateGistRequest {
      description,
      public,
      files: HashMap::from([(filename, GistFileContent { content })]),
    };

    self
      .send_json(self.request(Method::POST, url).json(&body), "new gist")
      .await
  }

  pub async fn update_gist(
    &self,
    id: &str,
    filename: &str,
    content: &str,
  ) -> Result<ApiGist, GithubError> {
    self.require_token()?;
    let url = self.endpoint(&format!("gists/{}", id))?;
    let body = UpdateGistRequest {
      files: HashMap::from([(filename, GistFileContent { content })]),
    };

    self
      .send_json(
        self.request(Method::PATCH, url).json(&body),
        &format!("gist {}", id),
      )
      .await
  }

  /// Mint an installation access token, authenticating as the app itself.
  pub async fn create_installation_token(
    &self,
    installation_id: &str,
    app_jwt: &str,
  ) -> Result<String, GithubError> {
    let url = self.endpoint(&format!("app/installations/{}/access_tokens", installation_id))?;
    let builder = self
      .http
      .post(url)
      .header(ACCEPT, "application/vnd.github+json")
      .header("X-GitHub-Api-Version", "2022-11-28")
      .bearer_auth(app_jwt);

    let token: ApiInstallationToken = self
      .send_json(builder, &format!("installation {}", installation_id))
      .await?;
    Ok(token.token)
  }

  fn require_token(&self) -> Result<(), GithubError> {
    if self.token.is_some() {
      Ok(())
    } else {
      Err(GithubError::Unauthenticated)
    }
  }
}

/// Map a non-success response to a `GithubError`.
///
/// A 403/429 with `x-ratelimit-remaining: 0` is a rate limit; the reset time
/// comes from `x-ratelimit-reset` (epoch seconds).
pub(crate) async fn check_status(response: Response, what: &str) -> Result<Response, GithubError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
    if let Some(error) = rate_limit_error(response.headers()) {
      return Err(error);
    }
  }

  if status == StatusCode::NOT_FOUND {
    return Err(GithubError::NotFound(what.to_string()));
  }

  let message = response
    .text()
    .await
    .unwrap_or_else(|_| "Unknown error".to_string());

  Err(GithubError::Api {
    status: status.as_u16(),
    what: what.to_string(),
    message,
  })
}

fn rate_limit_error(headers: &HeaderMap) -> Option<GithubError> {
  let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?;
  if remaining.trim() != "0" {
    return None;
  }

  let reset_time = headers
    .get("x-ratelimit-reset")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.trim().parse::<i64>().ok())
    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    .unwrap_or_else(Utc::now);

  Some(GithubError::RateLimited { reset_time })
}
