//! OAuth code exchange and token persistence.

use color_eyre::Result;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{JsonStore, KeyValueStore};
use crate::clock::Clock;
use crate::github::{GithubClient, GithubError};

pub const AUTH_KEY: &str = "willing-to-contribute-auth";
pub const DEFAULT_OAUTH_URL: &str = "https://github.com/login/oauth/access_token";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeRequest {
  pub code: Option<String>,
  pub installation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
  pub client_id: String,
  pub client_secret: String,
}

/// GitHub App identity used to mint installation tokens.
#[derive(Debug, Clone)]
pub struct AppCredentials {
  pub app_id: String,
  /// RSA private key, PEM encoded
  pub private_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  pub token_type: String,
  pub scope: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub installation_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
  #[error("Code parameter is required")]
  MissingCode,

  #[error("OAuth credentials are not configured")]
  Misconfigured,

  #[error("{0}")]
  Rejected(String),

  #[error("token exchange failed: {0}")]
  Transport(String),
}

impl AuthError {
  /// HTTP-style status for the failure.
  pub fn status_code(&self) -> u16 {
    match self {
      AuthError::MissingCode | AuthError::Rejected(_) => 400,
      AuthError::Misconfigured | AuthError::Transport(_) => 500,
    }
  }
}

#[derive(Serialize)]
struct OAuthRequest<'a> {
  client_id: &'a str,
  client_secret: &'a str,
  code: &'a str,
}

#[derive(Deserialize)]
struct OAuthReply {
  access_token: Option<String>,
  token_type: Option<String>,
  scope: Option<String>,
  error: Option<String>,
  error_description: Option<String>,
}

#[derive(Serialize)]
struct AppClaims<'a> {
  iat: i64,
  exp: i64,
  iss: &'a str,
}

pub struct TokenExchanger {
  http: reqwest::Client,
  oauth_url: Url,
  github: GithubClient,
  credentials: Option<OAuthCredentials>,
  app: Option<AppCredentials>,
  clock: Arc<dyn Clock>,
}

impl TokenExchanger {
  pub fn new(
    github: GithubClient,
    credentials: Option<OAuthCredentials>,
    app: Option<AppCredentials>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      oauth_url: Url::parse(DEFAULT_OAUTH_URL)?,
      github,
      credentials,
      app,
      clock,
    })
  }

  pub fn with_oauth_url(mut self, url: Url) -> Self {
    self.oauth_url = url;
    self
  }

  /// Trade an OAuth `code` for an access token. With an installation id and
  /// app credentials an installation token is attached; failing to mint it
  /// only drops that token.
  pub async fn exchange_code(&self, request: &ExchangeRequest) -> Result<TokenResponse, AuthError> {
    let code = request
      .code
      .as_deref()
      .filter(|c| !c.is_empty())
      .ok_or(AuthError::MissingCode)?;
    let credentials = self.credentials.as_ref().ok_or(AuthError::Misconfigured)?;

    let reply: OAuthReply = self
      .http
      .post(self.oauth_url.clone())
      .header(ACCEPT, "application/json")
      .json(&OAuthRequest {
        client_id: &credentials.client_id,
        client_secret: &credentials.client_secret,
        code,
      })
      .send()
      .await
      .map_err(|e| AuthError::Transport(e.to_string()))?
      .json()
      .await
      .map_err(|e| AuthError::Transport(e.to_string()))?;

    if let Some(error) = reply.error {
      warn!(error = %error, "GitHub OAuth error");
      return Err(AuthError::Rejected(
        reply
          .error_description
          .unwrap_or_else(|| "Failed to exchange code for token".to_string()),
      ));
    }

    let access_token = reply
      .access_token
      .ok_or_else(|| AuthError::Transport("response carried no access token".to_string()))?;

    let installation_token = match &request.installation_id {
      Some(id) => self.installation_token(id).await,
      None => None,
    };

    info!(installation = installation_token.is_some(), "exchanged OAuth code");
    Ok(TokenResponse {
      access_token,
      token_type: reply.token_type.unwrap_or_default(),
      scope: reply.scope.unwrap_or_default(),
      installation_token,
    })
  }

  async fn installation_token(&self, installation_id: &str) -> Option<String> {
    let Some(app) = &self.app else {
      warn!("installation id given but no GitHub App is configured");
      return None;
    };

    let jwt = match self.app_jwt(app) {
      Ok(jwt) => jwt,
      Err(e) => {
        warn!(error = %e, "failed to sign app token");
        return None;
      }
    };

    match self
      .github
      .create_installation_token(installation_id, &jwt)
      .await
    {
      Ok(token) => Some(token),
      Err(e) => {
        warn!(error = %e, "error getting installation token");
        None
      }
    }
  }

  /// RS256 app JWT, backdated a minute for clock drift and valid for nine.
  fn app_jwt(&self, app: &AppCredentials) -> Result<String> {
    let now = self.clock.now().timestamp();
    let claims = AppClaims {
      iat: now - 60,
      exp: now + 9 * 60,
      iss: &app.app_id,
    };
    let key = EncodingKey::from_rsa_pem(app.private_key.as_bytes())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
  }
}

pub fn save_token(storage: &dyn KeyValueStore, token: &TokenResponse) -> Result<()> {
  storage.save_json(AUTH_KEY, token)
}

/// Stored access token, if any.
pub fn load_token(storage: &dyn KeyValueStore) -> Result<Option<String>> {
  Ok(
    storage
      .load_json::<TokenResponse>(AUTH_KEY)?
      .map(|t| t.access_token)
      .filter(|t| !t.is_empty()),
  )
}

pub fn clear_token(storage: &dyn KeyValueStore) -> Result<()> {
  storage.remove(AUTH_KEY)
}

/// Check a stored token against GitHub and forget it when GitHub answers 401.
///
/// Returns whether the token is still usable. Network or other API failures
/// keep the token.
pub async fn verify_stored_token(
  storage: &dyn KeyValueStore,
  github: &GithubClient,
) -> Result<bool> {
  match github.get_authenticated_user().await {
    Ok(user) => {
      debug!(login = %user.login, "stored token accepted");
      Ok(true)
    }
    Err(GithubError::Api { status: 401, .. }) => {
      warn!("stored GitHub token was rejected, signing out");
      clear_token(storage)?;
      Ok(false)
    }
    Err(e) => {
      warn!(error = %e, "could not verify stored token");
      Ok(true)
    }
  }
}
