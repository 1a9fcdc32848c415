//! Notifications for newly detected issues.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::github::Issue;

/// Something that can announce a newly detected issue.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn notify(&self, issue: &Issue);
}

/// Title shown for a new issue notification.
pub fn notification_title(issue: &Issue) -> String {
  format!("New Good First Issue in {}", issue.repository.key())
}

/// Prints notifications to stdout.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn notify(&self, issue: &Issue) {
    let title = notification_title(issue);
    info!(issue = %issue.key(), "{}", title);
    println!("{}\n  {}\n  {}", title, issue.title, issue.url);
  }
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
  text: String,
}

/// Posts notifications to a Slack/Discord-compatible webhook.
pub struct WebhookNotifier {
  http: reqwest::Client,
  url: String,
}

impl WebhookNotifier {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      http: reqwest::Client::new(),
      url: url.into(),
    }
  }
}

#[async_trait]
impl Notifier for WebhookNotifier {
  async fn notify(&self, issue: &Issue) {
    let payload = WebhookPayload {
      text: format!(
        "{}: {} {}",
        notification_title(issue),
        issue.title,
        issue.url
      ),
    };

    match self.http.post(&self.url).json(&payload).send().await {
      Ok(response) if response.status().is_success() => {}
      Ok(response) => {
        warn!(status = %response.status(), "webhook rejected notification");
      }
      Err(e) => warn!(error = %e, "failed to send webhook notification"),
    }
  }
}

/// Fans a notification out to several notifiers.
pub struct MultiNotifier {
  notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
  pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
    Self { notifiers }
  }
}

#[async_trait]
impl Notifier for MultiNotifier {
  async fn notify(&self, issue: &Issue) {
    for notifier in &self.notifiers {
      notifier.notify(issue).await;
    }
  }
}


#[cfg(test)]
mod tests {
  use super::testing::RecordingNotifier;
  use super::*;
  use crate::github::testing::{issue, repo};
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[test]
  fn test_title_includes_repository() {
    let hello = repo("octocat", "Hello-World");
    assert_eq!(
      notification_title(&issue(&hello, 1, 1)),
      "New Good First Issue in octocat/Hello-World"
    );
  }

  #[tokio::test]
  async fn test_webhook_posts_text() {
    let server = MockServer::start().await;
    let hello = repo("octocat", "Hello-World");
    let new_issue = issue(&hello, 1, 4);

    Mock::given(method("POST"))
      .and(path("/hook"))
      .and(body_json(serde_json::json!({
        "text": "New Good First Issue in octocat/Hello-World: Issue 4 https://github.com/octocat/Hello-World/issues/4"
      })))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    WebhookNotifier::new(format!("{}/hook", server.uri()))
      .notify(&new_issue)
      .await;
  }

  #[tokio::test]
  async fn test_webhook_failure_is_not_fatal() {
    let hello = repo("octocat", "Hello-World");
    WebhookNotifier::new("http://127.0.0.1:9/unreachable")
      .notify(&issue(&hello, 1, 1))
      .await;
  }

  #[tokio::test]
  async fn test_multi_notifier_fans_out() {
    let first = Arc::new(RecordingNotifier::default());
    let second = Arc::new(RecordingNotifier::default());
    let notifiers: Vec<Arc<dyn Notifier>> = vec![first.clone(), second.clone()];
    let multi = MultiNotifier::new(notifiers);
    let hello = repo("octocat", "Hello-World");

    multi.notify(&issue(&hello, 1, 3)).await;

    assert_eq!(first.seen(), vec!["octocat/Hello-World#3"]);
    assert_eq!(second.seen(), vec!["octocat/Hello-World#3"]);
  }
}
