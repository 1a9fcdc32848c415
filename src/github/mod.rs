pub mod api_types;
pub mod cached_fetcher;
pub mod client;
pub mod error;
pub mod fetcher;
pub mod types;

pub use cached_fetcher::{issue_cache_key, CachedIssueFetcher};
pub use client::GithubClient;
pub use error::GithubError;
pub use fetcher::IssueFetcher;
pub use types::{Issue, IssueState, RepoSlug, Repository};
