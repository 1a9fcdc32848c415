//! User settings: local persistence, gist mirroring and reconciliation.

pub mod gist;
pub mod reconcile;
pub mod service;
pub mod types;

pub use gist::{GistSettingsStore, RemoteSettingsStore};
pub use reconcile::{Reconciliation, SyncChoice};
pub use service::SettingsService;
pub use types::{NotificationFrequency, UserSettings};
