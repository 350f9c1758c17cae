//! Application state shared across all request handlers.

use apollo_core::processors::{ConfigFileCache, NotificationService, ReleaseMessageCache};
use std::sync::Arc;

/// Cloneable handles to the components the handlers talk to.
#[derive(Clone)]
pub struct AppState {
    pub notifications: Arc<NotificationService>,
    pub config_files: Arc<ConfigFileCache>,
    /// Consulted by `/ready`.
    pub release_messages: Arc<ReleaseMessageCache>,
}

impl AppState {
    pub fn new(
        notifications: Arc<NotificationService>,
        config_files: Arc<ConfigFileCache>,
        release_messages: Arc<ReleaseMessageCache>,
    ) -> Self {
        Self {
            notifications,
            config_files,
            release_messages,
        }
    }
}
