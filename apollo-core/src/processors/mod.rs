//! Long-lived components of the config service.
//!
//! - `ReleaseMessageScanner`: tails the release message log, feeds listeners
//! - `ReleaseMessageCache`: latest message id per watch key
//! - `ConfigFileCache`: rendered config files, evicted per watch key
//! - `NotificationService`: parks long polls, wakes them on new messages
//! - `NotificationDispatcher`: wakes large poll sets in paced batches
//! - `AppNamespaceCache`: namespace ownership and public namespaces
//! - `GrayReleaseRulesHolder`: active gray release rules

pub mod app_namespace_cache;
pub mod config_file_cache;
pub mod gray_release_rules;
pub mod long_poll;
pub mod notification_dispatcher;
pub mod release_message_cache;
pub mod release_message_scanner;

pub use app_namespace_cache::AppNamespaceCache;
pub use config_file_cache::{ConfigFileCache, ConfigFileRequest};
pub use gray_release_rules::{GrayReleaseLookup, GrayReleasePredicate, GrayReleaseRulesHolder};
pub use long_poll::{NotificationService, PollError, PollOutcome, PollRequest};
pub use notification_dispatcher::{NotificationDispatcher, TokioClock};
pub use release_message_cache::{CacheState, ReleaseMessageCache, WarmUpError};
pub use release_message_scanner::{ListenerError, ReleaseMessageListener, ReleaseMessageScanner};
