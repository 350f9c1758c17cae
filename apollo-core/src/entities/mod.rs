pub mod app_namespace;
pub mod gray_release_rule;
pub mod release;
pub mod release_message;

pub use app_namespace::AppNamespace;
pub use gray_release_rule::{GrayReleaseRule, GrayReleaseRuleItem};
pub use release::Release;
pub use release_message::ReleaseMessage;

/// Page size of every incremental table scan.
pub const SCAN_BATCH_SIZE: i64 = 500;
