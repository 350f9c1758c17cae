pub mod config_file;
pub mod notification;

pub use config_file::ConfigFileFormat;
pub use notification::{ConfigNotification, NotificationMessage, NotificationRequest};
