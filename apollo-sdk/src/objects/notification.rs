use serde::{Deserialize, Serialize};

use crate::constants::NOTIFICATION_ID_PLACEHOLDER;

/// One entry of the `notifications` query parameter sent by a polling client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(default)]
    pub namespace_name: String,
    #[serde(default = "default_notification_id")]
    pub notification_id: i64,
}

fn default_notification_id() -> i64 {
    NOTIFICATION_ID_PLACEHOLDER
}

impl NotificationRequest {
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
        }
    }
}

/// A watch key together with the latest release message id seen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub key: String,
    pub id: i64,
}

/// Tells a polling client that a namespace has changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigNotification {
    pub namespace_name: String,
    pub notification_id: i64,
    #[serde(default)]
    pub messages: Vec<NotificationMessage>,
}

impl ConfigNotification {
    pub fn new(namespace_name: impl Into<String>, notification_id: i64) -> Self {
        Self {
            namespace_name: namespace_name.into(),
            notification_id,
            messages: Vec::new(),
        }
    }

    /// Record `id` for `key`, keeping the larger id if the key is already present.
    pub fn add_message(&mut self, key: impl Into<String>, id: i64) {
        let key = key.into();
        match self.messages.iter_mut().find(|m| m.key == key) {
            Some(existing) => existing.id = existing.id.max(id),
            None => self.messages.push(NotificationMessage { key, id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_missing_id_to_placeholder() {
        let parsed: Vec<NotificationRequest> =
            serde_json::from_str(r#"[{"namespaceName":"application"}]"#).unwrap();
        assert_eq!(parsed[0].notification_id, NOTIFICATION_ID_PLACEHOLDER);
    }

    #[test]
    fn notification_serializes_camel_case() {
        let mut n = ConfigNotification::new("app", 100);
        n.add_message("A1+default+app", 100);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["namespaceName"], "app");
        assert_eq!(json["notificationId"], 100);
        assert_eq!(json["messages"][0]["key"], "A1+default+app");
    }

    #[test]
    fn add_message_keeps_larger_id() {
        let mut n = ConfigNotification::new("app", 7);
        n.add_message("k", 7);
        n.add_message("k", 3);
        assert_eq!(n.messages, vec![NotificationMessage { key: "k".into(), id: 7 }]);
    }
}
