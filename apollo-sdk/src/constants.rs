//! Well-known names shared by server and clients.

/// Cluster used when a client does not name one, and the fallback for every
/// non-default cluster.
pub const DEFAULT_CLUSTER: &str = "default";

/// Namespace every app owns implicitly.
pub const DEFAULT_NAMESPACE: &str = "application";

/// Joins the parts of a watch key and of cache keys.
pub const KEY_SEPARATOR: &str = "+";

/// Sent by clients that have no app id of their own.
pub const NO_APPID_PLACEHOLDER: &str = "ApolloNoAppIdPlaceHolder";

/// Notification id a client reports before it has seen any notification.
pub const NOTIFICATION_ID_PLACEHOLDER: i64 = -1;

/// Gray rule wildcard matching every client IP.
pub const ALL_IP: &str = "*";

/// Suffix clients may append to a properties namespace name.
pub const PROPERTIES_SUFFIX: &str = ".properties";

/// Joins `parts` with [`KEY_SEPARATOR`].
pub fn join_key<S: AsRef<str>>(parts: &[S]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(KEY_SEPARATOR);
        }
        out.push_str(part.as_ref());
    }
    out
}
