//! Namespace name cleanup applied before a name is used as an index key.

use apollo_sdk::constants::PROPERTIES_SUFFIX;

use crate::watch_keys::AppNamespaceMetadata;

/// Strip a trailing `.properties`, in any letter case.
pub fn filter_namespace_name(name: &str) -> &str {
    let suffix_len = PROPERTIES_SUFFIX.len();
    if name.len() > suffix_len
        && name.is_char_boundary(name.len() - suffix_len)
        && name[name.len() - suffix_len..].eq_ignore_ascii_case(PROPERTIES_SUFFIX)
    {
        &name[..name.len() - suffix_len]
    } else {
        name
    }
}

/// Canonical spelling of `name`: the app's own namespace first, then a
/// public namespace of that name, else `name` unchanged.
pub fn normalize_namespace(metadata: &dyn AppNamespaceMetadata, app_id: &str, name: &str) -> String {
    if let Some(owned) = metadata.find_by_app_and_name(app_id, name) {
        return owned.name;
    }
    if let Some(public) = metadata.find_public_by_name(name) {
        return public.name;
    }
    name.to_string()
}

/// [`filter_namespace_name`] followed by [`normalize_namespace`].
pub fn canonical_namespace(
    metadata: &dyn AppNamespaceMetadata,
    app_id: &str,
    name: &str,
) -> String {
    normalize_namespace(metadata, app_id, filter_namespace_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::AppNamespace;
    use crate::testutils::static_metadata;

    #[test]
    fn strips_properties_suffix_case_insensitively() {
        assert_eq!(filter_namespace_name("app.properties"), "app");
        assert_eq!(filter_namespace_name("app.PROPERTIES"), "app");
        assert_eq!(filter_namespace_name("app.yaml"), "app.yaml");
        assert_eq!(filter_namespace_name(".properties"), ".properties");
        assert_eq!(filter_namespace_name("app"), "app");
    }

    #[test]
    fn normalizes_to_stored_spelling() {
        let metadata = static_metadata(vec![
            AppNamespace::new(1, "A1", "Application", false),
            AppNamespace::new(2, "shared", "Common.DB", true),
        ]);
        assert_eq!(normalize_namespace(metadata.as_ref(), "A1", "application"), "Application");
        assert_eq!(normalize_namespace(metadata.as_ref(), "A1", "common.db"), "Common.DB");
        assert_eq!(normalize_namespace(metadata.as_ref(), "A1", "unknown"), "unknown");
        assert_eq!(
            canonical_namespace(metadata.as_ref(), "A1", "APPLICATION.properties"),
            "Application"
        );
    }
}
