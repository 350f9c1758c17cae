use std::collections::BTreeMap;
use std::sync::Arc;

use apollo_sdk::constants::{DEFAULT_CLUSTER, NO_APPID_PLACEHOLDER};
use async_trait::async_trait;
use tracing::debug;

use super::{ConfigRenderer, RenderError};
use crate::entities::Release;
use crate::processors::gray_release_rules::GrayReleaseLookup;
use crate::store::ReleaseSource;
use crate::watch_keys::AppNamespaceMetadata;

/// Serves the published release of a namespace, with cluster fallback,
/// gray branches, and public namespace inheritance.
pub struct ReleaseConfigRenderer {
    releases: Arc<dyn ReleaseSource>,
    metadata: Arc<dyn AppNamespaceMetadata>,
    gray: Arc<dyn GrayReleaseLookup>,
}

impl ReleaseConfigRenderer {
    pub fn new(
        releases: Arc<dyn ReleaseSource>,
        metadata: Arc<dyn AppNamespaceMetadata>,
        gray: Arc<dyn GrayReleaseLookup>,
    ) -> Self {
        Self {
            releases,
            metadata,
            gray,
        }
    }

    /// Release of `config_app_id`'s namespace for this client: the cluster,
    /// then the datacenter, then the default cluster.
    async fn find_release(
        &self,
        client_app_id: &str,
        client_ip: Option<&str>,
        config_app_id: &str,
        cluster: &str,
        namespace: &str,
        data_center: Option<&str>,
    ) -> Result<Option<Release>, RenderError> {
        if cluster != DEFAULT_CLUSTER {
            let release = self
                .find_release_in_cluster(client_app_id, client_ip, config_app_id, cluster, namespace)
                .await?;
            if release.is_some() {
                return Ok(release);
            }
        }

        if let Some(dc) = data_center.filter(|dc| !dc.is_empty() && *dc != cluster) {
            let release = self
                .find_release_in_cluster(client_app_id, client_ip, config_app_id, dc, namespace)
                .await?;
            if release.is_some() {
                return Ok(release);
            }
        }

        self.find_release_in_cluster(client_app_id, client_ip, config_app_id, DEFAULT_CLUSTER, namespace)
            .await
    }

    /// A gray branch release the client matches, else the latest active one.
    async fn find_release_in_cluster(
        &self,
        client_app_id: &str,
        client_ip: Option<&str>,
        config_app_id: &str,
        cluster: &str,
        namespace: &str,
    ) -> Result<Option<Release>, RenderError> {
        if let Some(release_id) =
            self.gray
                .find_release_id(client_app_id, client_ip, config_app_id, cluster, namespace)
        {
            if let Some(release) = self.releases.find_active_by_id(release_id).await? {
                debug!(release_id, app_id = %config_app_id, cluster, namespace, "Serving gray release");
                return Ok(Some(release));
            }
        }
        Ok(self
            .releases
            .find_latest_active(config_app_id, cluster, namespace)
            .await?)
    }
}

#[async_trait]
impl ConfigRenderer for ReleaseConfigRenderer {
    async fn render_config(
        &self,
        app_id: &str,
        cluster: &str,
        namespace: &str,
        data_center: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<Option<BTreeMap<String, String>>, RenderError> {
        // Lowest precedence first.
        let mut layers: Vec<Release> = Vec::with_capacity(2);

        let owns_namespace = self.metadata.find_by_app_and_name(app_id, namespace).is_some();
        if !owns_namespace {
            if let Some(public) = self.metadata.find_public_by_name(namespace) {
                if public.app_id != app_id {
                    if let Some(release) = self
                        .find_release(app_id, client_ip, &public.app_id, cluster, &public.name, data_center)
                        .await?
                    {
                        layers.push(release);
                    }
                }
            }
        }

        if app_id != NO_APPID_PLACEHOLDER {
            if let Some(release) = self
                .find_release(app_id, client_ip, app_id, cluster, namespace, data_center)
                .await?
            {
                layers.push(release);
            }
        }

        if layers.is_empty() {
            return Ok(None);
        }

        let mut merged = BTreeMap::new();
        for release in layers {
            let configurations = release.parse_configurations().map_err(|source| {
                RenderError::MalformedConfigurations {
                    release_id: release.id,
                    source,
                }
            })?;
            merged.extend(configurations);
        }
        Ok(Some(merged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AppNamespace, GrayReleaseRule};
    use crate::processors::gray_release_rules::GrayReleaseRulesHolder;
    use crate::testutils::{InMemoryReleases, static_metadata};

    struct Fixture {
        releases: Arc<InMemoryReleases>,
        gray: Arc<GrayReleaseRulesHolder>,
        renderer: ReleaseConfigRenderer,
    }

    fn fixture() -> Fixture {
        let releases = Arc::new(InMemoryReleases::new());
        let gray = Arc::new(GrayReleaseRulesHolder::new());
        let metadata = static_metadata(vec![
            AppNamespace::new(1, "A1", "app", false),
            AppNamespace::new(2, "shared", "common", true),
        ]);
        let renderer = ReleaseConfigRenderer::new(releases.clone(), metadata, gray.clone());
        Fixture {
            releases,
            gray,
            renderer,
        }
    }

    async fn render(fx: &Fixture, cluster: &str, ns: &str, dc: Option<&str>, ip: Option<&str>) -> Option<BTreeMap<String, String>> {
        fx.renderer
            .render_config("A1", cluster, ns, dc, ip)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_release_is_not_found() {
        let fx = fixture();
        assert_eq!(render(&fx, "default", "app", None, None).await, None);
    }

    #[tokio::test]
    async fn falls_back_from_cluster_to_datacenter_to_default() {
        let fx = fixture();
        fx.releases.publish(1, "A1", "default", "app", r#"{"from":"default"}"#);
        let cfg = render(&fx, "blue", "app", Some("dc1"), None).await.unwrap();
        assert_eq!(cfg["from"], "default");

        fx.releases.publish(2, "A1", "dc1", "app", r#"{"from":"dc1"}"#);
        let cfg = render(&fx, "blue", "app", Some("dc1"), None).await.unwrap();
        assert_eq!(cfg["from"], "dc1");

        fx.releases.publish(3, "A1", "blue", "app", r#"{"from":"blue"}"#);
        let cfg = render(&fx, "blue", "app", Some("dc1"), None).await.unwrap();
        assert_eq!(cfg["from"], "blue");
    }

    #[tokio::test]
    async fn latest_non_abandoned_release_wins() {
        let fx = fixture();
        fx.releases.publish(1, "A1", "default", "app", r#"{"v":"1"}"#);
        fx.releases.publish(2, "A1", "default", "app", r#"{"v":"2"}"#);
        fx.releases.abandon(2);
        let cfg = render(&fx, "default", "app", None, None).await.unwrap();
        assert_eq!(cfg["v"], "1");
    }

    #[tokio::test]
    async fn app_overrides_inherited_public_namespace() {
        let fx = fixture();
        fx.releases.publish(1, "shared", "default", "common", r#"{"a":"public","b":"public"}"#);
        fx.releases.publish(2, "A1", "default", "common", r#"{"b":"private"}"#);
        let cfg = render(&fx, "default", "common", None, None).await.unwrap();
        assert_eq!(cfg["a"], "public");
        assert_eq!(cfg["b"], "private");
    }

    #[tokio::test]
    async fn public_namespace_alone_is_served() {
        let fx = fixture();
        fx.releases.publish(1, "shared", "default", "common", r#"{"a":"public"}"#);
        let cfg = render(&fx, "default", "common", None, None).await.unwrap();
        assert_eq!(cfg["a"], "public");
    }

    #[tokio::test]
    async fn gray_client_gets_branch_release() {
        let fx = fixture();
        fx.releases.publish(1, "A1", "default", "app", r#"{"v":"main"}"#);
        fx.releases.publish(2, "A1", "default", "app", r#"{"v":"gray"}"#);
        fx.releases.publish(3, "A1", "default", "app", r#"{"v":"main2"}"#);
        fx.gray.replace_rules(&[GrayReleaseRule {
            id: 1,
            app_id: "A1".into(),
            cluster_name: "default".into(),
            namespace_name: "app".into(),
            branch_name: "gray".into(),
            rules: r#"[{"clientAppId":"A1","clientIpList":["10.0.0.1"]}]"#.into(),
            release_id: 2,
            branch_status: 1,
        }]);
        let gray = render(&fx, "default", "app", None, Some("10.0.0.1")).await.unwrap();
        assert_eq!(gray["v"], "gray");
        let main = render(&fx, "default", "app", None, Some("10.0.0.2")).await.unwrap();
        assert_eq!(main["v"], "main2");
    }

    #[tokio::test]
    async fn malformed_configurations_are_an_error() {
        let fx = fixture();
        fx.releases.publish(1, "A1", "default", "app", "not json");
        let err = fx
            .renderer
            .render_config("A1", "default", "app", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::MalformedConfigurations { release_id: 1, .. }));
    }
}
