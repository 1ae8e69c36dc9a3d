//! Resolves the network address of an installed release.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::process::Command;

/// Looks up the address a release's service listens on
#[async_trait]
pub trait Discovery: Send + Sync {
    /// `Ok(None)` when the release exposes no service
    async fn resolve(&self, release: &str) -> anyhow::Result<Option<String>>;
}

/// Fixed release to address table
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    addresses: HashMap<String, String>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, release: impl Into<String>, address: impl Into<String>) -> Self {
        self.addresses.insert(release.into(), address.into());
        self
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn resolve(&self, release: &str) -> anyhow::Result<Option<String>> {
        Ok(self.addresses.get(release).cloned())
    }
}

/// Queries the cluster for services labelled with the release name
#[derive(Debug, Clone, Default)]
pub struct KubernetesDiscovery {
    namespace: Option<String>,
}

impl KubernetesDiscovery {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }
}

#[async_trait]
impl Discovery for KubernetesDiscovery {
    async fn resolve(&self, release: &str) -> anyhow::Result<Option<String>> {
        let mut command = Command::new("kubectl");
        command
            .arg("get")
            .arg("services")
            .arg("-l")
            .arg(format!("app.kubernetes.io/instance={}", release))
            .arg("-o")
            .arg("json");
        if let Some(namespace) = &self.namespace {
            command.arg("--namespace").arg(namespace);
        }

        let output = command.output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "service lookup for {} failed: {}",
                release,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let list: Value = serde_json::from_slice(&output.stdout)?;
        let address = service_address(&list);
        tracing::debug!(release, address = ?address, "Resolved release");
        Ok(address)
    }
}

/// Render the first service of a service list as `<name>.<namespace>.svc.cluster.local:<port>`
pub fn service_address(list: &Value) -> Option<String> {
    let service = list.get("items")?.as_array()?.first()?;
    let metadata = service.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or("default");
    let port = service
        .get("spec")?
        .get("ports")?
        .as_array()?
        .first()?
        .get("port")?
        .as_u64()?;

    Some(format!("{}.{}.svc.cluster.local:{}", name, namespace, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_address() {
        let list = json!({
            "items": [
                {
                    "metadata": {"name": "map-controller", "namespace": "bench"},
                    "spec": {"ports": [{"name": "api", "port": 5679}]}
                },
                {
                    "metadata": {"name": "other", "namespace": "bench"},
                    "spec": {"ports": [{"port": 80}]}
                }
            ]
        });
        assert_eq!(
            service_address(&list).as_deref(),
            Some("map-controller.bench.svc.cluster.local:5679")
        );
    }

    #[test]
    fn test_service_address_empty() {
        assert_eq!(service_address(&json!({"items": []})), None);
        assert_eq!(service_address(&json!({})), None);
    }

    #[test]
    fn test_service_address_default_namespace() {
        let list = json!({
            "items": [{"metadata": {"name": "svc"}, "spec": {"ports": [{"port": 1}]}}]
        });
        assert_eq!(
            service_address(&list).as_deref(),
            Some("svc.default.svc.cluster.local:1")
        );
    }

    #[tokio::test]
    async fn test_static_discovery() {
        let discovery = StaticDiscovery::new().with("controller", "127.0.0.1:5000");
        assert_eq!(
            discovery.resolve("controller").await.unwrap().as_deref(),
            Some("127.0.0.1:5000")
        );
        assert_eq!(discovery.resolve("missing").await.unwrap(), None);
    }
}
