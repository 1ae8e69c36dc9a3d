//! Installs the map service and its storage cluster before a run.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::process::Command;

use crate::bench::config::BenchmarkConfig;

/// One chart release to install
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub chart: String,
    pub release: String,
    pub values: BTreeMap<String, Value>,
    pub wait: bool,
}

impl InstallRequest {
    /// Start a request for `chart`; the release defaults to the chart name
    pub fn chart(chart: impl Into<String>) -> Self {
        let chart = chart.into();
        Self {
            release: chart.clone(),
            chart,
            values: BTreeMap::new(),
            wait: false,
        }
    }

    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    /// Override a chart value by dotted path
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Block until the release's resources are ready
    pub fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

/// Installs releases into the target environment
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> anyhow::Result<()>;
}

/// Installs releases with `helm upgrade --install`
#[derive(Debug, Clone, Default)]
pub struct HelmProvisioner {
    namespace: Option<String>,
}

impl HelmProvisioner {
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    /// Command-line arguments passed to helm
    pub fn args(&self, request: &InstallRequest) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            request.release.clone(),
            request.chart.clone(),
        ];
        for (key, value) in &request.values {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, render_value(value)));
        }
        if request.wait {
            args.push("--wait".to_string());
        }
        if let Some(namespace) = &self.namespace {
            args.push("--namespace".to_string());
            args.push(namespace.clone());
        }
        args
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Provisioner for HelmProvisioner {
    async fn install(&self, request: &InstallRequest) -> anyhow::Result<()> {
        let args = self.args(request);
        tracing::info!(chart = %request.chart, release = %request.release, "Installing release");

        let output = Command::new("helm").args(&args).output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "helm install of {} failed: {}",
                request.release,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        tracing::debug!(release = %request.release, "Release installed");
        Ok(())
    }
}

/// Skips installation, for services that are already running
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn install(&self, request: &InstallRequest) -> anyhow::Result<()> {
        tracing::debug!(release = %request.release, "Skipping install");
        Ok(())
    }
}

/// Releases a benchmark suite needs, in install order
pub fn suite_charts(config: &BenchmarkConfig) -> Vec<InstallRequest> {
    let provision = &config.provision;
    vec![
        InstallRequest::chart(&provision.controller_chart)
            .release(&config.controller_release)
            .set("scope", "Namespace")
            .wait(true),
        InstallRequest::chart(&provision.database_chart)
            .release(&config.database)
            .set("clusters", provision.clusters)
            .set("partitions", provision.partitions)
            .set("backend.replicas", provision.replicas)
            .set("backend.image", provision.image.as_str())
            .wait(true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helm_args() {
        let request = InstallRequest::chart("charts/db")
            .release("db")
            .set("clusters", 3)
            .set("backend.image", "replica:1")
            .wait(true);

        let args = HelmProvisioner::new(Some("bench".to_string())).args(&request);
        assert_eq!(
            args,
            vec![
                "upgrade",
                "--install",
                "db",
                "charts/db",
                "--set",
                "backend.image=replica:1",
                "--set",
                "clusters=3",
                "--wait",
                "--namespace",
                "bench",
            ]
        );
    }

    #[test]
    fn test_release_defaults_to_chart() {
        let request = InstallRequest::chart("map-controller");
        assert_eq!(request.release, "map-controller");
        assert!(!request.wait);
        assert!(HelmProvisioner::default().args(&request).len() == 4);
    }

    #[test]
    fn test_suite_charts() {
        let config = BenchmarkConfig::default();
        let charts = suite_charts(&config);
        assert_eq!(charts.len(), 2);

        assert_eq!(charts[0].release, "map-controller");
        assert_eq!(charts[0].values["scope"], "Namespace");

        let database = &charts[1];
        assert_eq!(database.release, "map-database");
        assert_eq!(database.values["clusters"], 3);
        assert_eq!(database.values["partitions"], 10);
        assert_eq!(database.values["backend.replicas"], 3);
        assert!(database.wait);
    }

    #[tokio::test]
    async fn test_noop_provisioner() {
        let request = InstallRequest::chart("anything");
        assert!(NoopProvisioner.install(&request).await.is_ok());
    }
}
