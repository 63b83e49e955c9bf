//! Membership sources: who is in the cohort right now.
//!
//! Both sources speak the Kubernetes `PodList` JSON shape, either straight from
//! `kubectl get pods -o json` or from a pre-fetched snapshot file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::time;
use tracing::debug;

use crate::config::EndpointFilter;
use crate::error::DirectoryError;
use crate::launcher::Launcher;
use crate::types::Endpoint;

#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    /// Eligible endpoints in source order. An empty result is not an error.
    async fn list(&self, filter: &EndpointFilter) -> Result<Vec<Endpoint>, DirectoryError>;
}

#[derive(Deserialize)]
struct PodList {
    items: Vec<Pod>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Pod {
    metadata: PodMetadata,
    spec: PodSpec,
    status: PodStatus,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PodMetadata {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PodSpec {
    node_name: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PodStatus {
    phase: String,
    #[serde(rename = "podIP")]
    pod_ip: String,
    #[serde(rename = "hostIP")]
    host_ip: String,
}

/// Decode a `PodList` document and keep the pods `filter` accepts.
pub fn decode_pod_list(json: &str, filter: &EndpointFilter) -> Result<Vec<Endpoint>, DirectoryError> {
    let list: PodList = serde_json::from_str(json)?;

    Ok(list
        .items
        .into_iter()
        .filter(|pod| filter.matches(&pod.metadata.name, &pod.status.phase))
        .filter(|pod| {
            if pod.status.pod_ip.is_empty() {
                debug!("skipping {}: no pod address yet", pod.metadata.name);
                return false;
            }
            true
        })
        .map(|pod| {
            Endpoint::new(
                pod.metadata.name,
                pod.status.pod_ip,
                pod.spec.node_name,
                pod.status.host_ip,
            )
        })
        .collect())
}

/// Lists pods by running `kubectl get pods -n <namespace> -o json`.
pub struct KubectlDirectory {
    launcher: Arc<dyn Launcher>,
    kubectl_path: String,
    timeout: Duration,
}

impl KubectlDirectory {
    pub fn new(launcher: Arc<dyn Launcher>, kubectl_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            launcher,
            kubectl_path: kubectl_path.into(),
            timeout,
        }
    }

    async fn fetch_document(&self, namespace: &str) -> Result<String, DirectoryError> {
        let args: Vec<String> = ["get", "pods", "-n", namespace, "-o", "json"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let mut launched = self.launcher.launch(&self.kubectl_path, &args)?;

        let mut document = String::new();
        while let Some(line) = launched.lines.next().await {
            let line = line.map_err(|e| DirectoryError::Unavailable(format!("reading kubectl output: {e}")))?;
            document.push_str(&line);
            document.push('\n');
        }

        if let Some(process) = launched.process {
            let status = process
                .wait()
                .await
                .map_err(|e| DirectoryError::Unavailable(format!("waiting for kubectl: {e}")))?;
            if !status.success() {
                return Err(DirectoryError::Unavailable(format!("kubectl exited with {status}")));
            }
        }

        Ok(document)
    }
}

#[async_trait]
impl EndpointDirectory for KubectlDirectory {
    async fn list(&self, filter: &EndpointFilter) -> Result<Vec<Endpoint>, DirectoryError> {
        let document = time::timeout(self.timeout, self.fetch_document(&filter.namespace))
            .await
            .map_err(|_| DirectoryError::Unavailable(format!("kubectl did not answer within {:?}", self.timeout)))??;
        decode_pod_list(&document, filter)
    }
}

/// Re-reads a pod-list snapshot file on every call.
pub struct SnapshotDirectory {
    path: PathBuf,
}

impl SnapshotDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EndpointDirectory for SnapshotDirectory {
    async fn list(&self, filter: &EndpointFilter) -> Result<Vec<Endpoint>, DirectoryError> {
        let document = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("{}: {e}", self.path.display())))?;
        decode_pod_list(&document, filter)
    }
}
