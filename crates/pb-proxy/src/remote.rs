//! Thin cluster-CLI-backed collaborators
//!
//! The full discovery and deployment-management logic lives outside this
//! subsystem; these implementations cover exactly the narrow calls the
//! orchestrator consumes: "give me pod+container identity" and "create or
//! swap the backing deployment".

use async_trait::async_trait;
use serde::Deserialize;

use pb_core::error::{CommandError, ProxyError};
use pb_core::traits::{DeploymentManager, DeploymentRef, RemoteDiscovery};
use pb_core::types::{DeploymentKind, RemoteIdentity};

use crate::runner::Runner;

/// Label key correlating a created/swapped deployment with its pod
const RUN_ID_LABEL: &str = "telepresence";

/// Image run in the proxy pod
const PROXY_IMAGE: &str = "datawire/telepresence-k8s:0.75";

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    spec: PodSpec,
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    namespace: String,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodSpec {
    containers: Vec<Container>,
}

#[derive(Debug, Deserialize)]
struct Container {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

/// Resolves pod identity by listing pods through the cluster CLI
pub struct KubectlDiscovery {
    runner: Runner,
    context: Option<String>,
    namespace: Option<String>,
}

impl KubectlDiscovery {
    pub fn new(runner: Runner, context: Option<String>, namespace: Option<String>) -> Self {
        Self {
            runner,
            context,
            namespace,
        }
    }
}

#[async_trait]
impl RemoteDiscovery for KubectlDiscovery {
    async fn resolve(
        &self,
        deployment: &str,
        kind: DeploymentKind,
        run_id: Option<&str>,
    ) -> Result<RemoteIdentity, ProxyError> {
        let mut args = vec!["get", "pods", "-o", "json"];
        let selector;
        if let Some(run_id) = run_id {
            selector = format!("--selector={}={}", RUN_ID_LABEL, run_id);
            args.push(&selector);
        }
        let listing = self
            .runner
            .run_output(&self.runner.cluster_args(
                self.context.as_deref(),
                self.namespace.as_deref(),
                &args,
            ))
            .await?;
        let pods: PodList = serde_json::from_str(&listing).map_err(|e| CommandError {
            program: self.runner.cluster_cmd().to_string(),
            code: None,
            output: format!("unparseable pod listing: {}", e),
        })?;

        let pod = pods
            .items
            .into_iter()
            .find(|pod| {
                pod.status.phase == "Running"
                    && match run_id {
                        Some(run_id) => {
                            pod.metadata.labels.get(RUN_ID_LABEL).map(String::as_str)
                                == Some(run_id)
                        }
                        None => pod.metadata.name.starts_with(&format!("{}-", deployment)),
                    }
            })
            .ok_or_else(|| CommandError {
                program: self.runner.cluster_cmd().to_string(),
                code: None,
                output: format!("no running pod found for {} '{}'", kind.resource(), deployment),
            })?;

        // Prefer the container named after the deployment, else the first
        let container_name = pod
            .spec
            .containers
            .iter()
            .find(|c| c.name == deployment)
            .or_else(|| pod.spec.containers.first())
            .map(|c| c.name.clone())
            .ok_or_else(|| CommandError {
                program: self.runner.cluster_cmd().to_string(),
                code: None,
                output: format!("pod '{}' has no containers", pod.metadata.name),
            })?;

        Ok(RemoteIdentity {
            namespace: pod.metadata.namespace,
            pod_name: pod.metadata.name,
            container_name,
            kind,
            run_id: run_id.map(str::to_string),
        })
    }
}

/// Creates or swaps the backing deployment through the cluster CLI.
///
/// Restoring or deleting what it changed stays with the surrounding
/// deployment tooling; this only performs the calls the orchestrator
/// needs to get a proxy pod running.
pub struct KubectlDeployments {
    runner: Runner,
    context: Option<String>,
    namespace: Option<String>,
}

impl KubectlDeployments {
    pub fn new(runner: Runner, context: Option<String>, namespace: Option<String>) -> Self {
        Self {
            runner,
            context,
            namespace,
        }
    }

    fn args(&self, args: &[&str]) -> Vec<String> {
        self.runner
            .cluster_args(self.context.as_deref(), self.namespace.as_deref(), args)
    }
}

#[async_trait]
impl DeploymentManager for KubectlDeployments {
    async fn create_new(&self, name: &str) -> Result<DeploymentRef, ProxyError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.runner
            .run_check(&self.args(&[
                "run",
                name,
                &format!("--image={}", PROXY_IMAGE),
                "--restart=Always",
                &format!("--labels={}={}", RUN_ID_LABEL, run_id),
                "--port=8022",
            ]))
            .await?;
        Ok(DeploymentRef {
            deployment: name.to_string(),
            run_id,
            container_spec: None,
        })
    }

    async fn swap(&self, name: &str) -> Result<DeploymentRef, ProxyError> {
        let run_id = uuid::Uuid::new_v4().to_string();

        // Capture the original container spec before touching anything,
        // so its TCP ports can be auto-exposed
        let existing = self
            .runner
            .run_output(&self.args(&["get", "deployment", name, "-o", "json"]))
            .await?;
        let manifest: serde_json::Value =
            serde_json::from_str(&existing).map_err(|e| CommandError {
                program: self.runner.cluster_cmd().to_string(),
                code: None,
                output: format!("unparseable deployment manifest: {}", e),
            })?;
        let container_spec = manifest
            .pointer("/spec/template/spec/containers/0")
            .cloned();

        self.runner
            .run_check(&self.args(&["scale", "deployment", name, "--replicas=0"]))
            .await?;

        let proxy_name = format!("{}-{}", name, &run_id[..8]);
        self.runner
            .run_check(&self.args(&[
                "run",
                &proxy_name,
                &format!("--image={}", PROXY_IMAGE),
                "--restart=Always",
                &format!("--labels={}={}", RUN_ID_LABEL, run_id),
                "--port=8022",
            ]))
            .await?;

        Ok(DeploymentRef {
            deployment: proxy_name,
            run_id,
            container_spec,
        })
    }
}
