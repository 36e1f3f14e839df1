//! Collaborator seams
//!
//! The orchestrator consumes cluster object discovery and deployment
//! manipulation only through these narrow interfaces.

use async_trait::async_trait;

use crate::error::ProxyError;
use crate::types::{DeploymentKind, RemoteIdentity};

/// Result of creating or swapping a backing deployment
#[derive(Debug, Clone)]
pub struct DeploymentRef {
    /// Name of the deployment the session should attach to
    pub deployment: String,
    /// Identifier correlating the deployment with the pod it produces
    pub run_id: String,
    /// Container spec of the replaced deployment, when swapping
    pub container_spec: Option<serde_json::Value>,
}

/// Resolves the pod/container identity behind a controller object
#[async_trait]
pub trait RemoteDiscovery: Send + Sync {
    /// Resolve the full remote identity for `deployment`.
    ///
    /// `run_id`, when present, narrows the search to the pod produced by
    /// a freshly created/swapped deployment.
    async fn resolve(
        &self,
        deployment: &str,
        kind: DeploymentKind,
        run_id: Option<&str>,
    ) -> Result<RemoteIdentity, ProxyError>;
}

/// Creates or swaps the backing deployment for a session
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    /// Create a fresh proxy deployment
    async fn create_new(&self, name: &str) -> Result<DeploymentRef, ProxyError>;

    /// Swap an existing deployment for the proxy image, returning the
    /// replaced container spec so its ports can be auto-exposed
    async fn swap(&self, name: &str) -> Result<DeploymentRef, ProxyError>;
}
