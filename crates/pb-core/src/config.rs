//! Immutable session configuration
//!
//! All recognized options are validated once, up front, and frozen into a
//! [`SessionConfig`] that the rest of the system consumes by reference.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::types::{ClusterFlavor, PortMappings, ProxyMethod};

/// How the backing deployment is obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Proxy to an existing deployment
    Existing(String),
    /// Create a fresh deployment for this session
    New(String),
    /// Swap out an existing deployment for the proxy image
    Swap(String),
}

impl Operation {
    /// The deployment name this operation targets
    pub fn deployment(&self) -> &str {
        match self {
            Operation::Existing(name) | Operation::New(name) | Operation::Swap(name) => name,
        }
    }

    pub fn is_swap(&self) -> bool {
        matches!(self, Operation::Swap(_))
    }
}

/// Filesystem-mount request for the remote volumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountRequest {
    /// No mount
    None,
    /// Mount under a fresh temporary directory
    Temp,
    /// Mount at a caller-chosen path
    At(PathBuf),
}

impl MountRequest {
    pub fn is_requested(&self) -> bool {
        !matches!(self, MountRequest::None)
    }
}

/// Frozen per-session configuration, constructed once after validation
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub method: ProxyMethod,
    pub operation: Operation,
    pub expose: PortMappings,
    /// Cluster context to pass to the cluster CLI, if not the default
    pub context: Option<String>,
    /// Namespace to pass to the cluster CLI, if not the default
    pub namespace: Option<String>,
    pub mount: MountRequest,
    pub flavor: ClusterFlavor,
    /// Log file receiving full diagnostic output for this session
    pub logfile: PathBuf,
    /// Whether exposing the requested ports requires running as root
    /// inside the remote pod
    pub needs_root: bool,
    /// Whether the cluster appears to be a local VM (minikube/minishift)
    pub in_local_vm: bool,
}

impl SessionConfig {
    /// Validate the raw option set and freeze it.
    ///
    /// Fails before any process is spawned when the flavor/port
    /// combination is invalid.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        method: ProxyMethod,
        operation: Operation,
        expose: PortMappings,
        context: Option<String>,
        namespace: Option<String>,
        mount: MountRequest,
        flavor: ClusterFlavor,
        logfile: PathBuf,
        in_local_vm: bool,
    ) -> Result<Self, ConfigError> {
        let wants_privileged = expose.remote_ports().iter().any(|&p| p < 1024);
        if wants_privileged && flavor == ClusterFlavor::OpenShift {
            // OpenShift doesn't support running as root
            return Err(ConfigError::PrivilegedPortsUnsupported);
        }

        if in_local_vm
            && method == ProxyMethod::VpnTcp
            && matches!(operation, Operation::Existing(_))
        {
            return Err(ConfigError::UnsupportedEnvironment(
                "vpn-tcp method doesn't work with minikube/minishift when \
                 using --deployment. Use --swap-deployment or --new-deployment \
                 instead."
                    .to_string(),
            ));
        }

        Ok(Self {
            method,
            operation,
            expose,
            context,
            namespace,
            mount,
            flavor,
            logfile,
            needs_root: wants_privileged,
            in_local_vm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortMapping;

    fn expose(ports: &[(u16, u16)]) -> PortMappings {
        PortMappings::new(
            ports
                .iter()
                .map(|&(local, remote)| PortMapping { local, remote })
                .collect(),
        )
    }

    fn build(
        method: ProxyMethod,
        operation: Operation,
        expose: PortMappings,
        flavor: ClusterFlavor,
        in_local_vm: bool,
    ) -> Result<SessionConfig, ConfigError> {
        SessionConfig::build(
            method,
            operation,
            expose,
            None,
            None,
            MountRequest::None,
            flavor,
            PathBuf::from("podbridge.log"),
            in_local_vm,
        )
    }

    #[test]
    fn test_privileged_port_on_openshift_rejected() {
        let err = build(
            ProxyMethod::VpnTcp,
            Operation::Existing("web".to_string()),
            expose(&[(8080, 80)]),
            ClusterFlavor::OpenShift,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PrivilegedPortsUnsupported));
    }

    #[test]
    fn test_privileged_port_on_kubernetes_needs_root() {
        let config = build(
            ProxyMethod::VpnTcp,
            Operation::Existing("web".to_string()),
            expose(&[(8080, 80)]),
            ClusterFlavor::Kubernetes,
            false,
        )
        .unwrap();
        assert!(config.needs_root);
    }

    #[test]
    fn test_unprivileged_ports_do_not_need_root() {
        let config = build(
            ProxyMethod::InjectTcp,
            Operation::New("web".to_string()),
            expose(&[(8080, 8080)]),
            ClusterFlavor::OpenShift,
            false,
        )
        .unwrap();
        assert!(!config.needs_root);
    }

    #[test]
    fn test_vpn_tcp_in_local_vm_requires_swap_or_new() {
        let err = build(
            ProxyMethod::VpnTcp,
            Operation::Existing("web".to_string()),
            expose(&[]),
            ClusterFlavor::Kubernetes,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedEnvironment(_)));

        // Swap in a local VM is fine
        build(
            ProxyMethod::VpnTcp,
            Operation::Swap("web".to_string()),
            expose(&[]),
            ClusterFlavor::Kubernetes,
            true,
        )
        .unwrap();
    }
}
