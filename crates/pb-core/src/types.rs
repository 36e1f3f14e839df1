//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// How local traffic is bridged into the cluster.
///
/// Selected once from the command line and passed by value; each variant
/// carries its own bridge-setup and forwarding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyMethod {
    /// Run the user command inside a local container wired to the pod
    Container,
    /// Capture all outbound TCP on the machine (sshuttle-style VPN)
    VpnTcp,
    /// Inject a SOCKS proxy into the user command via LD_PRELOAD
    InjectTcp,
}

impl ProxyMethod {
    /// Whether this method needs the platform-specific network bridge so
    /// an isolated container can reach the tunnel's loopback port.
    pub fn needs_bridge(&self) -> bool {
        matches!(self, ProxyMethod::Container)
    }

    /// Whether port exposure happens inside the local container instead
    /// of via a host-side reverse-forward invocation.
    pub fn exposes_in_container(&self) -> bool {
        matches!(self, ProxyMethod::Container)
    }

    /// Whether outbound traffic is tunneled through the remote SOCKS
    /// proxy, requiring a local-forward relay.
    pub fn wants_socks_relay(&self) -> bool {
        matches!(self, ProxyMethod::InjectTcp)
    }

    /// Known limitations of this method, shown at startup when attached
    /// to a terminal. Empty for the container method.
    pub fn limitations(&self) -> &'static str {
        match self {
            ProxyMethod::Container => "",
            ProxyMethod::VpnTcp => {
                "All processes are affected, only one podbridge can run per \
                 machine, and you can't use other VPNs. You may need to add \
                 cloud hosts with --also-proxy."
            }
            ProxyMethod::InjectTcp => {
                "Go programs, static binaries, suid programs, and custom DNS \
                 implementations are not supported."
            }
        }
    }
}

impl fmt::Display for ProxyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMethod::Container => write!(f, "container"),
            ProxyMethod::VpnTcp => write!(f, "vpn-tcp"),
            ProxyMethod::InjectTcp => write!(f, "inject-tcp"),
        }
    }
}

impl std::str::FromStr for ProxyMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(ProxyMethod::Container),
            "vpn-tcp" => Ok(ProxyMethod::VpnTcp),
            "inject-tcp" => Ok(ProxyMethod::InjectTcp),
            other => Err(format!("unknown method '{}'", other)),
        }
    }
}

/// Which cluster CLI we are driving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterFlavor {
    /// Plain Kubernetes, driven via `kubectl`
    Kubernetes,
    /// OpenShift Origin, driven via `oc`
    OpenShift,
}

impl ClusterFlavor {
    /// Name of the cluster CLI binary
    pub fn command(&self) -> &'static str {
        match self {
            ClusterFlavor::Kubernetes => "kubectl",
            ClusterFlavor::OpenShift => "oc",
        }
    }
}

/// Kind of controller object backing the proxy pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentKind {
    Deployment,
    /// OpenShift's DeploymentConfig
    DeploymentConfig,
    /// OpenShift swap operates on the ReplicationController instead,
    /// because mutating a DeploymentConfig doesn't stick
    ReplicationController,
}

impl DeploymentKind {
    /// The resource name understood by the cluster CLI
    pub fn resource(&self) -> &'static str {
        match self {
            DeploymentKind::Deployment => "deployment",
            DeploymentKind::DeploymentConfig => "deploymentconfig",
            DeploymentKind::ReplicationController => "rc",
        }
    }

    /// Pick the controller kind to query for a given cluster flavor and
    /// whether a deployment swap occurred.
    pub fn select(flavor: ClusterFlavor, swapped: bool) -> Self {
        match flavor {
            ClusterFlavor::Kubernetes => DeploymentKind::Deployment,
            ClusterFlavor::OpenShift if swapped => DeploymentKind::ReplicationController,
            ClusterFlavor::OpenShift => DeploymentKind::DeploymentConfig,
        }
    }
}

/// The resolved pod/container identity a session operates against.
///
/// Immutable once obtained from the discovery collaborator.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    pub kind: DeploymentKind,
    /// Correlates a freshly created/swapped deployment with the pod it
    /// produced
    pub run_id: Option<String>,
}

/// One exposed service: (local port, remote port)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl std::str::FromStr for PortMapping {
    type Err = String;

    /// Parse "PORT" (same both sides) or "LOCAL:REMOTE"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| format!("invalid port '{}'", p))
        };
        match s.split_once(':') {
            Some((local, remote)) => Ok(PortMapping {
                local: parse(local)?,
                remote: parse(remote)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(PortMapping {
                    local: port,
                    remote: port,
                })
            }
        }
    }
}

/// The set of exposed services for one session
#[derive(Debug, Clone, Default)]
pub struct PortMappings(Vec<PortMapping>);

impl PortMappings {
    pub fn new(mappings: Vec<PortMapping>) -> Self {
        Self(mappings)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortMapping> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Remote ports in the set, used for the privileged-port check
    pub fn remote_ports(&self) -> Vec<u16> {
        self.0.iter().map(|m| m.remote).collect()
    }

    /// Merge TCP container ports discovered on a swapped deployment.
    /// Ports already exposed (on the remote side) are left alone.
    pub fn merge_automatic_ports(&mut self, ports: impl IntoIterator<Item = u16>) {
        for port in ports {
            if !self.0.iter().any(|m| m.remote == port) {
                self.0.push(PortMapping {
                    local: port,
                    remote: port,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_strategies() {
        assert!(ProxyMethod::Container.needs_bridge());
        assert!(ProxyMethod::Container.exposes_in_container());
        assert!(!ProxyMethod::Container.wants_socks_relay());

        assert!(!ProxyMethod::VpnTcp.needs_bridge());
        assert!(!ProxyMethod::VpnTcp.wants_socks_relay());

        assert!(ProxyMethod::InjectTcp.wants_socks_relay());
        assert!(!ProxyMethod::InjectTcp.exposes_in_container());
    }

    #[test]
    fn test_method_round_trip() {
        for method in [
            ProxyMethod::Container,
            ProxyMethod::VpnTcp,
            ProxyMethod::InjectTcp,
        ] {
            assert_eq!(method.to_string().parse::<ProxyMethod>(), Ok(method));
        }
        assert!("rsync".parse::<ProxyMethod>().is_err());
    }

    #[test]
    fn test_deployment_kind_selection() {
        assert_eq!(
            DeploymentKind::select(ClusterFlavor::Kubernetes, false),
            DeploymentKind::Deployment
        );
        assert_eq!(
            DeploymentKind::select(ClusterFlavor::Kubernetes, true),
            DeploymentKind::Deployment
        );
        assert_eq!(
            DeploymentKind::select(ClusterFlavor::OpenShift, false),
            DeploymentKind::DeploymentConfig
        );
        assert_eq!(
            DeploymentKind::select(ClusterFlavor::OpenShift, true),
            DeploymentKind::ReplicationController
        );
    }

    #[test]
    fn test_port_mapping_parse() {
        assert_eq!(
            "8080".parse::<PortMapping>().unwrap(),
            PortMapping {
                local: 8080,
                remote: 8080
            }
        );
        assert_eq!(
            "8080:80".parse::<PortMapping>().unwrap(),
            PortMapping {
                local: 8080,
                remote: 80
            }
        );
        assert!("http".parse::<PortMapping>().is_err());
        assert!("8080:".parse::<PortMapping>().is_err());
    }

    #[test]
    fn test_merge_automatic_ports() {
        let mut mappings = PortMappings::new(vec![PortMapping {
            local: 8080,
            remote: 80,
        }]);
        mappings.merge_automatic_ports([80, 443]);
        // 80 already exposed remotely, 443 added as identity mapping
        assert_eq!(mappings.remote_ports(), vec![80, 443]);
        assert_eq!(mappings.iter().count(), 2);
    }
}
