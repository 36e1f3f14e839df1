//! Platform network bridge
//!
//! `kubectl port-forward` only listens on loopback, so a container-
//! isolated local process cannot reach the tunnel port directly. On
//! Linux we relay from the docker bridge interface to loopback; on macOS
//! we add a loopback alias (Docker for Mac routes container-to-host
//! traffic through it) and relay on that.

use regex::Regex;

use pb_core::error::{ConfigError, ProxyError};
use pb_core::teardown::TeardownRegistry;

use crate::process::ProcessGroup;
use crate::runner::Runner;

/// Loopback alias used on macOS. Chosen from the RFC 6890 benchmarking
/// range so it cannot conflict with real IPs or local private networks.
pub const MAC_LOOPBACK_IP: &str = "198.18.0.254";

/// Interface the Docker daemon bridges containers onto (Linux)
const DOCKER_INTERFACE: &str = "docker0";

/// Make the tunnel's loopback port reachable from local containers.
///
/// Registers alias removal on the teardown registry where applicable and
/// appends the relay process to the group.
pub async fn setup_bridge(
    runner: &Runner,
    registry: &mut TeardownRegistry,
    group: &mut ProcessGroup,
    port: u16,
) -> Result<(), ProxyError> {
    let bridge_addr = if cfg!(target_os = "linux") {
        docker_interface_address(runner).await?
    } else {
        add_loopback_alias(runner, registry).await?
    };

    group.push(runner.spawn(vec![
        "socat".to_string(),
        format!("TCP4-LISTEN:{},bind={},reuseaddr,fork", port, bridge_addr),
        format!("TCP4:127.0.0.1:{}", port),
    ])?);
    Ok(())
}

/// Discover the docker bridge's IPv4 address, trying `ip addr` first and
/// falling back to `ifconfig`.
async fn docker_interface_address(runner: &Runner) -> Result<String, ProxyError> {
    let listing = match runner
        .run_output(&argv(&["ip", "addr", "show", "dev", DOCKER_INTERFACE]))
        .await
    {
        Ok(out) => out,
        Err(ProxyError::Spawn(_)) => {
            match runner.run_output(&argv(&["ifconfig", DOCKER_INTERFACE])).await {
                Ok(out) => out,
                Err(ProxyError::Spawn(_)) => {
                    return Err(ConfigError::NoInterfaceTool.into());
                }
                Err(other) => return Err(other),
            }
        }
        Err(other) => return Err(other),
    };
    first_ipv4(&listing)
        .ok_or_else(|| ConfigError::NoBridgeAddress(DOCKER_INTERFACE.to_string()).into())
}

/// Add the lo0 alias and schedule its removal at teardown
async fn add_loopback_alias(
    runner: &Runner,
    registry: &mut TeardownRegistry,
) -> Result<String, ProxyError> {
    runner
        .run_check(&argv(&["sudo", "ifconfig", "lo0", "alias", MAC_LOOPBACK_IP]))
        .await?;
    registry.register_async("remove lo0 alias", || {
        Box::pin(async {
            let status = tokio::process::Command::new("sudo")
                .args(["ifconfig", "lo0", "-alias", MAC_LOOPBACK_IP])
                .status()
                .await;
            match status {
                Ok(s) if s.success() => {}
                Ok(s) => tracing::warn!("removing lo0 alias exited with {}", s),
                Err(e) => tracing::warn!("failed to remove lo0 alias: {}", e),
            }
        })
    });
    Ok(MAC_LOOPBACK_IP.to_string())
}

/// First dotted-quad IPv4 address in an interface listing
fn first_ipv4(listing: &str) -> Option<String> {
    let re = Regex::new(r"\d+\.\d+\.\d+\.\d+").ok()?;
    re.find(listing).map(|m| m.as_str().to_string())
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_ADDR_OUTPUT: &str = "\
4: docker0: <NO-CARRIER,BROADCAST,MULTICAST,UP> mtu 1500 qdisc noqueue state DOWN group default
    link/ether 02:42:3f:5e:71:20 brd ff:ff:ff:ff:ff:ff
    inet 172.17.0.1/16 brd 172.17.255.255 scope global docker0
       valid_lft forever preferred_lft forever";

    const IFCONFIG_OUTPUT: &str = "\
docker0: flags=4099<UP,BROADCAST,MULTICAST>  mtu 1500
        inet 172.17.0.1  netmask 255.255.0.0  broadcast 172.17.255.255
        ether 02:42:3f:5e:71:20  txqueuelen 0  (Ethernet)";

    #[test]
    fn test_first_ipv4_from_ip_addr() {
        assert_eq!(first_ipv4(IP_ADDR_OUTPUT).unwrap(), "172.17.0.1");
    }

    #[test]
    fn test_first_ipv4_from_ifconfig() {
        assert_eq!(first_ipv4(IFCONFIG_OUTPUT).unwrap(), "172.17.0.1");
    }

    #[test]
    fn test_no_address_in_listing() {
        assert_eq!(first_ipv4("docker0: flags=4099 mtu 1500"), None);
        assert_eq!(first_ipv4(""), None);
    }

    #[test]
    fn test_mac_loopback_ip_is_benchmarking_range() {
        assert!(MAC_LOOPBACK_IP.starts_with("198.18."));
    }
}
