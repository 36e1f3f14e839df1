//! Reverse port forwarding
//!
//! Opens the user-requested port mappings as `-R` reverse-forward specs
//! on one additional SSH invocation, so the remote pod can dial back to
//! services on the local host.

use std::io::IsTerminal;

use pb_core::error::ProxyError;
use pb_core::types::PortMappings;

use crate::process::ProcessGroup;
use crate::runner::Runner;
use crate::tunnel::SshTunnel;

/// Build the `-R` argument pairs for a mapping set
pub fn reverse_forward_args(mappings: &PortMappings) -> Vec<String> {
    let mut args = Vec::new();
    for mapping in mappings.iter() {
        args.push("-R".to_string());
        args.push(format!("*:{}:127.0.0.1:{}", mapping.remote, mapping.local));
    }
    args
}

/// Create SSH tunnels from the remote proxy pod to the local host.
///
/// An empty mapping set is a valid configuration: nothing is spawned and
/// an advisory is shown when attached to a terminal.
pub fn expose_local_services(
    runner: &Runner,
    group: &mut ProcessGroup,
    tunnel: &SshTunnel,
    mappings: &PortMappings,
) -> Result<(), ProxyError> {
    let tty = std::io::stderr().is_terminal();
    if mappings.is_empty() {
        if tty {
            eprintln!(
                "No traffic is being forwarded from the remote Deployment to \
                 your local machine. You can use the --expose option to \
                 specify which ports you want to forward."
            );
        }
        return Ok(());
    }
    if tty {
        for mapping in mappings.iter() {
            eprintln!(
                "Forwarding remote port {} to local port {}.",
                mapping.remote, mapping.local
            );
        }
        eprintln!();
    }
    group.push(tunnel.spawn_forwarding(runner, &reverse_forward_args(mappings))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::types::PortMapping;

    #[test]
    fn test_reverse_forward_args_shape() {
        let mappings = PortMappings::new(vec![
            PortMapping {
                local: 8080,
                remote: 80,
            },
            PortMapping {
                local: 9090,
                remote: 9090,
            },
        ]);
        assert_eq!(
            reverse_forward_args(&mappings),
            vec!["-R", "*:80:127.0.0.1:8080", "-R", "*:9090:127.0.0.1:9090"]
        );
    }

    #[test]
    fn test_empty_mapping_set_produces_no_args() {
        assert!(reverse_forward_args(&PortMappings::default()).is_empty());
    }
}
