//! Precheck phase
//!
//! Everything verified here happens before any mutating action: cluster
//! reachability, the SSH client being OpenSSH, and the helper
//! executables the chosen method needs. Any failure aborts with a
//! message and a non-zero exit.

use tokio::process::Command;

use pb_core::config::SessionConfig;
use pb_core::error::{ConfigError, ProxyError};
use pb_core::types::ProxyMethod;
use pb_proxy::Runner;

/// Pod name used purely as a reachability probe; `--ignore-not-found`
/// makes a missing pod a success.
const CONNECTIVITY_CHECK_POD: &str = "podbridge-connectivity-check";

/// Detect which cluster CLI to drive.
///
/// OpenShift clusters are driven via `oc`; anything else via `kubectl`.
pub async fn detect_flavor() -> pb_core::types::ClusterFlavor {
    let logged_in = Command::new("oc")
        .arg("whoami")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);
    if logged_in {
        pb_core::types::ClusterFlavor::OpenShift
    } else {
        pb_core::types::ClusterFlavor::Kubernetes
    }
}

/// Whether the target cluster looks like a local VM (minikube/minishift).
///
/// DNS capture loops back through the host there, which breaks the
/// vpn-tcp method with a plain `--deployment`.
pub fn detect_local_vm(context: Option<&str>) -> bool {
    matches!(context, Some("minikube") | Some("minishift"))
}

/// Make sure we can access the cluster at all
pub async fn check_cluster(runner: &Runner, config: &SessionConfig) -> Result<(), ProxyError> {
    runner
        .run_check(&runner.cluster_args(
            config.context.as_deref(),
            config.namespace.as_deref(),
            &["get", "pods", CONNECTIVITY_CHECK_POD, "--ignore-not-found"],
        ))
        .await
}

/// Verify the `ssh` binary is present and is the OpenSSH client
pub async fn check_ssh(runner: &Runner) -> Result<(), ProxyError> {
    let version = runner
        .run_output_combined(&["ssh".to_string(), "-V".to_string()])
        .await?;
    if !version.trim_start().starts_with("OpenSSH") {
        return Err(ConfigError::UnsupportedEnvironment(
            "'ssh' is not the OpenSSH client, apparently.".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Verify a helper executable is installed
pub async fn require_command(
    runner: &Runner,
    program: &str,
    hint: &str,
) -> Result<(), ProxyError> {
    match runner
        .run_check(&["which".to_string(), program.to_string()])
        .await
    {
        Ok(()) => Ok(()),
        Err(ProxyError::Command(_)) | Err(ProxyError::Spawn(_)) => {
            Err(ConfigError::MissingCommand {
                program: program.to_string(),
                hint: if hint.is_empty() {
                    String::new()
                } else {
                    format!(". {}", hint)
                },
            }
            .into())
        }
        Err(other) => Err(other),
    }
}

/// Run every precheck the session configuration calls for
pub async fn run_prechecks(runner: &Runner, config: &SessionConfig) -> Result<(), ProxyError> {
    check_cluster(runner, config).await?;
    check_ssh(runner).await?;

    require_command(runner, "torsocks", "Please install torsocks (v2.1 or later)").await?;
    if config.mount.is_requested() {
        require_command(runner, "sshfs", "").await?;
    }
    // sshuttle needs conntrack on Linux
    if cfg!(target_os = "linux") && config.method == ProxyMethod::VpnTcp {
        require_command(runner, "conntrack", "").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_local_vm() {
        assert!(detect_local_vm(Some("minikube")));
        assert!(detect_local_vm(Some("minishift")));
        assert!(!detect_local_vm(Some("gke_prod_us-east1_main")));
        assert!(!detect_local_vm(None));
    }
}
