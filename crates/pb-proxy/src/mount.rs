//! Remote filesystem mounts
//!
//! Mounts the proxy pod's filesystem locally over the tunnel with
//! `sshfs`, and registers the unmount on the teardown registry so the
//! mount point is released before the tunnel it rides on is torn down.

use std::path::{Path, PathBuf};

use pb_core::error::ProxyError;
use pb_core::teardown::TeardownRegistry;

use crate::runner::Runner;
use crate::tunnel::SshTunnel;

/// Mount the remote pod's root filesystem at `mount_dir`.
///
/// `allow_other` opens the mount to all users; needed in container mode
/// because the container's uid is unknown.
pub async fn mount_remote(
    runner: &Runner,
    registry: &mut TeardownRegistry,
    tunnel: &SshTunnel,
    mount_dir: &Path,
    allow_other: bool,
) -> Result<PathBuf, ProxyError> {
    let mut argv = vec![
        "sshfs".to_string(),
        "-p".to_string(),
        tunnel.port().to_string(),
        "-F".to_string(),
        "/dev/null".to_string(),
        "-oStrictHostKeyChecking=no".to_string(),
        "-oUserKnownHostsFile=/dev/null".to_string(),
    ];
    if allow_other {
        argv.push("-o".to_string());
        argv.push("allow_other".to_string());
    }
    argv.push("telepresence@127.0.0.1:/".to_string());
    argv.push(mount_dir.to_string_lossy().into_owned());

    runner.run_check(&argv).await?;

    let dir = mount_dir.to_path_buf();
    registry.register_async("unmount remote volumes", move || {
        Box::pin(async move {
            let status = tokio::process::Command::new(unmount_cmd())
                .args(unmount_args(&dir))
                .status()
                .await;
            match status {
                Ok(s) if s.success() => {
                    let _ = std::fs::remove_dir(&dir);
                }
                Ok(s) => tracing::warn!("unmount of {:?} exited with {}", dir, s),
                Err(e) => tracing::warn!("failed to unmount {:?}: {}", dir, e),
            }
        })
    });

    Ok(mount_dir.to_path_buf())
}

#[cfg(target_os = "linux")]
fn unmount_cmd() -> &'static str {
    "fusermount"
}

#[cfg(not(target_os = "linux"))]
fn unmount_cmd() -> &'static str {
    "umount"
}

#[cfg(target_os = "linux")]
fn unmount_args(dir: &Path) -> Vec<String> {
    vec!["-u".to_string(), dir.to_string_lossy().into_owned()]
}

#[cfg(not(target_os = "linux"))]
fn unmount_args(dir: &Path) -> Vec<String> {
    vec![dir.to_string_lossy().into_owned()]
}
