//! Session lifecycle
//!
//! Drives one proxy session end to end: start the proxy, mount remote
//! volumes if asked, hand off to the launcher, and leave every cleanup
//! action on the teardown registry for the caller to run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pb_core::config::{MountRequest, SessionConfig};
use pb_core::teardown::TeardownRegistry;
use pb_core::types::ProxyMethod;
use pb_proxy::remote::{KubectlDeployments, KubectlDiscovery};
use pb_proxy::session::start_proxy;
use pb_proxy::{mount_remote, Runner};

use crate::launch;

/// Run one full session and return the exit code to report.
///
/// Teardown actions accumulate on `registry` as the session is
/// assembled; the caller runs them unconditionally afterwards, so this
/// function never cleans up on its own.
pub async fn run(
    config: &SessionConfig,
    run_cmd: &[String],
    cancel: &CancellationToken,
    registry: &mut TeardownRegistry,
) -> Result<i32> {
    let runner = Runner::new(config.flavor, config.logfile.clone());
    let session_span = runner.span("session");
    registry.register("close session span", move || session_span.end());

    let discovery = KubectlDiscovery::new(
        runner.clone(),
        config.context.clone(),
        config.namespace.clone(),
    );
    let deployments = KubectlDeployments::new(
        runner.clone(),
        config.context.clone(),
        config.namespace.clone(),
    );

    let session = tokio::select! {
        result = start_proxy(&runner, registry, config, &discovery, &deployments) => {
            result.context("failed to start the proxy")?
        }
        _ = cancel.cancelled() => {
            tracing::info!("shutdown requested during startup");
            return Ok(0);
        }
    };

    let mount_dir = match &config.mount {
        MountRequest::None => None,
        request => {
            let dir = resolve_mount_dir(request)?;
            let allow_other = config.method == ProxyMethod::Container;
            mount_remote(&runner, registry, &session.tunnel, &dir, allow_other)
                .await
                .context("failed to mount remote volumes")?;
            Some(dir)
        }
    };

    match config.method {
        ProxyMethod::Container => {
            launch::run_container_command(&session, run_cmd, mount_dir.as_deref(), cancel).await
        }
        ProxyMethod::VpnTcp | ProxyMethod::InjectTcp => {
            launch::run_local_command(
                config.method,
                &session,
                run_cmd,
                mount_dir.as_deref(),
                cancel,
            )
            .await
        }
    }
}

/// Materialize the mount point on disk
fn resolve_mount_dir(request: &MountRequest) -> Result<PathBuf> {
    match request {
        MountRequest::None => unreachable!("mount dir requested without a mount"),
        MountRequest::Temp => {
            // Anchored under /tmp: Docker for Mac shares only a fixed
            // set of folders with containers, and /tmp is on it.
            let dir = tempfile::Builder::new()
                .prefix("podbridge-")
                .tempdir_in("/tmp")
                .context("failed to create temporary mount directory")?;
            // Keep the directory alive past this scope; teardown removes
            // it after unmounting.
            Ok(dir.into_path())
        }
        MountRequest::At(path) => {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create mount directory {:?}", path))?;
            Ok(path.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mount_dir_temp_creates_directory_under_tmp() {
        let dir = resolve_mount_dir(&MountRequest::Temp).unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with("/tmp"));
        std::fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn test_resolve_mount_dir_at_creates_missing_path() {
        let base = tempfile::TempDir::new().unwrap();
        let target = base.path().join("nested").join("mnt");
        let dir = resolve_mount_dir(&MountRequest::At(target.clone())).unwrap();
        assert_eq!(dir, target);
        assert!(target.is_dir());
    }
}
