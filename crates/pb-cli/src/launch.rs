//! Launcher hand-off
//!
//! The assembled session (process group, environment, SOCKS port,
//! tunnel) is consumed here by running the user's command, either
//! directly on the host or inside a local container. The launcher also
//! watches the helper group: if any helper crashes, the session fails
//! fast instead of limping along half-connected.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use pb_core::types::ProxyMethod;
use pb_proxy::session::ProxySession;

/// How often the helper group's liveness is polled
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Run the user's command on the host with the session environment.
///
/// For the inject-tcp method the command is wrapped in `torsocks`
/// pointed at the local SOCKS relay.
pub async fn run_local_command(
    method: ProxyMethod,
    session: &ProxySession,
    run_cmd: &[String],
    mount_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<i32> {
    let (program, args): (&str, Vec<&String>) = if method.wants_socks_relay() {
        ("torsocks", run_cmd.iter().collect())
    } else {
        (run_cmd[0].as_str(), run_cmd[1..].iter().collect())
    };

    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::inherit());
    for (key, value) in session.env.iter() {
        command.env(key, value);
    }
    if method.wants_socks_relay() {
        command.env("TORSOCKS_TOR_PORT", session.socks_port.to_string());
    }
    if let Some(dir) = mount_dir {
        command.env("TELEPRESENCE_ROOT", dir);
    }

    tracing::info!(?run_cmd, "launching local command");
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to launch '{}'", program))?;

    supervise(session, &mut child, cancel).await
}

/// Run the user's container with the session environment.
///
/// This is the narrow container hand-off: environment and volumes are
/// wired up; in-container port exposure and routing ride on the network
/// bridge set up during connect.
pub async fn run_container_command(
    session: &ProxySession,
    run_cmd: &[String],
    mount_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<i32> {
    let mut command = Command::new("docker");
    command.arg("run").arg("--rm").stdin(Stdio::inherit());
    for (key, value) in session.env.iter() {
        command.arg("-e").arg(format!("{}={}", key, value));
    }
    if let Some(dir) = mount_dir {
        command.arg("-e").arg(format!("TELEPRESENCE_ROOT={}", dir.display()));
        command
            .arg("-v")
            .arg(format!("{}:{}", dir.display(), dir.display()));
    }
    command.args(run_cmd);

    tracing::info!(?run_cmd, "launching container");
    let mut child = command.spawn().context("failed to launch docker")?;

    supervise(session, &mut child, cancel).await
}

/// Wait for the launched command while watching helper liveness and the
/// cancellation token.
async fn supervise(
    session: &ProxySession,
    child: &mut tokio::process::Child,
    cancel: &CancellationToken,
) -> Result<i32> {
    let mut liveness = tokio::time::interval(LIVENESS_INTERVAL);
    liveness.tick().await;
    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("waiting for launched command")?;
                tracing::info!("launched command exited with {}", status);
                return Ok(status.code().unwrap_or(1));
            }
            _ = cancel.cancelled() => {
                tracing::info!("shutdown requested, stopping launched command");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(0);
            }
            _ = liveness.tick() => {
                if !session.processes.lock().await.is_alive() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    anyhow::bail!("a proxy helper process died; session is no longer usable");
                }
            }
        }
    }
}
