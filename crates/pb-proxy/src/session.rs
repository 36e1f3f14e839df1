//! Session orchestration
//!
//! Composes the runner, process group, tunnel endpoint, and network
//! bridge into one running proxy session, then reads the remote
//! environment back through the established tunnel.

use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;

use tokio::sync::Mutex;

use pb_core::config::SessionConfig;
use pb_core::env::SessionEnvironment;
use pb_core::error::ProxyError;
use pb_core::retry::{retry_until, RetryPolicy};
use pb_core::teardown::TeardownRegistry;
use pb_core::traits::{DeploymentManager, RemoteDiscovery};
use pb_core::types::{DeploymentKind, RemoteIdentity};

use crate::bridge::setup_bridge;
use crate::forward::expose_local_services;
use crate::net::find_free_port;
use crate::process::{ProcessGroup, TERMINATE_GRACE};
use crate::runner::Runner;
use crate::tunnel::SshTunnel;

/// Port the proxy pod's sshd listens on inside the cluster
const REMOTE_SSH_PORT: u16 = 8022;

/// Port the proxy pod's SOCKS proxy listens on inside the cluster
const REMOTE_SOCKS_PORT: u16 = 9050;

/// Everything a launcher needs to run the user's command against the
/// cluster
pub struct ProxySession {
    /// The helpers keeping the session alive, in start order. Shared
    /// with the teardown registry, which terminates the group in
    /// reverse order at session end.
    pub processes: Arc<Mutex<ProcessGroup>>,
    /// Environment reconstructed from the remote container
    pub env: SessionEnvironment,
    /// Local SOCKS relay port; meaningful only for the inject-tcp method
    pub socks_port: u16,
    pub tunnel: SshTunnel,
    pub identity: RemoteIdentity,
}

/// Start all the processes that handle remote proxying.
///
/// Returns the process group (in start order), the local SOCKS relay
/// port, and the ready tunnel endpoint. Termination of the group is
/// registered on `registry` before any dependent teardown action, so
/// bridge and mount cleanup always run first.
pub async fn connect(
    runner: &Runner,
    registry: &mut TeardownRegistry,
    identity: &RemoteIdentity,
    config: &SessionConfig,
) -> Result<(Arc<Mutex<ProcessGroup>>, u16, SshTunnel), ProxyError> {
    let span = runner.span("connect");
    let context = config.context.as_deref();
    let namespace = Some(identity.namespace.as_str());

    let processes = Arc::new(Mutex::new(ProcessGroup::new()));
    let group_for_teardown = Arc::clone(&processes);
    registry.register_async("terminate process group", move || {
        Box::pin(async move {
            let pids = group_for_teardown
                .lock()
                .await
                .terminate_all(TERMINATE_GRACE)
                .await;
            tracing::debug!("terminated session helpers: {:?}", pids);
        })
    });

    // Keep a local copy of pod logs, for debugging purposes. Losing the
    // tail is not worth failing the session over.
    let log_args = runner.cluster_args(
        context,
        namespace,
        &[
            "logs",
            "-f",
            &identity.pod_name,
            "--container",
            &identity.container_name,
        ],
    );
    match runner.spawn(log_args) {
        Ok(handle) => processes.lock().await.push(handle),
        Err(e) => tracing::warn!("could not start log tail: {}", e),
    }

    // Forward a fresh local port to the pod's sshd via the cluster CLI
    let local_port = find_free_port()?;
    {
        let mut group = processes.lock().await;
        group.push(runner.spawn(runner.cluster_args(
            context,
            namespace,
            &[
                "port-forward",
                &identity.pod_name,
                &format!("{}:{}", local_port, REMOTE_SSH_PORT),
            ],
        ))?);
    }

    let tunnel = {
        let mut group = processes.lock().await;
        SshTunnel::open(runner, &mut group, local_port)?
    };

    if config.method.needs_bridge() {
        let mut group = processes.lock().await;
        setup_bridge(runner, registry, &mut group, tunnel.port()).await?;
    }

    tunnel.wait_until_ready(RetryPolicy::tunnel_ready()).await?;

    // In container mode exposure happens inside the local container
    if !config.method.exposes_in_container() {
        let mut group = processes.lock().await;
        expose_local_services(runner, &mut group, &tunnel, &config.expose)?;
    }

    let socks_port = find_free_port()?;
    if config.method.wants_socks_relay() {
        let mut group = processes.lock().await;
        group.push(tunnel.spawn_forwarding(
            runner,
            &[
                "-L".to_string(),
                format!("127.0.0.1:{}:127.0.0.1:{}", socks_port, REMOTE_SOCKS_PORT),
            ],
        )?);
    }

    span.end();
    Ok((processes, socks_port, tunnel))
}

/// Start the cluster port-forward and SSH clients that do the proxying,
/// resolve the remote identity, and reconstruct the remote environment.
pub async fn start_proxy(
    runner: &Runner,
    registry: &mut TeardownRegistry,
    config: &SessionConfig,
    discovery: &dyn RemoteDiscovery,
    deployments: &dyn DeploymentManager,
) -> Result<ProxySession, ProxyError> {
    let span = runner.span("start_proxy");
    print_method_banner(config);

    let mut config = config.clone();
    let mut run_id = None;
    let deployment;

    match &config.operation {
        pb_core::config::Operation::Existing(name) => {
            deployment = name.clone();
        }
        pb_core::config::Operation::New(name) => {
            let created = deployments.create_new(name).await?;
            deployment = created.deployment;
            run_id = Some(created.run_id);
        }
        pb_core::config::Operation::Swap(name) => {
            let swapped = deployments.swap(name).await?;
            deployment = swapped.deployment;
            run_id = Some(swapped.run_id);
            if let Some(spec) = &swapped.container_spec {
                config.expose.merge_automatic_ports(tcp_container_ports(spec));
            }
        }
    }

    let kind = DeploymentKind::select(config.flavor, config.operation.is_swap());
    let identity = discovery
        .resolve(&deployment, kind, run_id.as_deref())
        .await?;

    let (processes, socks_port, tunnel) = connect(runner, registry, &identity, &config).await?;

    // The SSH proxies may take a few seconds to get going; read the
    // remote environment on a bounded best-effort window and proceed
    // with an empty mapping if it never succeeds.
    let env = env_with_retry(RetryPolicy::remote_env(), || {
        get_env_variables(runner, &identity, config.context.as_deref())
    })
    .await?
    .unwrap_or_else(|| {
        tracing::warn!("could not read remote environment, proceeding without it");
        SessionEnvironment::empty_for(&identity)
    });

    span.end();
    Ok(ProxySession {
        processes,
        env,
        socks_port,
        tunnel,
        identity,
    })
}

/// Retry the remote `env` read while failures look transient.
///
/// A non-zero exit is expected while sshd inside the pod is still coming
/// up and is retried within the policy window; anything else (the
/// cluster CLI itself failing to run) aborts immediately. `Ok(None)`
/// means the window elapsed without a success.
async fn env_with_retry<F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> Result<Option<SessionEnvironment>, ProxyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SessionEnvironment, ProxyError>>,
{
    let outcome = retry_until(policy, || {
        let attempt = op();
        async move {
            match attempt.await {
                Ok(env) => Ok(Ok(env)),
                Err(ProxyError::Command(transient)) => Err(transient),
                Err(fatal) => Ok(Err(fatal)),
            }
        }
    })
    .await;
    match outcome {
        Some(Ok(env)) => Ok(Some(env)),
        Some(Err(fatal)) => Err(fatal),
        None => Ok(None),
    }
}

/// Read the remote container's environment through the cluster CLI
pub async fn get_env_variables(
    runner: &Runner,
    identity: &RemoteIdentity,
    context: Option<&str>,
) -> Result<SessionEnvironment, ProxyError> {
    let dump = runner
        .run_output(&runner.cluster_args(
            context,
            Some(identity.namespace.as_str()),
            &[
                "exec",
                &identity.pod_name,
                "--container",
                &identity.container_name,
                "env",
            ],
        ))
        .await?;
    Ok(SessionEnvironment::from_remote(&dump, identity))
}

/// TCP container ports of a swapped deployment's container spec
fn tcp_container_ports(spec: &serde_json::Value) -> Vec<u16> {
    spec.get("ports")
        .and_then(|p| p.as_array())
        .map(|ports| {
            ports
                .iter()
                .filter(|p| {
                    p.get("protocol").and_then(|v| v.as_str()).unwrap_or("TCP") == "TCP"
                })
                .filter_map(|p| p.get("containerPort").and_then(|v| v.as_u64()))
                .map(|p| p as u16)
                .collect()
        })
        .unwrap_or_default()
}

/// Show the chosen method's limitations when attached to a terminal
fn print_method_banner(config: &SessionConfig) {
    if !std::io::stdout().is_terminal() {
        return;
    }
    let limitations = config.method.limitations();
    if !limitations.is_empty() {
        eprintln!(
            "Starting proxy with method '{}', which has the following \
             limitations: {} For a full list of method limitations see \
             https://telepresence.io/reference/methods.html",
            config.method, limitations
        );
    }
    if config.mount.is_requested() {
        eprintln!(
            "Volumes are rooted at $TELEPRESENCE_ROOT. See \
             https://telepresence.io/howto/volumes.html for details.\n"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_container_ports_filters_protocol() {
        let spec = serde_json::json!({
            "name": "web",
            "ports": [
                {"containerPort": 80, "protocol": "TCP"},
                {"containerPort": 53, "protocol": "UDP"},
                {"containerPort": 443}
            ]
        });
        assert_eq!(tcp_container_ports(&spec), vec![80, 443]);
    }

    #[test]
    fn test_tcp_container_ports_absent() {
        let spec = serde_json::json!({"name": "web"});
        assert!(tcp_container_ports(&spec).is_empty());
    }

    mod env_retry {
        use super::super::*;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::time::Duration;

        use pb_core::error::{CommandError, SpawnError};
        use pb_core::types::DeploymentKind;

        fn identity() -> RemoteIdentity {
            RemoteIdentity {
                namespace: "default".to_string(),
                pod_name: "web-1234".to_string(),
                container_name: "web".to_string(),
                kind: DeploymentKind::Deployment,
                run_id: None,
            }
        }

        fn nonzero_exit() -> ProxyError {
            CommandError {
                program: "kubectl".to_string(),
                code: Some(1),
                output: "error: unable to upgrade connection".to_string(),
            }
            .into()
        }

        fn policy() -> RetryPolicy {
            RetryPolicy::new(Duration::from_secs(10), Duration::from_millis(250))
        }

        #[tokio::test(start_paused = true)]
        async fn test_recovers_from_nonzero_exits() {
            let attempts = AtomicU32::new(0);
            let id = identity();
            let env = env_with_retry(policy(), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let id = id.clone();
                async move {
                    if n >= 3 {
                        Ok(SessionEnvironment::from_remote("DB_URL=postgres://db", &id))
                    } else {
                        Err(nonzero_exit())
                    }
                }
            })
            .await
            .unwrap()
            .unwrap();
            assert_eq!(env.get("DB_URL").unwrap(), "postgres://db");
            assert_eq!(attempts.load(Ordering::SeqCst), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_gives_up_after_window_of_nonzero_exits() {
            let outcome = env_with_retry(policy(), || async { Err(nonzero_exit()) }).await;
            assert!(matches!(outcome, Ok(None)));
        }

        #[tokio::test(start_paused = true)]
        async fn test_missing_cluster_cli_aborts_on_first_attempt() {
            let attempts = AtomicU32::new(0);
            let outcome = env_with_retry(policy(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SpawnError::new(
                        "kubectl",
                        std::io::Error::from(std::io::ErrorKind::NotFound),
                    )
                    .into())
                }
            })
            .await;
            assert!(matches!(outcome, Err(ProxyError::Spawn(_))));
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }
    }
}
