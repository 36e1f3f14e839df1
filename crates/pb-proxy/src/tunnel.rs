//! Tunnel endpoint
//!
//! Represents one SSH client bound to a locally port-forwarded tunnel
//! port. The SSH protocol itself is OpenSSH's business; we only spawn
//! the client as an opaque child and observe reachability of the port.

use tokio::net::TcpStream;

use pb_core::error::{ProxyError, TimeoutError};
use pb_core::retry::{retry_until, RetryPolicy};

use crate::process::{ProcessGroup, ProcessHandle};
use crate::runner::Runner;

/// Account the proxy pod's sshd accepts
const TUNNEL_USER: &str = "telepresence";

/// One logical SSH tunnel on a local port
#[derive(Debug, Clone, Copy)]
pub struct SshTunnel {
    port: u16,
}

impl SshTunnel {
    /// Wrap an already port-forwarded local port
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// The local port this tunnel runs over
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Spawn the keepalive SSH client for `port` in the background and
    /// append it to the group.
    ///
    /// The client retries its connection while the cluster port-forward
    /// is still coming up; readiness is observed separately via
    /// [`SshTunnel::wait_until_ready`].
    pub fn open(runner: &Runner, group: &mut ProcessGroup, port: u16) -> Result<Self, ProxyError> {
        let tunnel = Self::new(port);
        group.push(runner.spawn(tunnel.ssh_args(&[]))?);
        Ok(tunnel)
    }

    /// Block until the tunnel port accepts a TCP connection.
    ///
    /// Fatal for the session if the policy window elapses.
    pub async fn wait_until_ready(&self, policy: RetryPolicy) -> Result<(), ProxyError> {
        let port = self.port;
        let ready = retry_until(policy, || async move {
            TcpStream::connect(("127.0.0.1", port)).await.map(|_| ())
        })
        .await;
        match ready {
            Some(()) => Ok(()),
            None => Err(TimeoutError::TunnelNotReady {
                port,
                waited_secs: policy.max_duration.as_secs(),
            }
            .into()),
        }
    }

    /// Spawn an additional SSH invocation sharing this tunnel's target,
    /// with extra forwarding flags (`-R`/`-L`) appended.
    ///
    /// Each call produces an independent child process layered on the
    /// same logical tunnel.
    pub fn spawn_forwarding(
        &self,
        runner: &Runner,
        extra_args: &[String],
    ) -> Result<ProcessHandle, ProxyError> {
        runner.spawn(self.ssh_args(extra_args))
    }

    /// Non-interactive OpenSSH invocation for this tunnel
    fn ssh_args(&self, extra_args: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = [
            "ssh",
            "-N",
            "-q",
            "-F",
            "/dev/null",
            "-oStrictHostKeyChecking=no",
            "-oUserKnownHostsFile=/dev/null",
            "-oConnectTimeout=5",
            "-oConnectionAttempts=60",
            "-oServerAliveInterval=1",
            "-oServerAliveCountMax=3",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        argv.extend(extra_args.iter().cloned());
        argv.push("-p".to_string());
        argv.push(self.port.to_string());
        argv.push(format!("{}@127.0.0.1", TUNNEL_USER));
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    use crate::net::find_free_port;

    #[test]
    fn test_ssh_args_shape() {
        let tunnel = SshTunnel::new(3222);
        let argv = tunnel.ssh_args(&["-R".to_string(), "*:80:127.0.0.1:8080".to_string()]);
        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"-N".to_string()));
        assert!(argv.contains(&"-R".to_string()));
        assert!(argv.contains(&"*:80:127.0.0.1:8080".to_string()));
        // Target comes last
        assert_eq!(argv.last().unwrap(), "telepresence@127.0.0.1");
        let p = argv.iter().position(|a| a == "-p").unwrap();
        assert_eq!(argv[p + 1], "3222");
    }

    #[tokio::test]
    async fn test_wait_until_ready_succeeds_on_listening_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let tunnel = SshTunnel::new(port);
        tunnel
            .wait_until_ready(RetryPolicy::new(
                Duration::from_secs(2),
                Duration::from_millis(50),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out_on_dead_port() {
        // Allocate a port and let it go; nothing listens on it
        let port = find_free_port().unwrap();
        let tunnel = SshTunnel::new(port);
        let err = tunnel
            .wait_until_ready(RetryPolicy::new(
                Duration::from_millis(400),
                Duration::from_millis(50),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Timeout(TimeoutError::TunnelNotReady { .. })
        ));
    }
}
