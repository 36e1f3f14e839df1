//! Execution context
//!
//! Every child process and every one-shot command goes through the
//! [`Runner`], which logs each invocation, redirects long-running helper
//! output to the session log file, and uniformly maps non-zero exit
//! codes to a typed failure.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use pb_core::error::{CommandError, ProxyError, SpawnError};
use pb_core::types::ClusterFlavor;

use crate::process::ProcessHandle;

/// Central façade for spawning child processes
#[derive(Debug, Clone)]
pub struct Runner {
    flavor: ClusterFlavor,
    /// Session log file; background helpers write their output here
    logfile: PathBuf,
}

impl Runner {
    pub fn new(flavor: ClusterFlavor, logfile: PathBuf) -> Self {
        Self { flavor, logfile }
    }

    /// Name of the cluster CLI this runner drives
    pub fn cluster_cmd(&self) -> &'static str {
        self.flavor.command()
    }

    pub fn flavor(&self) -> ClusterFlavor {
        self.flavor
    }

    /// Build a full cluster-CLI argument vector, prepending context and
    /// namespace options when set.
    pub fn cluster_args(
        &self,
        context: Option<&str>,
        namespace: Option<&str>,
        args: &[&str],
    ) -> Vec<String> {
        let mut argv = vec![self.cluster_cmd().to_string()];
        if let Some(context) = context {
            argv.push(format!("--context={}", context));
        }
        if let Some(namespace) = namespace {
            argv.push(format!("--namespace={}", namespace));
        }
        argv.extend(args.iter().map(|s| s.to_string()));
        argv
    }

    /// Run a command to completion and return its captured stdout.
    ///
    /// Non-zero exit becomes a [`CommandError`] carrying the exit code
    /// and combined output; a missing executable becomes a
    /// [`SpawnError`].
    pub async fn run_output(&self, argv: &[String]) -> Result<String, ProxyError> {
        let started = Instant::now();
        tracing::debug!(argv = ?argv, "running command");
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SpawnError::new(argv[0].clone(), e))?;
        tracing::debug!(
            argv = ?argv,
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = ?output.status.code(),
            "command finished"
        );
        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CommandError {
                program: argv[0].clone(),
                code: output.status.code(),
                output: combined.trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command to completion, discarding output, failing on
    /// non-zero exit.
    pub async fn run_check(&self, argv: &[String]) -> Result<(), ProxyError> {
        self.run_output(argv).await.map(|_| ())
    }

    /// Like [`Runner::run_output`], but returns stdout and stderr
    /// combined. Some tools (`ssh -V`) report on stderr even on success.
    pub async fn run_output_combined(&self, argv: &[String]) -> Result<String, ProxyError> {
        tracing::debug!(argv = ?argv, "running command");
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SpawnError::new(argv[0].clone(), e))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(CommandError {
                program: argv[0].clone(),
                code: output.status.code(),
                output: combined.trim().to_string(),
            }
            .into());
        }
        Ok(combined)
    }

    /// Spawn a long-running helper in the background.
    ///
    /// The helper's stdout/stderr are appended to the session log file
    /// so pod logs and tunnel chatter stay available for diagnostics.
    pub fn spawn(&self, argv: Vec<String>) -> Result<ProcessHandle, ProxyError> {
        tracing::debug!(argv = ?argv, "spawning background process");
        let (out, err) = self.log_sinks();
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpawnError::new(argv[0].clone(), e))?;
        Ok(ProcessHandle::new(child, argv))
    }

    fn log_sinks(&self) -> (Stdio, Stdio) {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.logfile)
        {
            Ok(file) => {
                let err = file.try_clone().map(Stdio::from).unwrap_or_else(|_| Stdio::null());
                (Stdio::from(file), err)
            }
            Err(e) => {
                tracing::warn!("cannot open session log {:?}: {}", self.logfile, e);
                (Stdio::null(), Stdio::null())
            }
        }
    }

    /// Start a scoped phase timer for diagnostics
    pub fn span(&self, name: &'static str) -> PhaseSpan {
        tracing::debug!("phase '{}' started", name);
        PhaseSpan {
            name,
            started: Instant::now(),
        }
    }
}

/// Lightweight scoped timer; carries no control-flow meaning
#[derive(Debug)]
pub struct PhaseSpan {
    name: &'static str,
    started: Instant,
}

impl PhaseSpan {
    /// End the phase, logging its elapsed time
    pub fn end(self) {
        tracing::debug!(
            "phase '{}' finished in {}ms",
            self.name,
            self.started.elapsed().as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> Runner {
        Runner::new(ClusterFlavor::Kubernetes, dir.path().join("session.log"))
    }

    #[test]
    fn test_cluster_args_with_context_and_namespace() {
        let dir = TempDir::new().unwrap();
        let argv = runner(&dir).cluster_args(Some("minikube"), Some("web"), &["get", "pods"]);
        assert_eq!(
            argv,
            vec![
                "kubectl",
                "--context=minikube",
                "--namespace=web",
                "get",
                "pods"
            ]
        );
    }

    #[test]
    fn test_cluster_args_defaults_omitted() {
        let dir = TempDir::new().unwrap();
        let argv = runner(&dir).cluster_args(None, None, &["version"]);
        assert_eq!(argv, vec!["kubectl", "version"]);
    }

    #[tokio::test]
    async fn test_run_output_captures_stdout() {
        let dir = TempDir::new().unwrap();
        let out = runner(&dir)
            .run_output(&["echo".to_string(), "hello".to_string()])
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_output_nonzero_exit_is_command_error() {
        let dir = TempDir::new().unwrap();
        let err = runner(&dir)
            .run_check(&["false".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Command(_)));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let err = runner(&dir)
            .run_check(&["podbridge-does-not-exist".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_spawn_writes_helper_output_to_logfile() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let mut handle = runner
            .spawn(vec!["echo".to_string(), "tail output".to_string()])
            .unwrap();
        handle.wait().await;
        let logged = std::fs::read_to_string(dir.path().join("session.log")).unwrap();
        assert!(logged.contains("tail output"));
    }
}
