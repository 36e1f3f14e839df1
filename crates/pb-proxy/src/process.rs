//! Child process supervision
//!
//! A [`ProcessHandle`] wraps one spawned helper; a [`ProcessGroup`] owns
//! the ordered set of helpers making up a session, where insertion order
//! is dependency/start order. Termination always proceeds in reverse
//! insertion order so a process layered on a tunnel dies before the
//! tunnel it depends on.

use std::time::{Duration, Instant};

use tokio::process::Child;

/// How long a helper gets to exit after SIGTERM before being killed
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// One spawned child process
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    argv: Vec<String>,
    started_at: Instant,
}

impl ProcessHandle {
    pub fn new(child: Child, argv: Vec<String>) -> Self {
        Self {
            child,
            argv,
            started_at: Instant::now(),
        }
    }

    /// The argument vector this process was started with
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Whether the process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for natural exit (used by callers that run a helper to
    /// completion while keeping it in the group)
    pub async fn wait(&mut self) {
        let _ = self.child.wait().await;
    }

    /// Ask the process to exit, escalating to a kill after `grace`.
    ///
    /// Best-effort: failures are logged and swallowed so one stuck
    /// process cannot block cleanup of the rest.
    pub async fn terminate(&mut self, grace: Duration) {
        if !self.is_alive() {
            return;
        }
        tracing::debug!(pid = ?self.pid(), argv = ?self.argv, "terminating process");
        self.send_term();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(
                    pid = ?self.pid(),
                    "process did not exit within {:?}, killing",
                    grace
                );
                if self.child.start_kill().is_ok() {
                    let _ = self.child.wait().await;
                }
            }
        }
    }

    #[cfg(unix)]
    fn send_term(&self) {
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn send_term(&self) {
        // No graceful signal on this platform; terminate() escalates to
        // a kill after the grace period anyway.
    }
}

/// Ordered collection of the helpers making up one session
#[derive(Debug, Default)]
pub struct ProcessGroup {
    handles: Vec<ProcessHandle>,
}

impl ProcessGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handle; insertion order is start/dependency order
    pub fn push(&mut self, handle: ProcessHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// True iff every helper in the group is still running.
    ///
    /// Callers use this as a liveness gate to react to any helper
    /// crashing; crashed helpers are not restarted.
    pub fn is_alive(&mut self) -> bool {
        self.handles.iter_mut().all(|h| h.is_alive())
    }

    /// Terminate every still-running helper in reverse insertion order.
    ///
    /// Never fails; returns the pids acted on, in termination order,
    /// for diagnostics.
    pub async fn terminate_all(&mut self, grace: Duration) -> Vec<u32> {
        let mut terminated = Vec::new();
        for handle in self.handles.iter_mut().rev() {
            if let Some(pid) = handle.pid() {
                terminated.push(pid);
            }
            handle.terminate(grace).await;
        }
        self.handles.clear();
        terminated
    }
}
