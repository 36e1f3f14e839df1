//! Core error types for podbridge

use thiserror::Error;

/// Top-level error type for the podbridge ecosystem
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Failed to spawn a helper executable
    #[error("Spawn error: {0}")]
    Spawn(#[from] SpawnError),

    /// A one-shot command exited non-zero
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// A tunnel never became reachable
    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// Invalid platform/method/port combination
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The executable could not be found or the OS refused to create the process
#[derive(Error, Debug)]
#[error("failed to start '{program}': {source}")]
pub struct SpawnError {
    /// Name of the executable that failed to start
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

impl SpawnError {
    pub fn new(program: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            program: program.into(),
            source,
        }
    }
}

/// A child process run to completion exited with a non-zero status
#[derive(Error, Debug)]
#[error("'{program}' exited with status {code:?}: {output}")]
pub struct CommandError {
    /// Name of the executable
    pub program: String,
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Captured stdout/stderr of the failed invocation
    pub output: String,
}

/// A bounded wait elapsed without the awaited condition becoming true
#[derive(Error, Debug)]
pub enum TimeoutError {
    /// The SSH tunnel port never accepted a connection
    #[error("tunnel on local port {port} not reachable after {waited_secs}s")]
    TunnelNotReady { port: u16, waited_secs: u64 },
}

/// Configuration-related errors, raised before any mutating action
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The cluster flavor forbids the privileged ports requested
    #[error("OpenShift does not support ports <1024")]
    PrivilegedPortsUnsupported,

    /// No tool available to discover the bridge interface address
    #[error("neither 'ip addr' nor 'ifconfig' is available")]
    NoInterfaceTool,

    /// The bridge interface listing yielded no IPv4 address
    #[error("no address found for interface {0}")]
    NoBridgeAddress(String),

    /// The method cannot work in the detected environment
    #[error("{0}")]
    UnsupportedEnvironment(String),

    /// A required helper executable is missing
    #[error("{program} is not installed{hint}")]
    MissingCommand { program: String, hint: String },
}
