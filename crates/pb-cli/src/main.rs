//! podbridge
//!
//! Single binary that proxies a local process (or container) into a
//! Kubernetes/OpenShift cluster:
//! - prechecks (cluster reachability, OpenSSH, helper executables)
//! - proxy session startup (port-forward, SSH tunnels, network bridge)
//! - launcher hand-off with the remote environment applied
//! - scoped teardown on every exit path

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pb_core::config::{MountRequest, Operation, SessionConfig};
use pb_core::teardown::TeardownRegistry;
use pb_core::types::{PortMapping, PortMappings, ProxyMethod};

use podbridge::lifecycle;
use podbridge::output::print_error;
use podbridge::precheck::{detect_flavor, detect_local_vm, run_prechecks};
use pb_proxy::Runner;

#[derive(Parser)]
#[command(name = "podbridge")]
#[command(author, version, about = "Local development against a remote Kubernetes cluster")]
struct Cli {
    /// Proxy to an existing deployment
    #[arg(short, long, group = "target")]
    deployment: Option<String>,

    /// Create a new deployment for this session
    #[arg(short, long, group = "target")]
    new_deployment: Option<String>,

    /// Swap out an existing deployment for the proxy
    #[arg(short, long, group = "target")]
    swap_deployment: Option<String>,

    /// Proxy method: container, vpn-tcp or inject-tcp
    #[arg(short, long, default_value = "vpn-tcp")]
    method: ProxyMethod,

    /// Port to expose, as PORT or LOCAL:REMOTE (repeatable)
    #[arg(long = "expose", value_name = "PORT[:REMOTE]")]
    expose: Vec<PortMapping>,

    /// Cluster context to use (defaults to the current one)
    #[arg(long)]
    context: Option<String>,

    /// Namespace to use (defaults to the current one)
    #[arg(long)]
    namespace: Option<String>,

    /// Mount remote volumes at this path
    #[arg(long, group = "mount_target", value_name = "PATH")]
    mount: Option<PathBuf>,

    /// Mount remote volumes under a fresh temporary directory
    #[arg(long, group = "mount_target")]
    mount_tmp: bool,

    /// File receiving full diagnostic output
    #[arg(long, default_value = "podbridge.log")]
    logfile: PathBuf,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,

    /// Command to run inside the session (defaults to $SHELL)
    #[arg(last = true)]
    run: Vec<String>,
}

impl Cli {
    fn operation(&self) -> Result<Operation> {
        if let Some(name) = &self.deployment {
            Ok(Operation::Existing(name.clone()))
        } else if let Some(name) = &self.new_deployment {
            Ok(Operation::New(name.clone()))
        } else if let Some(name) = &self.swap_deployment {
            Ok(Operation::Swap(name.clone()))
        } else {
            anyhow::bail!(
                "one of --deployment, --new-deployment or --swap-deployment is required"
            )
        }
    }

    fn mount_request(&self) -> MountRequest {
        if let Some(path) = &self.mount {
            MountRequest::At(path.clone())
        } else if self.mount_tmp {
            MountRequest::Temp
        } else {
            MountRequest::None
        }
    }

    fn run_command(&self) -> Vec<String> {
        if self.run.is_empty() {
            vec![std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())]
        } else {
            self.run.clone()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging: terse stderr by verbosity, everything to the
    // session log file.
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let logfile = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.logfile)
        .with_context(|| format!("cannot open log file {:?}", cli.logfile))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(logfile)),
        )
        .init();

    let operation = match cli.operation() {
        Ok(op) => op,
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(1);
        }
    };

    let flavor = detect_flavor().await;
    let in_local_vm = detect_local_vm(cli.context.as_deref());

    let config = match SessionConfig::build(
        cli.method,
        operation,
        PortMappings::new(cli.expose.clone()),
        cli.context.clone(),
        cli.namespace.clone(),
        cli.mount_request(),
        flavor,
        cli.logfile.clone(),
        in_local_vm,
    ) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(1);
        }
    };

    // Signals cancel the token; the lifecycle observes it at suspension
    // points and unwinds through the teardown registry. Installed before
    // the prechecks so the whole session is interruptible.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };
        #[cfg(unix)]
        let hangup = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();
        #[cfg(not(unix))]
        let hangup = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
            _ = hangup => {
                tracing::info!("Received SIGHUP, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let runner = Runner::new(config.flavor, config.logfile.clone());
    if let Err(e) = run_prechecks(&runner, &config).await {
        print_error(&e.to_string());
        std::process::exit(1);
    }

    let mut registry = TeardownRegistry::new();
    let run_cmd = cli.run_command();
    let result = lifecycle::run(&config, &run_cmd, &cancel, &mut registry).await;

    // Every exit path drains the registry
    registry.run_all().await;

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("session failed: {:#}", e);
            print_error(&format!(
                "{:#}\nFull debug output in {}",
                e,
                config.logfile.display()
            ));
            std::process::exit(1);
        }
    }
}
