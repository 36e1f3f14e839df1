//! pb-proxy: subprocess supervision and tunnel orchestration for podbridge
//!
//! This crate owns the proxy session: it spawns and supervises the
//! cooperating helper processes (remote log tail, cluster port-forward,
//! SSH reverse/forward tunnels, SOCKS relay, platform network bridge)
//! and retries remote-environment retrieval once the tunnel is live.

pub mod bridge;
pub mod forward;
pub mod mount;
pub mod net;
pub mod process;
pub mod remote;
pub mod runner;
pub mod session;
pub mod tunnel;

pub use mount::mount_remote;
pub use process::{ProcessGroup, ProcessHandle};
pub use runner::Runner;
pub use session::{connect, start_proxy, ProxySession};
pub use tunnel::SshTunnel;
