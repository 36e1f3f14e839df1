//! pb-core: Core abstractions and configuration for podbridge
//!
//! This crate provides the shared types, error taxonomy, session
//! configuration, and teardown machinery used by the proxy engine and
//! the CLI.

pub mod config;
pub mod env;
pub mod error;
pub mod retry;
pub mod teardown;
pub mod traits;
pub mod types;

pub use config::SessionConfig;
pub use error::ProxyError;
pub use teardown::TeardownRegistry;
pub use types::{ProxyMethod, RemoteIdentity};
