//! podbridge CLI internals
//!
//! The binary in `main.rs` wires these together: precheck verification,
//! the session lifecycle, the launcher hand-off, and terminal output
//! helpers.

pub mod launch;
pub mod lifecycle;
pub mod output;
pub mod precheck;
