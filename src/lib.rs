//! compose-control - a control client for Docker Compose compatible runtimes
//!
//! compose-control sits between a development orchestrator and a compose
//! runtime. It provides:
//!
//! - Lifecycle operations (up, down, rm)
//! - Framed, cancellable log streams per service
//! - A bounded project event feed
//! - Compose project loading and project name derivation
//! - A deterministic fake client for testing callers

pub mod compose;
pub mod error;
pub mod settings;

pub use error::{ComposeError, Result};
