//! Error types for compose-control

use std::fmt;
use thiserror::Error;

/// Result type for compose-control operations
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Compose client error types
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Compose runtime error: {0}")]
    Runtime(String),

    #[error("Injected fault: {0}")]
    Injected(InjectedFault),

    #[error("Compose file parse error: {0}")]
    ConfigParse(String),

    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event bus overflow: {0}")]
    Overflow(OverflowFault),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A caller-configured failure returned by the fake client.
///
/// Faults compare by message so a test can check that the exact fault it
/// injected is the one that comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFault {
    message: String,
}

impl InjectedFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<InjectedFault> for ComposeError {
    fn from(fault: InjectedFault) -> Self {
        ComposeError::Injected(fault)
    }
}

/// Raised when a subscriber's delivery queue is full.
///
/// This halts the event bus. Dropping the event or buffering without bound
/// would both break delivery guarantees, so the fault is surfaced instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowFault {
    /// Serialized event that could not be delivered
    pub event: String,
    /// Capacity of the subscriber queue that was full
    pub capacity: usize,
}

impl fmt::Display for OverflowFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no room on events channel (capacity {}) to send event: '{}'",
            self.capacity, self.event
        )
    }
}

impl From<OverflowFault> for ComposeError {
    fn from(fault: OverflowFault) -> Self {
        ComposeError::Overflow(fault)
    }
}

impl ComposeError {
    /// Returns the overflow fault if this error is one
    pub fn as_overflow(&self) -> Option<&OverflowFault> {
        match self {
            ComposeError::Overflow(fault) => Some(fault),
            _ => None,
        }
    }
}
