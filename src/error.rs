//! Error types for the annotation engine.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ElementDescriptor, SessionStatus};

/// Failures reported by a [`crate::driver::BrowserDriver`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The call did not finish within its bound.
    #[error("'{operation}' timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// The browser rejected the call.
    #[error("browser error: {0}")]
    Browser(String),

    /// A script ran but produced something unusable.
    #[error("script error: {0}")]
    Script(String),

    #[error("browser session is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for DriverError {
    fn from(err: anyhow::Error) -> Self {
        DriverError::Browser(format!("{err:#}"))
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No strategy produced exactly one live match.
    #[error("could not reliably locate element {}", .descriptor.summary())]
    ElementNotFound { descriptor: Box<ElementDescriptor> },
}

/// Errors surfaced to the operator by [`crate::session::Annotator`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("'{operation}' is not allowed while {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    #[error("task description must not be empty")]
    EmptyDescription,

    #[error("no element is locked; select one in the browser first")]
    NoElementLocked,

    #[error("invalid element payload: {0}")]
    InvalidDescriptor(String),

    #[error(transparent)]
    ElementNotFound(#[from] ResolveError),

    #[error("browser launch failed: {0}")]
    BrowserAcquisition(String),
}

/// Failures while writing task artifacts to disk.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
