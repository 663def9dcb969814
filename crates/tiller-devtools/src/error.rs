//! Typed failures surfaced by the protocol client.

use thiserror::Error;

/// Errors returned by protocol operations.
///
/// Every failure is a typed value with a human-readable message; there is
/// no panic-based control flow anywhere in the client. Transport losses
/// invalidate the in-flight state of the affected connection but never
/// abort the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DevToolsError {
    /// The transport is gone; all pending commands on the connection fail.
    #[error("disconnected: {message}")]
    Disconnected {
        /// What was being attempted when the loss was detected.
        message: String,
    },

    /// A deadline expired while waiting for the remote end.
    #[error("timeout: {message}")]
    Timeout {
        /// Description including the deadline that expired.
        message: String,
    },

    /// The command's response is blocked by an open modal dialog.
    #[error("unexpected alert open: {message}")]
    UnexpectedAlertOpen {
        /// The dialog text when one is known.
        message: String,
    },

    /// The remote end rejected a command argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// The remote error message.
        message: String,
    },

    /// The addressed top-level target does not exist.
    #[error("no such window: {message}")]
    NoSuchWindow {
        /// The remote error message.
        message: String,
    },

    /// The addressed frame or session does not exist.
    #[error("no such frame: {message}")]
    NoSuchFrame {
        /// The remote error message.
        message: String,
    },

    /// The remote end does not implement the command.
    #[error("unknown command: {message}")]
    UnknownCommand {
        /// The remote error message.
        message: String,
    },

    /// The referenced execution context is gone.
    #[error("no such execution context: {message}")]
    NoSuchExecutionContext {
        /// The remote error message.
        message: String,
    },

    /// The referenced DOM node does not exist.
    #[error("no such element: {message}")]
    NoSuchElement {
        /// The remote error message.
        message: String,
    },

    /// A navigation destroyed the state the command relied on.
    #[error("aborted by navigation: {message}")]
    AbortedByNavigation {
        /// The remote error message.
        message: String,
    },

    /// The target's renderer crashed.
    #[error("tab crashed: {message}")]
    TargetCrashed {
        /// What was observed.
        message: String,
    },

    /// The target detached from the session.
    #[error("target detached: {message}")]
    TargetDetached {
        /// What was observed.
        message: String,
    },

    /// A dialog operation was attempted with no dialog open.
    #[error("no such alert: {message}")]
    NoSuchAlert {
        /// What was being attempted.
        message: String,
    },

    /// A parse failure or an unclassified remote error.
    #[error("unknown error: {message}")]
    Unknown {
        /// What went wrong.
        message: String,
    },
}

impl DevToolsError {
    /// Builds a `Disconnected` error.
    pub(crate) fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// Builds a `Timeout` error.
    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Builds an `Unknown` error.
    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Human-friendly message without the taxonomy prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Disconnected { message }
            | Self::Timeout { message }
            | Self::UnexpectedAlertOpen { message }
            | Self::InvalidArgument { message }
            | Self::NoSuchWindow { message }
            | Self::NoSuchFrame { message }
            | Self::UnknownCommand { message }
            | Self::NoSuchExecutionContext { message }
            | Self::NoSuchElement { message }
            | Self::AbortedByNavigation { message }
            | Self::TargetCrashed { message }
            | Self::TargetDetached { message }
            | Self::NoSuchAlert { message }
            | Self::Unknown { message } => message.as_str(),
        }
    }
}
