// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the dimming core
//!
//! Nothing in here is fatal to the process. Probe and mutation errors are
//! folded into [`CapabilityStatus`](crate::dimming::CapabilityStatus) values
//! by the engine; the remaining variants surface from the daemon shell.

use thiserror::Error;

use crate::protocols::ProtocolKind;

#[derive(Error, Debug)]
pub enum DimmingError {
    /// A protocol could not be reached or reported no support for a display
    #[error("{protocol} probe failed for {id}: {reason}")]
    Probe {
        id: String,
        protocol: ProtocolKind,
        reason: String,
    },

    /// A brightness write was rejected by the protocol
    #[error("{reason}")]
    Mutation { id: String, reason: String },

    /// A brightness write did not finish before its deadline
    #[error("Timed out")]
    Timeout { id: String },

    /// Settings could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// X11 connection or request error
    #[error("X11 error: {0}")]
    X11(String),

    /// Background task join error
    #[error("Task join error: {0}")]
    Join(String),
}

impl DimmingError {
    /// Display the error is attached to, if any
    pub fn monitor_id(&self) -> Option<&str> {
        match self {
            DimmingError::Probe { id, .. }
            | DimmingError::Mutation { id, .. }
            | DimmingError::Timeout { id } => Some(id),
            _ => None,
        }
    }
}

/// Result type alias for DimmingError
pub type Result<T> = std::result::Result<T, DimmingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_displays_fixed_message() {
        let err = DimmingError::Timeout { id: "DP-1".into() };
        assert_eq!(err.to_string(), "Timed out");
        assert_eq!(err.monitor_id(), Some("DP-1"));
    }

    #[test]
    fn mutation_displays_reason_only() {
        let err = DimmingError::Mutation {
            id: "HDMI-1".into(),
            reason: "DDC/CI set failed".into(),
        };
        assert_eq!(err.to_string(), "DDC/CI set failed");
    }
}
