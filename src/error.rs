//! Error taxonomy shared by the stores, the association layer and the
//! sync layer.

use thiserror::Error;

/// Errors surfaced by workspace commands.
///
/// `NotFound` and `Validation` are raised before any local mutation.
/// `Network` is raised after a failed confirmation, once the local change
/// has been rolled back. `Conflict` means another command for the same
/// record is still waiting for confirmation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown email or capsule id.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        kind: RecordKind,
        /// The id that was not found.
        id: String,
    },

    /// Malformed input: empty title, unknown enum value, priority out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport failure or timeout while confirming with the backend.
    #[error("network error: {0}")]
    Network(String),

    /// A mutation for the same record is already in flight.
    #[error("conflicting update in flight for {0}")]
    Conflict(String),
}

impl CoreError {
    /// Shorthand for an unknown email id.
    pub fn email_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: RecordKind::Email,
            id: id.to_string(),
        }
    }

    /// Shorthand for an unknown capsule id.
    pub fn capsule_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: RecordKind::Capsule,
            id: id.to_string(),
        }
    }

    /// Shorthand for an unknown follow-up id.
    pub fn follow_up_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: RecordKind::FollowUp,
            id: id.to_string(),
        }
    }

    /// Returns true if the caller may retry the command later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Conflict(_))
    }
}

/// Kind of record referenced by [`CoreError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Email,
    Capsule,
    FollowUp,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Email => "email",
            RecordKind::Capsule => "capsule",
            RecordKind::FollowUp => "follow-up",
        };
        f.write_str(name)
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
