//! Error types for the Switchboard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::presence::AgentStatus;

/// The top-level error type for all Switchboard operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Presence errors ---
    #[error("Presence error: {0}")]
    Presence(#[from] PresenceError),

    // --- Routing errors ---
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    // --- Assignment errors ---
    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error. The error parameter can be
/// overridden for functions that stay within one bounded context.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse error classification. Transport layers map these onto status
/// codes; the engine itself only cares about the fine-grained variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced entity does not exist.
    NotFound,
    /// The request itself is malformed or out of range.
    InvalidInput,
    /// The request is well-formed but the current state forbids it.
    Conflict,
    /// Storage, configuration, or corrupted-data failures.
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Presence(e) => e.kind(),
            Error::Routing(e) => e.kind(),
            Error::Assignment(e) => e.kind(),
            Error::Store(_) => ErrorKind::Internal,
            Error::Config { .. } => ErrorKind::Internal,
            Error::Serialization(_) => ErrorKind::Internal,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum PresenceError {
    #[error("No presence recorded for agent '{0}'")]
    NotFound(String),

    #[error("Override status must be 'on_break' or 'offline', got '{0}'")]
    InvalidOverride(AgentStatus),

    #[error("Location sharing requires latitude and longitude")]
    MissingCoordinates,

    #[error("Coordinates out of range: ({latitude}, {longitude})")]
    CoordinatesOutOfRange { latitude: f64, longitude: f64 },

    #[error("Staleness horizon must be positive, got {0}")]
    InvalidHorizon(i64),

    #[error("Result limit must be positive, got {0}")]
    InvalidLimit(i64),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}

impl PresenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PresenceError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::InvalidInput,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Rule '{id}' has a malformed config: {reason}")]
    InvalidRule { id: String, reason: String },
}

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoutingError::ConversationNotFound(_) | RoutingError::TeamNotFound(_) => {
                ErrorKind::NotFound
            }
            // Stored data is corrupt; the caller did nothing wrong.
            RoutingError::InvalidRule { .. } => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum AssignmentError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Team is not active: {0}")]
    TeamInactive(String),

    #[error("Agent '{agent}' cannot take the assignment: {reason}")]
    AgentUnavailable { agent: String, reason: String },
}

impl AssignmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssignmentError::ConversationNotFound(_)
            | AssignmentError::AgentNotFound(_)
            | AssignmentError::TeamNotFound(_) => ErrorKind::NotFound,
            AssignmentError::TeamInactive(_) | AssignmentError::AgentUnavailable { .. } => {
                ErrorKind::Conflict
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
