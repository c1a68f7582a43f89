//! Unified error types for the Taskbot boundaries.
//!
//! Each external collaborator of the dispatch engine gets its own error enum
//! so that the dispatcher can classify failures without string matching.
//! Engine-level errors (registration, dispatch) are defined in
//! `taskbot-framework`.

use thiserror::Error;

// =============================================================================
// FSM Storage Errors
// =============================================================================

/// Errors raised by an [`FsmStorage`](crate::fsm::FsmStorage) backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the operation.
    #[error("fsm storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be (de)serialized.
    #[error("fsm record serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Relational Store Errors
// =============================================================================

/// Errors raised by the user / activity stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The database could not be reached.
    #[error("database unavailable: {0}")]
    Unavailable(String),

    /// The query failed for a reason other than connectivity.
    #[error("query failed: {0}")]
    Query(String),
}

// =============================================================================
// Outbound API Errors
// =============================================================================

/// Error type for outbound bot API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected to the messaging platform.
    #[error("bot is not connected")]
    NotConnected,
    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The platform rejected the call.
    #[error("API error ({code}): {description}")]
    Rejected { code: i64, description: String },
    /// Failed to serialize the request or parse the response.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised while fetching or acknowledging updates.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The update feed has been closed and will yield nothing more.
    #[error("update source closed")]
    Closed,

    /// Fetching updates failed; the caller may retry later.
    #[error("failed to fetch updates: {0}")]
    Fetch(String),

    /// Acknowledging an update failed.
    #[error("failed to acknowledge update {update_id}: {reason}")]
    Ack { update_id: u64, reason: String },
}

// =============================================================================
// Filter Errors
// =============================================================================

/// Raised by a fallible filter instead of returning a boolean.
///
/// The router downgrades it to "no match" and logs it.
#[derive(Debug, Clone, Error)]
#[error("filter failed: {0}")]
pub struct FilterError(pub String);

impl FilterError {
    /// Creates a filter error from any message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for FSM storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for relational store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for outbound API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
