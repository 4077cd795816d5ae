//! Error types for the billing collector
//!
//! Provides a unified error type and domain-specific error variants. Query and
//! publish failures carry enough detail to tell transient failures (worth a
//! retry) from permanent ones.

use thiserror::Error;

/// Result type alias using BillingError
pub type Result<T> = std::result::Result<T, BillingError>;

/// Unified error type for billing collector operations
#[derive(Debug, Error)]
pub enum BillingError {
    // Startup input errors
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    // Metrics backend errors
    #[error("Metrics query error: {0}")]
    Query(#[from] QueryError),

    // Event publishing errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors in caller-supplied input, rejected before the billing loop starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Invalid ISO8601 timestamp: {input} ({reason})")]
    InvalidTimestamp { input: String, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Metrics backend query errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Metrics backend unreachable: {0}")]
    Transport(String),

    #[error("Metrics backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Metrics backend rejected query ({error_type}): {message}")]
    Backend { error_type: String, message: String },

    #[error("Malformed metrics response: {0}")]
    Malformed(String),
}

impl QueryError {
    /// Whether retrying the same query could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            QueryError::Transport(_) => true,
            QueryError::Status { status, .. } => *status >= 500 || *status == 429,
            QueryError::Backend { .. } | QueryError::Malformed(_) => false,
        }
    }
}

/// Event publishing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Publisher connection error: {0}")]
    Connection(String),

    #[error("Publish timed out after {0}ms")]
    Timeout(u64),

    #[error("Event rejected by message bus: {0}")]
    Rejected(String),

    #[error("Failed to encode event: {0}")]
    Serialization(String),

    #[error("Publisher is closed")]
    Closed,
}

impl PublishError {
    /// Whether retrying the same publish could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Connection(_) | PublishError::Timeout(_))
    }

    /// Whether the publisher can no longer be used at all
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::Closed)
    }
}
