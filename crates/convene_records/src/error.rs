//! Error types for the records crate.

use std::time::Duration;

use thiserror::Error;

use crate::identity::RecordId;
use crate::record::RemoteRecord;

/// Result type for record codec operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors from encoding or decoding record metadata.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Failed to encode system fields to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a system-fields blob.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },
}

impl RecordError {
    /// Creates an encoding failure.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding failure.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}

/// Result type for remote-service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// The closed taxonomy of remote-service failure conditions.
///
/// The sync pipeline recognizes each condition and maps it to one of:
/// retry with an adjusted batch size, resolve and continue, abort and
/// propagate, or convert to a busy/backoff error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The service asked the client to slow down.
    #[error("request rate limited")]
    RateLimited {
        /// Suggested backoff before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The target zone is temporarily too busy to serve the request.
    #[error("zone busy")]
    ZoneBusy {
        /// Suggested backoff before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The service is temporarily unavailable.
    #[error("service unavailable")]
    ServiceUnavailable {
        /// Suggested backoff before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The request referenced more records than one call may carry.
    #[error("request limit exceeded")]
    LimitExceeded,

    /// The service does not know the referenced record.
    #[error("unknown item: {id}")]
    UnknownItem {
        /// Identity the service did not recognize.
        id: RecordId,
    },

    /// The record changed on the server since it was last fetched. Carries
    /// the current server copy for merging.
    #[error("record changed on server: {}", server.id)]
    RecordChanged {
        /// Authoritative server-side record.
        server: Box<RemoteRecord>,
    },

    /// Some records in a batch failed while others succeeded.
    #[error("partial failure across {} records", failures.len())]
    PartialFailure {
        /// Per-record failure conditions.
        failures: Vec<(RecordId, ServiceError)>,
    },

    /// The service rejected the request outright.
    #[error("server rejected request: {message}")]
    ServerRejected {
        /// Server-supplied rejection detail.
        message: String,
    },

    /// No authenticated account is available.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Transport-level failure talking to the service.
    #[error("network failure: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },
}

impl ServiceError {
    /// Creates a rate-limited condition with a backoff hint.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited {
            retry_after: Some(retry_after),
        }
    }

    /// Creates a network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// The backoff hint, for the busy-family conditions that carry one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after }
            | Self::ZoneBusy { retry_after }
            | Self::ServiceUnavailable { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether this is one of the busy-family conditions the cleanup stage
    /// converts into a backoff window.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ZoneBusy { .. } | Self::ServiceUnavailable { .. }
        )
    }
}
