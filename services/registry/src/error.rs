//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// The stable error kinds reported by every registry service.
///
/// Store and transport failures are logged with their cause where they occur;
/// the error itself only names the operation and the entity involved, so it
/// can cross service boundaries unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Malformed request
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A row or message could not be encoded or decoded
    #[error("failed to marshal {0}")]
    Marshal(&'static str),

    /// The requested entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// A backing table could not be created at startup
    #[error("failed to initialize table {0}")]
    TableInitialization(String),

    /// A backing bucket could not be created at startup
    #[error("failed to initialize bucket {0}")]
    BucketInitialization(String),

    /// Writing a new row failed
    #[error("failed to create {0}")]
    Create(&'static str),

    /// A point read failed
    #[error("failed to get {0}")]
    Get(&'static str),

    /// A whole-row or object write failed
    #[error("failed to put {0}")]
    Put(&'static str),

    /// A partial update failed
    #[error("failed to update {0}")]
    Update(&'static str),

    /// A delete failed
    #[error("failed to delete {0}")]
    Delete(&'static str),

    /// A filtered scan failed
    #[error("failed to scan {0}")]
    Scan(&'static str),

    /// Marking a version as published failed
    #[error("failed to publish {0}")]
    Publish(&'static str),

    /// Discarding an in-flight version failed
    #[error("failed to abort {0}")]
    Abort(&'static str),

    /// Reading from an inbound stream failed
    #[error("failed to receive {0}")]
    Receive(&'static str),

    /// Writing to an outbound stream failed
    #[error("failed to send {0}")]
    Send(&'static str),

    /// A stored object did not match its reported length
    #[error("content length mismatch: expected {expected} bytes, read {actual}")]
    ContentLength {
        /// Length reported by the blob store
        expected: u64,
        /// Bytes actually read
        actual: u64,
    },

    /// The gateway could not reach a backend service
    #[error("{0} backend is unreachable")]
    BackendUnreachable(&'static str),

    /// The caller went away before the call completed
    #[error("call cancelled")]
    Cancelled,
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::BackendUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::ContentLength { .. } => StatusCode::BAD_GATEWAY,
            RegistryError::Marshal(_)
            | RegistryError::TableInitialization(_)
            | RegistryError::BucketInitialization(_)
            | RegistryError::Create(_)
            | RegistryError::Get(_)
            | RegistryError::Put(_)
            | RegistryError::Update(_)
            | RegistryError::Delete(_)
            | RegistryError::Scan(_)
            | RegistryError::Publish(_)
            | RegistryError::Abort(_)
            | RegistryError::Receive(_)
            | RegistryError::Send(_)
            | RegistryError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the stable error code for error responses
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidArgument(_) => "INVALID_ARGUMENT",
            RegistryError::Marshal(_) => "MARSHAL_FAILED",
            RegistryError::NotFound(_) => "NOT_FOUND",
            RegistryError::TableInitialization(_) => "TABLE_INIT_FAILED",
            RegistryError::BucketInitialization(_) => "BUCKET_INIT_FAILED",
            RegistryError::Create(_) => "CREATE_FAILED",
            RegistryError::Get(_) => "GET_FAILED",
            RegistryError::Put(_) => "PUT_FAILED",
            RegistryError::Update(_) => "UPDATE_FAILED",
            RegistryError::Delete(_) => "DELETE_FAILED",
            RegistryError::Scan(_) => "SCAN_FAILED",
            RegistryError::Publish(_) => "PUBLISH_FAILED",
            RegistryError::Abort(_) => "ABORT_FAILED",
            RegistryError::Receive(_) => "RECEIVE_FAILED",
            RegistryError::Send(_) => "SEND_FAILED",
            RegistryError::ContentLength { .. } => "CONTENT_LENGTH_MISMATCH",
            RegistryError::BackendUnreachable(_) => "BACKEND_UNREACHABLE",
            RegistryError::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}
