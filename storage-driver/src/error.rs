use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// What went wrong in a blob store, independent of which engine reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// The bucket or object does not exist.
    NotFound,

    /// The bucket or object already exists.
    AlreadyExists,

    /// The engine refused the operation.
    PermissionDenied,

    /// Reading or writing the underlying medium failed.
    Io,

    /// The engine could not be reached.
    ServiceUnavailable,

    /// The request was malformed, e.g. an empty bucket name.
    InvalidRequest,

    /// Anything else.
    Other,
}

impl StorageErrorKind {
    /// Whether the same request might succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageErrorKind::Io | StorageErrorKind::ServiceUnavailable)
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::AlreadyExists => "already exists",
            StorageErrorKind::PermissionDenied => "permission denied",
            StorageErrorKind::Io => "I/O error",
            StorageErrorKind::ServiceUnavailable => "service unavailable",
            StorageErrorKind::InvalidRequest => "invalid request",
            StorageErrorKind::Other => "other error",
        };
        f.write_str(text)
    }
}

impl From<std::io::ErrorKind> for StorageErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => StorageErrorKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            std::io::ErrorKind::InvalidInput => StorageErrorKind::InvalidRequest,
            _ => StorageErrorKind::Io,
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// An error raised by a blob storage engine.
///
/// Carries the [`StorageErrorKind`], the engine name, the bucket and path
/// involved (when known) and the span trace active when it was created.
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "memory",
///     StorageErrorKind::NotFound,
///     "no such object",
/// )
/// .bucket("modules")
/// .path("acme/vpc/aws/1.0.0.zip")
/// .build();
///
/// assert_eq!(error.kind(), StorageErrorKind::NotFound);
/// assert_eq!(error.bucket(), Some("modules"));
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create an error without bucket or path context.
    #[track_caller]
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Start building an error; bucket and path are optional.
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            kind,
            engine,
            source: error.into(),
            bucket: None,
            path: None,
        }
    }

    /// Build an error from an I/O failure, classifying it by its [`std::io::ErrorKind`].
    #[track_caller]
    pub fn io(engine: &'static str, error: std::io::Error) -> Self {
        Self::new(engine, error.kind().into(), error)
    }

    /// The error category.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Name of the engine which produced the error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// The bucket involved, if known.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// The object path involved, if known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Whether this error reports a missing bucket or object.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// Backtrace captured at creation (honours `RUST_BACKTRACE`).
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Span trace captured at creation.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} storage {}", self.engine, self.kind)?;
        match (&self.bucket, &self.path) {
            (Some(bucket), Some(path)) => write!(f, " at {bucket}:{path}")?,
            (Some(bucket), None) => write!(f, " in bucket {bucket}")?,
            (None, Some(path)) => write!(f, " at {path}")?,
            (None, None) => {}
        }
        write!(f, ": {}", self.source)
    }
}

/// Adds bucket and path context to a [`StorageError`].
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    bucket: Option<String>,
    path: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the object path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Finish the error, capturing traces at the call site.
    #[track_caller]
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            bucket: self.bucket,
            path: self.path,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}
