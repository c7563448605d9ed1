use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// What went wrong in a table store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableErrorKind {
    /// The table does not exist.
    TableNotFound,

    /// The table already exists.
    AlreadyExists,

    /// The request was malformed, e.g. a key missing its range attribute.
    InvalidRequest,

    /// The store could not be reached.
    Unavailable,

    /// Anything else.
    Other,
}

impl fmt::Display for TableErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TableErrorKind::TableNotFound => "table not found",
            TableErrorKind::AlreadyExists => "table already exists",
            TableErrorKind::InvalidRequest => "invalid request",
            TableErrorKind::Unavailable => "unavailable",
            TableErrorKind::Other => "other error",
        };
        f.write_str(text)
    }
}

/// An error raised by a table engine.
#[derive(Debug)]
pub struct TableError {
    kind: TableErrorKind,
    engine: &'static str,
    table: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    span_trace: SpanTrace,
}

impl TableError {
    /// Create an error.
    pub fn new<E>(engine: &'static str, kind: TableErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            engine,
            table: None,
            source: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }

    /// Attach the table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// The error category.
    pub fn kind(&self) -> TableErrorKind {
        self.kind
    }

    /// Name of the engine which produced the error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// The table involved, if known.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Span trace captured at creation.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl StdError for TableError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tables {}", self.engine, self.kind)?;
        if let Some(table) = &self.table {
            write!(f, " ({table})")?;
        }
        write!(f, ": {}", self.source)
    }
}
