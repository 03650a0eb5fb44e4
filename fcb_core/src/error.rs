use thiserror::Error;

/// The error type for all container read/write operations.
///
/// Structural errors (magic bytes, header size, parse, truncation, missing
/// range support) abort a reader session. `UnindexedColumn` and
/// `TypeMismatch` are caller-input errors raised before any index or feature
/// I/O. A `Decode` on a single feature record is recovered locally by the
/// iterators (skip and count) and only surfaces when decoding is requested
/// explicitly.
#[derive(Debug, Error)]
pub enum Error {
    // Container format errors
    #[error("missing magic bytes in FCB file header")]
    MissingMagicBytes,

    #[error("invalid header size {0}, expected size between 8 and 512MB")]
    IllegalHeaderSize(usize),

    #[error("malformed container: {0}")]
    Parse(String),

    #[error("truncated read: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("required spatial index is missing")]
    NoIndex,

    #[error("no columns found in header")]
    NoColumnsInHeader,

    // Caller-input errors, raised before any I/O
    #[error("column {0:?} has no attribute index")]
    UnindexedColumn(String),

    #[error("type mismatch for column {column:?}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported column type: {0}")]
    UnsupportedColumnType(String),

    // Per-record errors
    #[error("feature record decode failed: {0}")]
    Decode(String),

    // IO and serialization errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("r-tree error: {0}")]
    Rtree(#[from] packed_rtree::Error),

    #[error("attribute index error: {0}")]
    Index(#[from] sorted_index::Error),

    // HTTP transport errors (when the http feature is enabled)
    #[cfg(feature = "http")]
    #[error("http client error: {0}")]
    HttpClient(#[from] http_range_client::HttpError),

    #[cfg(feature = "http")]
    #[error("server does not support range requests: {0}")]
    RangeNotSupported(String),
}

impl Error {
    pub fn is_io_error(&self) -> bool {
        #[cfg(feature = "http")]
        if matches!(self, Error::HttpClient(_)) {
            return true;
        }
        matches!(self, Error::Io(_))
    }

    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::MissingMagicBytes
                | Error::IllegalHeaderSize(_)
                | Error::Parse(_)
                | Error::Truncated { .. }
        )
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Error::UnindexedColumn(_)
                | Error::TypeMismatch { .. }
                | Error::UnsupportedColumnType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
