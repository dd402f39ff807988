//! Error types for the resilience toolkit.

use std::fmt;

/// Result type for toolkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification used by retry policies.
///
/// A [`crate::retry::RetryPolicy`] names the kinds it considers retryable;
/// everything else surfaces to the caller on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The remote call exceeded its deadline.
    Timeout,
    /// The connection dropped mid-flight.
    ConnectionReset,
    /// Anything that is not a transport-level transient.
    Other,
}

/// Error types for the resilience toolkit.
///
/// All operations return `Result<T>` where `Result` is defined as
/// `std::result::Result<T, Error>`. Different variants represent different
/// failure modes:
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a value to cache bytes.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes to a value.
    ///
    /// This indicates corrupted or malformed data in the store.
    ///
    /// **Recovery:** The cache entry should be evicted and refetched.
    DeserializationError(String),

    /// Local storage engine error (disk, platform kv store, etc).
    ///
    /// The cache layer treats this as a miss (fail-open) so a corrupt or
    /// unavailable local store degrades functionality instead of crashing
    /// the caller.
    StorageError(String),

    /// Remote API error, optionally carrying an HTTP status code.
    ///
    /// Retryability is decided by the status code against the active
    /// retry policy: 5xx and 429 are transient, other 4xx are not.
    Api {
        /// HTTP status code if the server produced a response
        status: Option<u16>,
        /// Server- or client-side diagnostic message
        message: String,
    },

    /// The remote call timed out.
    ///
    /// **Recovery:** Retry with exponential backoff.
    ConnectionTimeout(String),

    /// The connection was reset by the peer or the link dropped.
    ///
    /// **Recovery:** Retry with exponential backoff.
    ConnectionReset(String),

    /// The circuit breaker for this operation is open.
    ///
    /// Distinct from network errors: it signals "do not even try", so
    /// callers can skip their own fallback/retry logic. Never retryable.
    CircuitOpen {
        /// Operation name the breaker guards
        operation: String,
    },

    /// No usable network path and the caller did not allow a stale or
    /// queued fallback.
    NetworkUnavailable,

    /// Invalid cache entry: corrupted envelope or bad magic.
    ///
    /// **Recovery:** Evict the cache entry and refetch.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    ///
    /// Raised when cached entries were written by a build with a
    /// different `CURRENT_SCHEMA_VERSION`. The entry is evicted and
    /// refetched on next access; no action needed.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from the cached entry)
        found: u32,
    },

    /// Configuration error during construction.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// HTTP status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Coarse transport classification for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionTimeout(_) => ErrorKind::Timeout,
            Error::ConnectionReset(_) => ErrorKind::ConnectionReset,
            _ => ErrorKind::Other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Error::Api { status, message } => match status {
                Some(code) => write!(f, "API error ({}): {}", code, message),
                None => write!(f, "API error: {}", message),
            },
            Error::ConnectionTimeout(msg) => write!(f, "Connection timeout: {}", msg),
            Error::ConnectionReset(msg) => write!(f, "Connection reset: {}", msg),
            Error::CircuitOpen { operation } => {
                write!(f, "Circuit open for operation '{}'", operation)
            }
            Error::NetworkUnavailable => write!(f, "Network unavailable"),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::StorageError(e.to_string())
        } else if e.is_syntax() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
