//! Error types for storage operations

use std::fmt;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug)]
pub enum StorageError {
    /// No metric with this name is stored
    NotFound(String),

    /// A metric with this name is already stored
    AlreadyExists(String),

    /// Stored or incoming data is malformed, or its kind does not match
    InvalidMetric(String),

    /// The transactional backend was constructed without a connection string
    EmptyConfiguration,

    /// Schema setup failed
    MigrationFailed(String),

    /// Connectivity-class failure, eligible for retry
    ConnectionFailed(String),

    /// Database query failed
    QueryFailed(String),

    /// Snapshot or wire serialization/deserialization error
    SerializationError(String),

    /// I/O error (file access, etc.)
    IoError(std::io::Error),

    /// Invalid configuration
    InvalidConfig(String),
}

impl StorageError {
    /// Whether the failure is connectivity-class and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::ConnectionFailed(_))
    }

    /// Whether the underlying error is a missing file
    pub fn is_missing_file(&self) -> bool {
        matches!(self, StorageError::IoError(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(name) => write!(f, "metric not found: {}", name),
            StorageError::AlreadyExists(name) => write!(f, "metric already exists: {}", name),
            StorageError::InvalidMetric(msg) => write!(f, "invalid metric values: {}", msg),
            StorageError::EmptyConfiguration => write!(f, "empty database connection string"),
            StorageError::MigrationFailed(msg) => write!(f, "database migration failed: {}", msg),
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to storage backend: {}", msg)
            }
            StorageError::QueryFailed(msg) => write!(f, "storage query failed: {}", msg),
            StorageError::SerializationError(msg) => {
                write!(f, "metric serialization error: {}", msg)
            }
            StorageError::IoError(err) => write!(f, "I/O error: {}", err),
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

/// SQLite primary result codes that mean "try again later"
#[cfg(feature = "storage-sqlite")]
const SQLITE_BUSY: i32 = 5;
#[cfg(feature = "storage-sqlite")]
const SQLITE_LOCKED: i32 = 6;

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => StorageError::ConnectionFailed(err.to_string()),
            sqlx::Error::RowNotFound => StorageError::NotFound("no rows found".to_string()),
            sqlx::Error::Database(ref db_err) => {
                // extended result codes carry the primary code in the low byte
                let primary = db_err
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                if matches!(primary, Some(SQLITE_BUSY) | Some(SQLITE_LOCKED)) {
                    StorageError::ConnectionFailed(err.to_string())
                } else if db_err.is_unique_violation() {
                    StorageError::AlreadyExists(db_err.message().to_string())
                } else if db_err.is_check_violation() || db_err.is_foreign_key_violation() {
                    StorageError::InvalidMetric(db_err.message().to_string())
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        match err {
            sqlx::migrate::MigrateError::Execute(inner)
            | sqlx::migrate::MigrateError::ExecuteMigration(inner, _) => match StorageError::from(inner) {
                StorageError::ConnectionFailed(msg) => StorageError::ConnectionFailed(msg),
                other => StorageError::MigrationFailed(other.to_string()),
            },
            _ => StorageError::MigrationFailed(err.to_string()),
        }
    }
}
