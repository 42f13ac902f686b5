use thiserror::Error;

/// An error reported by a native database handle.
///
/// `code` carries the driver-specific identifier when one is available: the
/// SQLSTATE for PostgreSQL, the numeric server error for MySQL and the
/// extended result code for SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RelqError {
    /// Error returned by the native handle while running a statement
    #[error("Driver error: {error} (SQL: {sql})")]
    Driver { error: DriverError, sql: String },

    /// Error while establishing or re-establishing the native handle
    #[error("Connection error: {0}")]
    Connection(DriverError),

    /// The connection dropped while a transaction was open
    #[error("Connection lost inside an open transaction: {0}")]
    LostInTransaction(DriverError),

    /// No rows returned when at least one was expected
    #[error("No rows found")]
    NotFound,

    /// Error with transaction
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// A relation name that the model does not declare
    #[error("Call to undefined relationship [{relation}] on model [{model}]")]
    UnknownRelation { model: String, relation: String },

    /// A model name that the registry does not know
    #[error("Model [{0}] is not registered")]
    UnknownModel(String),

    /// A scope name that the registry does not know
    #[error("Scope [{scope}] is not registered on model [{model}]")]
    UnknownScope { model: String, scope: String },

    /// An operation applied to the wrong kind of relation
    #[error("Relation [{relation}] does not support {operation}")]
    RelationMisuse {
        relation: String,
        operation: &'static str,
    },

    /// Comparison operator outside the accepted set
    #[error("Illegal operator [{0}]")]
    InvalidOperator(String),

    /// Placeholder count in a raw fragment differs from the bindings supplied
    #[error("Raw fragment `{sql}` has {placeholders} placeholders but {bindings} bindings")]
    BindingMismatch {
        sql: String,
        placeholders: usize,
        bindings: usize,
    },

    /// Error in query construction
    #[error("Query error: {0}")]
    Query(String),

    /// Error in configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error decoding a pagination cursor
    #[error("Cursor error: {0}")]
    Cursor(String),

    /// Error mapping data
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Generic error
    #[error("Database error: {0}")]
    Other(String),
}

impl RelqError {
    /// The native error behind this failure, when there is one.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            RelqError::Driver { error, .. }
            | RelqError::Connection(error)
            | RelqError::LostInTransaction(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(feature = "rusqlite")]
impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _) => {
                DriverError::with_code(inner.extended_code.to_string(), err.to_string())
            }
            _ => DriverError::new(err.to_string()),
        }
    }
}

#[cfg(feature = "postgres-sync")]
impl From<postgres::Error> for DriverError {
    fn from(err: postgres::Error) -> Self {
        match err.code() {
            Some(state) => DriverError::with_code(state.code(), err.to_string()),
            None => DriverError::new(err.to_string()),
        }
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, RelqError>;
