use thiserror::Error;

use rusqlite::ErrorCode;

use crate::transaction::IsolationLevel;

#[derive(Debug, Error)]
pub enum SqlSessionError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("isolation level not supported: {0:?}")]
    IsolationUnsupported(IsolationLevel),

    #[error("multiple statements")]
    MultipleStatements,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

impl SqlSessionError {
    /// Engine-native `SQLITE_INTERRUPT` failure, as the engine itself would report it.
    #[must_use]
    pub fn interrupted() -> Self {
        SqlSessionError::SqliteError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::OperationInterrupted,
                extended_code: rusqlite::ffi::SQLITE_INTERRUPT,
            },
            Some("interrupted".into()),
        ))
    }

    /// Primary engine result code, if this error came from the engine.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SqlSessionError::SqliteError(err) => err.sqlite_error_code(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.code() == Some(ErrorCode::OperationInterrupted)
    }
}
