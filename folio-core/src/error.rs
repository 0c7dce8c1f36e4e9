//! Error types for folio-core

use thiserror::Error;

/// Main error type for the folio-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error: unknown index, duplicate index name, schema
    /// mismatch at bootstrap. Fatal and not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The document codec refused a payload.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Id or version collision detected at flush. The transaction has been
    /// rolled back and the session is cancelled.
    #[error("concurrency conflict on document {id} ({doc_type})")]
    Concurrency { doc_type: String, id: i64 },

    /// Error reported by a database backend.
    #[error("database error: {0}")]
    Database(String),

    /// Error from the bundled SQLite backend.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query references a column or index that does not exist, or the
    /// query shape cannot be rendered. Reported when the query is compiled,
    /// before anything touches the database.
    #[error("query compile error: {0}")]
    QueryCompile(String),

    /// Filter mini-language parse error, with the byte offset of the
    /// offending character.
    #[error("filter parse error at position {position}: {message}")]
    Filter { position: usize, message: String },

    /// The caller's cancellation token fired during a suspending operation.
    /// In-memory session state is preserved; the operation may be retried.
    #[error("operation cancelled")]
    Cancelled,

    /// The session's last flush failed and was rolled back; no further
    /// writes are accepted. Create a new session to retry.
    #[error("session is cancelled; create a new session")]
    SessionCancelled,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias for folio-core
pub type Result<T> = std::result::Result<T, Error>;
