use thiserror::Error;

/// Error taxonomy for the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid search query: {0}")]
    InvalidQuery(String),

    #[error("block not found")]
    NotFound,

    #[error("datasource {datasource:?} has {count} pending migration(s)")]
    PendingMigrations { datasource: String, count: usize },
}

/// Recognises FTS5 syntax errors by substring match against the underlying
/// database error message and re-maps them into `InvalidQuery` with a
/// user-friendly reason, keyed off what's in the *query* (not the raw
/// error).
pub(crate) fn classify_query_error(query: &str, err: sqlx::Error) -> StorageError {
    let raw = err.to_string();
    let is_fts_syntax_error =
        raw.contains("fts5: syntax error") || raw.contains("SQL logic error");

    if !is_fts_syntax_error {
        return StorageError::Db(err);
    }

    let unmatched_quote = query.matches('"').count() % 2 == 1;
    let reason = if query.contains('/') {
        "Forward slashes (/) are not allowed in search queries; remove them and try again."
    } else if unmatched_quote {
        "Unmatched quote in search query; check your quotation marks."
    } else if raw.contains("syntax error") {
        "Search query has invalid syntax; simplify it and try again."
    } else {
        "Search query could not be parsed."
    };

    StorageError::InvalidQuery(reason.to_string())
}
