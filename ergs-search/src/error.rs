use ergs_store::StorageError;
use thiserror::Error;

/// Error taxonomy for the search layer.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid start_date/end_date: {0}")]
    InvalidDate(String),

    #[error("invalid since: {0}")]
    InvalidSince(String),

    #[error("searching {datasource}: {source}")]
    Datasource {
        datasource: String,
        #[source]
        source: StorageError,
    },
}
