use thiserror::Error;

/// Error taxonomy for the firehose layer.
#[derive(Debug, Error)]
pub enum FirehoseError {
    #[error("search failed: {0}")]
    Search(#[from] ergs_search::SearchError),

    #[error("transport error: {0}")]
    Transport(String),
}
