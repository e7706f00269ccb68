//! The output sink seam

use crate::crawler::source::FetchEntry;
use crate::request::RequestRecord;
use thiserror::Error;
use url::Url;

/// Output-side errors
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink error: {0}")]
    Other(String),
}

/// Result type alias for output operations
pub type OutputResult<T> = std::result::Result<T, OutputError>;

/// A terminal record on its way to the output sink
///
/// The record is immutable from here on (apart from the sink status the
/// output worker stamps on it); `original_url` and `entry` come from the
/// redirect chain's root.
#[derive(Debug, Clone)]
pub struct OutputTask {
    pub record: RequestRecord,
    pub original_url: Url,
    pub entry: Option<FetchEntry>,
}

/// Consumes terminal fetch-list records
///
/// Invoked exactly once per terminal record, successful or permanently
/// failed. `raw` is the fetched payload (empty when the fetch never
/// produced one) and `text` the extracted text.
pub trait OutputSink: Send {
    fn append(&mut self, task: &OutputTask, raw: &[u8], text: &str) -> OutputResult<()>;

    /// Called once when the run ends; `succeeded` is false after an abort
    fn finish(&mut self, succeeded: bool) -> OutputResult<()> {
        let _ = succeeded;
        Ok(())
    }
}
