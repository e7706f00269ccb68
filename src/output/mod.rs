//! Output pipeline: sink trait, SQLite sink, and the output worker loop

mod sqlite_output;
mod traits;
mod worker;

pub use sqlite_output::SqliteSink;
pub use traits::{OutputError, OutputResult, OutputSink, OutputTask};
pub use worker::run_output_worker;
