//! Fetch-side components: the URL source, the fetch executor, worker
//! loops, and the run coordinator

mod coordinator;
pub mod executor;
pub mod source;
mod worker;

pub use coordinator::{run_crawl, Coordinator};
pub use executor::{FetchExecutor, HttpExecutor, TransportError};
pub use source::{FetchEntry, FetchSource, FileSource, VecSource};
pub use worker::run_fetch_worker;
