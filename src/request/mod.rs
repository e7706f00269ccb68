//! Request lifecycle state: outcome taxonomy, records, and the record arena

mod reasons;
mod record;

pub use reasons::{ErrorReason, FailureReason};
pub use record::{
    FetchResponse, HttpVersion, OutputStatus, RecordArena, RecordId, RequestRecord,
};
