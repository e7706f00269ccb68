//! The fetch worker loop
//!
//! Each worker loops on the scheduler's rendezvous call: hand back the
//! previous outcome, get the next assignment, fetch it. A worker with
//! nothing to do sleeps a bounded poll interval; a throttled worker parks
//! after returning its in-flight request and resumes when unparked.

use crate::crawler::executor::FetchExecutor;
use crate::scheduler::{CompletedFetch, RequestScheduler};
use std::sync::Arc;
use std::time::Duration;

/// Bounded sleep between polls when no work is available
pub(crate) const WORKER_POLL: Duration = Duration::from_millis(200);

pub async fn run_fetch_worker(
    worker_id: usize,
    scheduler: Arc<RequestScheduler>,
    executor: Arc<dyn FetchExecutor>,
) {
    let mut completed: Option<CompletedFetch> = None;
    loop {
        if completed.is_none() {
            if scheduler.finished_requests() {
                break;
            }
            if scheduler.is_throttled(worker_id) {
                tokio::time::sleep(WORKER_POLL).await;
                continue;
            }
        }

        match scheduler.return_request_and_get_next(completed.take()) {
            Some(assignment) => {
                tracing::debug!("worker {} fetching {}", worker_id, assignment.url);
                let result = executor.fetch(&assignment).await;
                let bytes_transferred = result.as_ref().map(|r| r.body.len() as u64).unwrap_or(0);
                completed = Some(CompletedFetch {
                    id: assignment.id,
                    result,
                    bytes_transferred,
                });
            }
            None => {
                if scheduler.finished_requests() {
                    break;
                }
                tokio::time::sleep(WORKER_POLL).await;
            }
        }
    }
    tracing::debug!("fetch worker {} exiting", worker_id);
}
