//! The output worker loop
//!
//! Pulls terminal records from the scheduler's output queue, runs the
//! (trivial) content extraction, and appends them to the sink. A sink
//! failure is a severe event: it trips the global kill switch so the run
//! winds down instead of silently losing records.

use crate::output::{OutputSink, OutputTask};
use crate::request::OutputStatus;
use crate::scheduler::RequestScheduler;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const OUTPUT_POLL: Duration = Duration::from_millis(200);

pub async fn run_output_worker(
    worker_id: usize,
    scheduler: Arc<RequestScheduler>,
    sink: Arc<Mutex<dyn OutputSink>>,
) {
    let mut prev: Option<(OutputTask, OutputStatus)> = None;
    loop {
        match scheduler.return_output_and_get_next(prev.take()) {
            Some(mut task) => {
                let raw = task
                    .record
                    .response
                    .as_ref()
                    .map(|r| r.body.clone())
                    .unwrap_or_default();
                let text = String::from_utf8_lossy(&raw).into_owned();

                let result = sink.lock().unwrap().append(&task, &raw, &text);
                let status = match result {
                    Ok(()) => OutputStatus::Written,
                    Err(e) => {
                        scheduler.report_severe(&format!(
                            "output sink failed for {}: {}",
                            task.record.url, e
                        ));
                        OutputStatus::Failed
                    }
                };
                task.record.output_status = Some(status);
                prev = Some((task, status));
            }
            None => {
                if scheduler.finished_output() {
                    break;
                }
                tokio::time::sleep(OUTPUT_POLL).await;
            }
        }
    }
    tracing::debug!("output worker {} exiting", worker_id);
}
