//! Scheduler statistics snapshot

/// A point-in-time snapshot of scheduler activity
///
/// Counter fields accumulate over the run; size fields reflect the instant
/// the snapshot was taken.
#[derive(Debug, Clone, Default)]
pub struct FetcherStatus {
    /// Requests handed to fetch workers (robots probes included)
    pub requests_issued: u64,
    /// Fetch-list records finished successfully
    pub succeeded: u64,
    /// Fetch-list records finished with a terminal failure
    pub failed: u64,
    /// Transient attempts sent back for retry
    pub retries: u64,
    /// Redirect hops followed
    pub redirects: u64,
    /// robots.txt rule sets resolved from a 2xx probe
    pub robots_fetched: u64,
    /// Requests dropped at admission (ceiling or unparseable URL)
    pub dropped: u64,
    /// Source entries skipped because they were marked do-not-fetch
    pub skipped_entries: u64,
    /// Raw bytes transferred by fetch workers
    pub bytes_fetched: u64,
    /// Records the output stage wrote successfully
    pub output_written: u64,
    /// Records the output stage failed to write
    pub output_errors: u64,
    /// Host queues created so far
    pub hosts_created: u64,
    /// Hosts tripped into dead-host mode
    pub hosts_dead: u64,

    pub queued_requests: usize,
    pub outstanding: usize,
    pub output_pending: usize,
    pub ready_hosts: usize,
    pub delay_hosts: usize,
    pub busy_hosts: usize,
    pub idle_hosts: usize,
    pub throttled_workers: usize,
}

impl FetcherStatus {
    /// One-line progress report for the periodic statistics log
    pub fn report(&self) -> String {
        format!(
            "issued={} ok={} failed={} retries={} redirects={} bytes={} \
             queued={} outstanding={} output={} hosts(r/d/b/i)={}/{}/{}/{} dead={} throttled={}",
            self.requests_issued,
            self.succeeded,
            self.failed,
            self.retries,
            self.redirects,
            self.bytes_fetched,
            self.queued_requests,
            self.outstanding,
            self.output_pending,
            self.ready_hosts,
            self.delay_hosts,
            self.busy_hosts,
            self.idle_hosts,
            self.hosts_dead,
            self.throttled_workers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_contains_counters() {
        let status = FetcherStatus {
            requests_issued: 12,
            succeeded: 9,
            failed: 3,
            ..Default::default()
        };
        let report = status.report();
        assert!(report.contains("issued=12"));
        assert!(report.contains("ok=9"));
        assert!(report.contains("failed=3"));
    }
}
