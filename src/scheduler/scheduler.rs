//! The global request scheduler
//!
//! `RequestScheduler` is the admission controller and rendezvous point for
//! the whole run: it drains the URL source, creates and evicts host queues,
//! keeps them partitioned into ready/delay/busy/idle sets, dispatches
//! requests to fetch workers, classifies completions, and routes terminal
//! records to the output queue.
//!
//! All host-queue state is mutated only inside the scheduler's core lock;
//! the output queue has its own lock so fetch-side and output-side critical
//! sections never block each other. Lock order is always core before
//! output.

use crate::config::Config;
use crate::crawler::executor::TransportError;
use crate::crawler::source::{FetchEntry, FetchSource};
use crate::output::OutputTask;
use crate::request::{
    FailureReason, FetchResponse, HttpVersion, OutputStatus, RecordArena, RecordId, RequestRecord,
};
use crate::robots::{RobotRulesParser, RuleSet};
use crate::scheduler::host_queue::{EvictedHost, HostQueue, Partition, RobotsState};
use crate::scheduler::status::FetcherStatus;
use crate::scheduler::throttle::BandwidthThrottle;
use crate::url::{HostBanList, HostKey};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use url::Url;

/// A request handed to a fetch worker
#[derive(Debug, Clone)]
pub struct FetchAssignment {
    pub id: RecordId,
    pub url: Url,
    /// Address resolved on an earlier attempt, reusable by the executor
    pub resolved_addr: Option<IpAddr>,
    pub http_version: HttpVersion,
    pub is_robots: bool,
}

/// A finished fetch attempt on its way back from a worker
#[derive(Debug)]
pub struct CompletedFetch {
    pub id: RecordId,
    pub result: std::result::Result<FetchResponse, TransportError>,
    /// Raw bytes moved for this attempt, fed to the bandwidth throttle
    pub bytes_transferred: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests_issued: u64,
    succeeded: u64,
    failed: u64,
    retries: u64,
    redirects: u64,
    robots_fetched: u64,
    dropped: u64,
    skipped_entries: u64,
    bytes_fetched: u64,
    output_written: u64,
    output_errors: u64,
    hosts_created: u64,
    hosts_dead: u64,
}

/// Bounded cache of evicted idle hosts, oldest out first
#[derive(Debug)]
struct EvictedCache {
    map: HashMap<HostKey, EvictedHost>,
    order: VecDeque<HostKey>,
    capacity: usize,
}

impl EvictedCache {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn insert(&mut self, key: HostKey, saved: EvictedHost) {
        if self.map.insert(key.clone(), saved).is_none() {
            self.order.push_back(key);
        }
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.map.remove(&old);
                }
                None => break,
            }
        }
    }

    fn take(&mut self, key: &HostKey) -> Option<EvictedHost> {
        self.map.remove(key)
    }
}

/// Everything guarded by the scheduler's core lock
struct SchedulerCore {
    config: Arc<Config>,
    parser: RobotRulesParser,
    ban_list: HostBanList,

    arena: RecordArena,
    queues: HashMap<HostKey, HostQueue>,
    /// Ready queues ordered by ascending pending length: cheapest first
    ready: BTreeSet<(usize, HostKey)>,
    delay: HashSet<HostKey>,
    busy: HashSet<HostKey>,
    idle: HashSet<HostKey>,
    idle_order: VecDeque<HostKey>,
    evicted: EvictedCache,

    source: Box<dyn FetchSource>,
    source_exhausted: bool,
    queued_requests: usize,
    outstanding_total: usize,
    pending_output: VecDeque<OutputTask>,
    counters: Counters,
    severe: Arc<AtomicBool>,
}

impl SchedulerCore {
    fn report_severe(&self, message: &str) {
        tracing::error!("{}", message);
        self.severe.store(true, Ordering::SeqCst);
    }

    // ===== Partition bookkeeping =====

    fn detach(&mut self, key: &HostKey) {
        let Some(queue) = self.queues.get(key) else {
            return;
        };
        match queue.partition {
            Partition::Ready => {
                self.ready.remove(&(queue.ready_len, key.clone()));
            }
            Partition::Delay => {
                self.delay.remove(key);
            }
            Partition::Busy => {
                self.busy.remove(key);
            }
            Partition::Idle => {
                self.idle.remove(key);
            }
        }
    }

    /// Re-files a queue under the partition matching its current state
    fn relocate(&mut self, key: &HostKey, now: Instant) {
        self.detach(key);
        let Some(queue) = self.queues.get_mut(key) else {
            return;
        };
        let partition = queue.partition_for(now);
        queue.partition = partition;
        match partition {
            Partition::Ready => {
                queue.ready_len = queue.pending_len();
                self.ready.insert((queue.ready_len, key.clone()));
            }
            Partition::Delay => {
                self.delay.insert(key.clone());
            }
            Partition::Busy => {
                self.busy.insert(key.clone());
            }
            Partition::Idle => {
                if self.idle.insert(key.clone()) {
                    self.idle_order.push_back(key.clone());
                }
            }
        }
    }

    fn verify_partitions(&self) {
        let sum = self.ready.len() + self.delay.len() + self.busy.len() + self.idle.len();
        if sum != self.queues.len() {
            tracing::warn!(
                "Host partition bookkeeping drift: {}+{}+{}+{} != {} hosts",
                self.ready.len(),
                self.delay.len(),
                self.busy.len(),
                self.idle.len(),
                self.queues.len()
            );
            debug_assert!(false, "partition sizes diverged from host table");
        }
    }

    // ===== Host queue lifecycle =====

    fn ensure_queue(&mut self, key: &HostKey) {
        if self.queues.contains_key(key) {
            return;
        }
        let slots = self.config.scheduler.max_requests_per_host as usize;
        let queue = match self.evicted.take(key) {
            Some(saved) => {
                tracing::debug!("Rehydrating host {} from the idle cache", key);
                HostQueue::rehydrate(key.clone(), slots, saved)
            }
            None => {
                self.counters.hosts_created += 1;
                HostQueue::new(key.clone(), slots)
            }
        };
        self.queues.insert(key.clone(), queue);
        if self.idle.insert(key.clone()) {
            self.idle_order.push_back(key.clone());
        }
    }

    fn evict_idle(&mut self) {
        let max_idle = self.config.scheduler.max_idle_hosts as usize;
        while self.idle.len() > max_idle {
            let Some(key) = self.idle_order.pop_front() else {
                break;
            };
            if !self.idle.contains(&key) {
                continue;
            }
            let evictable = self
                .queues
                .get(&key)
                .map(|q| q.partition == Partition::Idle && q.is_finished())
                .unwrap_or(false);
            if !evictable {
                continue;
            }
            self.idle.remove(&key);
            if let Some(queue) = self.queues.remove(&key) {
                tracing::debug!("Evicting idle host {}", key);
                self.evicted.insert(key, queue.evict());
            }
        }
    }

    // ===== Robots bootstrap / refresh =====

    /// Queues a robots probe for an HTTP host, or skips gating otherwise
    fn bootstrap_robots(&mut self, key: &HostKey, _now: Instant) {
        if key.is_http() {
            let Some(robots_url) = key.robots_url() else {
                return;
            };
            let mut probe = RequestRecord::new_robots(robots_url);
            probe.bind_host(key.clone());
            let probe_id = self.arena.insert(probe);
            let Some(queue) = self.queues.get_mut(key) else {
                return;
            };
            queue.push_robots(probe_id);
            queue.set_robots_queued(probe_id);
            self.queued_requests += 1;
            tracing::debug!("Queued robots.txt probe for {}", key);
        } else if let Some(queue) = self.queues.get_mut(key) {
            queue.skip_robots();
        }
    }

    /// Re-probes a host whose cached rules have expired
    fn refresh_robots(&mut self, key: &HostKey, now: Instant) {
        let expired = self
            .queues
            .get(key)
            .and_then(HostQueue::robots_rules)
            .map(|rules| rules.is_expired(Utc::now()))
            .unwrap_or(false);
        if expired {
            tracing::debug!("robots.txt for {} expired, re-probing", key);
            self.bootstrap_robots(key, now);
        }
    }

    /// Expiry for freshly resolved rules: the response `Expires` header
    /// clamped to a minimum lifetime, or the default lifetime when absent
    fn robots_expiry(&self, header_expires: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let wall = Utc::now();
        let minimum = wall + chrono::Duration::seconds(self.config.scheduler.robots_min_lifetime_secs as i64);
        let default = wall + chrono::Duration::seconds(self.config.scheduler.robots_lifetime_secs as i64);
        match header_expires {
            Some(expires) => expires.max(minimum),
            None => default,
        }
    }

    // ===== Admission =====

    /// Admits a new record (fresh, robots probe, or redirect target) into
    /// the host-queueing pipeline
    fn admit(&mut self, id: RecordId, now: Instant) {
        let Some((url, is_robots, num_errors, num_redirects)) = self
            .arena
            .get(id)
            .map(|r| (r.url.clone(), r.is_robots(), r.num_errors, r.num_redirects))
        else {
            return;
        };

        let Some(key) = HostKey::from_url(&url) else {
            self.fail_record(
                id,
                FailureReason::BadUrl,
                format!("no usable host in {}", url),
                now,
            );
            return;
        };

        if self.ban_list.is_banned(key.host()) {
            self.fail_record(
                id,
                FailureReason::HostnameBanned,
                format!("hostname {} is banned", key.host()),
                now,
            );
            return;
        }

        self.ensure_queue(&key);

        let bind_violation = match self.arena.get_mut(id) {
            Some(record) => {
                if record.host().is_none() {
                    record.bind_host(key.clone());
                    false
                } else {
                    record.host() != Some(&key)
                }
            }
            None => return,
        };
        if bind_violation {
            self.report_severe(&format!("record {} rebound to a different host {}", id, key));
            self.fail_record(id, FailureReason::Unknown, "host binding violated", now);
            return;
        }

        if self.queues.get(&key).map(HostQueue::is_dead).unwrap_or(false) {
            self.fail_record(
                id,
                FailureReason::DeadHost,
                format!("host {} is dead", key),
                now,
            );
            self.relocate(&key, now);
            return;
        }

        if !is_robots {
            let needs_bootstrap = matches!(
                self.queues.get(&key).map(HostQueue::robots),
                Some(RobotsState::Initial)
            );
            if needs_bootstrap {
                self.bootstrap_robots(&key, now);
            }
        }

        // Only fresh fetch-list requests may be dropped at the ceiling;
        // robots probes and redirects block other hosts if lost
        let fresh = !is_robots && num_errors == 0 && num_redirects == 0;
        let Some(queue) = self.queues.get_mut(&key) else {
            return;
        };
        if fresh && queue.pending_len() >= self.config.scheduler.max_per_host_queue as usize {
            self.counters.dropped += 1;
            tracing::debug!("Dropping {} (queue for {} is full)", url, key);
            self.arena.remove(id);
            self.relocate(&key, now);
            return;
        }

        if is_robots {
            queue.push_robots(id);
        } else if fresh {
            queue.push_fresh(id);
        } else {
            queue.push_retry(id);
        }
        self.queued_requests += 1;
        self.relocate(&key, now);
    }

    /// Pulls entries from the URL source up to the global ceilings
    fn refill_from_source(&mut self, now: Instant) {
        let max_queued = self.config.scheduler.max_queued_requests as usize;
        let max_hosts = self.config.scheduler.max_hosts as usize;

        while !self.source_exhausted
            && self.queued_requests < max_queued
            && self.queues.len() < max_hosts
        {
            match self.source.next_entry() {
                Ok(Some(entry)) => {
                    if !entry.should_fetch {
                        self.counters.skipped_entries += 1;
                        continue;
                    }
                    match Url::parse(&entry.url) {
                        Ok(url) => {
                            let id = self.arena.insert(RequestRecord::new(url, entry));
                            self.admit(id, now);
                        }
                        Err(e) => {
                            self.counters.dropped += 1;
                            tracing::debug!("Dropping unparseable URL {}: {}", entry.url, e);
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("URL source exhausted");
                    self.source_exhausted = true;
                }
                Err(e) => {
                    tracing::warn!("URL source error, treating as exhausted: {}", e);
                    self.source_exhausted = true;
                }
            }
        }
    }

    // ===== Dispatch =====

    /// Returns the next dispatchable request, draining dead-host and
    /// robots-denied requests it encounters along the way
    fn get_next_request(&mut self, now: Instant, output_backlog: usize) -> Option<FetchAssignment> {
        // Backpressure: do not start work the output stage cannot absorb
        let max_output = self.config.scheduler.max_output_queue as usize;
        if output_backlog + self.pending_output.len() >= max_output {
            return None;
        }

        loop {
            let entry = self.ready.iter().next().cloned()?;
            let key = entry.1.clone();

            if !self.queues.contains_key(&key) {
                self.ready.remove(&entry);
                continue;
            }

            self.refresh_robots(&key, now);
            if let Some(queue) = self.queues.get_mut(&key) {
                queue.promote_slots(now);
            }

            let ready_now = self
                .queues
                .get(&key)
                .map(|q| q.request_ready(now))
                .unwrap_or(false);
            if !ready_now {
                self.relocate(&key, now);
                continue;
            }

            let Some(id) = self.queues.get_mut(&key).and_then(HostQueue::pop_next) else {
                self.relocate(&key, now);
                continue;
            };
            self.queued_requests = self.queued_requests.saturating_sub(1);

            if self.queues.get(&key).map(HostQueue::is_dead).unwrap_or(false) {
                self.relocate(&key, now);
                self.fail_record(
                    id,
                    FailureReason::DeadHost,
                    format!("host {} is dead", key),
                    now,
                );
                continue;
            }

            let Some((is_robots, url)) = self
                .arena
                .get(id)
                .map(|r| (r.is_robots(), r.url.clone()))
            else {
                self.relocate(&key, now);
                continue;
            };

            if !is_robots {
                let denied = self
                    .queues
                    .get(&key)
                    .and_then(HostQueue::robots_rules)
                    .map(|rules| !rules.is_allowed(url.path()))
                    .unwrap_or(false);
                if denied {
                    self.relocate(&key, now);
                    self.fail_record(
                        id,
                        FailureReason::RobotsExcluded,
                        format!("{} disallowed by robots.txt", url),
                        now,
                    );
                    continue;
                }
            }

            let dispatched = self
                .queues
                .get_mut(&key)
                .map(|q| q.mark_dispatched(id, now))
                .unwrap_or(false);
            if !dispatched {
                // No slot after all; put the record back at the head of its class
                if let Some(queue) = self.queues.get_mut(&key) {
                    queue.unpop(id, is_robots);
                }
                self.queued_requests += 1;
                self.relocate(&key, now);
                continue;
            }

            let assignment = match self.arena.get_mut(id) {
                Some(record) => {
                    record.set_notify(true);
                    FetchAssignment {
                        id,
                        url: record.url.clone(),
                        resolved_addr: record.resolved_addr,
                        http_version: record.http_version,
                        is_robots,
                    }
                }
                None => {
                    self.relocate(&key, now);
                    continue;
                }
            };

            self.outstanding_total += 1;
            self.counters.requests_issued += 1;
            self.relocate(&key, now);
            return Some(assignment);
        }
    }

    // ===== Completion handling =====

    /// Records a fetch attempt's outcome and classifies it
    fn return_request(&mut self, completed: CompletedFetch, now: Instant) {
        let CompletedFetch {
            id,
            result,
            bytes_transferred,
        } = completed;
        self.counters.bytes_fetched += bytes_transferred;

        let (already_failed, status, key) = match self.arena.get_mut(id) {
            Some(record) => {
                record.bytes_fetched += bytes_transferred;
                match result {
                    Ok(response) => {
                        record.resolved_addr = response.resolved_addr;
                        record.http_version = response.http_version;
                        if let Some(value) = response.header("expires") {
                            record.expire_time = DateTime::parse_from_rfc2822(value)
                                .ok()
                                .map(|t| t.with_timezone(&Utc));
                        }
                        record.response = Some(response);
                    }
                    Err(transport) => {
                        record.response = None;
                        match transport.failure_reason() {
                            Some(reason) => record.fail(reason, transport.to_string()),
                            None => {
                                record.set_error(transport.error_reason(), transport.to_string())
                            }
                        }
                    }
                }
                (
                    record.has_failed(),
                    record.response.as_ref().map(|r| r.status),
                    record.host().cloned(),
                )
            }
            None => {
                tracing::warn!("Completion for unknown record {}", id);
                return;
            }
        };

        // Per-attempt host bookkeeping: slot starts cooling, breaker feeds.
        // Only transport-level trouble counts against the breaker; an HTTP
        // response (even 4xx) proves the host is alive.
        let attempt_failed = already_failed || status.is_none();
        if let Some(key) = &key {
            if let Some(queue) = self.queues.get_mut(key) {
                let (was_outstanding, became_dead) = queue.attempt_returned(
                    id,
                    attempt_failed,
                    now,
                    self.config.scheduler.server_delay(),
                    &self.config.scheduler,
                );
                if was_outstanding {
                    self.outstanding_total = self.outstanding_total.saturating_sub(1);
                }
                if became_dead {
                    self.counters.hosts_dead += 1;
                }
            }
        }

        // Outcome classification, in priority order
        if already_failed {
            self.handle_failed_fetch(id, now);
        } else {
            match status {
                None => self.handle_unsuccessful_attempt(id, now),
                Some(200) => self.handle_success_fetch(id, now),
                Some(s) if (300..400).contains(&s) => self.handle_redirected_fetch(id, now),
                Some(404) => {
                    if let Some(record) = self.arena.get_mut(id) {
                        record.fail(FailureReason::NotFound, "HTTP 404");
                    }
                    self.handle_failed_fetch(id, now);
                }
                Some(s) if (400..500).contains(&s) => {
                    if let Some(record) = self.arena.get_mut(id) {
                        record.fail(FailureReason::Forbidden, format!("HTTP {}", s));
                    }
                    self.handle_failed_fetch(id, now);
                }
                Some(s) => {
                    if let Some(record) = self.arena.get_mut(id) {
                        record.fail(FailureReason::UnknownResponseCode, format!("HTTP {}", s));
                    }
                    self.handle_failed_fetch(id, now);
                }
            }
        }

        if let Some(key) = key {
            self.relocate(&key, now);
        }
    }

    fn handle_success_fetch(&mut self, id: RecordId, now: Instant) {
        self.finish_record(id, now);
    }

    fn handle_failed_fetch(&mut self, id: RecordId, now: Instant) {
        self.finish_record(id, now);
    }

    /// A transient error: retry until the ceiling converts it to a failure
    fn handle_unsuccessful_attempt(&mut self, id: RecordId, now: Instant) {
        let max_errors = self.config.scheduler.max_errors_per_url;
        let (errors, last_error) = match self.arena.get_mut(id) {
            Some(record) => {
                record.num_errors += 1;
                (record.num_errors, record.error_reason())
            }
            None => return,
        };

        if errors >= max_errors {
            let message = format!(
                "{} transient errors, last: {}",
                errors,
                last_error.map(|r| r.as_str()).unwrap_or("unknown")
            );
            if let Some(record) = self.arena.get_mut(id) {
                record.fail(FailureReason::TooManyErrors, message);
            }
            self.handle_failed_fetch(id, now);
        } else {
            self.counters.retries += 1;
            if let Some(record) = self.arena.get_mut(id) {
                record.clear_error();
            }
            self.requeue_attempt(id, now);
        }
    }

    /// Puts a record back into its own queue ahead of fresh requests
    fn requeue_attempt(&mut self, id: RecordId, now: Instant) {
        let Some((key, is_robots)) = self
            .arena
            .get(id)
            .and_then(|r| r.host().cloned().map(|k| (k, r.is_robots())))
        else {
            return;
        };
        let probe_root = self.arena.original(id);

        let dead = self.queues.get(&key).map(HostQueue::is_dead).unwrap_or(true);
        if dead {
            self.fail_record(
                id,
                FailureReason::DeadHost,
                format!("host {} is dead", key),
                now,
            );
            return;
        }

        let Some(queue) = self.queues.get_mut(&key) else {
            return;
        };
        if is_robots {
            queue.push_robots(id);
            if queue.probe() == Some(probe_root) {
                // The host's own probe goes another round
                queue.set_robots_queued(probe_root);
            }
        } else {
            queue.push_retry(id);
        }
        self.queued_requests += 1;
        self.relocate(&key, now);
    }

    /// Resolves a 3xx into a new admission or a terminal failure
    fn handle_redirected_fetch(&mut self, id: RecordId, now: Instant) {
        let Some((location, base_url, hops)) = self.arena.get(id).map(|record| {
            (
                record
                    .response
                    .as_ref()
                    .and_then(|r| r.header("location"))
                    .map(str::to_string),
                record.url.clone(),
                record.num_redirects,
            )
        }) else {
            return;
        };

        let Some(location) = location else {
            self.fail_record(
                id,
                FailureReason::RedirectMissingTarget,
                "redirect without Location header",
                now,
            );
            return;
        };

        let target = match base_url.join(&location) {
            Ok(url) => url,
            Err(e) => {
                self.fail_record(
                    id,
                    FailureReason::RedirectMissingTarget,
                    format!("unparseable redirect target '{}': {}", location, e),
                    now,
                );
                return;
            }
        };

        if hops + 1 > self.config.scheduler.max_redirects_per_url {
            self.fail_record(
                id,
                FailureReason::TooManyRedirects,
                format!(
                    "exceeded {} redirect hops",
                    self.config.scheduler.max_redirects_per_url
                ),
                now,
            );
            return;
        }

        if self.arena.chain_contains_url(id, &target) {
            self.fail_record(
                id,
                FailureReason::RedirectLoopDetected,
                format!("redirect cycle via {}", target),
                now,
            );
            return;
        }

        // The old record is done; its queues find out now, then the new
        // record goes through admission (possibly to another host)
        self.notify_chain(id, now);

        let child = match self.arena.get(id) {
            Some(parent) => RequestRecord::new_redirect(target.clone(), id, parent),
            None => return,
        };
        let child_id = self.arena.insert(child);
        self.counters.redirects += 1;
        tracing::debug!("Redirect {} -> {}", base_url, target);
        self.admit(child_id, now);
    }

    // ===== Terminal completion plumbing =====

    /// Marks a record terminally failed, then finishes it
    fn fail_record(
        &mut self,
        id: RecordId,
        reason: FailureReason,
        message: impl Into<String>,
        now: Instant,
    ) {
        if let Some(record) = self.arena.get_mut(id) {
            record.fail(reason, message);
        }
        self.finish_record(id, now);
    }

    fn finish_record(&mut self, id: RecordId, now: Instant) {
        self.notify_chain(id, now);
        self.route_to_output(id);
    }

    /// Propagates terminal fields up the redirect chain and invokes the
    /// completion hook of every queue that asked to be told, exactly once
    fn notify_chain(&mut self, id: RecordId, now: Instant) {
        let mut cur = id;
        loop {
            let parent = self.arena.get(cur).and_then(RequestRecord::parent);

            if let Some(parent_id) = parent {
                let snapshot = self.arena.get(cur).map(|r| {
                    (
                        r.has_failed(),
                        r.failure_reason(),
                        r.failure_message().map(str::to_string),
                        r.response.clone(),
                        r.expire_time,
                    )
                });
                if let Some((failed, reason, message, response, expires)) = snapshot {
                    if let Some(parent_record) = self.arena.get_mut(parent_id) {
                        if failed {
                            parent_record.fail(
                                reason.unwrap_or(FailureReason::Unknown),
                                message.unwrap_or_default(),
                            );
                        }
                        if response.is_some() {
                            parent_record.response = response;
                        }
                        if expires.is_some() {
                            parent_record.expire_time = expires;
                        }
                    }
                }
            }

            let should_notify = self
                .arena
                .get_mut(cur)
                .map(RequestRecord::take_notify)
                .unwrap_or(false);
            if should_notify {
                if let Some(key) = self.arena.get(cur).and_then(|r| r.host().cloned()) {
                    self.queue_completion_hook(&key, cur, now);
                }
            }

            match parent {
                Some(p) => cur = p,
                None => break,
            }
        }
    }

    fn queue_completion_hook(&mut self, key: &HostKey, id: RecordId, now: Instant) {
        let probe_root = self.arena.original(id);
        let is_probe_chain = self
            .queues
            .get(key)
            .map(|q| q.probe() == Some(probe_root))
            .unwrap_or(false);
        let is_robots = self.arena.get(id).map(RequestRecord::is_robots).unwrap_or(false);

        if is_robots && is_probe_chain {
            self.apply_robots_result(key, id, probe_root, now);
        }
        self.relocate(key, now);
    }

    /// Consumes a robots probe outcome for the queue that issued it
    fn apply_robots_result(
        &mut self,
        key: &HostKey,
        id: RecordId,
        probe_root: RecordId,
        now: Instant,
    ) {
        enum RobotsAction {
            Done(RuleSet),
            Reprocess,
            Requeue,
        }

        let action = {
            let Some(record) = self.arena.get(id) else {
                return;
            };
            if record.has_failed() {
                match record.failure_reason() {
                    Some(FailureReason::Forbidden) | Some(FailureReason::RobotsExcluded) => {
                        RobotsAction::Done(
                            RuleSet::deny_all().with_expiry(self.robots_expiry(None)),
                        )
                    }
                    Some(FailureReason::NotFound) => RobotsAction::Done(
                        RuleSet::allow_all().with_expiry(self.robots_expiry(None)),
                    ),
                    _ => RobotsAction::Requeue,
                }
            } else if let Some(response) = &record.response {
                match response.status {
                    200..=299 => {
                        let rules = self
                            .parser
                            .parse(&response.body)
                            .with_expiry(self.robots_expiry(record.expire_time));
                        self.counters.robots_fetched += 1;
                        RobotsAction::Done(rules)
                    }
                    300..=399 => RobotsAction::Reprocess,
                    _ => RobotsAction::Requeue,
                }
            } else {
                RobotsAction::Requeue
            }
        };

        match action {
            RobotsAction::Done(rules) => {
                tracing::debug!(
                    "robots.txt for {} resolved ({} rules)",
                    key,
                    rules.len()
                );
                if let Some(queue) = self.queues.get_mut(key) {
                    queue.set_robots_done(rules);
                }
            }
            RobotsAction::Reprocess => {
                let deadline = now + self.config.scheduler.robots_redirect_timeout();
                if let Some(queue) = self.queues.get_mut(key) {
                    queue.set_robots_reprocessing(deadline);
                }
                // Re-arm the probe root so the resolved chain reaches this
                // queue again
                if let Some(record) = self.arena.get_mut(probe_root) {
                    record.set_notify(true);
                }
            }
            RobotsAction::Requeue => {
                let became_dead = self
                    .queues
                    .get_mut(key)
                    .map(|q| q.record_probe_failure(&self.config.scheduler))
                    .unwrap_or(false);
                if became_dead {
                    self.counters.hosts_dead += 1;
                }
                let dead = self.queues.get(key).map(HostQueue::is_dead).unwrap_or(true);
                if !dead {
                    tracing::debug!("robots.txt probe for {} failed, re-queueing", key);
                    self.bootstrap_robots(key, now);
                }
            }
        }
    }

    /// Hands a terminal record to the output pipeline
    ///
    /// Robots chains are internal and just dropped; fetch-list chains leave
    /// the arena as one owned output task.
    fn route_to_output(&mut self, id: RecordId) {
        let root = self.arena.original(id);
        let is_robots = self.arena.get(root).map(RequestRecord::is_robots).unwrap_or(true);
        if is_robots {
            self.arena.remove_chain(id);
            return;
        }

        let Some((original_url, entry)) = self
            .arena
            .get(root)
            .map(|r| (r.url.clone(), r.entry().cloned()))
        else {
            return;
        };
        let Some(record) = self.arena.remove_chain(id) else {
            return;
        };

        if record.has_failed() {
            self.counters.failed += 1;
        } else {
            self.counters.succeeded += 1;
        }
        self.pending_output.push_back(OutputTask {
            record,
            original_url,
            entry,
        });
    }

    fn take_pending_output(&mut self, space: usize) -> Vec<OutputTask> {
        let n = space.min(self.pending_output.len());
        self.pending_output.drain(..n).collect()
    }

    fn record_output_result(&mut self, status: OutputStatus) {
        match status {
            OutputStatus::Written => self.counters.output_written += 1,
            OutputStatus::Failed => self.counters.output_errors += 1,
        }
    }

    // ===== Housekeeping and termination =====

    fn check_queues(&mut self, now: Instant) {
        let delayed: Vec<HostKey> = self.delay.iter().cloned().collect();
        for key in delayed {
            self.refresh_robots(&key, now);
            if let Some(queue) = self.queues.get_mut(&key) {
                queue.promote_slots(now);
            }
            self.relocate(&key, now);
        }

        self.refill_from_source(now);
        self.evict_idle();
        self.verify_partitions();
    }

    fn finished_requests(&self) -> bool {
        self.source_exhausted && self.queued_requests == 0 && self.outstanding_total == 0
    }

    fn snapshot(&self) -> FetcherStatus {
        FetcherStatus {
            requests_issued: self.counters.requests_issued,
            succeeded: self.counters.succeeded,
            failed: self.counters.failed,
            retries: self.counters.retries,
            redirects: self.counters.redirects,
            robots_fetched: self.counters.robots_fetched,
            dropped: self.counters.dropped,
            skipped_entries: self.counters.skipped_entries,
            bytes_fetched: self.counters.bytes_fetched,
            output_written: self.counters.output_written,
            output_errors: self.counters.output_errors,
            hosts_created: self.counters.hosts_created,
            hosts_dead: self.counters.hosts_dead,
            queued_requests: self.queued_requests,
            outstanding: self.outstanding_total,
            output_pending: self.pending_output.len(),
            ready_hosts: self.ready.len(),
            delay_hosts: self.delay.len(),
            busy_hosts: self.busy.len(),
            idle_hosts: self.idle.len(),
            throttled_workers: 0,
        }
    }
}

/// The shared scheduler handle fetch and output workers rendezvous with
pub struct RequestScheduler {
    config: Arc<Config>,
    core: Mutex<SchedulerCore>,
    output: Mutex<VecDeque<OutputTask>>,
    output_len: AtomicUsize,
    severe: Arc<AtomicBool>,
    throttle: Mutex<BandwidthThrottle>,
}

impl RequestScheduler {
    pub fn new(config: Arc<Config>, source: Box<dyn FetchSource>) -> Result<Self> {
        let ban_list = match &config.scheduler.ban_list_file {
            Some(path) => HostBanList::from_file(Path::new(path))?,
            None => HostBanList::empty(),
        };
        let severe = Arc::new(AtomicBool::new(false));
        let parser = RobotRulesParser::new(&config.robots_agent_names());
        let throttle = BandwidthThrottle::new(
            &config.throttle,
            config.scheduler.fetch_threads as usize,
            Instant::now(),
        );
        let evicted = EvictedCache::new(config.scheduler.max_robots_cache as usize);

        let core = SchedulerCore {
            config: Arc::clone(&config),
            parser,
            ban_list,
            arena: RecordArena::new(),
            queues: HashMap::new(),
            ready: BTreeSet::new(),
            delay: HashSet::new(),
            busy: HashSet::new(),
            idle: HashSet::new(),
            idle_order: VecDeque::new(),
            evicted,
            source,
            source_exhausted: false,
            queued_requests: 0,
            outstanding_total: 0,
            pending_output: VecDeque::new(),
            counters: Counters::default(),
            severe: Arc::clone(&severe),
        };

        Ok(Self {
            config,
            core: Mutex::new(core),
            output: Mutex::new(VecDeque::new()),
            output_len: AtomicUsize::new(0),
            severe,
            throttle: Mutex::new(throttle),
        })
    }

    /// Appends drained tasks onto the shared output queue and keeps the
    /// atomic length counter in sync with the queue
    fn push_output(&self, drained: Vec<OutputTask>) {
        if drained.is_empty() {
            return;
        }
        let mut output = self.output.lock().unwrap();
        output.extend(drained);
        self.output_len.store(output.len(), Ordering::SeqCst);
    }

    /// The fetch-worker rendezvous: records the previous outcome (if any)
    /// and returns the next request to attempt
    pub fn return_request_and_get_next(
        &self,
        completed: Option<CompletedFetch>,
    ) -> Option<FetchAssignment> {
        let now = Instant::now();
        let backlog = self.output_len.load(Ordering::SeqCst);
        let (next, drained) = {
            let mut core = self.core.lock().unwrap();
            if let Some(c) = completed {
                core.return_request(c, now);
            }
            // After a severe event the run is winding down: keep taking
            // completions, hand out nothing new
            let mut next = if self.severe() {
                None
            } else {
                core.get_next_request(now, backlog)
            };
            if next.is_none() && !self.severe() {
                core.check_queues(now);
                next = core.get_next_request(now, backlog);
            }
            let space = (self.config.scheduler.max_output_queue as usize).saturating_sub(backlog);
            let drained = core.take_pending_output(space);
            (next, drained)
        };
        self.push_output(drained);
        next
    }

    /// The output-worker rendezvous: records the previous write (if any)
    /// and returns the next finished task
    pub fn return_output_and_get_next(
        &self,
        prev: Option<(OutputTask, OutputStatus)>,
    ) -> Option<OutputTask> {
        if let Some((_, status)) = prev {
            let mut core = self.core.lock().unwrap();
            core.record_output_result(status);
        }

        // Top up the shared queue from the core's pending buffer
        let backlog = self.output_len.load(Ordering::SeqCst);
        let space = (self.config.scheduler.max_output_queue as usize).saturating_sub(backlog);
        if space > 0 {
            let drained = {
                let mut core = self.core.lock().unwrap();
                core.take_pending_output(space)
            };
            self.push_output(drained);
        }

        let mut output = self.output.lock().unwrap();
        let task = output.pop_front();
        self.output_len.store(output.len(), Ordering::SeqCst);
        task
    }

    /// Admits one entry directly, bypassing the URL source
    pub fn add_request(&self, entry: FetchEntry) {
        let now = Instant::now();
        let mut core = self.core.lock().unwrap();
        match Url::parse(&entry.url) {
            Ok(url) => {
                let id = core.arena.insert(RequestRecord::new(url, entry));
                core.admit(id, now);
            }
            Err(e) => {
                core.counters.dropped += 1;
                tracing::debug!("Dropping unparseable URL {}: {}", entry.url, e);
            }
        }
    }

    /// Periodic housekeeping: promote delay queues, refill, evict idle
    pub fn check_queues(&self) {
        let now = Instant::now();
        let backlog = self.output_len.load(Ordering::SeqCst);
        let drained = {
            let mut core = self.core.lock().unwrap();
            core.check_queues(now);
            let space = (self.config.scheduler.max_output_queue as usize).saturating_sub(backlog);
            core.take_pending_output(space)
        };
        self.push_output(drained);
    }

    /// True once no request will ever be dispatched again
    pub fn finished_requests(&self) -> bool {
        if self.severe() {
            return true;
        }
        self.core.lock().unwrap().finished_requests()
    }

    /// True once the output pipeline has fully drained as well
    pub fn finished_output(&self) -> bool {
        if self.severe() {
            return true;
        }
        let requests_done = {
            let core = self.core.lock().unwrap();
            core.finished_requests() && core.pending_output.is_empty()
        };
        requests_done && self.output_len.load(Ordering::SeqCst) == 0
    }

    /// Re-evaluates the bandwidth throttle window
    pub fn adjust_throttle(&self) {
        let bytes = self.core.lock().unwrap().counters.bytes_fetched;
        let mut throttle = self.throttle.lock().unwrap();
        let _ = throttle.tick(Instant::now(), bytes);
    }

    /// Whether the given fetch worker should park instead of pulling work
    pub fn is_throttled(&self, worker: usize) -> bool {
        self.throttle.lock().unwrap().is_throttled(worker)
    }

    /// Signals the global kill switch; both termination predicates turn
    /// true and workers wind down promptly
    pub fn report_severe(&self, message: &str) {
        tracing::error!("{}", message);
        self.severe.store(true, Ordering::SeqCst);
    }

    pub fn severe(&self) -> bool {
        self.severe.load(Ordering::SeqCst)
    }

    /// Point-in-time statistics snapshot
    pub fn status(&self) -> FetcherStatus {
        let mut status = self.core.lock().unwrap().snapshot();
        status.output_pending += self.output_len.load(Ordering::SeqCst);
        status.throttled_workers = self.throttle.lock().unwrap().throttled();
        status
    }
}
