//! Per-host admission, politeness, and robots state
//!
//! A `HostQueue` owns everything the scheduler knows about one host: its
//! pending requests, its robots.txt state machine, its delay slots, and its
//! dead-host breaker counters. The struct is plain data — it is only ever
//! touched while the owning scheduler's lock is held, so it needs no
//! synchronization of its own.

use crate::config::SchedulerConfig;
use crate::request::RecordId;
use crate::robots::RuleSet;
use crate::url::HostKey;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// The robots.txt resolution state of one host
///
/// Each variant carries exactly the data meaningful in that state: only
/// `ReprocessingRobots` has a deadlock-breaker deadline, only `DoneRobots`
/// has rules.
#[derive(Debug, Clone)]
pub enum RobotsState {
    /// No fetch-list request has been admitted yet
    Initial,
    /// A robots probe is queued and must go out before other requests
    QueuedRobots,
    /// The probe is in flight
    FetchingRobots,
    /// The probe was redirected; waiting for the chain to resolve, with a
    /// deadline after which the pending queue may drain anyway
    ReprocessingRobots { deadline: Instant },
    /// Rules are resolved (possibly allow-all or deny-all)
    DoneRobots { rules: RuleSet },
    /// The dead-host breaker tripped; everything fails immediately
    DeadHost,
}

/// Which scheduler partition a queue currently occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Ready,
    Delay,
    Busy,
    Idle,
}

/// One per-host concurrency slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    /// A request using this slot is in flight
    Busy,
    /// The politeness delay runs until the given instant
    Cooling(Instant),
}

/// State preserved when an idle queue is evicted to the soft cache
#[derive(Debug, Clone)]
pub struct EvictedHost {
    robots: RobotsState,
    total_issued: u64,
    total_fail_errs: u64,
    consecutive_failures: u32,
}

/// Per-host state machine owning one host's pending requests
#[derive(Debug)]
pub struct HostQueue {
    key: HostKey,
    robots: RobotsState,
    /// Chain root of the robots probe currently being resolved
    probe: Option<RecordId>,

    robots_pending: VecDeque<RecordId>,
    retry_pending: VecDeque<RecordId>,
    pending: VecDeque<RecordId>,
    outstanding: HashSet<RecordId>,
    slots: Vec<Slot>,

    pub total_issued: u64,
    pub total_fail_errs: u64,
    pub consecutive_failures: u32,

    /// Scheduler-maintained partition membership
    pub(crate) partition: Partition,
    /// Pending length registered in the ready ordering, if partition == Ready
    pub(crate) ready_len: usize,
}

impl HostQueue {
    pub fn new(key: HostKey, slots: usize) -> Self {
        Self {
            key,
            robots: RobotsState::Initial,
            probe: None,
            robots_pending: VecDeque::new(),
            retry_pending: VecDeque::new(),
            pending: VecDeque::new(),
            outstanding: HashSet::new(),
            slots: vec![Slot::Free; slots.max(1)],
            total_issued: 0,
            total_fail_errs: 0,
            consecutive_failures: 0,
            partition: Partition::Idle,
            ready_len: 0,
        }
    }

    /// Rebuilds a queue from the evicted-host cache, keeping its robots
    /// rules and breaker counters
    pub fn rehydrate(key: HostKey, slots: usize, saved: EvictedHost) -> Self {
        let mut queue = Self::new(key, slots);
        queue.robots = saved.robots;
        queue.total_issued = saved.total_issued;
        queue.total_fail_errs = saved.total_fail_errs;
        queue.consecutive_failures = saved.consecutive_failures;
        queue
    }

    /// Captures the state worth preserving across eviction
    ///
    /// Only resolved robots states survive; anything mid-resolution
    /// degrades to `Initial` (a resurfacing host re-probes).
    pub fn evict(self) -> EvictedHost {
        let robots = match self.robots {
            RobotsState::DoneRobots { .. } | RobotsState::DeadHost => self.robots,
            _ => RobotsState::Initial,
        };
        EvictedHost {
            robots,
            total_issued: self.total_issued,
            total_fail_errs: self.total_fail_errs,
            consecutive_failures: self.consecutive_failures,
        }
    }

    pub fn key(&self) -> &HostKey {
        &self.key
    }

    pub fn robots(&self) -> &RobotsState {
        &self.robots
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.robots, RobotsState::DeadHost)
    }

    pub fn probe(&self) -> Option<RecordId> {
        self.probe
    }

    /// Resolved rules, when robots is done
    pub fn robots_rules(&self) -> Option<&RuleSet> {
        match &self.robots {
            RobotsState::DoneRobots { rules } => Some(rules),
            _ => None,
        }
    }

    // ===== Pending queue management =====

    /// Total requests waiting in this queue
    pub fn pending_len(&self) -> usize {
        self.robots_pending.len() + self.retry_pending.len() + self.pending.len()
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Robots probes go ahead of everything else
    pub fn push_robots(&mut self, id: RecordId) {
        self.robots_pending.push_back(id);
    }

    /// Retries and redirects go ahead of fresh fetch-list requests
    pub fn push_retry(&mut self, id: RecordId) {
        self.retry_pending.push_back(id);
    }

    pub fn push_fresh(&mut self, id: RecordId) {
        self.pending.push_back(id);
    }

    /// Pops the next request honoring class order: robots, then
    /// already-attempted, then fresh FIFO
    pub fn pop_next(&mut self) -> Option<RecordId> {
        self.robots_pending
            .pop_front()
            .or_else(|| self.retry_pending.pop_front())
            .or_else(|| self.pending.pop_front())
    }

    /// Returns a popped record to the head of its class
    pub fn unpop(&mut self, id: RecordId, is_robots: bool) {
        if is_robots {
            self.robots_pending.push_front(id);
        } else {
            self.retry_pending.push_front(id);
        }
    }

    // ===== Delay slots =====

    /// Converts slots whose politeness delay has elapsed back to free
    pub fn promote_slots(&mut self, now: Instant) {
        for slot in &mut self.slots {
            if matches!(slot, Slot::Cooling(t) if *t <= now) {
                *slot = Slot::Free;
            }
        }
    }

    fn slot_available(&self, now: Instant) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(s, Slot::Free) || matches!(s, Slot::Cooling(t) if *t <= now))
    }

    fn take_slot(&mut self, now: Instant) -> bool {
        self.promote_slots(now);
        for slot in &mut self.slots {
            if matches!(slot, Slot::Free) {
                *slot = Slot::Busy;
                return true;
            }
        }
        false
    }

    fn release_slot(&mut self, now: Instant, delay: Duration) {
        for slot in &mut self.slots {
            if matches!(slot, Slot::Busy) {
                *slot = Slot::Cooling(now + delay);
                return;
            }
        }
    }

    fn all_slots_busy(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::Busy))
    }

    // ===== Dispatch / completion bookkeeping =====

    /// Marks a popped record as dispatched: consumes a slot, tracks it
    /// outstanding, counts it issued
    pub fn mark_dispatched(&mut self, id: RecordId, now: Instant) -> bool {
        if !self.take_slot(now) {
            return false;
        }
        self.outstanding.insert(id);
        self.total_issued += 1;
        if matches!(self.robots, RobotsState::QueuedRobots) && self.probe == Some(id) {
            self.robots = RobotsState::FetchingRobots;
        }
        true
    }

    /// Per-attempt bookkeeping when a dispatched record comes back
    ///
    /// Returns `(was_outstanding, became_dead)`. The slot starts cooling for
    /// the politeness delay; a failed attempt feeds the dead-host breaker.
    pub fn attempt_returned(
        &mut self,
        id: RecordId,
        failed: bool,
        now: Instant,
        delay: Duration,
        config: &SchedulerConfig,
    ) -> (bool, bool) {
        if !self.outstanding.remove(&id) {
            return (false, false);
        }
        self.release_slot(now, delay);
        if failed {
            self.total_fail_errs += 1;
            self.consecutive_failures += 1;
        } else {
            self.consecutive_failures = 0;
        }
        (true, self.check_dead(config))
    }

    /// A robots probe chain ended in terminal failure
    ///
    /// Feeds the breaker so a host whose robots.txt can never be resolved
    /// goes dead instead of re-probing forever.
    pub fn record_probe_failure(&mut self, config: &SchedulerConfig) -> bool {
        self.total_fail_errs += 1;
        self.consecutive_failures += 1;
        self.check_dead(config)
    }

    fn check_dead(&mut self, config: &SchedulerConfig) -> bool {
        if self.is_dead() {
            return false;
        }
        let by_consecutive = self.consecutive_failures >= config.dead_host_consecutive_failures;
        let by_rate = self.total_issued >= config.dead_host_min_requests
            && self.total_fail_errs as f64 / self.total_issued as f64
                > config.dead_host_failure_rate;
        if by_consecutive || by_rate {
            tracing::info!(
                "Host {} marked dead ({} consecutive failures, {}/{} failed)",
                self.key,
                self.consecutive_failures,
                self.total_fail_errs,
                self.total_issued
            );
            self.robots = RobotsState::DeadHost;
            self.probe = None;
            return true;
        }
        false
    }

    // ===== Robots state transitions =====

    /// A robots probe has been queued for this host
    pub fn set_robots_queued(&mut self, probe: RecordId) {
        self.robots = RobotsState::QueuedRobots;
        self.probe = Some(probe);
    }

    /// First request on a non-HTTP host: robots gating is skipped
    pub fn skip_robots(&mut self) {
        self.robots = RobotsState::DoneRobots {
            rules: RuleSet::allow_all(),
        };
    }

    pub fn set_robots_done(&mut self, rules: RuleSet) {
        self.robots = RobotsState::DoneRobots { rules };
        self.probe = None;
    }

    /// The probe was redirected; arm the deadlock-breaker deadline
    pub fn set_robots_reprocessing(&mut self, deadline: Instant) {
        self.robots = RobotsState::ReprocessingRobots { deadline };
    }

    // ===== Scheduler predicates =====

    /// Whether this queue holds no work at all
    ///
    /// A queue waiting on a robots chain (in flight or redirected) is not
    /// finished even when its deques are empty, so it cannot be evicted out
    /// from under the resolution.
    pub fn is_finished(&self) -> bool {
        self.pending_len() == 0
            && self.outstanding.is_empty()
            && !matches!(
                self.robots,
                RobotsState::FetchingRobots | RobotsState::ReprocessingRobots { .. }
            )
    }

    /// The single predicate the scheduler polls: can this queue yield a
    /// request right now?
    pub fn request_ready(&self, now: Instant) -> bool {
        match &self.robots {
            // Dead queues are "ready" so the scheduler can drain them into
            // immediate failures without a slot
            RobotsState::DeadHost => self.pending_len() > 0,

            // Before robots is resolved only robots-class records may go
            // out. This also lets a foreign host's redirected probe through
            // a queue that has not bootstrapped yet.
            RobotsState::Initial | RobotsState::QueuedRobots | RobotsState::FetchingRobots => {
                !self.robots_pending.is_empty() && self.slot_available(now)
            }

            RobotsState::ReprocessingRobots { deadline } => {
                self.slot_available(now)
                    && (!self.robots_pending.is_empty()
                        || (now >= *deadline && self.pending_len() > 0))
            }

            RobotsState::DoneRobots { .. } => self.pending_len() > 0 && self.slot_available(now),
        }
    }

    /// The partition this queue belongs in right now
    pub fn partition_for(&self, now: Instant) -> Partition {
        if self.is_finished() {
            Partition::Idle
        } else if self.request_ready(now) {
            Partition::Ready
        } else if self.all_slots_busy() {
            Partition::Busy
        } else {
            Partition::Delay
        }
    }
}
