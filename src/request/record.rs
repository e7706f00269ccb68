//! Request records and the arena that owns them
//!
//! A `RequestRecord` tracks one URL's attempt history for the current crawl
//! run. Records live in a `RecordArena` keyed by opaque `RecordId`s;
//! redirect ancestry is a `parent` id hop rather than an owned pointer, so
//! chain walks are simple index lookups.

use crate::crawler::source::FetchEntry;
use crate::request::{ErrorReason, FailureReason};
use crate::url::HostKey;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use url::Url;

/// Opaque identifier of a record in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// HTTP protocol version hint carried between attempts to the same host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

/// Result reported by the output stage for a finished record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    Written,
    Failed,
}

/// A fetched HTTP response as the scheduler sees it
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Header name/value pairs, names lowercased
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub resolved_addr: Option<IpAddr>,
    pub http_version: HttpVersion,
}

impl FetchResponse {
    /// Case-insensitive header lookup; returns the first match
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One URL's mutable attempt state, possibly one hop in a redirect chain
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub url: Url,
    entry: Option<FetchEntry>,
    is_robots: bool,

    pub num_errors: u32,
    pub num_redirects: u32,
    has_failed: bool,
    failure_reason: Option<FailureReason>,
    failure_message: Option<String>,
    error_reason: Option<ErrorReason>,
    error_message: Option<String>,

    pub response: Option<FetchResponse>,
    pub expire_time: Option<DateTime<Utc>>,
    pub resolved_addr: Option<IpAddr>,
    pub http_version: HttpVersion,
    pub output_status: Option<OutputStatus>,
    pub bytes_fetched: u64,

    parent: Option<RecordId>,
    host: Option<HostKey>,
    notify_queue: bool,
}

impl RequestRecord {
    fn blank(url: Url, entry: Option<FetchEntry>, is_robots: bool) -> Self {
        Self {
            url,
            entry,
            is_robots,
            num_errors: 0,
            num_redirects: 0,
            has_failed: false,
            failure_reason: None,
            failure_message: None,
            error_reason: None,
            error_message: None,
            response: None,
            expire_time: None,
            resolved_addr: None,
            http_version: HttpVersion::Http11,
            output_status: None,
            bytes_fetched: 0,
            parent: None,
            host: None,
            notify_queue: false,
        }
    }

    /// Creates a fresh fetch-list record
    pub fn new(url: Url, entry: FetchEntry) -> Self {
        Self::blank(url, Some(entry), false)
    }

    /// Creates a robots.txt probe record
    pub fn new_robots(url: Url) -> Self {
        Self::blank(url, None, true)
    }

    /// Creates the target record for a redirect hop
    ///
    /// Error/redirect/byte counters carry over from the parent so they stay
    /// monotone along one logical URL's lifetime; the robots marker is
    /// inherited, the fetch entry stays on the chain root.
    pub fn new_redirect(url: Url, parent_id: RecordId, parent: &RequestRecord) -> Self {
        let mut record = Self::blank(url, None, parent.is_robots);
        record.num_errors = parent.num_errors;
        record.num_redirects = parent.num_redirects + 1;
        record.bytes_fetched = parent.bytes_fetched;
        record.parent = Some(parent_id);
        record
    }

    pub fn is_robots(&self) -> bool {
        self.is_robots
    }

    pub fn entry(&self) -> Option<&FetchEntry> {
        self.entry.as_ref()
    }

    pub fn parent(&self) -> Option<RecordId> {
        self.parent
    }

    pub fn host(&self) -> Option<&HostKey> {
        self.host.as_ref()
    }

    /// Binds this record to its owning host queue
    ///
    /// The binding is settable once; a rebind attempt is rejected and must
    /// be treated as an invariant violation by the caller.
    pub fn bind_host(&mut self, key: HostKey) -> bool {
        if self.host.is_some() {
            return false;
        }
        self.host = Some(key);
        true
    }

    pub fn has_failed(&self) -> bool {
        self.has_failed
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }

    pub fn error_reason(&self) -> Option<ErrorReason> {
        self.error_reason
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Marks this record terminally failed
    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.has_failed = true;
        self.failure_reason = Some(reason);
        self.failure_message = Some(message.into());
    }

    /// Records a transient attempt error
    pub fn set_error(&mut self, reason: ErrorReason, message: impl Into<String>) {
        self.error_reason = Some(reason);
        self.error_message = Some(message.into());
    }

    /// Clears the transient error before the next attempt
    pub fn clear_error(&mut self) {
        self.error_reason = None;
        self.error_message = None;
    }

    pub fn set_notify(&mut self, notify: bool) {
        self.notify_queue = notify;
    }

    /// Takes the notify flag, clearing it so each completion informs the
    /// owning queue exactly once
    pub fn take_notify(&mut self) -> bool {
        std::mem::replace(&mut self.notify_queue, false)
    }

    pub fn notify_pending(&self) -> bool {
        self.notify_queue
    }
}

/// Owns every live record of a scheduler, keyed by `RecordId`
#[derive(Debug, Default)]
pub struct RecordArena {
    records: HashMap<u64, RequestRecord>,
    next_id: u64,
}

impl RecordArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: RequestRecord) -> RecordId {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, record);
        RecordId(id)
    }

    pub fn get(&self, id: RecordId) -> Option<&RequestRecord> {
        self.records.get(&id.0)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut RequestRecord> {
        self.records.get_mut(&id.0)
    }

    pub fn remove(&mut self, id: RecordId) -> Option<RequestRecord> {
        self.records.remove(&id.0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Walks the parent chain from `id` to its root
    pub fn original(&self, id: RecordId) -> RecordId {
        let mut cur = id;
        while let Some(parent) = self.get(cur).and_then(RequestRecord::parent) {
            cur = parent;
        }
        cur
    }

    /// URL of the chain root — the URL the crawl was originally asked for
    pub fn original_url(&self, id: RecordId) -> Option<&Url> {
        self.get(self.original(id)).map(|r| &r.url)
    }

    /// Whether `url` appears anywhere on the chain from `id` to its root
    ///
    /// Used for redirect-cycle detection.
    pub fn chain_contains_url(&self, id: RecordId, url: &Url) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let Some(record) = self.get(c) else {
                return false;
            };
            if record.url == *url {
                return true;
            }
            cur = record.parent();
        }
        false
    }

    /// Removes a record and every ancestor on its chain, returning the
    /// record itself
    pub fn remove_chain(&mut self, id: RecordId) -> Option<RequestRecord> {
        let record = self.remove(id)?;
        let mut cur = record.parent();
        while let Some(c) = cur {
            cur = self.remove(c).and_then(|r| r.parent());
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn entry(u: &str) -> FetchEntry {
        FetchEntry {
            url: u.to_string(),
            should_fetch: true,
            metadata: vec![],
        }
    }

    fn host(s: &str) -> HostKey {
        HostKey::from_url(&url(s)).unwrap()
    }

    #[test]
    fn test_fresh_record_identity() {
        let record = RequestRecord::new(url("http://h/a"), entry("http://h/a"));
        assert!(!record.is_robots());
        assert!(record.entry().is_some());

        let robots = RequestRecord::new_robots(url("http://h/robots.txt"));
        assert!(robots.is_robots());
        assert!(robots.entry().is_none());
    }

    #[test]
    fn test_bind_host_only_once() {
        let mut record = RequestRecord::new(url("http://h/a"), entry("http://h/a"));
        assert!(record.bind_host(host("http://h/")));
        assert!(!record.bind_host(host("http://other/")));
        assert_eq!(record.host(), Some(&host("http://h/")));
    }

    #[test]
    fn test_fail_and_error_are_orthogonal() {
        let mut record = RequestRecord::new(url("http://h/a"), entry("http://h/a"));

        record.set_error(ErrorReason::SocketTimeout, "read timed out");
        assert!(!record.has_failed());
        assert_eq!(record.error_reason(), Some(ErrorReason::SocketTimeout));

        record.clear_error();
        assert!(record.error_reason().is_none());

        record.fail(FailureReason::TooManyErrors, "gave up");
        assert!(record.has_failed());
        assert_eq!(record.failure_reason(), Some(FailureReason::TooManyErrors));
    }

    #[test]
    fn test_take_notify_clears_flag() {
        let mut record = RequestRecord::new(url("http://h/a"), entry("http://h/a"));
        record.set_notify(true);
        assert!(record.take_notify());
        assert!(!record.take_notify());
    }

    #[test]
    fn test_redirect_chain_walk() {
        let mut arena = RecordArena::new();
        let root = arena.insert(RequestRecord::new(url("http://h/a"), entry("http://h/a")));

        let child = {
            let parent = arena.get(root).unwrap().clone();
            arena.insert(RequestRecord::new_redirect(url("http://h/b"), root, &parent))
        };
        let grandchild = {
            let parent = arena.get(child).unwrap().clone();
            arena.insert(RequestRecord::new_redirect(
                url("http://other/c"),
                child,
                &parent,
            ))
        };

        assert_eq!(arena.original(grandchild), root);
        assert_eq!(
            arena.original_url(grandchild).map(Url::as_str),
            Some("http://h/a")
        );
        assert_eq!(arena.get(grandchild).unwrap().num_redirects, 2);
    }

    #[test]
    fn test_redirect_counters_propagate() {
        let mut arena = RecordArena::new();
        let mut root_record = RequestRecord::new(url("http://h/a"), entry("http://h/a"));
        root_record.num_errors = 2;
        root_record.bytes_fetched = 512;
        let root = arena.insert(root_record);

        let parent = arena.get(root).unwrap().clone();
        let child = arena.insert(RequestRecord::new_redirect(url("http://h/b"), root, &parent));

        let child_record = arena.get(child).unwrap();
        assert_eq!(child_record.num_errors, 2);
        assert_eq!(child_record.num_redirects, 1);
        assert_eq!(child_record.bytes_fetched, 512);
    }

    #[test]
    fn test_chain_contains_url() {
        let mut arena = RecordArena::new();
        let root = arena.insert(RequestRecord::new(url("http://h/a"), entry("http://h/a")));
        let parent = arena.get(root).unwrap().clone();
        let child = arena.insert(RequestRecord::new_redirect(url("http://h/b"), root, &parent));

        assert!(arena.chain_contains_url(child, &url("http://h/a")));
        assert!(arena.chain_contains_url(child, &url("http://h/b")));
        assert!(!arena.chain_contains_url(child, &url("http://h/c")));
    }

    #[test]
    fn test_remove_chain_removes_ancestors() {
        let mut arena = RecordArena::new();
        let root = arena.insert(RequestRecord::new(url("http://h/a"), entry("http://h/a")));
        let parent = arena.get(root).unwrap().clone();
        let child = arena.insert(RequestRecord::new_redirect(url("http://h/b"), root, &parent));

        let removed = arena.remove_chain(child).unwrap();
        assert_eq!(removed.url.as_str(), "http://h/b");
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_ids_are_unique() {
        let mut arena = RecordArena::new();
        let a = arena.insert(RequestRecord::new_robots(url("http://h/robots.txt")));
        let b = arena.insert(RequestRecord::new_robots(url("http://h/robots.txt")));
        assert_ne!(a, b);
        arena.remove(a);
        let c = arena.insert(RequestRecord::new_robots(url("http://h/robots.txt")));
        assert_ne!(b, c);
    }
}
