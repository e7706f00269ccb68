use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Kumo-Fetch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    pub source: SourceConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Builds the full user agent string sent with every request
    ///
    /// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.user_agent.crawler_name,
            self.user_agent.crawler_version,
            self.user_agent.contact_url,
            self.user_agent.contact_email
        )
    }

    /// Returns the prioritized robots.txt agent-name list
    ///
    /// Most-specific names first, always terminated by the catch-all `*`.
    pub fn robots_agent_names(&self) -> Vec<String> {
        let mut names = vec![self.user_agent.crawler_name.to_lowercase()];
        for extra in &self.user_agent.robots_agents {
            let lowered = extra.to_lowercase();
            if !names.contains(&lowered) && lowered != "*" {
                names.push(lowered);
            }
        }
        names.push("*".to_string());
        names
    }
}

/// Scheduler and politeness tunables
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of concurrent fetch worker tasks
    #[serde(rename = "fetch-threads")]
    pub fetch_threads: u32,

    /// Number of concurrent output worker tasks
    #[serde(rename = "output-threads")]
    pub output_threads: u32,

    /// Minimum delay between consecutive requests to the same host (milliseconds)
    #[serde(rename = "server-delay-ms")]
    pub server_delay_ms: u64,

    /// Maximum concurrent requests per host (delay slot count)
    #[serde(rename = "max-requests-per-host", default = "default_one")]
    pub max_requests_per_host: u32,

    /// Ceiling on requests queued across all hosts
    #[serde(rename = "max-queued-requests")]
    pub max_queued_requests: u32,

    /// Ceiling on requests queued for a single host; fresh requests beyond
    /// it are dropped (robots probes and redirects never are)
    #[serde(rename = "max-per-host-queue")]
    pub max_per_host_queue: u32,

    /// Ceiling on completed requests waiting for the output workers
    #[serde(rename = "max-output-queue")]
    pub max_output_queue: u32,

    /// Ceiling on concurrently tracked hosts (gates refilling from the source)
    #[serde(rename = "max-hosts")]
    pub max_hosts: u32,

    /// Idle host queues beyond this count are evicted into the robots cache
    #[serde(rename = "max-idle-hosts", default = "default_max_idle_hosts")]
    pub max_idle_hosts: u32,

    /// Capacity of the evicted-host cache (preserves robots rule sets)
    #[serde(rename = "max-robots-cache", default = "default_max_robots_cache")]
    pub max_robots_cache: u32,

    /// Transient errors tolerated per URL before it fails terminally
    #[serde(rename = "max-errors-per-url")]
    pub max_errors_per_url: u32,

    /// Redirect hops tolerated per URL before it fails terminally
    #[serde(rename = "max-redirects-per-url")]
    pub max_redirects_per_url: u32,

    /// Consecutive failures that trip a host into dead-host mode
    #[serde(
        rename = "dead-host-consecutive-failures",
        default = "default_dead_consecutive"
    )]
    pub dead_host_consecutive_failures: u32,

    /// Minimum issued requests before the failure-rate breaker applies
    #[serde(rename = "dead-host-min-requests", default = "default_dead_min_requests")]
    pub dead_host_min_requests: u64,

    /// Failure-rate threshold (0.0..=1.0) for the dead-host breaker
    #[serde(rename = "dead-host-failure-rate", default = "default_dead_rate")]
    pub dead_host_failure_rate: f64,

    /// Default robots.txt cache lifetime when no usable Expires header exists
    #[serde(rename = "robots-lifetime-secs", default = "default_robots_lifetime")]
    pub robots_lifetime_secs: u64,

    /// Minimum robots.txt cache lifetime an Expires header is clamped to
    #[serde(
        rename = "robots-min-lifetime-secs",
        default = "default_robots_min_lifetime"
    )]
    pub robots_min_lifetime_secs: u64,

    /// How long a host waits on a redirected robots.txt chain before its
    /// pending queue may drain anyway (cross-host deadlock breaker)
    #[serde(
        rename = "robots-redirect-timeout-secs",
        default = "default_robots_redirect_timeout"
    )]
    pub robots_redirect_timeout_secs: u64,

    /// Interval between statistics report lines (seconds)
    #[serde(rename = "stats-interval-secs", default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Optional file of banned hostname suffixes, one per line
    #[serde(rename = "ban-list-file", default)]
    pub ban_list_file: Option<String>,
}

impl SchedulerConfig {
    /// Inter-request politeness delay as a Duration
    pub fn server_delay(&self) -> Duration {
        Duration::from_millis(self.server_delay_ms)
    }

    /// Redirect-deadlock timeout as a Duration
    pub fn robots_redirect_timeout(&self) -> Duration {
        Duration::from_secs(self.robots_redirect_timeout_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,

    /// Additional agent names honored when matching robots.txt stanzas
    #[serde(rename = "robots-agents", default)]
    pub robots_agents: Vec<String>,
}

/// Bandwidth throttle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// Whether the bandwidth throttle runs at all
    #[serde(default)]
    pub enabled: bool,

    /// Sampling window between throttle adjustments (seconds)
    #[serde(rename = "window-secs", default = "default_throttle_window")]
    pub window_secs: u64,

    /// Target maximum bandwidth in bytes per second
    #[serde(rename = "max-bytes-per-sec", default = "default_throttle_bytes")]
    pub max_bytes_per_sec: u64,

    /// Workers parked before the first sampling window completes
    #[serde(rename = "initial-throttled", default)]
    pub initial_throttled: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: default_throttle_window(),
            max_bytes_per_sec: default_throttle_bytes(),
            initial_throttled: 0,
        }
    }
}

/// URL source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Path to the fetch list (one URL per line)
    #[serde(rename = "fetch-list-path")]
    pub fetch_list_path: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite results database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path of the `done`/`error` marker file written at run completion
    #[serde(rename = "marker-path")]
    pub marker_path: String,
}

fn default_one() -> u32 {
    1
}

fn default_max_idle_hosts() -> u32 {
    50
}

fn default_max_robots_cache() -> u32 {
    200
}

fn default_dead_consecutive() -> u32 {
    10
}

fn default_dead_min_requests() -> u64 {
    20
}

fn default_dead_rate() -> f64 {
    0.8
}

fn default_robots_lifetime() -> u64 {
    // One day, matching common robots.txt cache guidance
    86_400
}

fn default_robots_min_lifetime() -> u64 {
    3_600
}

fn default_robots_redirect_timeout() -> u64 {
    120
}

fn default_stats_interval() -> u64 {
    10
}

fn default_throttle_window() -> u64 {
    10
}

fn default_throttle_bytes() -> u64 {
    1_000_000
}
