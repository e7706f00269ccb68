//! Configuration loading, types, and validation

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{
    Config, OutputConfig, SchedulerConfig, SourceConfig, ThrottleConfig, UserAgentConfig,
};
pub use validation::validate;

/// Builds a fully populated configuration for unit tests
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        scheduler: SchedulerConfig {
            fetch_threads: 4,
            output_threads: 1,
            server_delay_ms: 100,
            max_requests_per_host: 1,
            max_queued_requests: 100,
            max_per_host_queue: 20,
            max_output_queue: 50,
            max_hosts: 20,
            max_idle_hosts: 5,
            max_robots_cache: 10,
            max_errors_per_url: 3,
            max_redirects_per_url: 5,
            dead_host_consecutive_failures: 5,
            dead_host_min_requests: 10,
            dead_host_failure_rate: 0.8,
            robots_lifetime_secs: 86_400,
            robots_min_lifetime_secs: 3_600,
            robots_redirect_timeout_secs: 2,
            stats_interval_secs: 10,
            ban_list_file: None,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/bot".to_string(),
            contact_email: "bot@example.com".to_string(),
            robots_agents: vec![],
        },
        throttle: ThrottleConfig::default(),
        source: SourceConfig {
            fetch_list_path: "./fetchlist.txt".to_string(),
        },
        output: OutputConfig {
            database_path: "./kumo.db".to_string(),
            marker_path: "./kumo.marker".to_string(),
        },
    }
}
