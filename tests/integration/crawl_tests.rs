//! Integration tests for the fetch pipeline
//!
//! These tests use wiremock to stand in for target hosts and run the full
//! coordinator: scheduler, fetch workers, output workers, SQLite sink.

use kumo_fetch::config::{
    Config, OutputConfig, SchedulerConfig, SourceConfig, ThrottleConfig, UserAgentConfig,
};
use kumo_fetch::crawler::{Coordinator, HttpExecutor, VecSource};
use kumo_fetch::output::SqliteSink;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the given output locations
fn create_test_config(db_path: &str, marker_path: &str) -> Config {
    Config {
        scheduler: SchedulerConfig {
            fetch_threads: 2,
            output_threads: 1,
            server_delay_ms: 20, // Very short for testing
            max_requests_per_host: 1,
            max_queued_requests: 100,
            max_per_host_queue: 50,
            max_output_queue: 50,
            max_hosts: 20,
            max_idle_hosts: 10,
            max_robots_cache: 10,
            max_errors_per_url: 3,
            max_redirects_per_url: 5,
            dead_host_consecutive_failures: 2,
            dead_host_min_requests: 100,
            dead_host_failure_rate: 0.9,
            robots_lifetime_secs: 86_400,
            robots_min_lifetime_secs: 3_600,
            robots_redirect_timeout_secs: 5,
            stats_interval_secs: 60,
            ban_list_file: None,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
            robots_agents: vec![],
        },
        throttle: ThrottleConfig::default(),
        source: SourceConfig {
            fetch_list_path: "./unused.txt".to_string(),
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
            marker_path: marker_path.to_string(),
        },
    }
}

/// Runs a crawl over the given URLs and returns the opened results sink
async fn run_crawl_over(config: Config, urls: &[&str]) -> SqliteSink {
    let db_path = config.output.database_path.clone();
    let source = VecSource::from_urls(urls);
    let executor = HttpExecutor::new(&config).expect("Failed to build executor");
    let sink = SqliteSink::new(Path::new(&db_path)).expect("Failed to open sink");

    let coordinator = Coordinator::with_parts(
        config,
        Box::new(source),
        Arc::new(executor),
        Arc::new(Mutex::new(sink)),
    )
    .expect("Failed to create coordinator");
    coordinator.run().await.expect("Crawl failed");

    SqliteSink::new(Path::new(&db_path)).expect("Failed to reopen sink")
}

#[tokio::test]
async fn test_full_crawl_single_host() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .expect(1)
        .mount(&mock_server)
        .await;

    for page in ["/page1", "/page2", "/page3"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("<html><body>{}</body></html>", page))
                    .insert_header("content-type", "text/html"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let marker_path = dir.path().join("marker");
    let config = create_test_config(
        db_path.to_str().unwrap(),
        marker_path.to_str().unwrap(),
    );

    let urls: Vec<String> = ["/page1", "/page2", "/page3"]
        .iter()
        .map(|p| format!("{}{}", base_url, p))
        .collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();

    let sink = run_crawl_over(config, &url_refs).await;

    assert_eq!(sink.count_results().unwrap(), 3);
    assert_eq!(sink.count_successes().unwrap(), 3);

    // The marker file signals a clean run
    let marker = std::fs::read_to_string(&marker_path).unwrap();
    assert_eq!(marker.trim(), "done");
}

#[tokio::test]
async fn test_robots_txt_respected() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/allowed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The disallowed page must never be requested
    Mock::given(method("GET"))
        .and(path("/admin/panel"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let marker_path = dir.path().join("marker");
    let config = create_test_config(
        db_path.to_str().unwrap(),
        marker_path.to_str().unwrap(),
    );

    let urls = [
        format!("{}/allowed", base_url),
        format!("{}/admin/panel", base_url),
    ];
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();

    let sink = run_crawl_over(config, &url_refs).await;

    assert_eq!(sink.count_results().unwrap(), 2);
    assert_eq!(sink.count_successes().unwrap(), 1);
    assert_eq!(sink.count_failures("robots_excluded").unwrap(), 1);
}

#[tokio::test]
async fn test_404_recorded_once_without_retry() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1) // exactly one attempt, no retries
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let marker_path = dir.path().join("marker");
    let config = create_test_config(
        db_path.to_str().unwrap(),
        marker_path.to_str().unwrap(),
    );

    let url = format!("{}/missing", base_url);
    let sink = run_crawl_over(config, &[url.as_str()]).await;

    assert_eq!(sink.count_results().unwrap(), 1);
    assert_eq!(sink.count_failures("not_found").unwrap(), 1);
}

#[tokio::test]
async fn test_redirect_followed_across_paths() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let target_url = format!("{}/target", base_url);
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", target_url.as_str()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/target"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let marker_path = dir.path().join("marker");
    let config = create_test_config(
        db_path.to_str().unwrap(),
        marker_path.to_str().unwrap(),
    );

    let url = format!("{}/start", base_url);
    let sink = run_crawl_over(config, &[url.as_str()]).await;

    assert_eq!(sink.count_results().unwrap(), 1);
    assert_eq!(sink.count_successes().unwrap(), 1);
}

#[tokio::test]
async fn test_connection_refused_is_terminal() {
    // Nothing listens on port 9; the connection is refused immediately
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let marker_path = dir.path().join("marker");
    let config = create_test_config(
        db_path.to_str().unwrap(),
        marker_path.to_str().unwrap(),
    );

    let sink = run_crawl_over(config, &["http://127.0.0.1:9/page"]).await;

    assert_eq!(sink.count_results().unwrap(), 1);
    assert_eq!(sink.count_successes().unwrap(), 0);
    // Terminal transport failure: either refused outright or classified as
    // unreachable, but never retried into too_many_errors
    assert_eq!(sink.count_failures("too_many_errors").unwrap(), 0);
}

#[tokio::test]
async fn test_dead_host_breaker_drains_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("results.db");
    let marker_path = dir.path().join("marker");
    let config = create_test_config(
        db_path.to_str().unwrap(),
        marker_path.to_str().unwrap(),
    );

    // Six URLs on a refused port; the breaker trips after two consecutive
    // transport failures and the rest fail immediately
    let urls: Vec<String> = (0..6).map(|i| format!("http://127.0.0.1:9/p{}", i)).collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();

    let sink = run_crawl_over(config, &url_refs).await;

    assert_eq!(sink.count_results().unwrap(), 6);
    assert_eq!(sink.count_successes().unwrap(), 0);
    assert!(sink.count_failures("dead_host").unwrap() >= 4);
}
