//! Run coordinator
//!
//! Wires the scheduler to its collaborators, spawns the worker pools, and
//! drives the periodic housekeeping/statistics/throttle loop until both
//! termination predicates hold. At completion it finalizes the sink and
//! writes the `done`/`error` marker file.

use crate::config::Config;
use crate::crawler::executor::{FetchExecutor, HttpExecutor};
use crate::crawler::source::{FetchSource, FileSource};
use crate::crawler::worker::run_fetch_worker;
use crate::output::{run_output_worker, OutputSink, SqliteSink};
use crate::scheduler::RequestScheduler;
use crate::{KumoError, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Owns one crawl run end to end
pub struct Coordinator {
    config: Arc<Config>,
    scheduler: Arc<RequestScheduler>,
    executor: Arc<dyn FetchExecutor>,
    sink: Arc<Mutex<dyn OutputSink>>,
}

impl Coordinator {
    /// Builds the production wiring: file fetch list, HTTP executor,
    /// SQLite sink with a run row recording the config hash
    pub fn new(config: Config, config_hash: &str) -> Result<Self> {
        let source = FileSource::open(Path::new(&config.source.fetch_list_path))?;
        let mut sink = SqliteSink::new(Path::new(&config.output.database_path))?;
        sink.start_run(config_hash)?;
        let executor = HttpExecutor::new(&config)?;
        Self::with_parts(
            config,
            Box::new(source),
            Arc::new(executor),
            Arc::new(Mutex::new(sink)),
        )
    }

    /// Builds a coordinator from explicit collaborators (used by tests)
    pub fn with_parts(
        config: Config,
        source: Box<dyn FetchSource>,
        executor: Arc<dyn FetchExecutor>,
        sink: Arc<Mutex<dyn OutputSink>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let scheduler = Arc::new(RequestScheduler::new(Arc::clone(&config), source)?);
        Ok(Self {
            config,
            scheduler,
            executor,
            sink,
        })
    }

    pub fn scheduler(&self) -> Arc<RequestScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Runs the crawl to completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            "Starting crawl: {} fetch workers, {} output workers",
            self.config.scheduler.fetch_threads,
            self.config.scheduler.output_threads
        );
        let start = Instant::now();

        let mut workers = Vec::new();
        for worker_id in 0..self.config.scheduler.fetch_threads as usize {
            workers.push(tokio::spawn(run_fetch_worker(
                worker_id,
                Arc::clone(&self.scheduler),
                Arc::clone(&self.executor),
            )));
        }
        for worker_id in 0..self.config.scheduler.output_threads as usize {
            workers.push(tokio::spawn(run_output_worker(
                worker_id,
                Arc::clone(&self.scheduler),
                Arc::clone(&self.sink),
            )));
        }

        let stats_interval = Duration::from_secs(self.config.scheduler.stats_interval_secs.max(1));
        let throttle_window = Duration::from_secs(self.config.throttle.window_secs.max(1));
        let mut last_stats = Instant::now();
        let mut last_throttle = Instant::now();

        while !self.scheduler.finished_output() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.scheduler.check_queues();

            if self.config.throttle.enabled && last_throttle.elapsed() >= throttle_window {
                self.scheduler.adjust_throttle();
                last_throttle = Instant::now();
            }
            if last_stats.elapsed() >= stats_interval {
                tracing::info!("{}", self.scheduler.status().report());
                last_stats = Instant::now();
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("Worker task failed: {}", e);
            }
        }

        let severe = self.scheduler.severe();
        {
            let mut sink = self.sink.lock().unwrap();
            if let Err(e) = sink.finish(!severe) {
                tracing::warn!("Failed to finalize output sink: {}", e);
            }
        }

        let marker = if severe { "error" } else { "done" };
        std::fs::write(&self.config.output.marker_path, format!("{}\n", marker))?;

        let status = self.scheduler.status();
        tracing::info!("Crawl finished in {:?}: {}", start.elapsed(), status.report());

        if severe {
            return Err(KumoError::Scheduler(
                "run aborted after a severe error".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs one crawl with the production wiring
pub async fn run_crawl(config: Config, config_hash: &str) -> Result<()> {
    let coordinator = Coordinator::new(config, config_hash)?;
    coordinator.run().await
}
