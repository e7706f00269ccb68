//! SQLite output sink
//!
//! Persists one row per terminal fetch-list record, plus a `runs` table
//! tying results to the configuration hash that produced them.

use crate::output::traits::{OutputResult, OutputSink, OutputTask};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;

/// SQLite-backed output sink
pub struct SqliteSink {
    conn: Connection,
    run_id: Option<i64>,
}

impl SqliteSink {
    /// Opens (or creates) the results database
    pub fn new(path: &Path) -> OutputResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        initialize_schema(&conn)?;
        Ok(Self { conn, run_id: None })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> OutputResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn, run_id: None })
    }

    /// Records the start of a run with its config hash
    pub fn start_run(&mut self, config_hash: &str) -> OutputResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, 'running')",
            params![Utc::now().to_rfc3339(), config_hash],
        )?;
        let run_id = self.conn.last_insert_rowid();
        self.run_id = Some(run_id);
        Ok(run_id)
    }

    /// Total result rows written
    pub fn count_results(&self) -> OutputResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fetch_results", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Result rows without a failure reason
    pub fn count_successes(&self) -> OutputResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fetch_results WHERE failure_reason IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Result rows carrying the given failure reason
    pub fn count_failures(&self, reason: &str) -> OutputResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM fetch_results WHERE failure_reason = ?1",
            params![reason],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Failure reasons with their counts, most common first
    pub fn failure_summary(&self) -> OutputResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT failure_reason, COUNT(*) FROM fetch_results
             WHERE failure_reason IS NOT NULL
             GROUP BY failure_reason ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        let mut summary = Vec::new();
        for row in rows {
            summary.push(row?);
        }
        Ok(summary)
    }
}

impl OutputSink for SqliteSink {
    fn append(&mut self, task: &OutputTask, raw: &[u8], text: &str) -> OutputResult<()> {
        let record = &task.record;
        self.conn.execute(
            "INSERT INTO fetch_results
             (run_id, url, original_url, status_code, failure_reason, failure_message,
              error_count, redirect_count, bytes_fetched, content, extracted_text, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                self.run_id,
                record.url.as_str(),
                task.original_url.as_str(),
                record.response.as_ref().map(|r| r.status as i64),
                record.failure_reason().map(|r| r.as_str()),
                record.failure_message(),
                record.num_errors as i64,
                record.num_redirects as i64,
                record.bytes_fetched as i64,
                raw,
                text,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn finish(&mut self, succeeded: bool) -> OutputResult<()> {
        if let Some(run_id) = self.run_id.take() {
            let status = if succeeded { "completed" } else { "error" };
            self.conn.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
                params![status, Utc::now().to_rfc3339(), run_id],
            )?;
        }
        Ok(())
    }
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            config_hash TEXT NOT NULL,
            status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fetch_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER,
            url TEXT NOT NULL,
            original_url TEXT NOT NULL,
            status_code INTEGER,
            failure_reason TEXT,
            failure_message TEXT,
            error_count INTEGER NOT NULL,
            redirect_count INTEGER NOT NULL,
            bytes_fetched INTEGER NOT NULL,
            content BLOB,
            extracted_text TEXT,
            fetched_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_results_failure ON fetch_results(failure_reason);
        CREATE INDEX IF NOT EXISTS idx_results_url ON fetch_results(url);
    ",
    )
}
