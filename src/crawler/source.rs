//! The URL source seam
//!
//! A `FetchSource` is a sequential, exhaustible supplier of fetch-list
//! entries. The scheduler drains it during housekeeping refills; any error
//! while draining degrades to "source exhausted" rather than aborting the
//! run.

use crate::{KumoError, Result};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One work item from the fetch list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEntry {
    pub url: String,
    /// Entries marked do-not-fetch are counted and skipped
    pub should_fetch: bool,
    /// Opaque link metadata (anchors etc.) carried through to the output
    pub metadata: Vec<String>,
}

/// Sequential supplier of fetch-list entries
pub trait FetchSource: Send {
    /// Returns the next entry, or `None` once the source is exhausted
    fn next_entry(&mut self) -> Result<Option<FetchEntry>>;
}

/// Fetch list read line by line from a file
///
/// Format: one URL per line; `#` starts a comment; a `!` prefix marks an
/// entry as do-not-fetch (it is recorded but never dispatched). Metadata
/// may follow the URL after whitespace.
pub struct FileSource {
    lines: std::io::Lines<BufReader<std::fs::File>>,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl FetchSource for FileSource {
    fn next_entry(&mut self) -> Result<Option<FetchEntry>> {
        for line in self.lines.by_ref() {
            let line = line.map_err(|e| KumoError::Source(e.to_string()))?;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let (line, should_fetch) = match line.strip_prefix('!') {
                Some(rest) => (rest.trim(), false),
                None => (line, true),
            };

            let mut parts = line.split_whitespace();
            let Some(url) = parts.next() else {
                continue;
            };
            let metadata: Vec<String> = parts.map(str::to_string).collect();

            return Ok(Some(FetchEntry {
                url: url.to_string(),
                should_fetch,
                metadata,
            }));
        }
        Ok(None)
    }
}

/// In-memory source for tests and seeding
pub struct VecSource {
    entries: std::vec::IntoIter<FetchEntry>,
}

impl VecSource {
    pub fn new(entries: Vec<FetchEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }

    /// Convenience constructor from plain URLs
    pub fn from_urls(urls: &[&str]) -> Self {
        Self::new(
            urls.iter()
                .map(|u| FetchEntry {
                    url: u.to_string(),
                    should_fetch: true,
                    metadata: vec![],
                })
                .collect(),
        )
    }
}

impl FetchSource for VecSource {
    fn next_entry(&mut self) -> Result<Option<FetchEntry>> {
        Ok(self.entries.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_source_parses_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# fetch list").unwrap();
        writeln!(file, "http://a.example/ anchor1 anchor2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "! http://skip.example/   # do not fetch").unwrap();
        writeln!(file, "http://b.example/").unwrap();
        file.flush().unwrap();

        let mut source = FileSource::open(file.path()).unwrap();

        let first = source.next_entry().unwrap().unwrap();
        assert_eq!(first.url, "http://a.example/");
        assert!(first.should_fetch);
        assert_eq!(first.metadata, vec!["anchor1", "anchor2"]);

        let second = source.next_entry().unwrap().unwrap();
        assert_eq!(second.url, "http://skip.example/");
        assert!(!second.should_fetch);

        let third = source.next_entry().unwrap().unwrap();
        assert_eq!(third.url, "http://b.example/");

        assert!(source.next_entry().unwrap().is_none());
        assert!(source.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_vec_source_exhausts() {
        let mut source = VecSource::from_urls(&["http://a.example/"]);
        assert!(source.next_entry().unwrap().is_some());
        assert!(source.next_entry().unwrap().is_none());
    }
}
