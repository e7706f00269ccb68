use std::path::Path;

/// A list of banned hostname suffixes
///
/// Hosts whose name equals a listed suffix, or ends with `.` + suffix, are
/// refused at admission time. Matching is case-insensitive; list files hold
/// one suffix per line with `#` comments.
#[derive(Debug, Clone, Default)]
pub struct HostBanList {
    suffixes: Vec<String>,
}

impl HostBanList {
    /// Creates an empty ban list that bans nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a ban list from suffix strings
    pub fn new(suffixes: Vec<String>) -> Self {
        let suffixes = suffixes
            .into_iter()
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { suffixes }
    }

    /// Loads a ban list file: one suffix per line, `#` starts a comment
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let suffixes = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Ok(Self::new(suffixes))
    }

    /// Whether the given hostname is banned
    pub fn is_banned(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.suffixes
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
    }

    /// Number of banned suffixes
    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_list_bans_nothing() {
        let list = HostBanList::empty();
        assert!(!list.is_banned("example.com"));
    }

    #[test]
    fn test_exact_match() {
        let list = HostBanList::new(vec!["example.com".to_string()]);
        assert!(list.is_banned("example.com"));
        assert!(!list.is_banned("example.org"));
    }

    #[test]
    fn test_suffix_match() {
        let list = HostBanList::new(vec!["example.com".to_string()]);
        assert!(list.is_banned("www.example.com"));
        assert!(list.is_banned("deep.sub.example.com"));
    }

    #[test]
    fn test_no_partial_label_match() {
        let list = HostBanList::new(vec!["example.com".to_string()]);
        assert!(!list.is_banned("notexample.com"));
        assert!(!list.is_banned("example.com.org"));
    }

    #[test]
    fn test_case_insensitive() {
        let list = HostBanList::new(vec!["Example.COM".to_string()]);
        assert!(list.is_banned("WWW.EXAMPLE.com"));
    }

    #[test]
    fn test_leading_dot_normalized() {
        let list = HostBanList::new(vec![".example.com".to_string()]);
        assert!(list.is_banned("example.com"));
        assert!(list.is_banned("www.example.com"));
    }

    #[test]
    fn test_tld_suffix() {
        let list = HostBanList::new(vec!["test".to_string()]);
        assert!(list.is_banned("anything.test"));
        assert!(!list.is_banned("test.com"));
    }

    #[test]
    fn test_from_file_with_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# banned hosts").unwrap();
        writeln!(file, "example.com").unwrap();
        writeln!(file, "  spam.test  # trailing comment").unwrap();
        writeln!(file).unwrap();
        file.flush().unwrap();

        let list = HostBanList::from_file(file.path()).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.is_banned("example.com"));
        assert!(list.is_banned("x.spam.test"));
    }
}
