//! Robots.txt parsing and path matching
//!
//! The parser selects the single stanza that best matches the crawler's
//! agent names and turns its `Allow`/`Disallow` lines into an ordered rule
//! list. Matching deliberately follows the classic crawler behavior: rules
//! are tried in file order and the first matching prefix wins, rather than
//! the longest-prefix semantics of later robots.txt implementations.

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

/// One `Allow`/`Disallow` line: a decoded path prefix and its decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotRule {
    pub prefix: String,
    pub allow: bool,
}

/// Parsed robots.txt decision table for one crawler
///
/// An empty rule list allows everything. The optional expiry timestamp is
/// attached by the host queue when the rules are cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RobotRule>,
    expires: Option<DateTime<Utc>>,
}

impl RuleSet {
    /// A rule set that allows every path and never expires
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            expires: None,
        }
    }

    /// A rule set that denies every path
    ///
    /// Used when a host answers its robots.txt probe with 403.
    pub fn deny_all() -> Self {
        Self {
            rules: vec![RobotRule {
                prefix: String::new(),
                allow: false,
            }],
            expires: None,
        }
    }

    fn from_rules(rules: Vec<RobotRule>) -> Self {
        Self {
            rules,
            expires: None,
        }
    }

    /// Attaches an expiry timestamp to this rule set
    pub fn with_expiry(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Whether the cached rules have expired at `now`
    ///
    /// Rule sets without an expiry (non-HTTP hosts, deny-all placeholders
    /// that were never given one) never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(e) if now >= e)
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    /// Number of rules in the set
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates whether a path is allowed
    ///
    /// The path is percent-decoded, then the rules are scanned in stored
    /// (file) order; the first rule whose prefix matches decides. A path no
    /// rule matches is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let decoded = decode_path(path);
        for rule in &self.rules {
            if decoded.starts_with(&rule.prefix) {
                return rule.allow;
            }
        }
        true
    }
}

/// Parses robots.txt payloads against a fixed agent-name list
///
/// The agent names are ordered most-specific first; a catch-all `*` is
/// appended if the caller did not provide one.
#[derive(Debug, Clone)]
pub struct RobotRulesParser {
    agent_names: Vec<String>,
}

impl RobotRulesParser {
    pub fn new(agent_names: &[String]) -> Self {
        let mut names: Vec<String> = agent_names.iter().map(|n| n.to_lowercase()).collect();
        if !names.iter().any(|n| n == "*") {
            names.push("*".to_string());
        }
        Self { agent_names: names }
    }

    /// Parses a robots.txt payload into the best-matching stanza's rules
    ///
    /// Stanzas are ranked by the minimum agent-list index of any agent name
    /// they mention; only a stanza strictly better than everything seen
    /// before it contributes rules. An `Allow`/`Disallow` line with an empty
    /// path clears the rules accumulated for the current stanza. If no
    /// stanza mentions any known agent the result allows everything.
    pub fn parse(&self, content: &[u8]) -> RuleSet {
        let text = String::from_utf8_lossy(content);

        let mut best_precedence = usize::MAX;
        let mut rules: Vec<RobotRule> = Vec::new();
        let mut current_precedence = usize::MAX;
        let mut in_header = false;
        let mut collecting = false;
        let mut matched_any = false;

        for raw in text.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !in_header {
                        // A new stanza header begins
                        current_precedence = usize::MAX;
                        in_header = true;
                    }
                    if let Some(idx) = self.agent_index(value) {
                        current_precedence = current_precedence.min(idx);
                    }
                }
                "allow" | "disallow" => {
                    if in_header {
                        in_header = false;
                        if current_precedence < best_precedence {
                            best_precedence = current_precedence;
                            rules.clear();
                            collecting = true;
                            matched_any = true;
                        } else {
                            collecting = false;
                        }
                    }
                    if collecting {
                        if value.is_empty() {
                            // Empty path resets the stanza's accumulated rules
                            rules.clear();
                        } else {
                            rules.push(RobotRule {
                                prefix: decode_path(value),
                                allow: key == "allow",
                            });
                        }
                    }
                }
                _ => {
                    // Crawl-delay, Sitemap and friends are not part of the
                    // decision table
                }
            }
        }

        if matched_any {
            RuleSet::from_rules(rules)
        } else {
            RuleSet::allow_all()
        }
    }

    fn agent_index(&self, stanza_agent: &str) -> Option<usize> {
        let stanza_agent = stanza_agent.to_lowercase();
        self.agent_names.iter().position(|name| {
            if name == "*" {
                stanza_agent == "*"
            } else {
                stanza_agent.contains(name.as_str())
            }
        })
    }
}

/// Percent-decodes a path, falling back to the raw string on malformed input
fn decode_path(path: &str) -> String {
    match percent_decode_str(path).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn parser(agents: &[&str]) -> RobotRulesParser {
        let names: Vec<String> = agents.iter().map(|s| s.to_string()).collect();
        RobotRulesParser::new(&names)
    }

    #[test]
    fn test_wildcard_stanza_disallow() {
        let rules = parser(&["mybot", "*"]).parse(b"User-agent: *\nDisallow: /priv\n");
        assert!(!rules.is_allowed("/priv/x"));
        assert!(rules.is_allowed("/pub"));
    }

    #[test]
    fn test_no_matching_stanza_allows_all() {
        let rules = parser(&["mybot"]).parse(b"User-agent: otherbot\nDisallow: /\n");
        assert!(rules.is_allowed("/anything"));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_specific_stanza_beats_wildcard() {
        let content = b"User-agent: *\nDisallow: /\n\nUser-agent: mybot\nDisallow: /private\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(rules.is_allowed("/public"));
        assert!(!rules.is_allowed("/private/x"));
    }

    #[test]
    fn test_wildcard_first_then_specific_still_wins() {
        // The specific stanza appears later in the file but has better
        // precedence, so it replaces the wildcard rules
        let content = b"User-agent: mybot\nDisallow: /private\n\nUser-agent: *\nDisallow: /\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(rules.is_allowed("/public"));
    }

    #[test]
    fn test_first_listed_prefix_wins() {
        // File order decides, not prefix length
        let content = b"User-agent: *\nDisallow: /private\nAllow: /private/public\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(!rules.is_allowed("/private/public"));

        let content = b"User-agent: *\nAllow: /private/public\nDisallow: /private\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(rules.is_allowed("/private/public"));
        assert!(!rules.is_allowed("/private/other"));
    }

    #[test]
    fn test_empty_path_resets_stanza_rules() {
        let content = b"User-agent: *\nDisallow: /a\nDisallow: /b\nDisallow:\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(rules.is_allowed("/a"));
        assert!(rules.is_allowed("/b"));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_multiple_agent_lines_share_stanza() {
        let content = b"User-agent: otherbot\nUser-agent: mybot\nDisallow: /x\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(!rules.is_allowed("/x/y"));
    }

    #[test]
    fn test_agent_name_substring_match() {
        // Stanza names often carry version suffixes
        let content = b"User-agent: mybot/2.1\nDisallow: /x\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(!rules.is_allowed("/x"));
    }

    #[test]
    fn test_comments_and_whitespace_stripped() {
        let content = b"# header comment\nUser-agent: * # everyone\n  Disallow: /secret # keep out\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(!rules.is_allowed("/secret/page"));
    }

    #[test]
    fn test_percent_encoded_rule_and_path() {
        let content = b"User-agent: *\nDisallow: /a%20b\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(!rules.is_allowed("/a b/c"));
        assert!(!rules.is_allowed("/a%20b/c"));
    }

    #[test]
    fn test_malformed_percent_encoding_tolerated() {
        let content = b"User-agent: *\nDisallow: /a%ZZ\n";
        let rules = parser(&["mybot"]).parse(content);
        assert!(!rules.is_allowed("/a%ZZ/x"));
    }

    #[test]
    fn test_garbage_content_allows_all() {
        let rules = parser(&["mybot"]).parse(b"this is not a robots file {{{");
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn test_deny_all_blocks_everything() {
        let rules = RuleSet::deny_all();
        assert!(!rules.is_allowed("/"));
        assert!(!rules.is_allowed("/any/path"));
    }

    #[test]
    fn test_allow_all_never_expires() {
        let rules = RuleSet::allow_all();
        assert!(!rules.is_expired(Utc::now() + Duration::days(365 * 100)));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let rules = RuleSet::allow_all().with_expiry(now + Duration::hours(1));
        assert!(!rules.is_expired(now));
        assert!(rules.is_expired(now + Duration::hours(2)));
    }

    #[test]
    fn test_wildcard_appended_when_missing() {
        let p = parser(&["mybot"]);
        let rules = p.parse(b"User-agent: *\nDisallow: /x\n");
        assert!(!rules.is_allowed("/x"));
    }
}
