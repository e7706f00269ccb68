use std::fmt;
use url::Url;

/// Identity of one fetch target host: scheme + hostname + port
///
/// Every `HostQueue` is keyed by one of these, so `http://example.com`,
/// `https://example.com`, and `http://example.com:8080` are three distinct
/// hosts for politeness purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    scheme: String,
    host: String,
    port: u16,
}

impl HostKey {
    /// Derives the host key for a URL
    ///
    /// Returns `None` for URLs without a host (e.g. `data:` or `mailto:`)
    /// or without a known port.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_lowercase();
        let port = url.port_or_known_default()?;
        Some(Self {
            scheme: url.scheme().to_lowercase(),
            host,
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this host speaks HTTP and is therefore subject to robots.txt
    pub fn is_http(&self) -> bool {
        self.scheme == "http" || self.scheme == "https"
    }

    /// The robots.txt probe URL for this host
    ///
    /// Only meaningful for HTTP(S) hosts.
    pub fn robots_url(&self) -> Option<Url> {
        if !self.is_http() {
            return None;
        }
        Url::parse(&format!("{}://{}:{}/robots.txt", self.scheme, self.host, self.port)).ok()
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
