//! Listening prefixes.
//!
//! # Responsibilities
//! - Parse `scheme://host[:port]/path/` strings
//! - Normalize scheme and host to lowercase, fill in default ports
//! - Classify the host as DNS name, IP literal or wildcard
//!
//! # Design Decisions
//! - Equality and hashing use the normalized string only
//! - Paths are case-sensitive; hosts are not
//! - `+` binds every address and matches any host; `*` is the catch-all
//!   consulted when nothing else matched

use std::fmt;
use std::hash::{Hash, Hasher};

use url::Host;

use crate::error::{Error, Result};

/// How a prefix host constrains incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// A DNS name: requests addressed by DNS name must match it exactly.
    Dns,
    /// An IP literal: the request host is not compared.
    Ip,
    /// `+`: every local address, any host.
    All,
    /// `*`: catch-all.
    Unhandled,
}

/// A parsed `scheme://host:port/path/` prefix.
#[derive(Debug, Clone)]
pub struct ListenerPrefix {
    secure: bool,
    host: String,
    kind: HostKind,
    port: u16,
    path: String,
    normalized: String,
}

impl ListenerPrefix {
    pub fn parse(prefix: &str) -> Result<Self> {
        let invalid = |reason: &'static str| Error::InvalidPrefix {
            prefix: prefix.to_string(),
            reason,
        };

        let (scheme, rest) = prefix
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        let secure = match scheme.as_str() {
            "http" => false,
            "https" => true,
            _ => return Err(invalid("scheme must be http or https")),
        };

        let slash = rest.find('/').ok_or_else(|| invalid("path must end with '/'"))?;
        let (authority, path) = rest.split_at(slash);
        if !path.ends_with('/') {
            return Err(invalid("path must end with '/'"));
        }
        if path.contains('%') || path.contains("//") {
            return Err(Error::InvalidPrefixPath(path.to_string()));
        }

        let (host, port) = split_authority(authority).ok_or_else(|| invalid("malformed host or port"))?;
        if host.is_empty() {
            return Err(invalid("host is missing"));
        }
        let port = match port {
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid("port must be between 1 and 65535")),
                Ok(p) => p,
            },
            None if secure => 443,
            None => 80,
        };

        let host = host.to_ascii_lowercase();
        let kind = match host.as_str() {
            "+" => HostKind::All,
            "*" => HostKind::Unhandled,
            h => match Host::parse(h) {
                Ok(Host::Domain(_)) => HostKind::Dns,
                Ok(_) => HostKind::Ip,
                Err(_) => return Err(invalid("malformed host or port")),
            },
        };

        let normalized = format!("{scheme}://{host}:{port}{path}");
        Ok(Self {
            secure,
            host,
            kind,
            port,
            path: path.to_string(),
            normalized,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Lowercased host as written, brackets kept for IPv6.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn host_kind(&self) -> HostKind {
        self.kind
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path with leading and trailing `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

/// Split `host[:port]`, honoring `[v6]` brackets.
fn split_authority(authority: &str) -> Option<(&str, Option<&str>)> {
    if authority.starts_with('[') {
        let end = authority.find(']')?;
        let (host, rest) = authority.split_at(end + 1);
        return match rest {
            "" => Some((host, None)),
            _ => rest.strip_prefix(':').map(|p| (host, Some(p))),
        };
    }
    match authority.split_once(':') {
        Some((host, port)) => Some((host, Some(port))),
        None => Some((authority, None)),
    }
}

impl PartialEq for ListenerPrefix {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for ListenerPrefix {}

impl Hash for ListenerPrefix {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for ListenerPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}
