// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// The endpoint a request or socket is ultimately meant for.
///
/// `protocol` keeps the trailing colon (`https:`), the way the wire headers
/// carry it. `path` includes the query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub protocol: String,
}

impl RemoteTarget {
    pub fn from_url(url: &Url) -> Result<Self> {
        let protocol = format!("{}:", url.scheme());

        // blob:https://origin/uuid and friends have no authority of their own
        if url.cannot_be_a_base() {
            return Ok(Self {
                host: String::new(),
                port: 0,
                path: url.path().to_string(),
                protocol,
            });
        }

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidRemote(format!("{} has no host", url)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidRemote(format!("{} has no port", url)))?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            path,
            protocol,
        })
    }

    pub fn parse(input: &str) -> Result<Self> {
        Self::from_url(&Url::parse(input)?)
    }

    pub fn scheme(&self) -> &str {
        self.protocol.trim_end_matches(':')
    }

    /// Schemes that are served locally and never go through the bare server.
    pub fn is_local(&self) -> bool {
        matches!(self.scheme(), "blob")
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.scheme(), "ws" | "wss")
    }

    pub fn to_url(&self) -> Result<Url> {
        if self.host.is_empty() {
            return Ok(Url::parse(&format!("{}{}", self.protocol, self.path))?);
        }
        Ok(Url::parse(&self.to_string())?)
    }
}

/// `Host` header value for `url`, with the port only when it is not the
/// scheme default.
pub fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Canonical `protocol//host:port/path` form.
impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}:{}{}", self.protocol, self.host, self.port, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_is_filled_in() {
        let remote = RemoteTarget::parse("https://a.example/x?y=1").unwrap();
        assert_eq!(remote.protocol, "https:");
        assert_eq!(remote.host, "a.example");
        assert_eq!(remote.port, 443);
        assert_eq!(remote.path, "/x?y=1");
        assert_eq!(remote.to_string(), "https://a.example:443/x?y=1");
    }

    #[test]
    fn test_websocket_schemes() {
        let remote = RemoteTarget::parse("ws://chat.example:8080/socket").unwrap();
        assert!(remote.is_websocket());
        assert_eq!(remote.port, 8080);
        assert_eq!(
            remote.to_url().unwrap().as_str(),
            "ws://chat.example:8080/socket"
        );

        let secure = RemoteTarget::parse("wss://chat.example/").unwrap();
        assert_eq!(secure.port, 443);
        assert!(!RemoteTarget::parse("https://chat.example/").unwrap().is_websocket());
    }

    #[test]
    fn test_to_url_drops_default_port() {
        let remote = RemoteTarget::parse("http://a.example/b").unwrap();
        assert_eq!(remote.to_url().unwrap().as_str(), "http://a.example/b");
    }

    #[test]
    fn test_blob_is_local() {
        let remote = RemoteTarget::parse("blob:https://a.example/0f9c").unwrap();
        assert!(remote.is_local());
        assert_eq!(remote.path, "https://a.example/0f9c");
        assert_eq!(
            remote.to_url().unwrap().as_str(),
            "blob:https://a.example/0f9c"
        );
    }

    #[test]
    fn test_ipv6_host() {
        let remote = RemoteTarget::parse("http://[::1]:3000/").unwrap();
        assert_eq!(remote.host, "[::1]");
        assert_eq!(remote.to_string(), "http://[::1]:3000/");
    }

    #[test]
    fn test_host_header() {
        let url = Url::parse("https://a.example:443/x").unwrap();
        assert_eq!(host_header(&url).as_deref(), Some("a.example"));
        let url = Url::parse("http://a.example:8080/x").unwrap();
        assert_eq!(host_header(&url).as_deref(), Some("a.example:8080"));
    }

    #[test]
    fn test_rejects_hostless_hierarchical_url() {
        assert!(RemoteTarget::parse("file:///etc/hosts").is_err());
    }
}
