// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use bare_core::{is_redirect, BareHeaders, Error, RemoteTarget, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How the request should interact with HTTP caches between the client and
/// the bare server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Default => "default",
            CacheMode::NoStore => "no-store",
            CacheMode::Reload => "reload",
            CacheMode::NoCache => "no-cache",
            CacheMode::ForceCache => "force-cache",
            CacheMode::OnlyIfCached => "only-if-cached",
        }
    }

    /// Request directives sent to the bare server for this mode.
    pub fn directives(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            CacheMode::NoStore => &[("cache-control", "no-store")],
            CacheMode::Reload | CacheMode::NoCache => {
                &[("cache-control", "no-cache"), ("pragma", "no-cache")]
            }
            CacheMode::ForceCache => &[("cache-control", "max-stale")],
            CacheMode::Default | CacheMode::OnlyIfCached => &[],
        }
    }
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(CacheMode::Default),
            "no-store" => Ok(CacheMode::NoStore),
            "reload" => Ok(CacheMode::Reload),
            "no-cache" => Ok(CacheMode::NoCache),
            "force-cache" => Ok(CacheMode::ForceCache),
            "only-if-cached" => Ok(CacheMode::OnlyIfCached),
            other => Err(Error::InvalidHeader(format!("unknown cache mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectPolicy {
    #[default]
    Follow,
    Error,
    Manual,
}

impl FromStr for RedirectPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "follow" => Ok(RedirectPolicy::Follow),
            "error" => Ok(RedirectPolicy::Error),
            "manual" => Ok(RedirectPolicy::Manual),
            other => Err(Error::InvalidHeader(format!("unknown redirect policy: {}", other))),
        }
    }
}

/// Options for [`crate::client::BareClient::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchInit {
    pub method: Method,
    pub headers: BareHeaders,
    pub body: Option<Bytes>,
    pub cache: CacheMode,
    pub redirect: RedirectPolicy,
    pub cancel: Option<CancellationToken>,
}

/// One attempt against one remote. Rebuilt for every redirect hop.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub headers: BareHeaders,
    pub body: Option<Bytes>,
    pub remote: RemoteTarget,
    pub cache: CacheMode,
    pub cancel: CancellationToken,
}

impl RequestDescriptor {
    pub fn new(method: Method, remote: RemoteTarget) -> Self {
        Self {
            method,
            headers: BareHeaders::new(),
            body: None,
            remote,
            cache: CacheMode::Default,
            cancel: CancellationToken::new(),
        }
    }
}

pub(crate) enum Body {
    Empty,
    Transport(reqwest::Response),
}

/// The remote's response as relayed by the bare server.
///
/// `headers` is the normalized view; `raw_headers` keeps the exact set,
/// casing and duplicates the remote sent.
pub struct BareResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub raw_headers: BareHeaders,
    pub final_url: Url,
    pub(crate) body: Body,
}

impl std::fmt::Debug for BareResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BareResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("raw_headers", &self.raw_headers)
            .field("final_url", &self.final_url.as_str())
            .finish_non_exhaustive()
    }
}

impl BareResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        is_redirect(self.status)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    pub fn has_body(&self) -> bool {
        matches!(self.body, Body::Transport(_))
    }

    pub async fn bytes(self) -> Result<Bytes> {
        match self.body {
            Body::Empty => Ok(Bytes::new()),
            Body::Transport(response) => response
                .bytes()
                .await
                .map_err(|e| Error::Connection(format!("failed to read body: {}", e))),
        }
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn bytes_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self.body {
            Body::Empty => futures::stream::empty::<Result<Bytes>>().boxed(),
            Body::Transport(response) => response
                .bytes_stream()
                .map_err(|e| Error::Connection(format!("failed to read body: {}", e)))
                .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_mode_names_round_trip() {
        for mode in [
            CacheMode::Default,
            CacheMode::NoStore,
            CacheMode::Reload,
            CacheMode::NoCache,
            CacheMode::ForceCache,
            CacheMode::OnlyIfCached,
        ] {
            assert_eq!(mode.as_str().parse::<CacheMode>().unwrap(), mode);
        }
        assert!("sometimes".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_only_if_cached_sends_nothing() {
        assert!(CacheMode::OnlyIfCached.directives().is_empty());
        assert!(CacheMode::Default.directives().is_empty());
        assert_eq!(CacheMode::NoStore.directives(), &[("cache-control", "no-store")]);
    }

    #[test]
    fn test_redirect_policy_parse() {
        assert_eq!("manual".parse::<RedirectPolicy>().unwrap(), RedirectPolicy::Manual);
        assert_eq!(RedirectPolicy::default(), RedirectPolicy::Follow);
        assert!("sideways".parse::<RedirectPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_empty_body_reads_as_nothing() {
        let response = BareResponse {
            status: 204,
            status_text: "No Content".to_string(),
            headers: HeaderMap::new(),
            raw_headers: BareHeaders::new(),
            final_url: Url::parse("https://a.example/").unwrap(),
            body: Body::Empty,
        };
        assert!(response.ok());
        assert!(!response.has_body());
        assert!(response.bytes().await.unwrap().is_empty());
    }
}
