// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use crate::remote::RemoteTarget;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const X_BARE_PROTOCOL: &str = "x-bare-protocol";
pub const X_BARE_HOST: &str = "x-bare-host";
pub const X_BARE_PATH: &str = "x-bare-path";
pub const X_BARE_PORT: &str = "x-bare-port";
pub const X_BARE_HEADERS: &str = "x-bare-headers";
pub const X_BARE_FORWARD_HEADERS: &str = "x-bare-forward-headers";
pub const X_BARE_STATUS: &str = "x-bare-status";
pub const X_BARE_STATUS_TEXT: &str = "x-bare-status-text";
pub const X_BARE_ID: &str = "x-bare-id";

/// Statuses that never carry a body, whatever the transport delivered.
pub const EMPTY_BODY_STATUSES: [u16; 4] = [101, 204, 205, 304];

pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

pub const MAX_REDIRECTS: usize = 20;

pub fn is_redirect(status: u16) -> bool {
    REDIRECT_STATUSES.contains(&status)
}

pub fn is_empty_body(status: u16) -> bool {
    EMPTY_BODY_STATUSES.contains(&status)
}

/// Document served at the root of a bare server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<Maintainer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(
        default,
        rename = "memoryUsage",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_usage: Option<f64>,
}

impl Manifest {
    pub fn new<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            versions: versions.into_iter().map(Into::into).collect(),
            maintainer: None,
            project: None,
            language: None,
            memory_usage: None,
        }
    }

    pub fn supports(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Structured failure reported by the intermediary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BareErrorBody {
    pub code: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BareHeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl BareHeaderValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            BareHeaderValue::Single(v) => vec![v.as_str()],
            BareHeaderValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.values().into_iter().next()
    }
}

impl From<String> for BareHeaderValue {
    fn from(v: String) -> Self {
        BareHeaderValue::Single(v)
    }
}

impl From<&str> for BareHeaderValue {
    fn from(v: &str) -> Self {
        BareHeaderValue::Single(v.to_string())
    }
}

impl From<Vec<String>> for BareHeaderValue {
    fn from(vs: Vec<String>) -> Self {
        BareHeaderValue::Multiple(vs)
    }
}

/// Header map that keeps insertion order and the caller's casing.
///
/// Names compare case-insensitively for lookups; the first casing seen for a
/// name is the one written on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BareHeaders {
    entries: Vec<(String, BareHeaderValue)>,
}

impl BareHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&BareHeaderValue> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(BareHeaderValue::first)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replaces the value for `name`, keeping whichever casing is already
    /// present. Appends under `name` as given otherwise.
    pub fn set(&mut self, name: &str, value: impl Into<BareHeaderValue>) {
        match self.position(name) {
            Some(i) => {
                self.entries[i].1 = value.into();
                let kept = self.entries[i].0.clone();
                self.entries
                    .retain(|(n, _)| n == &kept || !n.eq_ignore_ascii_case(name));
            }
            None => self.entries.push((name.to_string(), value.into())),
        }
    }

    /// Adds one more value for `name`, turning it multi-valued if needed.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => {
                let slot = &mut self.entries[i].1;
                *slot = match std::mem::replace(slot, BareHeaderValue::Multiple(Vec::new())) {
                    BareHeaderValue::Single(prev) => BareHeaderValue::Multiple(vec![prev, value]),
                    BareHeaderValue::Multiple(mut vs) => {
                        vs.push(value);
                        BareHeaderValue::Multiple(vs)
                    }
                };
            }
            None => self
                .entries
                .push((name.to_string(), BareHeaderValue::Single(value))),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<BareHeaderValue> {
        let i = self.position(name)?;
        let (_, value) = self.entries.remove(i);
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BareHeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Normalized view for callers that want an `http` map. Entries that are
    /// not legal header fields are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in self.iter() {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for v in value.values() {
                if let Ok(v) = HeaderValue::from_str(v) {
                    map.append(name.clone(), v);
                }
            }
        }
        map
    }

    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map.iter() {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }
}

impl<K, V> FromIterator<(K, V)> for BareHeaders
where
    K: Into<String>,
    V: Into<BareHeaderValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            let k = k.into();
            headers.set(&k, v);
        }
        headers
    }
}

impl Serialize for BareHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for BareHeaders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = BareHeaders;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to a string or a list of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<BareHeaders, A::Error> {
                let mut entries: Vec<(String, BareHeaderValue)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, BareHeaderValue>()? {
                    match entries.iter_mut().find(|(n, _)| n == &name) {
                        Some(slot) => slot.1 = value,
                        None => entries.push((name, value)),
                    }
                }
                Ok(BareHeaders { entries })
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// What the caller learns about the remote end of a WebSocket tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketMeta {
    pub protocol: String,
    #[serde(rename = "setCookies")]
    pub set_cookies: Vec<String>,
}

/// Control frame sent by the client over a v3 socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Connect(ConnectMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectMessage {
    pub to: String,
    pub headers: BareHeaders,
    #[serde(rename = "forwardHeaders")]
    pub forward_headers: Vec<String>,
}

/// Control frame sent by the server over a v3 socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Open(WebSocketMeta),
}

/// Descriptor smuggled through the subprotocol list by the v1 wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConnectMeta {
    pub remote: RemoteTarget,
    pub headers: BareHeaders,
    pub forward_headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Body of `GET ws-meta` on the v1 wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyMetaResponse {
    pub headers: BareHeaders,
}

impl ClientFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            ClientFrame::Connect(_) => "connect",
        }
    }
}
