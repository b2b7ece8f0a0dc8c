// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

//! Wire formats spoken to the bare server, one module per generation.

mod v1;
mod v2;
mod v3;

pub use v1::V1Adapter;
pub use v2::V2Adapter;
pub use v3::V3Adapter;

use crate::request::{BareResponse, Body, RequestDescriptor};
use crate::selector::AdapterKind;
use crate::tunnel::{Handshake, UpgradeRequest};
use bare_core::codec::join_headers;
use bare_core::{
    is_empty_body, BareErrorBody, BareHeaders, Error, RemoteTarget, Result, WebSocketMeta,
    X_BARE_HEADERS, X_BARE_HOST, X_BARE_PATH, X_BARE_PORT, X_BARE_PROTOCOL, X_BARE_STATUS,
    X_BARE_STATUS_TEXT,
};
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::{HeaderMap, HeaderValue};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// HTTP and WebSocket base URLs of one protocol generation.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub http: Url,
    pub ws: Url,
}

impl Endpoint {
    pub fn new(server: &Url, version: u8) -> Result<Self> {
        let http = server.join(&format!("v{}/", version))?;
        let mut ws = http.clone();
        let scheme = if http.scheme() == "https" { "wss" } else { "ws" };
        ws.set_scheme(scheme)
            .map_err(|_| Error::InvalidRemote(format!("{} cannot carry websockets", server)))?;
        Ok(Self { http, ws })
    }

    pub fn join(&self, path: &str) -> Result<Url> {
        Ok(self.http.join(path)?)
    }
}

#[derive(Debug, Clone)]
pub enum Adapter {
    V3(V3Adapter),
    V2(V2Adapter),
    V1(V1Adapter),
}

impl Adapter {
    pub fn new(
        kind: AdapterKind,
        server: &Url,
        http: reqwest::Client,
        chunk_size: usize,
    ) -> Result<Self> {
        Ok(match kind {
            AdapterKind::V3 => Adapter::V3(V3Adapter::new(server, http, chunk_size)?),
            AdapterKind::V2 => Adapter::V2(V2Adapter::new(server, http, chunk_size)?),
            AdapterKind::V1 => Adapter::V1(V1Adapter::new(server, http)?),
        })
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            Adapter::V3(_) => AdapterKind::V3,
            Adapter::V2(_) => AdapterKind::V2,
            Adapter::V1(_) => AdapterKind::V1,
        }
    }

    /// One request/response exchange with the remote. Redirects are returned
    /// as-is.
    pub async fn request(&self, request: RequestDescriptor) -> Result<BareResponse> {
        if request.remote.is_local() {
            return Err(Error::LocalResource(request.remote.to_string()));
        }

        debug!(
            adapter = self.kind().tag(),
            method = %request.method,
            remote = %request.remote,
            "forwarding request"
        );
        match self {
            Adapter::V3(a) => a.request(request).await,
            Adapter::V2(a) => a.request(request).await,
            Adapter::V1(a) => a.request(request).await,
        }
    }

    /// Opens the socket to the bare server and returns the handshake that
    /// completes the tunnel.
    pub async fn connect(
        &self,
        upgrade: UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<(WsStream, Handshake)> {
        debug!(adapter = self.kind().tag(), remote = %upgrade.url, "opening tunnel");
        match self {
            Adapter::V3(a) => a.connect(upgrade, cancel).await,
            Adapter::V2(a) => a.connect(upgrade, cancel).await,
            Adapter::V1(a) => a.connect(upgrade, cancel).await,
        }
    }
}

/// Sends `builder`, giving up as soon as `cancel` fires.
pub(crate) async fn send(
    builder: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = builder.send() => {
            result.map_err(|e| Error::Connection(format!("bare server unreachable: {}", e)))
        }
    }
}

/// The `x-bare-*` headers naming `remote`, with the caller's headers
/// serialized into `x-bare-headers`.
pub(crate) fn remote_headers(remote: &RemoteTarget, headers: &BareHeaders) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    map.insert(X_BARE_PROTOCOL, HeaderValue::from_str(&remote.protocol)?);
    map.insert(X_BARE_HOST, HeaderValue::from_str(&remote.host)?);
    map.insert(X_BARE_PATH, HeaderValue::from_str(&remote.path)?);
    map.insert(X_BARE_PORT, HeaderValue::from(remote.port));
    map.insert(
        X_BARE_HEADERS,
        HeaderValue::from_bytes(serde_json::to_string(headers)?.as_bytes())?,
    );
    Ok(map)
}

/// Turns a non-success answer from the bare server into an error.
pub(crate) async fn read_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return Error::IntermediaryProtocol(format!("unreadable error body: {}", e)),
    };

    match serde_json::from_slice::<BareErrorBody>(&body) {
        Ok(body) => Error::Bare { status, body },
        Err(_) => Error::IntermediaryProtocol(format!(
            "bare server answered {} without an error body",
            status
        )),
    }
}

fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| Error::IntermediaryProtocol(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| Error::IntermediaryProtocol(format!("{} is not valid text", name)))
}

/// Reads the remote's status and headers out of a bare server response.
/// `join` reassembles chunked header families first.
pub(crate) async fn read_response(
    response: reqwest::Response,
    remote: &RemoteTarget,
    join: bool,
) -> Result<BareResponse> {
    if !response.status().is_success() {
        return Err(read_error(response).await);
    }

    let headers = if join {
        join_headers(response.headers())?
    } else {
        response.headers().clone()
    };

    let status: u16 = required(&headers, X_BARE_STATUS)?
        .trim()
        .parse()
        .map_err(|_| Error::IntermediaryProtocol("x-bare-status is not a number".to_string()))?;
    let status_text = required(&headers, X_BARE_STATUS_TEXT)?.to_string();
    let raw_headers: BareHeaders = serde_json::from_str(required(&headers, X_BARE_HEADERS)?)
        .map_err(|e| Error::IntermediaryProtocol(format!("malformed x-bare-headers: {}", e)))?;

    let body = if is_empty_body(status) {
        Body::Empty
    } else {
        Body::Transport(response)
    };

    Ok(BareResponse {
        status,
        status_text,
        headers: raw_headers.to_header_map(),
        raw_headers,
        final_url: remote.to_url()?,
        body,
    })
}

/// WebSocket handshake with the bare server itself.
pub(crate) async fn open_socket(
    url: &Url,
    protocols: &[String],
    cancel: &CancellationToken,
) -> Result<WsStream> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Connection(format!("invalid websocket request: {}", e)))?;
    if !protocols.is_empty() {
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(&protocols.join(", "))?,
        );
    }

    let (socket, _) = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        result = connect_async(request) => result
            .map_err(|e| Error::Connection(format!("websocket to bare server failed: {}", e)))?,
    };
    Ok(socket)
}

/// Metadata of a legacy tunnel, read from the remote's handshake headers.
/// Cookies are only relayed by the control frame exchange.
pub(crate) fn legacy_meta(headers: &BareHeaders) -> WebSocketMeta {
    WebSocketMeta {
        protocol: headers
            .get_first("sec-websocket-protocol")
            .unwrap_or_default()
            .to_string(),
        set_cookies: Vec::new(),
    }
}
