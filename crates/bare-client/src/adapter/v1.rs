// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use super::{
    legacy_meta, open_socket, read_error, read_response, remote_headers, send, Endpoint,
    WsStream,
};
use crate::request::{BareResponse, RequestDescriptor};
use crate::tunnel::{Handshake, UpgradeRequest};
use bare_core::codec::encode_protocol;
use bare_core::{
    Error, LegacyConnectMeta, LegacyMetaResponse, Result, WebSocketMeta, X_BARE_FORWARD_HEADERS,
    X_BARE_ID,
};
use futures::FutureExt;
use http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Request headers the bare server copies from the client's own request.
const FORWARD_HEADERS: &[&str] = &["accept-encoding", "accept-language"];

const WS_FORWARD_HEADERS: &[&str] = &[
    "accept-encoding",
    "accept-language",
    "sec-websocket-extensions",
    "sec-websocket-key",
    "sec-websocket-version",
];

/// First wire format: JSON forward list, no header chunking, tunnel
/// descriptor packed into the subprotocol list.
#[derive(Debug, Clone)]
pub struct V1Adapter {
    endpoint: Endpoint,
    new_meta: Url,
    get_meta: Url,
    http: reqwest::Client,
}

impl V1Adapter {
    pub fn new(server: &Url, http: reqwest::Client) -> Result<Self> {
        let endpoint = Endpoint::new(server, 1)?;
        Ok(Self {
            new_meta: endpoint.join("ws-new-meta")?,
            get_meta: endpoint.join("ws-meta")?,
            endpoint,
            http,
        })
    }

    pub async fn request(&self, request: RequestDescriptor) -> Result<BareResponse> {
        let mut headers = remote_headers(&request.remote, &request.headers)?;
        headers.insert(
            X_BARE_FORWARD_HEADERS,
            HeaderValue::from_str(&serde_json::to_string(FORWARD_HEADERS)?)?,
        );

        let mut builder = self
            .http
            .request(request.method.clone(), self.endpoint.http.clone())
            .headers(headers);
        if let Some(body) = request.body.clone() {
            builder = builder.body(body);
        }

        let response = send(builder, &request.cancel).await?;
        read_response(response, &request.remote, false).await
    }

    pub async fn connect(
        &self,
        mut upgrade: UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<(WsStream, Handshake)> {
        let assigned = send(self.http.get(self.new_meta.clone()), cancel).await?;
        if !assigned.status().is_success() {
            return Err(read_error(assigned).await);
        }
        let id = assigned
            .text()
            .await
            .map_err(|e| Error::Connection(format!("failed to read tunnel id: {}", e)))?;

        let descriptor = LegacyConnectMeta {
            remote: upgrade.remote.clone(),
            headers: upgrade.resolve_headers().await?,
            forward_headers: WS_FORWARD_HEADERS.iter().map(|h| h.to_string()).collect(),
            id: Some(id.clone()),
        };
        let protocols = vec![
            "bare".to_string(),
            encode_protocol(&serde_json::to_string(&descriptor)?),
        ];

        let socket = open_socket(&self.endpoint.ws, &protocols, cancel).await?;
        debug!(id = %id, "v1 tunnel socket open");

        let meta = fetch_meta(self.http.clone(), self.get_meta.clone(), id).boxed();

        Ok((socket, Handshake::Fetched(meta)))
    }
}

async fn fetch_meta(http: reqwest::Client, url: Url, id: String) -> Result<WebSocketMeta> {
    let response = http
        .get(url)
        .header(X_BARE_ID, id)
        .send()
        .await
        .map_err(|e| Error::Connection(format!("failed to fetch tunnel meta: {}", e)))?;
    if !response.status().is_success() {
        return Err(read_error(response).await);
    }

    let body: LegacyMetaResponse = response
        .json()
        .await
        .map_err(|e| Error::IntermediaryProtocol(format!("malformed tunnel meta: {}", e)))?;
    Ok(legacy_meta(&body.headers))
}
