// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use super::{
    legacy_meta, open_socket, read_error, read_response, remote_headers, send, Endpoint,
    WsStream,
};
use crate::request::{BareResponse, RequestDescriptor};
use crate::tunnel::{Handshake, UpgradeRequest};
use bare_core::codec::{content_key, join_headers, split_headers};
use bare_core::{BareHeaders, Error, Result, WebSocketMeta, X_BARE_HEADERS, X_BARE_ID};
use futures::FutureExt;
use http::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Second wire format: chunked `x-bare-headers`, cache-keyed requests and an
/// id handed out before the socket opens.
#[derive(Debug, Clone)]
pub struct V2Adapter {
    endpoint: Endpoint,
    new_meta: Url,
    get_meta: Url,
    http: reqwest::Client,
    chunk_size: usize,
}

impl V2Adapter {
    pub fn new(server: &Url, http: reqwest::Client, chunk_size: usize) -> Result<Self> {
        let endpoint = Endpoint::new(server, 2)?;
        Ok(Self {
            new_meta: endpoint.join("ws-new-meta")?,
            get_meta: endpoint.join("ws-meta")?,
            endpoint,
            http,
            chunk_size,
        })
    }

    pub async fn request(&self, request: RequestDescriptor) -> Result<BareResponse> {
        chunked_request(&self.http, &self.endpoint, self.chunk_size, request).await
    }

    pub async fn connect(
        &self,
        mut upgrade: UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<(WsStream, Handshake)> {
        let headers = upgrade.resolve_headers().await?;
        let target = split_headers(&remote_headers(&upgrade.remote, &headers)?, self.chunk_size)?;

        let assigned = send(self.http.get(self.new_meta.clone()).headers(target), cancel).await?;
        if !assigned.status().is_success() {
            return Err(read_error(assigned).await);
        }
        let id = assigned
            .text()
            .await
            .map_err(|e| Error::Connection(format!("failed to read tunnel id: {}", e)))?;

        let socket = open_socket(&self.endpoint.ws, std::slice::from_ref(&id), cancel).await?;
        debug!(id = %id, "v2 tunnel socket open");

        let meta = fetch_meta(self.http.clone(), self.get_meta.clone(), id).boxed();

        Ok((socket, Handshake::Fetched(meta)))
    }
}

/// The remote's handshake headers come back as `x-bare-*` response headers.
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

    let joined = join_headers(response.headers())?;
    let raw = match joined.get(X_BARE_HEADERS) {
        Some(value) => serde_json::from_slice::<BareHeaders>(value.as_bytes())
            .map_err(|e| Error::IntermediaryProtocol(format!("malformed x-bare-headers: {}", e)))?,
        None => BareHeaders::new(),
    };
    Ok(legacy_meta(&raw))
}

/// Request shape shared by every chunking generation.
pub(super) async fn chunked_request(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    chunk_size: usize,
    request: RequestDescriptor,
) -> Result<BareResponse> {
    let mut url = endpoint.http.clone();
    url.query_pairs_mut()
        .append_pair("cache", &content_key(&request.remote));

    let mut headers = split_headers(&remote_headers(&request.remote, &request.headers)?, chunk_size)?;
    for (name, value) in request.cache.directives() {
        headers.insert(*name, HeaderValue::from_static(*value));
    }

    let mut builder = http
        .request(request.method.clone(), url)
        .headers(headers);
    if let Some(body) = request.body.clone() {
        builder = builder.body(body);
    }

    let response = send(builder, &request.cancel).await?;
    read_response(response, &request.remote, true).await
}
