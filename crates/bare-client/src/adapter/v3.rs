// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use super::v2::chunked_request;
use super::{open_socket, Endpoint, WsStream};
use crate::request::{BareResponse, RequestDescriptor};
use crate::tunnel::{Handshake, UpgradeRequest};
use bare_core::Result;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Current wire format. Requests match v2; tunnels negotiate the remote
/// with control frames over the socket.
#[derive(Debug, Clone)]
pub struct V3Adapter {
    endpoint: Endpoint,
    http: reqwest::Client,
    chunk_size: usize,
}

impl V3Adapter {
    pub fn new(server: &Url, http: reqwest::Client, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(server, 3)?,
            http,
            chunk_size,
        })
    }

    pub async fn request(&self, request: RequestDescriptor) -> Result<BareResponse> {
        chunked_request(&self.http, &self.endpoint, self.chunk_size, request).await
    }

    /// Headers are resolved later by the tunnel, once this socket is open.
    pub async fn connect(
        &self,
        upgrade: UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<(WsStream, Handshake)> {
        let socket = open_socket(&self.endpoint.ws, &[], cancel).await?;
        Ok((socket, Handshake::Control(upgrade)))
    }
}
