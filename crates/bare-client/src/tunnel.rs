// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

//! Emulated WebSocket connection to a remote, carried over one real socket to
//! the bare server.
//!
//! The handle owns its own view of the connection state. While the socket to
//! the bare server is up but the remote has not confirmed, callers see
//! [`ReadyState::Connecting`]; the open event is only emitted once the remote
//! handshake finished.

use bare_core::{
    host_header, BareHeaders, ClientFrame, ConnectMessage, Error, RemoteTarget, Result,
    ServerFrame, WebSocketMeta,
};
use futures::future::BoxFuture;
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Headers for the remote handshake, either known up front or produced once
/// the socket to the bare server is open (late-bound cookies, for example).
pub enum HeaderSource {
    Static(BareHeaders),
    Provider(Box<dyn FnOnce() -> BoxFuture<'static, Result<BareHeaders>> + Send>),
}

impl HeaderSource {
    pub fn provider<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<BareHeaders>> + Send + 'static,
    {
        HeaderSource::Provider(Box::new(move || f().boxed()))
    }

    pub async fn resolve(self) -> Result<BareHeaders> {
        match self {
            HeaderSource::Static(headers) => Ok(headers),
            HeaderSource::Provider(provider) => provider().await,
        }
    }
}

impl Default for HeaderSource {
    fn default() -> Self {
        HeaderSource::Static(BareHeaders::new())
    }
}

impl From<BareHeaders> for HeaderSource {
    fn from(headers: BareHeaders) -> Self {
        HeaderSource::Static(headers)
    }
}

impl std::fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderSource::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            HeaderSource::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Everything an adapter needs to reach a WebSocket remote.
#[derive(Debug)]
pub struct UpgradeRequest {
    pub remote: RemoteTarget,
    pub url: Url,
    pub protocols: Vec<String>,
    pub headers: HeaderSource,
}

impl UpgradeRequest {
    pub fn new(url: Url, protocols: Vec<String>, headers: HeaderSource) -> Result<Self> {
        Ok(Self {
            remote: RemoteTarget::from_url(&url)?,
            url,
            protocols,
            headers,
        })
    }

    /// Resolves the caller's headers and adds the upgrade headers a browser
    /// would send to the remote.
    pub async fn resolve_headers(&mut self) -> Result<BareHeaders> {
        let mut headers = std::mem::take(&mut self.headers).resolve().await?;

        if let Some(host) = host_header(&self.url) {
            headers.set("Host", host);
        }
        headers.set("Pragma", "no-cache");
        headers.set("Cache-Control", "no-cache");
        headers.set("Upgrade", "websocket");
        headers.set("Connection", "Upgrade");
        if !self.protocols.is_empty() {
            headers.set("Sec-WebSocket-Protocol", self.protocols.join(", "));
        }

        Ok(headers)
    }
}

/// How the remote handshake completes once the socket to the bare server is
/// up.
pub enum Handshake {
    /// Newest wire format: one connect/open control frame exchange over the
    /// socket itself.
    Control(UpgradeRequest),
    /// Older wire formats: the socket already reaches the remote; metadata is
    /// fetched out of band.
    Fetched(BoxFuture<'static, Result<WebSocketMeta>>),
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handshake::Control(upgrade) => f.debug_tuple("Control").field(upgrade).finish(),
            Handshake::Fetched(_) => f.write_str("Fetched(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    ConnectingToIntermediary,
    AwaitingRemoteOpen,
    Open,
    Closed,
}

/// State as a caller of a plain WebSocket would observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

#[derive(Debug)]
pub enum TunnelEvent {
    Open(WebSocketMeta),
    Message(Message),
    Error(Error),
    Close(Option<CloseFrame<'static>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The tunnel is closing or closed; nothing was sent.
    Discarded,
}

type CookieCallback = Box<dyn Fn(&[String]) + Send + Sync>;

#[derive(Default)]
pub struct WebSocketOptions {
    /// Called once with the cookies the remote set during its handshake.
    pub on_set_cookies: Option<CookieCallback>,
}

impl std::fmt::Debug for WebSocketOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketOptions")
            .field("on_set_cookies", &self.on_set_cookies.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct Status {
    state: TunnelState,
    closing: bool,
    meta: Option<WebSocketMeta>,
    error: Option<Error>,
}

impl Status {
    fn ready_state(&self) -> ReadyState {
        match self.state {
            TunnelState::Closed => ReadyState::Closed,
            _ if self.closing => ReadyState::Closing,
            TunnelState::Open => ReadyState::Open,
            _ => ReadyState::Connecting,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: TunnelState::Idle,
            closing: false,
            meta: None,
            error: None,
        }
    }
}

enum Outbound {
    Frame(Message),
    Close(Option<CloseFrame<'static>>),
}

/// Caller-facing handle of a tunnel.
pub struct BareWebSocket {
    url: Url,
    status: Arc<watch::Sender<Status>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TunnelEvent>,
    cancel: CancellationToken,
}

impl BareWebSocket {
    /// Starts the tunnel in the background. `connect` receives the tunnel's
    /// cancellation token and yields the socket to the bare server together
    /// with the handshake to run on it.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn<C, F, S>(url: Url, options: WebSocketOptions, connect: C) -> Self
    where
        C: FnOnce(CancellationToken) -> F,
        F: Future<Output = Result<(S, Handshake)>> + Send + 'static,
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(Status::default());
        let status = Arc::new(status);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            url: url.clone(),
            status: status.clone(),
            events: events_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            options,
        };
        tokio::spawn(driver.run(connect(cancel.clone())));

        Self {
            url,
            status,
            outbound: outbound_tx,
            events: events_rx,
            cancel,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.status.borrow().ready_state()
    }

    pub fn state(&self) -> TunnelState {
        self.status.borrow().state
    }

    /// Subprotocol the remote selected; empty until the tunnel is open.
    pub fn protocol(&self) -> String {
        self.status
            .borrow()
            .meta
            .as_ref()
            .map(|m| m.protocol.clone())
            .unwrap_or_default()
    }

    /// Waits for the remote handshake and returns what it negotiated.
    pub async fn meta(&self) -> Result<WebSocketMeta> {
        let mut rx = self.status.subscribe();
        let status = rx
            .wait_for(|s| s.meta.is_some() || s.state == TunnelState::Closed)
            .await
            .map_err(|_| Error::HandshakeIncomplete)?;

        match (&status.meta, &status.error) {
            (Some(meta), _) => Ok(meta.clone()),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Err(Error::HandshakeIncomplete),
        }
    }

    pub fn send(&self, message: Message) -> Result<SendOutcome> {
        match self.ready_state() {
            ReadyState::Connecting => Err(Error::SendWhileConnecting),
            ReadyState::Closing | ReadyState::Closed => {
                warn!("Discarding send on closed websocket tunnel to {}", self.url);
                Ok(SendOutcome::Discarded)
            }
            ReadyState::Open => match self.outbound.send(Outbound::Frame(message)) {
                Ok(()) => Ok(SendOutcome::Queued),
                Err(_) => {
                    warn!("Discarding send on finished websocket tunnel to {}", self.url);
                    Ok(SendOutcome::Discarded)
                }
            },
        }
    }

    pub fn close(&self, frame: Option<CloseFrame<'static>>) {
        let state = self.state();
        if state == TunnelState::Closed {
            return;
        }
        self.status.send_modify(|s| s.closing = true);

        if state == TunnelState::Open {
            let _ = self.outbound.send(Outbound::Close(frame));
        } else {
            self.cancel.cancel();
        }
    }

    /// Next event from the tunnel, `None` once the driver is gone.
    pub async fn recv(&mut self) -> Option<TunnelEvent> {
        self.events.recv().await
    }
}

impl std::fmt::Debug for BareWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BareWebSocket")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for BareWebSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    url: Url,
    status: Arc<watch::Sender<Status>>,
    events: mpsc::UnboundedSender<TunnelEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
    options: WebSocketOptions,
}

impl Driver {
    fn transition(&self, state: TunnelState) {
        self.status.send_modify(|s| s.state = state);
        debug!(url = %self.url, ?state, "tunnel state changed");
    }

    fn closing(&self) -> bool {
        self.status.borrow().closing
    }

    fn fail(&self, error: Error) {
        if self.closing() && matches!(error, Error::Cancelled) {
            return self.finish(None);
        }
        warn!("WebSocket tunnel to {} failed: {}", self.url, error);
        self.status.send_modify(|s| {
            s.state = TunnelState::Closed;
            s.error = Some(error.clone());
        });
        let _ = self.events.send(TunnelEvent::Error(error));
        let _ = self.events.send(TunnelEvent::Close(None));
    }

    fn finish(&self, frame: Option<CloseFrame<'static>>) {
        self.transition(TunnelState::Closed);
        let _ = self.events.send(TunnelEvent::Close(frame));
    }

    async fn run<F, S>(self, connect: F)
    where
        F: Future<Output = Result<(S, Handshake)>>,
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        self.transition(TunnelState::ConnectingToIntermediary);

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = connect => result,
        };
        let (mut socket, handshake) = match connected {
            Ok(connected) => connected,
            Err(e) => return self.fail(e),
        };

        self.transition(TunnelState::AwaitingRemoteOpen);

        let meta = match self.handshake(&mut socket, handshake).await {
            Ok(meta) => meta,
            Err(e) => {
                let _ = socket.close().await;
                return self.fail(e);
            }
        };

        if let Some(callback) = &self.options.on_set_cookies {
            if !meta.set_cookies.is_empty() {
                callback(&meta.set_cookies);
            }
        }

        self.status.send_modify(|s| {
            s.state = TunnelState::Open;
            s.meta = Some(meta.clone());
        });
        info!("WebSocket tunnel to {} open (protocol {:?})", self.url, meta.protocol);
        let _ = self.events.send(TunnelEvent::Open(meta));

        self.pump(socket).await;
    }

    async fn handshake<S>(&self, socket: &mut S, handshake: Handshake) -> Result<WebSocketMeta>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        let mut upgrade = match handshake {
            Handshake::Fetched(meta) => {
                return tokio::select! {
                    _ = self.cancel.cancelled() => Err(Error::Cancelled),
                    meta = meta => meta,
                };
            }
            Handshake::Control(upgrade) => upgrade,
        };

        let headers = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            headers = upgrade.resolve_headers() => headers?,
        };

        let frame = ClientFrame::Connect(ConnectMessage {
            to: upgrade.url.to_string(),
            headers,
            forward_headers: Vec::new(),
        });
        debug!(url = %self.url, frame = frame.frame_type(), "sending control frame");
        socket
            .send(Message::Text(serde_json::to_string(&frame)?))
            .await
            .map_err(|e| {
                debug!(url = %self.url, error = %e, "socket failed before the connect frame went out");
                Error::HandshakeIncomplete
            })?;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                next = socket.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    let ServerFrame::Open(meta) = serde_json::from_str::<ServerFrame>(&text).map_err(|e| {
                        Error::HandshakeProtocol(format!("invalid open message: {}", e))
                    })?;
                    return Ok(meta);
                }
                Some(Ok(Message::Binary(_))) => {
                    return Err(Error::HandshakeProtocol(
                        "the first websocket message was not a text frame".to_string(),
                    ));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(Error::HandshakeIncomplete),
                Some(Err(e)) => {
                    debug!(url = %self.url, error = %e, "socket failed during handshake");
                    return Err(Error::HandshakeIncomplete);
                }
            }
        }
    }

    async fn pump<S>(mut self, mut socket: S)
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = socket.close().await;
                    return self.finish(None);
                }
                inbound = socket.next() => match inbound {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        let _ = self.events.send(TunnelEvent::Message(message));
                    }
                    Some(Ok(Message::Close(frame))) => return self.finish(frame),
                    Some(Ok(_)) => {}
                    Some(Err(_)) if self.closing() => return self.finish(None),
                    Some(Err(e)) => return self.fail(Error::Connection(e.to_string())),
                    None => return self.finish(None),
                },
                outbound = self.outbound.recv() => match outbound {
                    Some(Outbound::Frame(message)) => {
                        if let Err(e) = socket.send(message).await {
                            return self.fail(Error::Connection(e.to_string()));
                        }
                    }
                    Some(Outbound::Close(frame)) => {
                        if socket.send(Message::Close(frame)).await.is_err() {
                            return self.finish(None);
                        }
                    }
                    None => {
                        let _ = socket.close().await;
                        return self.finish(None);
                    }
                },
            }
        }
    }
}
