// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use bare_client::config::Config;
use bare_client::BareClient;
use bare_core::codec::{decode_protocol, join_headers, split_headers, DEFAULT_CHUNK_THRESHOLD};
use bare_core::{BareHeaders, LegacyConnectMeta, Manifest, X_BARE_HEADERS, X_BARE_ID};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// One request the mock received on a versioned endpoint, as the remote
/// would have seen it.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub version: u8,
    pub method: Method,
    pub protocol: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BareHeaders,
    pub forward_headers: Vec<String>,
    pub transport: HeaderMap,
}

#[derive(Default)]
pub struct MockState {
    pub versions: Mutex<Vec<String>>,
    pub manifest_hits: AtomicUsize,
    /// Manifest requests left to answer with a 500.
    pub fail_manifest: AtomicUsize,
    pub manifest_delay_ms: AtomicU64,
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub connect_frames: Mutex<Vec<serde_json::Value>>,
    pub socket_hits: AtomicUsize,
    pub hold_open: AtomicBool,
    pub release_open: Notify,
    pub binary_first: AtomicBool,
    /// Bare headers of pending legacy tunnels, by id.
    pending: Mutex<HashMap<String, BareHeaders>>,
}

impl MockState {
    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn network_hits(&self) -> usize {
        self.manifest_hits.load(Ordering::SeqCst)
            + self.requests.lock().unwrap().len()
            + self.socket_hits.load(Ordering::SeqCst)
    }
}

pub struct MockBare {
    pub port: u16,
    pub state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockBare {
    pub async fn start(versions: &[&str]) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "bare_client=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let state = Arc::new(MockState::default());
        *state.versions.lock().unwrap() = versions.iter().map(|v| v.to_string()).collect();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let app = Router::new()
            .route("/", get(manifest))
            .route("/v1/", any(v1_endpoint))
            .route("/v2/", any(v2_endpoint))
            .route("/v3/", any(v3_endpoint))
            .route("/v1/ws-new-meta", get(v1_new_meta))
            .route("/v1/ws-meta", get(v1_meta))
            .route("/v2/ws-new-meta", get(v2_new_meta))
            .route("/v2/ws-meta", get(v2_meta))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Mock bare server error: {}", e);
            }
        });

        Self {
            port,
            state,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    #[allow(dead_code)]
    pub fn config(&self) -> Config {
        Config::with_server(self.url())
    }

    pub fn client(&self) -> BareClient {
        BareClient::new(&self.config()).unwrap()
    }

    #[allow(dead_code)]
    pub fn client_with(&self, versions: &[&str]) -> BareClient {
        let mut config = self.config();
        config.protocol.versions = versions.iter().map(|v| v.to_string()).collect();
        BareClient::new(&config).unwrap()
    }

    /// Waits until the mock saw `count` control frames.
    #[allow(dead_code)]
    pub async fn wait_for_connect_frames(&self, count: usize) {
        for _ in 0..200 {
            if self.state.connect_frames.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock never received {} connect frames", count);
    }
}

async fn manifest(State(state): State<Arc<MockState>>) -> Response {
    state.manifest_hits.fetch_add(1, Ordering::SeqCst);

    let delay = state.manifest_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let failing = state
        .fail_manifest
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "manifest unavailable").into_response();
    }

    let versions = state.versions.lock().unwrap().clone();
    let mut manifest = Manifest::new(versions);
    manifest.language = Some("Rust".to_string());
    Json(manifest).into_response()
}

fn text(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn record(state: &MockState, version: u8, method: Method, uri: &Uri, headers: &HeaderMap) -> RecordedRequest {
    let joined = join_headers(headers).unwrap();
    let forward_headers = joined
        .get_all("x-bare-forward-headers")
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();

    let request = RecordedRequest {
        version,
        method,
        protocol: text(&joined, "x-bare-protocol"),
        host: text(&joined, "x-bare-host"),
        port: text(&joined, "x-bare-port"),
        path: text(&joined, "x-bare-path"),
        query: uri.query().map(str::to_string),
        headers: serde_json::from_str(&text(&joined, X_BARE_HEADERS)).unwrap_or_default(),
        forward_headers,
        transport: headers.clone(),
    };
    state.requests.lock().unwrap().push(request.clone());
    request
}

fn bare_response(version: u8, status: u16, status_text: &str, raw: &BareHeaders, body: Bytes) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("x-bare-status", HeaderValue::from(status));
    headers.insert("x-bare-status-text", HeaderValue::from_str(status_text).unwrap());
    headers.insert(
        X_BARE_HEADERS,
        HeaderValue::from_str(&serde_json::to_string(raw).unwrap()).unwrap(),
    );
    if version > 1 {
        headers = split_headers(&headers, DEFAULT_CHUNK_THRESHOLD).unwrap();
    }
    (StatusCode::OK, headers, body).into_response()
}

/// Plays the remote for whatever the request names in `x-bare-path`.
fn remote_response(version: u8, request: &RecordedRequest, body: Bytes) -> Response {
    let mut raw = BareHeaders::new();
    raw.set("Content-Type", "text/plain");

    let route = request.path.split('?').next().unwrap_or_default();
    match route {
        "/x" | "/loop" => {
            let to = if route == "/x" { "/b" } else { "/loop" };
            raw.set("Location", to);
            bare_response(version, 302, "Found", &raw, Bytes::new())
        }
        "/b" => bare_response(version, 200, "OK", &raw, Bytes::from_static(b"arrived")),
        "/echo-headers" => {
            raw.set("Content-Type", "application/json");
            let echoed = serde_json::to_vec(&request.headers).unwrap();
            bare_response(version, 200, "OK", &raw, Bytes::from(echoed))
        }
        "/echo-body" => bare_response(version, 200, "OK", &raw, body),
        "/empty" => bare_response(version, 204, "No Content", &raw, Bytes::new()),
        "/big" => {
            raw.set("X-Big", "b".repeat(5000));
            bare_response(version, 200, "OK", &raw, Bytes::from_static(b"big"))
        }
        "/missing" => (StatusCode::OK, "no bare headers here").into_response(),
        "/error" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "code": "UNKNOWN",
                "id": "request.remote",
                "message": "remote exploded"
            })),
        )
            .into_response(),
        "/garbage-error" => (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response(),
        other => bare_response(version, 200, "OK", &raw, Bytes::from(other.to_string())),
    }
}

async fn v1_endpoint(
    State(state): State<Arc<MockState>>,
    ws: Option<WebSocketUpgrade>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(ws) = ws else {
        let request = record(&state, 1, method, &uri, &headers);
        return remote_response(1, &request, body);
    };

    state.socket_hits.fetch_add(1, Ordering::SeqCst);
    let offered = text(&headers, "sec-websocket-protocol");
    let descriptor = offered
        .split(',')
        .map(str::trim)
        .nth(1)
        .and_then(|p| decode_protocol(p).ok())
        .and_then(|json| serde_json::from_str::<LegacyConnectMeta>(&json).ok());
    let Some(descriptor) = descriptor else {
        return (StatusCode::BAD_REQUEST, "missing descriptor").into_response();
    };
    if let Some(id) = descriptor.id.clone() {
        state.pending.lock().unwrap().insert(id, descriptor.headers);
    }

    ws.protocols(["bare"])
        .on_upgrade(move |socket| echo(socket))
}

async fn v1_new_meta(State(state): State<Arc<MockState>>) -> String {
    state.socket_hits.fetch_add(1, Ordering::SeqCst);
    format!("{:x}", rand::random::<u64>())
}

fn remote_protocol(requested: &BareHeaders) -> String {
    requested
        .get_first("sec-websocket-protocol")
        .and_then(|p| p.split(',').next())
        .map(|p| p.trim().to_string())
        .unwrap_or_default()
}

async fn v1_meta(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let id = text(&headers, X_BARE_ID);
    let Some(requested) = state.pending.lock().unwrap().remove(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"code": "INVALID_BARE_HEADER", "id": "request.headers.x-bare-id"})),
        )
            .into_response();
    };

    let mut raw = BareHeaders::new();
    raw.set("Sec-WebSocket-Protocol", remote_protocol(&requested));
    raw.set("Set-Cookie", "legacy=1");
    Json(serde_json::json!({ "headers": raw })).into_response()
}

async fn v2_endpoint(
    State(state): State<Arc<MockState>>,
    ws: Option<WebSocketUpgrade>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(ws) = ws else {
        let request = record(&state, 2, method, &uri, &headers);
        return remote_response(2, &request, body);
    };

    state.socket_hits.fetch_add(1, Ordering::SeqCst);
    let id = text(&headers, "sec-websocket-protocol");
    if !state.pending.lock().unwrap().contains_key(&id) {
        return (StatusCode::BAD_REQUEST, "unknown tunnel id").into_response();
    }
    ws.protocols([id]).on_upgrade(move |socket| echo(socket))
}

async fn v2_new_meta(State(state): State<Arc<MockState>>, headers: HeaderMap) -> String {
    state.socket_hits.fetch_add(1, Ordering::SeqCst);
    let joined = join_headers(&headers).unwrap();
    let requested: BareHeaders =
        serde_json::from_str(&text(&joined, X_BARE_HEADERS)).unwrap_or_default();

    let id = format!("{:x}", rand::random::<u64>());
    state.pending.lock().unwrap().insert(id.clone(), requested);
    id
}

async fn v2_meta(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let id = text(&headers, X_BARE_ID);
    let Some(requested) = state.pending.lock().unwrap().remove(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"code": "INVALID_BARE_HEADER", "id": "request.headers.x-bare-id"})),
        )
            .into_response();
    };

    let mut raw = BareHeaders::new();
    raw.set("Sec-WebSocket-Protocol", remote_protocol(&requested));
    bare_response(2, 101, "Switching Protocols", &raw, Bytes::new())
}

async fn v3_endpoint(
    State(state): State<Arc<MockState>>,
    ws: Option<WebSocketUpgrade>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(ws) = ws else {
        let request = record(&state, 3, method, &uri, &headers);
        return remote_response(3, &request, body);
    };

    state.socket_hits.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| v3_socket(state, socket))
}

async fn v3_socket(state: Arc<MockState>, mut socket: WebSocket) {
    let Some(Ok(Message::Text(first))) = socket.recv().await else {
        return;
    };
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(&first) else {
        return;
    };
    let protocol = frame["headers"]["Sec-WebSocket-Protocol"]
        .as_str()
        .and_then(|p| p.split(',').next())
        .map(|p| p.trim().to_string())
        .unwrap_or_default();
    state.connect_frames.lock().unwrap().push(frame);

    if state.binary_first.load(Ordering::SeqCst) {
        let _ = socket.send(Message::Binary(vec![0xde, 0xad])).await;
        return;
    }
    if state.hold_open.load(Ordering::SeqCst) {
        state.release_open.notified().await;
    }

    let open = serde_json::json!({
        "type": "open",
        "protocol": protocol,
        "setCookies": ["session=abc; Path=/"],
    });
    if socket.send(Message::Text(open.to_string())).await.is_err() {
        return;
    }
    echo(socket).await;
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(message).await.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}
