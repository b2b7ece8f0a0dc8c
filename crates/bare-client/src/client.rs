// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use crate::adapter::Adapter;
use crate::config::Config;
use crate::request::{BareResponse, FetchInit, RedirectPolicy, RequestDescriptor};
use crate::selector::{self, AdapterKind};
use crate::tunnel::{BareWebSocket, HeaderSource, UpgradeRequest, WebSocketOptions};
use bare_core::codec::is_valid_protocol;
use bare_core::{host_header, Error, Manifest, RemoteTarget, Result, MAX_REDIRECTS};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

type InitFuture = Shared<BoxFuture<'static, Result<Arc<Ready>>>>;

struct Ready {
    manifest: Manifest,
    adapter: Arc<Adapter>,
}

#[derive(Default)]
struct ReadySlot {
    ready: Option<Arc<Ready>>,
    /// Attempt currently fetching the manifest, tagged with its generation.
    in_flight: Option<(u64, InitFuture)>,
    attempts: u64,
}

struct Inner {
    server: Url,
    versions: Vec<AdapterKind>,
    chunk_size: usize,
    http: reqwest::Client,
    slot: Mutex<ReadySlot>,
}

/// Client for one bare server.
///
/// The manifest is fetched lazily by the first operation that needs it.
/// Concurrent callers share that fetch; a failed fetch is not remembered.
#[derive(Clone)]
pub struct BareClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BareClient")
            .field("server", &self.inner.server.as_str())
            .field("versions", &self.inner.versions)
            .finish_non_exhaustive()
    }
}

impl BareClient {
    /// Builds a client without touching the network.
    pub fn new(config: &Config) -> Result<Self> {
        let mut server = Url::parse(&config.server.url)?;
        if !server.path().ends_with('/') {
            let path = format!("{}/", server.path());
            server.set_path(&path);
        }

        let versions = config.adapters();
        if versions.is_empty() {
            return Err(Error::UnsupportedVersion {
                minimum: AdapterKind::V1.tag().to_string(),
            });
        }

        Ok(Self {
            inner: Arc::new(Inner {
                server,
                versions,
                chunk_size: config.protocol.header_chunk_size,
                http: config.build_http_client()?,
                slot: Mutex::new(ReadySlot::default()),
            }),
        })
    }

    /// Builds a client around a manifest the caller already has. No manifest
    /// fetch ever happens.
    pub fn with_manifest(config: &Config, manifest: Manifest) -> Result<Self> {
        let client = Self::new(config)?;
        let ready = client.prepare(manifest)?;
        {
            let mut slot = client
                .inner
                .slot
                .try_lock()
                .map_err(|_| Error::ManifestFetch("client is already initializing".to_string()))?;
            slot.ready = Some(ready);
        }
        Ok(client)
    }

    /// Builds a client and initializes it right away.
    pub async fn connect(config: &Config, cancel: &CancellationToken) -> Result<Self> {
        let client = Self::new(config)?;
        client.ensure_ready(cancel).await?;
        Ok(client)
    }

    pub fn server(&self) -> &Url {
        &self.inner.server
    }

    /// Manifest of the server, if initialization already succeeded.
    pub async fn manifest(&self) -> Option<Manifest> {
        let slot = self.inner.slot.lock().await;
        slot.ready.as_ref().map(|r| r.manifest.clone())
    }

    /// Generation the client settled on, if initialization already succeeded.
    pub async fn adapter_kind(&self) -> Option<AdapterKind> {
        let slot = self.inner.slot.lock().await;
        slot.ready.as_ref().map(|r| r.adapter.kind())
    }

    fn prepare(&self, manifest: Manifest) -> Result<Arc<Ready>> {
        build_ready(
            &self.inner.server,
            &self.inner.versions,
            self.inner.http.clone(),
            self.inner.chunk_size,
            manifest,
        )
    }

    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<Arc<Adapter>> {
        let (generation, init) = {
            let mut slot = self.inner.slot.lock().await;
            if let Some(ready) = &slot.ready {
                return Ok(ready.adapter.clone());
            }
            // An attempt that already failed while nobody was waiting is stale.
            let stale = matches!(&slot.in_flight, Some((_, f)) if matches!(f.peek(), Some(Err(_))));
            match slot.in_flight.clone().filter(|_| !stale) {
                Some(in_flight) => in_flight,
                None => {
                    slot.attempts += 1;
                    let generation = slot.attempts;
                    let init = self.start_init(generation);
                    slot.in_flight = Some((generation, init.clone()));
                    (generation, init)
                }
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = init => result,
        };

        let mut slot = self.inner.slot.lock().await;
        if matches!(&slot.in_flight, Some((g, _)) if *g == generation) {
            slot.in_flight = None;
        }
        let ready = result?;
        Ok(slot.ready.get_or_insert(ready).adapter.clone())
    }

    fn start_init(&self, generation: u64) -> InitFuture {
        let inner = self.inner.clone();
        async move {
            debug!(generation, server = %inner.server, "fetching manifest");
            let manifest =
                fetch_manifest(&inner.http, &inner.server, &CancellationToken::new()).await;
            let manifest = match manifest {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Manifest fetch from {} failed: {}", inner.server, e);
                    return Err(e);
                }
            };
            build_ready(
                &inner.server,
                &inner.versions,
                inner.http.clone(),
                inner.chunk_size,
                manifest,
            )
        }
        .boxed()
        .shared()
    }

    /// Single exchange with the remote; redirects are returned, not followed.
    pub async fn request(&self, request: RequestDescriptor) -> Result<BareResponse> {
        if request.remote.is_local() {
            return Err(Error::LocalResource(request.remote.to_string()));
        }
        let adapter = self.ensure_ready(&request.cancel).await?;
        adapter.request(request).await
    }

    /// Fetches `url` through the bare server, following redirects per
    /// `init.redirect`.
    pub async fn fetch(&self, url: &str, init: FetchInit) -> Result<BareResponse> {
        self.fetch_url(Url::parse(url)?, init).await
    }

    pub async fn fetch_url(&self, url: Url, init: FetchInit) -> Result<BareResponse> {
        if RemoteTarget::from_url(&url)?.is_local() {
            return Err(Error::LocalResource(url.to_string()));
        }
        let cancel = init.cancel.clone().unwrap_or_default();
        let adapter = self.ensure_ready(&cancel).await?;

        let mut url = url;
        let mut headers = init.headers;
        let mut hops = 0;

        loop {
            if let Some(host) = host_header(&url) {
                headers.set("host", host);
            }

            let remote = RemoteTarget::from_url(&url)?;
            let descriptor = RequestDescriptor {
                method: init.method.clone(),
                headers: headers.clone(),
                body: init.body.clone(),
                remote,
                cache: init.cache,
                cancel: cancel.clone(),
            };

            let mut response = adapter.request(descriptor).await?;
            response.final_url = url.clone();

            if !response.is_redirect() {
                return Ok(response);
            }

            match init.redirect {
                RedirectPolicy::Manual => return Ok(response),
                RedirectPolicy::Error => {
                    return Err(Error::UnexpectedRedirect {
                        status: response.status,
                        url: url.to_string(),
                    })
                }
                RedirectPolicy::Follow => {}
            }

            let location = match response.location() {
                Some(location) if hops < MAX_REDIRECTS => location.to_string(),
                _ => return Err(Error::RedirectLimitExceeded(url.to_string())),
            };
            hops += 1;
            url = url.join(&location)?;
            debug!(hop = hops, to = %url, "following redirect");
        }
    }

    /// Opens a tunnel to `remote`. Everything that can be checked locally is
    /// checked before any network activity; the rest is reported through the
    /// returned handle.
    ///
    /// # Panics
    ///
    /// The tunnel is driven by a spawned task, so this panics when called
    /// outside a Tokio runtime. Invalid arguments are reported before that
    /// point and never panic.
    pub fn create_websocket_tunnel<P, S>(
        &self,
        remote: &str,
        protocols: P,
        headers: impl Into<HeaderSource>,
        options: WebSocketOptions,
    ) -> Result<BareWebSocket>
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let url = Url::parse(remote)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::InvalidRemote(format!(
                "{} is not a websocket url",
                remote
            )));
        }

        let protocols: Vec<String> = protocols.into_iter().map(Into::into).collect();
        if let Some(bad) = protocols.iter().find(|p| !is_valid_protocol(p)) {
            return Err(Error::InvalidSubprotocol(bad.clone()));
        }

        let upgrade = UpgradeRequest::new(url.clone(), protocols, headers.into())?;
        let client = self.clone();
        Ok(BareWebSocket::spawn(url, options, move |cancel| async move {
            let adapter = client.ensure_ready(&cancel).await?;
            adapter.connect(upgrade, &cancel).await
        }))
    }
}

fn build_ready(
    server: &Url,
    versions: &[AdapterKind],
    http: reqwest::Client,
    chunk_size: usize,
    manifest: Manifest,
) -> Result<Arc<Ready>> {
    let kind = selector::select(versions, &manifest)?;
    let adapter = Adapter::new(kind, server, http, chunk_size)?;
    info!(
        "Using bare protocol {} with {} (offered {:?})",
        kind.tag(),
        server,
        manifest.versions
    );
    Ok(Arc::new(Ready {
        manifest,
        adapter: Arc::new(adapter),
    }))
}

/// Reads the manifest at the root of `server`.
pub async fn fetch_manifest(
    http: &reqwest::Client,
    server: &Url,
    cancel: &CancellationToken,
) -> Result<Manifest> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        result = http.get(server.clone()).send() => result
            .map_err(|e| Error::ManifestFetch(format!("{} unreachable: {}", server, e)))?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(Error::ManifestFetch(format!(
            "{} answered {}",
            server,
            status.canonical_reason().unwrap_or(status.as_str())
        )));
    }

    response
        .json::<Manifest>()
        .await
        .map_err(|e| Error::ManifestFetch(format!("malformed manifest: {}", e)))
}
