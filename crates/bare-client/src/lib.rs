// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

pub mod adapter;
pub mod client;
pub mod config;
pub mod request;
pub mod selector;
pub mod tunnel;

pub use client::{fetch_manifest, BareClient};
pub use request::{BareResponse, CacheMode, FetchInit, RedirectPolicy};
pub use tunnel::{BareWebSocket, HeaderSource, ReadyState, SendOutcome, TunnelEvent, WebSocketOptions};
