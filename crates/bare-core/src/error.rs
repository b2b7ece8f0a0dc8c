// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use crate::protocol::BareErrorBody;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the client surfaces.
///
/// The enum is `Clone` so that a single failed manifest fetch can be handed to
/// every caller that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid remote: {0}")]
    InvalidRemote(String),

    #[error("{0} is a local resource and is never fetched through the bare server")]
    LocalResource(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("unable to fetch bare manifest: {0}")]
    ManifestFetch(String),

    #[error("bare server does not support this client (requires at least {minimum})")]
    UnsupportedVersion { minimum: String },

    #[error("bare server protocol violation: {0}")]
    IntermediaryProtocol(String),

    #[error("bare server error {status}: {}", .body.message.as_deref().unwrap_or(.body.code.as_str()))]
    Bare { status: u16, body: BareErrorBody },

    #[error("redirect limit exceeded at {0}")]
    RedirectLimitExceeded(String),

    #[error("redirect from {url} (status {status}) while redirects are disallowed")]
    UnexpectedRedirect { status: u16, url: String },

    #[error("the subprotocol '{0}' is invalid")]
    InvalidSubprotocol(String),

    #[error("websocket handshake protocol error: {0}")]
    HandshakeProtocol(String),

    #[error("websocket closed before the handshake could be completed")]
    HandshakeIncomplete,

    #[error("cannot send while the websocket is still connecting")]
    SendWhileConnecting,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidHeader(e.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        Error::InvalidHeader(e.to_string())
    }
}

impl Error {
    /// True when the intermediary itself reported or caused the failure, as
    /// opposed to the caller or the local transport.
    pub fn is_intermediary(&self) -> bool {
        matches!(
            self,
            Error::Bare { .. } | Error::IntermediaryProtocol(_) | Error::ManifestFetch(_)
        )
    }
}
