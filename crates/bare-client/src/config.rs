// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use crate::selector::AdapterKind;
use bare_core::codec::DEFAULT_CHUNK_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Adapters the client offers, newest first.
    #[serde(default = "default_versions")]
    pub versions: Vec<String>,
    #[serde(default = "default_header_chunk_size")]
    pub header_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_versions() -> Vec<String> {
    AdapterKind::ALL.iter().map(|k| k.tag().to_string()).collect()
}

fn default_header_chunk_size() -> usize {
    DEFAULT_CHUNK_THRESHOLD
}

fn default_timeout() -> u64 {
    30
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            versions: default_versions(),
            header_chunk_size: default_header_chunk_size(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl Config {
    pub fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = Self::read(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// File and environment layers without validation, for callers that
    /// still have overrides of their own to apply.
    pub fn read(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn with_server(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.server.url = url.into();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BARE_SERVER_URL") {
            self.server.url = val;
        }
        if let Ok(val) = env::var("BARE_VERSIONS") {
            self.protocol.versions = val
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("BARE_HEADER_CHUNK_SIZE") {
            if let Ok(size) = val.parse() {
                self.protocol.header_chunk_size = size;
            }
        }
        if let Ok(val) = env::var("BARE_USER_AGENT") {
            self.http.user_agent = Some(val);
        }
        if let Ok(val) = env::var("BARE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.http.timeout_secs = secs;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.url.is_empty() {
            anyhow::bail!("BARE_SERVER_URL is required");
        }
        Url::parse(&self.server.url)
            .map_err(|e| anyhow::anyhow!("BARE_SERVER_URL is not a valid url: {}", e))?;
        if self.protocol.versions.is_empty() {
            anyhow::bail!("at least one protocol version is required");
        }
        for version in &self.protocol.versions {
            if AdapterKind::from_tag(version).is_none() {
                anyhow::bail!("unknown protocol version: {}", version);
            }
        }
        if self.protocol.header_chunk_size == 0 {
            anyhow::bail!("BARE_HEADER_CHUNK_SIZE must be greater than zero");
        }
        Ok(())
    }

    /// Registered adapters in the configured order. Unknown tags are skipped.
    pub fn adapters(&self) -> Vec<AdapterKind> {
        self.protocol
            .versions
            .iter()
            .filter_map(|v| AdapterKind::from_tag(v))
            .collect()
    }

    pub fn build_http_client(&self) -> bare_core::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.http.timeout_secs))
            .redirect(reqwest::redirect::Policy::none());
        if let Some(agent) = &self.http.user_agent {
            builder = builder.user_agent(agent);
        }
        builder
            .build()
            .map_err(|e| bare_core::Error::Connection(format!("failed to build http client: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { url: String::new() },
            protocol: ProtocolConfig::default(),
            http: HttpConfig::default(),
        }
    }
}
