// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use bare_core::{Error, Manifest, Result};

/// One wire protocol generation the client can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    V3,
    V2,
    V1,
}

impl AdapterKind {
    /// Every supported generation, newest first.
    pub const ALL: [AdapterKind; 3] = [AdapterKind::V3, AdapterKind::V2, AdapterKind::V1];

    pub fn tag(&self) -> &'static str {
        match self {
            AdapterKind::V3 => "v3",
            AdapterKind::V2 => "v2",
            AdapterKind::V1 => "v1",
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            AdapterKind::V3 => 3,
            AdapterKind::V2 => 2,
            AdapterKind::V1 => 1,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

/// Picks the first registered adapter the manifest advertises.
///
/// `registered` is walked in order, so listing newest first guarantees a
/// modern server is never downgraded.
pub fn select(registered: &[AdapterKind], manifest: &Manifest) -> Result<AdapterKind> {
    registered
        .iter()
        .copied()
        .find(|kind| manifest.supports(kind.tag()))
        .ok_or_else(|| Error::UnsupportedVersion {
            minimum: registered
                .iter()
                .min_by_key(|kind| kind.version())
                .map(|kind| kind.tag())
                .unwrap_or("v1")
                .to_string(),
        })
}
