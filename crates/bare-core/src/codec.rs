// Copyright (c) 2026 Roman Barinov <rbarinov@gmail.com>
// Licensed under the FSL-1.1-NC.

use crate::remote::RemoteTarget;
use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue};

/// Value length above which a header is split, matching deployed bare servers.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 3072;

/// Header families that may be split when oversized.
pub const CHUNKED_FAMILIES: &[&str] = &[crate::protocol::X_BARE_HEADERS];

/// Characters legal in a WebSocket subprotocol token.
const PROTOCOL_CHARS: &[u8] =
    b"!#$%&'*+-.0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ^_`abcdefghijklmnopqrstuvwxyz|~";

/// Splits `family` into `family-0`, `family-1`, ... when its value is longer
/// than `threshold` bytes. Every chunk is prefixed with `;`.
pub fn split_header(headers: &mut HeaderMap, family: &str, threshold: usize) -> Result<()> {
    let threshold = threshold.max(1);
    let Some(value) = headers.get(family) else {
        return Ok(());
    };
    if value.len() <= threshold {
        return Ok(());
    }

    let bytes = value.as_bytes().to_vec();
    headers.remove(family);

    for (id, part) in bytes.chunks(threshold).enumerate() {
        let name = HeaderName::from_bytes(format!("{}-{}", family, id).as_bytes())?;
        let mut chunk = Vec::with_capacity(part.len() + 1);
        chunk.push(b';');
        chunk.extend_from_slice(part);
        headers.insert(name, HeaderValue::from_bytes(&chunk)?);
    }

    Ok(())
}

/// Reassembles a family written by [`split_header`]. A map without a
/// `family-0` field is left untouched.
pub fn join_header(headers: &mut HeaderMap, family: &str) -> Result<()> {
    let first = format!("{}-0", family);
    if !headers.contains_key(first.as_str()) {
        return Ok(());
    }

    let prefix = format!("{}-", family);
    let mut parts: Vec<(usize, HeaderName, Vec<u8>)> = Vec::new();

    for (name, value) in headers.iter() {
        let Some(suffix) = name.as_str().strip_prefix(&prefix) else {
            continue;
        };
        let Ok(id) = suffix.parse::<usize>() else {
            continue;
        };
        let Some(data) = value.as_bytes().strip_prefix(b";") else {
            return Err(Error::IntermediaryProtocol(format!(
                "{} did not begin with a semicolon",
                name
            )));
        };
        parts.push((id, name.clone(), data.to_vec()));
    }

    parts.sort_by_key(|(id, _, _)| *id);
    for (expected, (id, name, _)) in parts.iter().enumerate() {
        if *id != expected {
            return Err(Error::IntermediaryProtocol(format!(
                "{} is out of sequence, expected chunk {}",
                name, expected
            )));
        }
    }

    let mut joined = Vec::new();
    for (_, name, data) in parts {
        headers.remove(name);
        joined.extend_from_slice(&data);
    }

    headers.insert(
        HeaderName::from_bytes(family.as_bytes())?,
        HeaderValue::from_bytes(&joined)?,
    );
    Ok(())
}

/// Applies [`split_header`] to every chunked family.
pub fn split_headers(headers: &HeaderMap, threshold: usize) -> Result<HeaderMap> {
    let mut output = headers.clone();
    for family in CHUNKED_FAMILIES {
        split_header(&mut output, family, threshold)?;
    }
    Ok(output)
}

/// Applies [`join_header`] to every chunked family.
pub fn join_headers(headers: &HeaderMap) -> Result<HeaderMap> {
    let mut output = headers.clone();
    for family in CHUNKED_FAMILIES {
        join_header(&mut output, family)?;
    }
    Ok(output)
}

/// Whether `protocol` is a legal WebSocket subprotocol token.
pub fn is_valid_protocol(protocol: &str) -> bool {
    !protocol.is_empty() && protocol.bytes().all(|b| PROTOCOL_CHARS.contains(&b))
}

pub fn encode_protocol(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        if b != b'%' && PROTOCOL_CHARS.contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02x}", b));
        }
    }
    out
}

pub fn decode_protocol(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hi = (bytes[i + 1] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (bytes[i + 2] as char).to_digit(16).unwrap_or(0) as u8;
            out.push(hi << 4 | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(out).map_err(|_| Error::InvalidSubprotocol(input.to_string()))
}

/// Cache-defeating digest of a remote, rendered as 32 hex characters.
pub fn content_key(remote: &RemoteTarget) -> String {
    format!("{:x}", md5::compute(remote.to_string().as_bytes()))
}
