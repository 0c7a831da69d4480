//! Structural check of a safetensors container.
//!
//! Layout: an 8-byte little-endian `u64` header length `N`, then `N` bytes
//! of a UTF-8 JSON object describing every tensor, then the raw tensor
//! data. Only the length prefix and the header are read; tensor data is
//! never loaded.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::io::AsyncReadExt;

/// Upper bound on the JSON header length.
pub const MAX_HEADER_BYTES: u64 = 100 * 1024 * 1024;

/// Key reserved for free-form string metadata inside the header.
const METADATA_KEY: &str = "__metadata__";

/// Summary of a parsed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetensorsHeader {
    pub header_len: u64,
    pub tensor_count: usize,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("failed to read header: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is {0} bytes, too short for a header length prefix")]
    TooShort(u64),

    #[error("header length {header_len} is invalid for a {file_len}-byte file")]
    BadLength { header_len: u64, file_len: u64 },

    #[error("header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("header is not a JSON object")]
    NotAnObject,

    #[error("tensor '{name}' is malformed: {reason}")]
    BadTensor { name: String, reason: String },
}

/// Read and validate the header of the file at `path`.
pub async fn read_header(path: &Path) -> Result<SafetensorsHeader, HeaderError> {
    let mut file = tokio::fs::File::open(path).await?;
    let file_len = file.metadata().await?.len();
    if file_len < 8 {
        return Err(HeaderError::TooShort(file_len));
    }

    let mut prefix = [0u8; 8];
    file.read_exact(&mut prefix).await?;
    let header_len = u64::from_le_bytes(prefix);
    check_header_len(header_len, file_len)?;

    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header).await?;

    parse_header(&header, file_len - 8 - header_len).map(|(tensor_count, metadata)| {
        SafetensorsHeader {
            header_len,
            tensor_count,
            metadata,
        }
    })
}

/// Validate a header that is already in memory.
pub fn parse_bytes(bytes: &[u8]) -> Result<SafetensorsHeader, HeaderError> {
    let file_len = bytes.len() as u64;
    if file_len < 8 {
        return Err(HeaderError::TooShort(file_len));
    }
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&bytes[..8]);
    let header_len = u64::from_le_bytes(prefix);
    check_header_len(header_len, file_len)?;

    let header = &bytes[8..8 + header_len as usize];
    parse_header(header, file_len - 8 - header_len).map(|(tensor_count, metadata)| {
        SafetensorsHeader {
            header_len,
            tensor_count,
            metadata,
        }
    })
}

fn check_header_len(header_len: u64, file_len: u64) -> Result<(), HeaderError> {
    if header_len == 0 || header_len > MAX_HEADER_BYTES || header_len > file_len - 8 {
        return Err(HeaderError::BadLength {
            header_len,
            file_len,
        });
    }
    Ok(())
}

fn parse_header(
    header: &[u8],
    data_len: u64,
) -> Result<(usize, BTreeMap<String, String>), HeaderError> {
    let value: serde_json::Value = serde_json::from_slice(header)?;
    let obj = value.as_object().ok_or(HeaderError::NotAnObject)?;

    let mut metadata = BTreeMap::new();
    let mut tensor_count = 0;

    for (name, entry) in obj {
        if name == METADATA_KEY {
            if let Some(meta) = entry.as_object() {
                for (k, v) in meta {
                    if let Some(s) = v.as_str() {
                        metadata.insert(k.clone(), s.to_string());
                    }
                }
            }
            continue;
        }
        check_tensor(name, entry, data_len)?;
        tensor_count += 1;
    }

    Ok((tensor_count, metadata))
}

fn check_tensor(name: &str, entry: &serde_json::Value, data_len: u64) -> Result<(), HeaderError> {
    let bad = |reason: &str| HeaderError::BadTensor {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if !entry.get("dtype").is_some_and(|d| d.is_string()) {
        return Err(bad("missing dtype"));
    }
    if !entry.get("shape").is_some_and(|s| s.is_array()) {
        return Err(bad("missing shape"));
    }

    let offsets = entry
        .get("data_offsets")
        .and_then(|o| o.as_array())
        .ok_or_else(|| bad("missing data_offsets"))?;
    let (begin, end) = match offsets.as_slice() {
        [b, e] => (
            b.as_u64().ok_or_else(|| bad("non-integer offset"))?,
            e.as_u64().ok_or_else(|| bad("non-integer offset"))?,
        ),
        _ => return Err(bad("data_offsets must have two elements")),
    };
    if begin > end || end > data_len {
        return Err(bad(&format!(
            "offsets [{begin}, {end}] fall outside {data_len} data bytes"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
