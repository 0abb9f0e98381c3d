//! # Metadata Utilities
//!
//! Helpers for turning `"name: value"` header strings into a tonic
//! [`MetadataMap`], for expanding `${NAME}` templates inside header values,
//! and for rendering metadata back into text.
//!
//! Header names ending in `-bin` carry binary values; their textual form is
//! base64 and they are decoded before being placed on the wire.
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashMap;
use tonic::metadata::{
    Ascii, Binary, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue,
    errors::{InvalidMetadataKey, InvalidMetadataValue},
};

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("header '{0}' is missing a ':' separator")]
    MissingSeparator(String),
    #[error("invalid metadata (header) key '{key}': '{source}'")]
    InvalidKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidValue {
        key: String,
        source: InvalidMetadataValue,
    },
    #[error("invalid base64 in binary header '{key}': '{source}'")]
    InvalidBase64 {
        key: String,
        source: base64::DecodeError,
    },
    #[error("header value references undefined variable '${{{0}}}'")]
    UndefinedVariable(String),
}

/// Parses `"name: value"` strings into a [`MetadataMap`].
///
/// Duplicate names are coalesced in order. Values for `-bin` keys are
/// base64-decoded. An entry with no `:` separator is rejected.
pub fn metadata_from_headers(headers: &[String]) -> Result<MetadataMap, MetadataError> {
    let mut metadata = MetadataMap::new();
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| MetadataError::MissingSeparator(header.clone()))?;
        let name = name.trim();
        let value = value.trim();

        if name.ends_with("-bin") {
            let key: MetadataKey<Binary> =
                name.parse().map_err(|source| MetadataError::InvalidKey {
                    key: name.to_string(),
                    source,
                })?;
            let bytes = BASE64
                .decode(value)
                .map_err(|source| MetadataError::InvalidBase64 {
                    key: name.to_string(),
                    source,
                })?;
            metadata.append_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let key: MetadataKey<Ascii> =
                name.parse().map_err(|source| MetadataError::InvalidKey {
                    key: name.to_string(),
                    source,
                })?;
            let value: MetadataValue<Ascii> =
                value.parse().map_err(|source| MetadataError::InvalidValue {
                    key: name.to_string(),
                    source,
                })?;
            metadata.append(key, value);
        }
    }
    Ok(metadata)
}

/// Expands `${NAME}` occurrences in each header against the given variables.
///
/// An undefined variable is a hard error; an empty value is fine. A `${` with
/// no closing brace is left as literal text. Expansion is idempotent as long
/// as the variable values themselves contain no `${NAME}` tokens.
pub fn expand_headers(
    headers: &[String],
    vars: &HashMap<String, String>,
) -> Result<Vec<String>, MetadataError> {
    headers.iter().map(|h| expand_value(h, vars)).collect()
}

fn expand_value(input: &str, vars: &HashMap<String, String>) -> Result<String, MetadataError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let value = vars
                    .get(name)
                    .ok_or_else(|| MetadataError::UndefinedVariable(name.to_string()))?;
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated token, keep it verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Renders a [`MetadataMap`] as sorted `name: value` lines, base64-encoding
/// binary values. Used by the verbose event printer.
pub fn metadata_to_string(metadata: &MetadataMap) -> String {
    if metadata.is_empty() {
        return "(empty)".to_string();
    }
    let mut lines: Vec<String> = metadata
        .iter()
        .map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => {
                format!("{}: {}", key, value.to_str().unwrap_or("<invalid>"))
            }
            KeyAndValueRef::Binary(key, value) => {
                let bytes = value.to_bytes().unwrap_or_default();
                format!("{}: {}", key, BASE64.encode(&bytes))
            }
        })
        .collect();
    lines.sort();
    lines.join("\n")
}
