//! Job input/output schema.
//!
//! Input: `{"head_image": <base64>, "body_image": <base64>}`, each value
//! optionally prefixed with a data URI (`data:image/png;base64,`).
//! Output: exactly one of `{"result": <base64>}` or `{"error": <message>}`.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Field name of the head image in the job input.
pub const FIELD_HEAD_IMAGE: &str = "head_image";
/// Field name of the body image in the job input.
pub const FIELD_BODY_IMAGE: &str = "body_image";

/// Raw job input as received from the transport.
///
/// Both fields are optional at the type level so that a missing field is
/// reported as a schema error naming it, not as a deserialisation failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub head_image: Option<String>,
    #[serde(default)]
    pub body_image: Option<String>,
}

/// The structured response of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Success { result: String },
    Failure { error: String },
}

impl JobOutput {
    pub fn success(image: &[u8]) -> Self {
        Self::Success {
            result: base64::engine::general_purpose::STANDARD.encode(image),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            error: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }
}

/// Return the value of a required field, or the name of the missing field.
///
/// Empty and whitespace-only strings count as missing.
pub fn require_field<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, &'static str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(field),
    }
}

/// Strip a `data:<mime>;base64,` prefix if present.
pub fn strip_data_uri(input: &str) -> &str {
    let trimmed = input.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, payload)) = trimmed.split_once(',') {
            return payload;
        }
    }
    trimmed
}

/// Decode a base64 image, tolerating a data-URI prefix and embedded
/// whitespace/newlines.
pub fn decode_image(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload: String = strip_data_uri(input)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD.decode(payload)
}
