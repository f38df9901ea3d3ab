//! Queue message wire format.
//!
//! Every raw queue body is a small JSON envelope. Payloads whose inline
//! encoding would exceed [`MAX_INLINE_MESSAGE_BYTES`] are written to
//! [`OVERFLOW_CONTAINER`] and the envelope carries the blob name instead.
//!
//! ```text
//! {"kind":"inline","payload":{...}}
//! {"kind":"overflow","blob":"orders/5f0c..."}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest envelope kept inline in the queue message itself.
pub const MAX_INLINE_MESSAGE_BYTES: usize = 48 * 1024;

/// Container holding payloads that did not fit in a queue message.
pub const OVERFLOW_CONTAINER: &str = "leasegrid-overflowing-messages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Inline { payload: Value },
    Overflow { blob: String },
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Encodes `payload` inline, or returns `None` when it must overflow.
pub fn encode_inline(payload: &Value) -> Result<Option<Bytes>, serde_json::Error> {
    let body = Envelope::Inline {
        payload: payload.clone(),
    }
    .to_bytes()?;
    if body.len() > MAX_INLINE_MESSAGE_BYTES {
        return Ok(None);
    }
    Ok(Some(body))
}
