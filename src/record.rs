//! Purchase records and their read-side projection.
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Name of the identity field inside a submitted payload
pub const IDENTITY_FIELD: &str = "did_id";

/// One purchase, as submitted to the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    #[serde(rename = "did_id")]
    pub identity: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub item: String,
    pub price: f64,
    pub order_id: String,
    pub sequence: u64,
}

impl PurchaseRecord {
    /// The `sequence`-th synthetic purchase of `identity`.
    pub fn simulated(identity: &str, sequence: u64, date: &str) -> Self {
        Self {
            identity: identity.to_string(),
            date: date.to_string(),
            item: format!("Product {}", sequence),
            price: (100 + sequence * 10) as f64,
            order_id: format!("ORDER-{}-{}", short_identity(identity), sequence),
            sequence,
        }
    }
}

/// Last `:` separated segment of an identity, used in log lines and order ids.
pub fn short_identity(identity: &str) -> &str {
    identity.rsplit(':').next().unwrap_or(identity)
}

/// A topic message whose payload decoded to JSON
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub consensus_timestamp: String,
    pub sequence_number: u64,
    pub payload: Value,
}

/// A purchase record read back from the mirror node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedRecord {
    pub consensus_timestamp: String,
    pub sequence_number: u64,
    pub data: PurchaseRecord,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("message is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a base64 message body into JSON.
pub fn decode_payload(message: &str) -> Result<Value, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(message)?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

/// Select the records whose identity equals `identity`, in read order.
///
/// Entries are neither deduplicated nor reordered. A payload that carries the
/// identity but is not a purchase record is skipped with a warning.
pub fn filter_by_identity(messages: &[DecodedMessage], identity: &str) -> Vec<FetchedRecord> {
    messages
        .iter()
        .filter(|m| m.payload.get(IDENTITY_FIELD).and_then(Value::as_str) == Some(identity))
        .filter_map(|m| match PurchaseRecord::deserialize(&m.payload) {
            Ok(data) => Some(FetchedRecord {
                consensus_timestamp: m.consensus_timestamp.clone(),
                sequence_number: m.sequence_number,
                data,
            }),
            Err(e) => {
                warn!(
                    timestamp = %m.consensus_timestamp,
                    error = %e,
                    "[warning] message matches identity but is not a purchase record"
                );
                None
            }
        })
        .collect()
}
