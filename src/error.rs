/// Error Handling in `hcs_purchase_records` crate
/// This module defines all possible error types used in the `hcs_purchase_records` crate.
use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::{ParseIdError, TopicId};
use crate::keys::KeyError;
use crate::ledger::Status;

/// Possible error types
#[derive(Error, Debug)]
pub enum Error {
    /// Error for invalid mirror node URL
    #[error(transparent)]
    InvalidMirror(#[from] InvalidMirrorUrl),
    /// Missing or malformed configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Malformed entity identifier
    #[error(transparent)]
    InvalidId(#[from] ParseIdError),
    /// Malformed key material
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    /// Error when JSON parsing fails, with a descriptive message
    #[error("JsonError: could not parse {0}")]
    JsonError(String),
    /// Error for network-related failures
    #[error("NetworkError: {0}")]
    NetworkError(#[from] reqwest::Error),
    /// The mirror node answered with a non-success status
    #[error("HTTP error! status: {status} from URL: {url}")]
    HttpStatus {
        /// HTTP status code of the failed page
        status: u16,
        /// URL of the failed page
        url: String,
    },
    /// The ledger rejected a write; the receipt status is attached
    #[error("ReceiptError: {0}")]
    Receipt(Status),
    /// The ledger does not know the topic
    #[error("TopicNotFound: {0}")]
    TopicNotFound(TopicId),
    /// The topic could not be confirmed even after the propagation delay
    #[error("Topic verification failed even after waiting: {0}")]
    TopicVerification(TopicId),
    /// A receipt was missing the identifier its operation should assign
    #[error("UnexpectedReceipt: missing {0}")]
    UnexpectedReceipt(&'static str),
    /// The network client failed: precheck, receipt status or transport
    #[error("LedgerError: {0}")]
    Ledger(String),
    /// The session was closed before the operation ran
    #[error("ClientClosed")]
    ClientClosed,
    /// Records did not show up on the mirror node in time
    #[error("WaitRecordsTimeout: expected {expected}, found {found} after {attempts} attempts")]
    WaitRecordsTimeout {
        /// Number of records expected for the identity
        expected: usize,
        /// Number of records found on the last attempt
        found: usize,
        /// Number of scans performed
        attempts: u32,
    },
    /// Error when the local mirror server cannot start
    #[error("ServerError: {0}")]
    Server(#[from] std::io::Error),
}

/// Possible errors for invalid mirror node URLs
#[derive(Error, Debug)]
pub enum InvalidMirrorUrl {
    /// Error when the URL scheme is not HTTP or HTTPS
    #[error("The mirror node Url scheme should be http or https")]
    NotHttpScheme,
    /// Error when insecure HTTP URLs are used without explicit permission
    #[error("Http scheme requires the option allow_http: true")]
    UnsecureHttpNotAllowed,
    /// Error when the provided URL is invalid
    #[error("InvalidUrl: {0}")]
    InvalidUri(String),
}
