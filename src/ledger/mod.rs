//! The ledger client boundary.
//!
//! Everything the simulation needs from the consensus service goes through
//! [LedgerClient]: creating accounts and topics, asking whether a topic exists
//! and submitting signed messages. Write operations answer with a [Receipt].
//!
//! [HederaLedger] talks to a Hedera network; [LocalLedger] keeps everything in
//! process for offline runs.
pub mod local;
pub mod network;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ids::{AccountId, TopicId};
use crate::keys::PublicKey;
use crate::transaction::FrozenSubmission;

pub use local::LocalLedger;
pub use network::HederaLedger;

pub const TINYBARS_PER_HBAR: u64 = 100_000_000;

/// Receipt status codes, named the way the network reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    InvalidSignature,
    InvalidTopicId,
    InvalidPayerAccount,
    InsufficientPayerBalance,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::InvalidSignature => "INVALID_SIGNATURE",
            Status::InvalidTopicId => "INVALID_TOPIC_ID",
            Status::InvalidPayerAccount => "INVALID_PAYER_ACCOUNT",
            Status::InsufficientPayerBalance => "INSUFFICIENT_PAYER_BALANCE",
        };
        f.write_str(s)
    }
}

/// Acknowledgement of a write operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub status: Status,
    /// Set by account creation
    pub account_id: Option<AccountId>,
    /// Set by topic creation
    pub topic_id: Option<TopicId>,
    /// Set by message submission
    pub topic_sequence_number: Option<u64>,
}

impl Receipt {
    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            account_id: None,
            topic_id: None,
            topic_sequence_number: None,
        }
    }

    /// Turn a non-success status into [Error::Receipt].
    pub fn validate(self) -> Result<Self, Error> {
        if self.status == Status::Success {
            Ok(self)
        } else {
            Err(Error::Receipt(self.status))
        }
    }

    pub fn account_id(&self) -> Result<AccountId, Error> {
        self.account_id.ok_or(Error::UnexpectedReceipt("account_id"))
    }

    pub fn topic_id(&self) -> Result<TopicId, Error> {
        self.topic_id.ok_or(Error::UnexpectedReceipt("topic_id"))
    }
}

/// Topic metadata returned by [LedgerClient::topic_info]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub topic_id: TopicId,
    pub memo: String,
    /// Sequence number of the last message, 0 for an empty topic
    pub sequence_number: u64,
}

/// Consensus timestamp with nanosecond precision.
///
/// Rendered as `seconds.nanoseconds`, nanoseconds zero padded to nine
/// digits, which is how the mirror node spells `consensus_timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsensusTimestamp {
    pub seconds: u64,
    pub nanos: u32,
}

impl ConsensusTimestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }

    /// The smallest timestamp strictly after `self`.
    pub fn next(self) -> Self {
        if self.nanos >= 999_999_999 {
            Self {
                seconds: self.seconds + 1,
                nanos: 0,
            }
        } else {
            Self {
                seconds: self.seconds,
                nanos: self.nanos + 1,
            }
        }
    }
}

impl fmt::Display for ConsensusTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Operations consumed from the consensus service.
///
/// Every operation is paid for by the operator account the client was built
/// with.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The account paying for every operation
    fn operator(&self) -> AccountId;

    /// Signature of the operator over `bytes`, attached when a transaction
    /// is executed.
    fn sign_as_operator(&self, bytes: &[u8]) -> (PublicKey, Signature);

    /// Create an account controlled by `key`, funded with `initial_balance`
    /// tinybars taken from the operator.
    async fn create_account(&self, key: &PublicKey, initial_balance: u64)
        -> Result<Receipt, Error>;

    /// Create a new topic with an optional memo.
    async fn create_topic(&self, memo: Option<&str>) -> Result<Receipt, Error>;

    /// Query topic metadata. Fails when the topic does not exist.
    async fn topic_info(&self, topic_id: TopicId) -> Result<TopicInfo, Error>;

    /// Execute a frozen, signed message submission.
    async fn submit_message(&self, submission: &FrozenSubmission) -> Result<Receipt, Error>;

    /// Release the session. Later operations fail with [Error::ClientClosed].
    async fn close(&self);
}
