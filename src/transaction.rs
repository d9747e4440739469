use std::fmt;

use base64::Engine;
use ed25519_dalek::Signature;
use serde::Serialize;

use crate::error::Error;
use crate::ids::{AccountId, TopicId};
use crate::keys::{PrivateKey, PublicKey};
use crate::ledger::{ConsensusTimestamp, LedgerClient, Receipt};

/// Payer account plus the instant the transaction becomes valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionId {
    pub payer: AccountId,
    #[serde(serialize_with = "serialize_display")]
    pub valid_start: ConsensusTimestamp,
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.payer, self.valid_start)
    }
}

fn serialize_display<T: fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A message to be appended to a topic.
///
/// The submission is frozen against a client, which fixes the payer and the
/// body bytes, then signed by any number of keys and executed. Executing adds
/// the operator's signature, so the operator pays while the signer vouches
/// for the content:
///
/// ```rust,no_run
/// # use hcs_purchase_records::{ids::AccountId, keys::PrivateKey, ledger::LocalLedger};
/// # use hcs_purchase_records::transaction::TopicMessageSubmission;
/// # async fn submit() -> Result<(), hcs_purchase_records::error::Error> {
/// # let ledger = LocalLedger::new(AccountId::new(0, 0, 2), PrivateKey::generate());
/// # let topic = hcs_purchase_records::ids::TopicId::new(0, 0, 1001);
/// let signer = PrivateKey::generate();
/// let receipt = TopicMessageSubmission::new(topic, b"{\"item\":\"Product 1\"}".to_vec())
///     .freeze_with(&ledger)?
///     .sign(&signer)
///     .execute(&ledger)
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct TopicMessageSubmission {
    topic_id: TopicId,
    message: Vec<u8>,
}

impl TopicMessageSubmission {
    pub fn new(topic_id: TopicId, message: impl Into<Vec<u8>>) -> Self {
        Self {
            topic_id,
            message: message.into(),
        }
    }

    /// Fix the payer to the client's operator and serialize the body.
    pub fn freeze_with<C: LedgerClient + ?Sized>(self, client: &C) -> Result<FrozenSubmission, Error> {
        let body = SubmissionBody {
            transaction_id: TransactionId {
                payer: client.operator(),
                valid_start: ConsensusTimestamp::now(),
            },
            topic_id: self.topic_id,
            message: base64::engine::general_purpose::STANDARD.encode(&self.message),
        };
        let body_bytes = serde_json::to_vec(&body).map_err(|e| Error::JsonError(e.to_string()))?;

        Ok(FrozenSubmission {
            body,
            message: self.message,
            body_bytes,
            signers: Vec::new(),
            signatures: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionBody {
    pub transaction_id: TransactionId,
    pub topic_id: TopicId,
    /// Base64 of the message bytes
    pub message: String,
}

/// A submission whose body can no longer change; only signatures are added.
#[derive(Debug, Clone)]
pub struct FrozenSubmission {
    body: SubmissionBody,
    message: Vec<u8>,
    body_bytes: Vec<u8>,
    /// Keys passed to [FrozenSubmission::sign], for clients that sign
    /// through their own transaction encoding
    signers: Vec<PrivateKey>,
    signatures: Vec<(PublicKey, Signature)>,
}

impl FrozenSubmission {
    pub fn sign(mut self, key: &PrivateKey) -> Self {
        let signature = key.sign(&self.body_bytes);
        self.signatures.push((key.public_key(), signature));
        self.signers.push(key.clone());
        self
    }

    /// Attach the operator signature of `client` and submit.
    pub async fn execute<C: LedgerClient + ?Sized>(&self, client: &C) -> Result<Receipt, Error> {
        let mut signed = self.clone();
        signed
            .signatures
            .push(client.sign_as_operator(&self.body_bytes));
        client.submit_message(&signed).await
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.body.transaction_id
    }

    pub fn topic_id(&self) -> TopicId {
        self.body.topic_id
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body_bytes
    }

    pub fn signatures(&self) -> &[(PublicKey, Signature)] {
        &self.signatures
    }

    pub fn signers(&self) -> &[PrivateKey] {
        &self.signers
    }

    /// True when at least one signature is attached and every one of them is
    /// valid over the frozen body.
    pub fn verify_signatures(&self) -> bool {
        !self.signatures.is_empty()
            && self
                .signatures
                .iter()
                .all(|(key, sig)| key.verify(&self.body_bytes, sig))
    }

    pub fn is_signed_by(&self, key: &PublicKey) -> bool {
        self.signatures.iter().any(|(signer, _)| signer == key)
    }
}
