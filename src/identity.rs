//! Identities that tag purchase records.
//!
//! The provider is chosen once per session. When a DID topic is configured
//! and can be verified, accounts get a decentralized identifier whose
//! document is published on that topic; otherwise the identifier is derived
//! from the account id alone.
use serde_json::json;
use tracing::{info, warn};

use crate::error::Error;
use crate::ids::{AccountId, TopicId};
use crate::keys::{PrivateKey, PublicKey};
use crate::ledger::LedgerClient;
use crate::transaction::TopicMessageSubmission;

const DID_METHOD: &str = "did:hedera";

/// Identifier used when no DID topic is available
pub fn derived_identity(account_id: AccountId) -> String {
    format!("{}:{}", DID_METHOD, account_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidRegistrar {
    network: String,
    did_topic: TopicId,
}

impl DidRegistrar {
    pub fn new(network: impl Into<String>, did_topic: TopicId) -> Self {
        Self {
            network: network.into(),
            did_topic,
        }
    }

    pub fn did_topic(&self) -> TopicId {
        self.did_topic
    }

    /// `did:hedera:{network}:{public key hex}_{did topic}`
    pub fn did_for(&self, key: &PublicKey) -> String {
        format!("{}:{}:{}_{}", DID_METHOD, self.network, key, self.did_topic)
    }

    pub fn document(&self, did: &str, key: &PublicKey) -> serde_json::Value {
        let key_id = format!("{}#did-root-key", did);
        json!({
            "@context": "https://www.w3.org/ns/did/v1",
            "id": did,
            "verificationMethod": [{
                "id": key_id,
                "type": "Ed25519VerificationKey2018",
                "controller": did,
                "publicKeyHex": key.to_string(),
            }],
            "authentication": [key_id],
            "assertionMethod": [key_id],
        })
    }

    /// Publish the DID document on the DID topic, signed by the account key.
    pub async fn register<C: LedgerClient + ?Sized>(
        &self,
        ledger: &C,
        did: &str,
        key: &PrivateKey,
    ) -> Result<(), Error> {
        let message = json!({
            "operation": "create",
            "did": did,
            "document": self.document(did, &key.public_key()),
        });
        let bytes = serde_json::to_vec(&message).map_err(|e| Error::JsonError(e.to_string()))?;

        let receipt = TopicMessageSubmission::new(self.did_topic, bytes)
            .freeze_with(ledger)?
            .sign(key)
            .execute(ledger)
            .await?
            .validate()?;
        info!(did, status = %receipt.status, "DID document registered");
        Ok(())
    }
}

/// Strategy selected at session start, never re-probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityProvider {
    /// Publishes DID documents and issues DID identifiers
    Did(DidRegistrar),
    /// Falls back to `did:hedera:{account}`
    Derived,
}

impl IdentityProvider {
    /// Use DIDs when `did_topic` is set and the ledger knows it.
    pub async fn probe<C: LedgerClient + ?Sized>(
        ledger: &C,
        network: &str,
        did_topic: Option<TopicId>,
    ) -> Self {
        let Some(did_topic) = did_topic else {
            info!("no DID topic configured, continuing with account derived identities");
            return IdentityProvider::Derived;
        };

        match ledger.topic_info(did_topic).await {
            Ok(_) => {
                info!(topic = %did_topic, "DID registry available");
                IdentityProvider::Did(DidRegistrar::new(network, did_topic))
            }
            Err(e) => {
                warn!(
                    topic = %did_topic,
                    error = %e,
                    "DID topic unavailable, continuing with account derived identities"
                );
                IdentityProvider::Derived
            }
        }
    }

    pub fn is_did(&self) -> bool {
        matches!(self, IdentityProvider::Did(_))
    }

    /// Identity for a freshly created account.
    ///
    /// An account whose DID document cannot be published gets the derived
    /// identity instead.
    pub async fn issue<C: LedgerClient + ?Sized>(
        &self,
        ledger: &C,
        account_id: AccountId,
        key: &PrivateKey,
    ) -> String {
        match self {
            IdentityProvider::Did(registrar) => {
                let did = registrar.did_for(&key.public_key());
                match registrar.register(ledger, &did, key).await {
                    Ok(()) => did,
                    Err(e) => {
                        warn!(
                            did,
                            error = %e,
                            "DID registration failed, falling back to account derived identity"
                        );
                        derived_identity(account_id)
                    }
                }
            }
            IdentityProvider::Derived => derived_identity(account_id),
        }
    }
}
