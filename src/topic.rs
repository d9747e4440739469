//! Deciding which topic the purchases go to.
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::ids::TopicId;
use crate::ledger::LedgerClient;

pub const PURCHASE_TOPIC_MEMO: &str = "purchase records";

/// How the purchase topic was obtained.
///
/// `Replaced` is kept apart from `Created`: a configured topic was abandoned,
/// so records from earlier runs live on a different topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicAcquisition {
    Reused(TopicId),
    Created(TopicId),
    Replaced { abandoned: TopicId, created: TopicId },
}

impl TopicAcquisition {
    pub fn topic_id(&self) -> TopicId {
        match self {
            TopicAcquisition::Reused(id) | TopicAcquisition::Created(id) => *id,
            TopicAcquisition::Replaced { created, .. } => *created,
        }
    }
}

/// True when the ledger answers a topic info query for `topic_id`.
pub async fn verify_topic<C: LedgerClient + ?Sized>(ledger: &C, topic_id: TopicId) -> bool {
    info!(topic = %topic_id, "verifying topic information");
    match ledger.topic_info(topic_id).await {
        Ok(_) => {
            info!(topic = %topic_id, "topic verified");
            true
        }
        Err(e) => {
            error!(topic = %topic_id, error = %e, "failed to retrieve topic info");
            false
        }
    }
}

pub async fn create_topic<C: LedgerClient + ?Sized>(ledger: &C) -> Result<TopicId, Error> {
    let topic_id = ledger
        .create_topic(Some(PURCHASE_TOPIC_MEMO))
        .await?
        .validate()?
        .topic_id()?;
    info!(topic = %topic_id, "new topic created");
    Ok(topic_id)
}

/// Reuse `configured` when it verifies, create a topic otherwise, then wait
/// `propagation_delay` and verify again. The second verification failing is
/// fatal.
pub async fn acquire_topic<C: LedgerClient + ?Sized>(
    ledger: &C,
    configured: Option<TopicId>,
    propagation_delay: Duration,
) -> Result<TopicAcquisition, Error> {
    let acquisition = match configured {
        Some(topic_id) => {
            info!(topic = %topic_id, "using existing topic from configuration");
            if verify_topic(ledger, topic_id).await {
                TopicAcquisition::Reused(topic_id)
            } else {
                let created = create_topic(ledger).await?;
                warn!(
                    abandoned = %topic_id,
                    created = %created,
                    "configured topic could not be verified, created a new one"
                );
                TopicAcquisition::Replaced {
                    abandoned: topic_id,
                    created,
                }
            }
        }
        None => {
            info!("no topic configured, creating a new one");
            TopicAcquisition::Created(create_topic(ledger).await?)
        }
    };

    let topic_id = acquisition.topic_id();
    info!(
        topic = %topic_id,
        "waiting {:?} for the topic to propagate across the network",
        propagation_delay
    );
    sleep(propagation_delay).await;

    if !verify_topic(ledger, topic_id).await {
        return Err(Error::TopicVerification(topic_id));
    }
    Ok(acquisition)
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use ed25519_dalek::Signature;

    use super::*;
    use crate::ids::AccountId;
    use crate::keys::{PrivateKey, PublicKey};
    use crate::ledger::{LocalLedger, Receipt, Status, TopicInfo};
    use crate::transaction::FrozenSubmission;

    fn ledger() -> LocalLedger {
        LocalLedger::new(AccountId::new(0, 0, 2), PrivateKey::generate())
    }

    #[tokio::test]
    async fn creates_when_unconfigured() {
        let ledger = ledger();
        let acquired = acquire_topic(&ledger, None, Duration::ZERO).await.unwrap();
        assert!(matches!(acquired, TopicAcquisition::Created(_)));
        assert!(ledger.messages(acquired.topic_id()).is_some());
    }

    #[tokio::test]
    async fn reuses_verified_topic() {
        let ledger = ledger();
        let existing = create_topic(&ledger).await.unwrap();
        let acquired = acquire_topic(&ledger, Some(existing), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(acquired, TopicAcquisition::Reused(existing));
    }

    #[tokio::test]
    async fn replaces_unverifiable_topic() {
        let ledger = ledger();
        let stale = TopicId::new(0, 0, 999);
        let acquired = acquire_topic(&ledger, Some(stale), Duration::ZERO)
            .await
            .unwrap();
        match acquired {
            TopicAcquisition::Replaced { abandoned, created } => {
                assert_eq!(abandoned, stale);
                assert_ne!(created, stale);
                assert_eq!(acquired.topic_id(), created);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Creates topics that never become visible.
    struct Unpropagated {
        inner: LocalLedger,
        info_calls: AtomicUsize,
    }

    #[async_trait]
    impl LedgerClient for Unpropagated {
        fn operator(&self) -> AccountId {
            self.inner.operator()
        }

        fn sign_as_operator(&self, bytes: &[u8]) -> (PublicKey, Signature) {
            self.inner.sign_as_operator(bytes)
        }

        async fn create_account(&self, key: &PublicKey, balance: u64) -> Result<Receipt, Error> {
            self.inner.create_account(key, balance).await
        }

        async fn create_topic(&self, memo: Option<&str>) -> Result<Receipt, Error> {
            self.inner.create_topic(memo).await
        }

        async fn topic_info(&self, topic_id: TopicId) -> Result<TopicInfo, Error> {
            self.info_calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::TopicNotFound(topic_id))
        }

        async fn submit_message(&self, submission: &FrozenSubmission) -> Result<Receipt, Error> {
            self.inner.submit_message(submission).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn unverifiable_after_creation_is_fatal() {
        let ledger = Unpropagated {
            inner: ledger(),
            info_calls: AtomicUsize::new(0),
        };
        let err = acquire_topic(&ledger, None, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TopicVerification(_)));
        assert_eq!(ledger.info_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn creation_failure_propagates() {
        let ledger = LocalLedger::with_operator_balance(
            AccountId::new(0, 0, 2),
            PrivateKey::generate(),
            0,
        );
        let err = acquire_topic(&ledger, None, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Receipt(Status::InsufficientPayerBalance)
        ));
    }
}
