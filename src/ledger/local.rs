//! An in-process consensus service.
//!
//! [LocalLedger] orders submissions the way a consensus node would: each
//! accepted message gets a strictly increasing consensus timestamp and the
//! next sequence number of its topic. State lives behind an `Arc<Mutex<_>>`
//! so clones share the same ledger, which lets the local mirror server read
//! while the simulation writes.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ed25519_dalek::Signature;
use tracing::debug;

use super::{ConsensusTimestamp, LedgerClient, Receipt, Status, TopicInfo, TINYBARS_PER_HBAR};
use crate::error::Error;
use crate::ids::{AccountId, TopicId};
use crate::keys::{PrivateKey, PublicKey};
use crate::transaction::FrozenSubmission;

pub const ACCOUNT_CREATE_FEE: u64 = 5_000_000;
pub const TOPIC_CREATE_FEE: u64 = 1_000_000;
pub const SUBMIT_MESSAGE_FEE: u64 = 10_000;
/// Entity numbers below this are reserved for system accounts
const FIRST_ENTITY_NUM: u64 = 1001;
const DEFAULT_OPERATOR_BALANCE: u64 = 10_000 * TINYBARS_PER_HBAR;

/// A message as ordered by consensus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub topic_id: TopicId,
    pub consensus_timestamp: ConsensusTimestamp,
    pub sequence_number: u64,
    pub payer: AccountId,
    pub message: Vec<u8>,
}

#[derive(Debug)]
struct AccountEntry {
    key: PublicKey,
    balance: u64,
}

#[derive(Debug, Default)]
struct TopicEntry {
    memo: String,
    messages: Vec<StoredMessage>,
}

#[derive(Debug)]
struct State {
    next_num: u64,
    accounts: HashMap<AccountId, AccountEntry>,
    topics: BTreeMap<TopicId, TopicEntry>,
    last_timestamp: ConsensusTimestamp,
    closed: bool,
}

impl State {
    fn next_entity_num(&mut self) -> u64 {
        let num = self.next_num;
        self.next_num += 1;
        num
    }

    fn next_timestamp(&mut self) -> ConsensusTimestamp {
        let now = ConsensusTimestamp::now();
        let ts = if now > self.last_timestamp {
            now
        } else {
            self.last_timestamp.next()
        };
        self.last_timestamp = ts;
        ts
    }

    /// Take `amount` tinybars from the payer, or report why it cannot pay.
    fn charge(&mut self, payer: AccountId, amount: u64) -> Result<(), Status> {
        let account = self
            .accounts
            .get_mut(&payer)
            .ok_or(Status::InvalidPayerAccount)?;
        if account.balance < amount {
            return Err(Status::InsufficientPayerBalance);
        }
        account.balance -= amount;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LocalLedger {
    operator_id: AccountId,
    operator_key: PrivateKey,
    state: Arc<Mutex<State>>,
}

impl LocalLedger {
    /// A ledger whose operator account starts with 10 000 hbar.
    pub fn new(operator_id: AccountId, operator_key: PrivateKey) -> Self {
        Self::with_operator_balance(operator_id, operator_key, DEFAULT_OPERATOR_BALANCE)
    }

    pub fn with_operator_balance(
        operator_id: AccountId,
        operator_key: PrivateKey,
        balance: u64,
    ) -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            operator_id,
            AccountEntry {
                key: operator_key.public_key(),
                balance,
            },
        );
        let state = State {
            next_num: FIRST_ENTITY_NUM.max(operator_id.num() + 1),
            accounts,
            topics: BTreeMap::new(),
            last_timestamp: ConsensusTimestamp::now(),
            closed: false,
        };
        Self {
            operator_id,
            operator_key,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a poisoned lock still holds consistent data: every mutation is a
        // single push or insert
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self) -> Result<MutexGuard<'_, State>, Error> {
        let state = self.lock();
        if state.closed {
            return Err(Error::ClientClosed);
        }
        Ok(state)
    }

    /// Snapshot of a topic's messages in consensus order, `None` for an
    /// unknown topic.
    pub fn messages(&self, topic_id: TopicId) -> Option<Vec<StoredMessage>> {
        self.lock()
            .topics
            .get(&topic_id)
            .map(|topic| topic.messages.clone())
    }

    pub fn balance(&self, account: AccountId) -> Option<u64> {
        self.lock().accounts.get(&account).map(|a| a.balance)
    }

    pub fn account_key(&self, account: AccountId) -> Option<PublicKey> {
        self.lock().accounts.get(&account).map(|a| a.key)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    fn operator(&self) -> AccountId {
        self.operator_id
    }

    fn sign_as_operator(&self, bytes: &[u8]) -> (PublicKey, Signature) {
        (self.operator_key.public_key(), self.operator_key.sign(bytes))
    }

    async fn create_account(
        &self,
        key: &PublicKey,
        initial_balance: u64,
    ) -> Result<Receipt, Error> {
        let mut state = self.open()?;
        let cost = ACCOUNT_CREATE_FEE.saturating_add(initial_balance);
        if let Err(status) = state.charge(self.operator_id, cost) {
            return Ok(Receipt::with_status(status));
        }

        let account_id = AccountId::new(0, 0, state.next_entity_num());
        state.accounts.insert(
            account_id,
            AccountEntry {
                key: *key,
                balance: initial_balance,
            },
        );
        debug!(account = %account_id, "account created");

        Ok(Receipt {
            account_id: Some(account_id),
            ..Receipt::with_status(Status::Success)
        })
    }

    async fn create_topic(&self, memo: Option<&str>) -> Result<Receipt, Error> {
        let mut state = self.open()?;
        if let Err(status) = state.charge(self.operator_id, TOPIC_CREATE_FEE) {
            return Ok(Receipt::with_status(status));
        }

        let topic_id = TopicId::new(0, 0, state.next_entity_num());
        state.topics.insert(
            topic_id,
            TopicEntry {
                memo: memo.unwrap_or_default().to_string(),
                messages: Vec::new(),
            },
        );
        debug!(topic = %topic_id, "topic created");

        Ok(Receipt {
            topic_id: Some(topic_id),
            ..Receipt::with_status(Status::Success)
        })
    }

    async fn topic_info(&self, topic_id: TopicId) -> Result<TopicInfo, Error> {
        let state = self.open()?;
        let topic = state
            .topics
            .get(&topic_id)
            .ok_or(Error::TopicNotFound(topic_id))?;
        Ok(TopicInfo {
            topic_id,
            memo: topic.memo.clone(),
            sequence_number: topic.messages.len() as u64,
        })
    }

    async fn submit_message(&self, submission: &FrozenSubmission) -> Result<Receipt, Error> {
        if !submission.verify_signatures() {
            return Ok(Receipt::with_status(Status::InvalidSignature));
        }

        let mut state = self.open()?;
        let payer = submission.transaction_id().payer;
        if payer != self.operator_id {
            return Ok(Receipt::with_status(Status::InvalidPayerAccount));
        }
        // the payer must have signed with the key its account holds
        let payer_signed = state
            .accounts
            .get(&payer)
            .is_some_and(|account| submission.is_signed_by(&account.key));
        if !payer_signed {
            return Ok(Receipt::with_status(Status::InvalidSignature));
        }
        let topic_id = submission.topic_id();
        if !state.topics.contains_key(&topic_id) {
            return Ok(Receipt::with_status(Status::InvalidTopicId));
        }
        if let Err(status) = state.charge(payer, SUBMIT_MESSAGE_FEE) {
            return Ok(Receipt::with_status(status));
        }

        let consensus_timestamp = state.next_timestamp();
        let topic = state
            .topics
            .get_mut(&topic_id)
            .ok_or(Error::TopicNotFound(topic_id))?;
        let sequence_number = topic.messages.len() as u64 + 1;
        topic.messages.push(StoredMessage {
            topic_id,
            consensus_timestamp,
            sequence_number,
            payer,
            message: submission.message().to_vec(),
        });

        Ok(Receipt {
            topic_sequence_number: Some(sequence_number),
            ..Receipt::with_status(Status::Success)
        })
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}
