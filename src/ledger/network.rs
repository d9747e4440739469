//! [LedgerClient] over a Hedera network, through the `hedera` SDK.
//!
//! The SDK signs with the operator key at execution, chooses the nodes and
//! waits for receipts; consensus, fees and sequencing happen on the network.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ed25519_dalek::Signature;
use tracing::debug;

use super::{LedgerClient, Receipt, Status, TopicInfo};
use crate::config::ConfigError;
use crate::error::Error;
use crate::ids::{AccountId, TopicId};
use crate::keys::{PrivateKey, PublicKey};
use crate::transaction::FrozenSubmission;

fn ledger_error(e: impl Display) -> Error {
    Error::Ledger(e.to_string())
}

fn to_sdk_account(id: AccountId) -> Result<::hedera::AccountId, Error> {
    ::hedera::AccountId::from_str(&id.to_string()).map_err(ledger_error)
}

fn to_sdk_topic(id: TopicId) -> Result<::hedera::TopicId, Error> {
    ::hedera::TopicId::from_str(&id.to_string()).map_err(ledger_error)
}

fn from_sdk_account(id: ::hedera::AccountId) -> AccountId {
    AccountId::new(id.shard, id.realm, id.num)
}

fn from_sdk_topic(id: ::hedera::TopicId) -> TopicId {
    TopicId::new(id.shard, id.realm, id.num)
}

fn to_sdk_private_key(key: &PrivateKey) -> Result<::hedera::PrivateKey, Error> {
    ::hedera::PrivateKey::from_bytes_ed25519(&key.to_bytes()).map_err(ledger_error)
}

fn to_sdk_public_key(key: &PublicKey) -> Result<::hedera::PublicKey, Error> {
    ::hedera::PublicKey::from_bytes_ed25519(&key.to_bytes()).map_err(ledger_error)
}

fn check_receipt(receipt: &::hedera::TransactionReceipt) -> Result<(), Error> {
    if receipt.status == ::hedera::Status::Success {
        Ok(())
    } else {
        Err(Error::Ledger(format!("receipt status {:?}", receipt.status)))
    }
}

pub struct HederaLedger {
    client: ::hedera::Client,
    operator_id: AccountId,
    operator_key: PrivateKey,
    closed: AtomicBool,
}

impl HederaLedger {
    /// Connect to `mainnet`, `testnet` or `previewnet` with the given operator.
    pub fn for_network(
        network: &str,
        operator_id: AccountId,
        operator_key: PrivateKey,
    ) -> Result<Self, Error> {
        let client = match network {
            "mainnet" => ::hedera::Client::for_mainnet(),
            "testnet" => ::hedera::Client::for_testnet(),
            "previewnet" => ::hedera::Client::for_previewnet(),
            other => return Err(ConfigError::UnknownNetwork(other.to_string()).into()),
        };
        client.set_operator(
            to_sdk_account(operator_id)?,
            to_sdk_private_key(&operator_key)?,
        );
        debug!(network, operator = %operator_id, "network client ready");

        Ok(Self {
            client,
            operator_id,
            operator_key,
            closed: AtomicBool::new(false),
        })
    }

    fn open(&self) -> Result<&::hedera::Client, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }
        Ok(&self.client)
    }
}

#[async_trait]
impl LedgerClient for HederaLedger {
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
        let client = self.open()?;
        let tinybars = i64::try_from(initial_balance).map_err(ledger_error)?;

        let mut transaction = ::hedera::AccountCreateTransaction::new();
        transaction
            .key(to_sdk_public_key(key)?)
            .initial_balance(::hedera::Hbar::from_tinybars(tinybars));
        let receipt = transaction
            .execute(client)
            .await
            .map_err(ledger_error)?
            .get_receipt(client)
            .await
            .map_err(ledger_error)?;
        check_receipt(&receipt)?;

        Ok(Receipt {
            account_id: receipt.account_id.map(from_sdk_account),
            ..Receipt::with_status(Status::Success)
        })
    }

    async fn create_topic(&self, memo: Option<&str>) -> Result<Receipt, Error> {
        let client = self.open()?;

        let mut transaction = ::hedera::TopicCreateTransaction::new();
        if let Some(memo) = memo {
            transaction.topic_memo(memo);
        }
        let receipt = transaction
            .execute(client)
            .await
            .map_err(ledger_error)?
            .get_receipt(client)
            .await
            .map_err(ledger_error)?;
        check_receipt(&receipt)?;

        Ok(Receipt {
            topic_id: receipt.topic_id.map(from_sdk_topic),
            ..Receipt::with_status(Status::Success)
        })
    }

    async fn topic_info(&self, topic_id: TopicId) -> Result<TopicInfo, Error> {
        let client = self.open()?;

        let info = ::hedera::TopicInfoQuery::new()
            .topic_id(to_sdk_topic(topic_id)?)
            .execute(client)
            .await
            .map_err(ledger_error)?;

        Ok(TopicInfo {
            topic_id,
            memo: info.topic_memo,
            sequence_number: info.sequence_number,
        })
    }

    /// Rebuild the submission as an SDK transaction signed by the same keys.
    async fn submit_message(&self, submission: &FrozenSubmission) -> Result<Receipt, Error> {
        let client = self.open()?;

        let mut transaction = ::hedera::TopicMessageSubmitTransaction::new();
        transaction
            .topic_id(to_sdk_topic(submission.topic_id())?)
            .message(submission.message().to_vec());
        transaction.freeze_with(client).map_err(ledger_error)?;
        for key in submission.signers() {
            transaction.sign(to_sdk_private_key(key)?);
        }

        let receipt = transaction
            .execute(client)
            .await
            .map_err(ledger_error)?
            .get_receipt(client)
            .await
            .map_err(ledger_error)?;
        check_receipt(&receipt)?;

        Ok(Receipt {
            topic_sequence_number: Some(receipt.topic_sequence_number),
            ..Receipt::with_status(Status::Success)
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
