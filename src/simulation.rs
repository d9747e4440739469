//! The purchase simulation: provision users, submit their purchases, wait for
//! the mirror node, then read every user's purchases back.
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::identity::IdentityProvider;
use crate::ids::{AccountId, TopicId};
use crate::keys::PrivateKey;
use crate::ledger::{LedgerClient, Receipt};
use crate::mirror::MirrorNode;
use crate::record::{short_identity, FetchedRecord, PurchaseRecord};
use crate::transaction::TopicMessageSubmission;

/// How the driver waits for the mirror node to catch up with consensus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Sleep once for every user, then read each user once
    FixedDelay(Duration),
    /// Poll each user's records with exponential backoff
    Poll {
        max_attempts: u32,
        initial_delay: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub users: usize,
    pub records_per_user: u64,
    pub sync: SyncStrategy,
    /// Tinybars given to each ephemeral account
    pub initial_balance: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: 4,
            records_per_user: 10,
            sync: SyncStrategy::FixedDelay(Duration::from_secs(10)),
            initial_balance: 0,
        }
    }
}

/// An ephemeral account and the identity its records carry
#[derive(Debug, Clone)]
pub struct SimulatedUser {
    pub account_id: AccountId,
    pub private_key: PrivateKey,
    pub identity: String,
}

impl SimulatedUser {
    pub fn short_identity(&self) -> &str {
        short_identity(&self.identity)
    }
}

#[derive(Debug, Clone)]
pub struct UserReport {
    pub identity: String,
    pub account_id: AccountId,
    pub expected: usize,
    pub submission_failures: usize,
    /// `None` when reading back failed
    pub records: Option<Vec<FetchedRecord>>,
}

impl UserReport {
    pub fn found(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }

    pub fn is_complete(&self) -> bool {
        self.records.is_some() && self.found() == self.expected
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub users: Vec<UserReport>,
}

impl SimulationReport {
    pub fn all_complete(&self) -> bool {
        self.users.iter().all(UserReport::is_complete)
    }
}

/// Create an account controlled by a fresh key and give it an identity.
pub async fn create_user<C: LedgerClient + ?Sized>(
    ledger: &C,
    identities: &IdentityProvider,
    initial_balance: u64,
) -> Result<SimulatedUser, Error> {
    let private_key = PrivateKey::generate();
    let account_id = ledger
        .create_account(&private_key.public_key(), initial_balance)
        .await?
        .validate()?
        .account_id()?;
    let identity = identities.issue(ledger, account_id, &private_key).await;

    info!(
        account = %account_id,
        identity = %identity,
        public_key = %private_key.public_key().to_der_string(),
        "account created"
    );
    Ok(SimulatedUser {
        account_id,
        private_key,
        identity,
    })
}

/// Submit one purchase signed by the user's key; the operator pays.
pub async fn record_purchase<C: LedgerClient + ?Sized>(
    ledger: &C,
    topic_id: TopicId,
    record: &PurchaseRecord,
    key: &PrivateKey,
) -> Result<Receipt, Error> {
    let message = serde_json::to_vec(record).map_err(|e| Error::JsonError(e.to_string()))?;
    TopicMessageSubmission::new(topic_id, message)
        .freeze_with(ledger)?
        .sign(key)
        .execute(ledger)
        .await
}

fn today() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

pub struct Simulation<'a, C: LedgerClient + ?Sized> {
    ledger: &'a C,
    mirror: &'a MirrorNode,
    identities: &'a IdentityProvider,
    topic_id: TopicId,
    config: SimulationConfig,
}

impl<'a, C: LedgerClient + ?Sized> Simulation<'a, C> {
    pub fn new(
        ledger: &'a C,
        mirror: &'a MirrorNode,
        identities: &'a IdentityProvider,
        topic_id: TopicId,
        config: SimulationConfig,
    ) -> Self {
        Self {
            ledger,
            mirror,
            identities,
            topic_id,
            config,
        }
    }

    /// Run every phase in order. Only account provisioning failures abort the
    /// run; failed submissions and failed reads end up in the report.
    pub async fn run(&self) -> Result<SimulationReport, Error> {
        info!(
            users = self.config.users,
            records = self.config.records_per_user,
            topic = %self.topic_id,
            "simulation start"
        );

        info!("1. creating users");
        let mut users = Vec::with_capacity(self.config.users);
        for _ in 0..self.config.users {
            users.push(create_user(self.ledger, self.identities, self.config.initial_balance).await?);
        }

        info!("2. submitting purchase records");
        let mut failures = Vec::with_capacity(users.len());
        for user in &users {
            failures.push(self.submit_purchases(user).await);
        }

        if let SyncStrategy::FixedDelay(delay) = self.config.sync {
            info!(
                "waiting {:?} for all {} messages to appear on the mirror node",
                delay,
                users.len() as u64 * self.config.records_per_user
            );
            sleep(delay).await;
        }

        info!("3. fetching and verifying records");
        let mut report = SimulationReport::default();
        for (user, submission_failures) in users.iter().zip(failures) {
            let records = self.read_back(user).await;
            let user_report = UserReport {
                identity: user.identity.clone(),
                account_id: user.account_id,
                expected: self.config.records_per_user as usize,
                submission_failures,
                records,
            };
            print_user_report(&user_report);
            report.users.push(user_report);
        }

        Ok(report)
    }

    /// Submit records 1..=M for `user`, returning how many were rejected.
    async fn submit_purchases(&self, user: &SimulatedUser) -> usize {
        let date = today();
        let mut failures = 0;
        info!(
            identity = %user.short_identity(),
            "user submitting {} records",
            self.config.records_per_user
        );

        for sequence in 1..=self.config.records_per_user {
            let record = PurchaseRecord::simulated(&user.identity, sequence, &date);
            match record_purchase(self.ledger, self.topic_id, &record, &user.private_key).await {
                Ok(receipt) => {
                    info!(
                        "[submit] DID {} - {}: {}",
                        user.short_identity(),
                        sequence,
                        receipt.status
                    );
                    if receipt.validate().is_err() {
                        failures += 1;
                    }
                }
                Err(e) => {
                    error!(
                        identity = %user.short_identity(),
                        sequence,
                        error = %e,
                        "[submit] failed"
                    );
                    failures += 1;
                }
            }
        }
        failures
    }

    async fn read_back(&self, user: &SimulatedUser) -> Option<Vec<FetchedRecord>> {
        info!(
            identity = %user.identity,
            "fetching records for user DID {}",
            user.short_identity()
        );
        let expected = self.config.records_per_user as usize;

        match self.config.sync {
            SyncStrategy::FixedDelay(_) => {
                match self
                    .mirror
                    .fetch_records_by_identity(self.topic_id, &user.identity)
                    .await
                {
                    Ok(records) => Some(records),
                    Err(e) => {
                        error!(error = %e, "error fetching from mirror node");
                        None
                    }
                }
            }
            SyncStrategy::Poll {
                max_attempts,
                initial_delay,
            } => match self
                .mirror
                .wait_for_records(
                    self.topic_id,
                    &user.identity,
                    expected,
                    max_attempts,
                    initial_delay,
                )
                .await
            {
                Ok(records) => Some(records),
                Err((e, last)) => {
                    warn!(error = %e, "records did not all reach the mirror node");
                    last
                }
            },
        }
    }
}

fn print_user_report(report: &UserReport) {
    let Some(records) = &report.records else {
        error!(
            identity = %report.identity,
            "could not read records back from the mirror node"
        );
        return;
    };

    info!(
        identity = %report.identity,
        "total records found for this user DID in topic: {} (expected: {})",
        records.len(),
        report.expected
    );
    if records.is_empty() {
        warn!(
            "expected {} records but found 0 for this user; the mirror node may not have indexed them yet",
            report.expected
        );
        return;
    }
    if records.len() != report.expected {
        warn!(
            found = records.len(),
            expected = report.expected,
            "record count mismatch"
        );
    }
    for record in records {
        info!(
            "  [rec #{} | time: {}] item: {}, price: {}, order id: {}",
            record.data.sequence,
            record.consensus_timestamp,
            record.data.item,
            record.data.price,
            record.data.order_id
        );
    }
}
