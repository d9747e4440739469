//! A rust library and demo
//! for recording purchases on a consensus topic and reading them back from a mirror node
pub mod config;
pub mod error;
pub mod http_client;
pub mod identity;
pub mod ids;
pub mod keys;
pub mod ledger;
pub mod mirror;
pub mod mirror_rpc;
pub mod mirror_server;
pub mod record;
pub mod simulation;
pub mod topic;
pub mod transaction;
pub use http_client::{HTTPClient, VERSION};
pub use ledger::{HederaLedger, LedgerClient, LocalLedger};
pub use mirror::{MirrorNode, Options};
pub use record::{FetchedRecord, PurchaseRecord};
