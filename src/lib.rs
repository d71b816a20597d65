//! Lunar Vault - content vault and model marketplace session service
//!
//! Users connect a wallet, pin files to content-addressed storage, record them
//! in a ledger they can later verify against, and rent access to listed models
//! they can then chat with through a hosted LLM.

pub mod api;
pub mod config;
pub mod error;
pub mod format;
pub mod inference;
pub mod ledger;
pub mod marketplace;
pub mod metrics;
pub mod session;
pub mod upload;
pub mod verify;
pub mod wallet;

pub use config::VaultConfig;
pub use error::{ContractFailure, VaultError, VaultResult};
pub use ledger::{AssetStatus, Ledger, TransactionState, VaultWorkflow, VaultedAsset};
pub use marketplace::{MarketplaceWorkflow, OnChainModel};
pub use session::{Session, SessionBackends};
pub use upload::{ContentHash, ContentStore, FileBlob};
pub use verify::{VerificationResult, Verifier};
pub use wallet::{WalletAdapter, WalletState};
