// lib.rs - Core library structure for the wallet engine

pub mod api;
pub mod broker;
pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod keys;
pub mod network;
pub mod rpc;
pub mod session;
pub mod signer;
pub mod storage;
pub mod typed_data;
pub mod validation;
pub mod vault;

pub mod wallet {
    //! Engine bootstrap

    use crate::config::{init_security_config, Environment};
    use crate::errors::WalletResult;

    /// Initialize the engine subsystems for the given environment
    pub fn init(environment: Environment) -> WalletResult<()> {
        log::info!("Initializing wallet engine");

        let _ = init_security_config(environment)?;
        log::info!("Security configuration initialized");

        Ok(())
    }
}

// Re-export common types
pub use api::{BackupAnswer, BackupChallenge, BalanceSnapshot, TransferRequest, WalletStatus};
pub use broker::{
    PairingBroker, PairingRelay, PairingSession, PendingRequest, RelayEvent, RequestMethod,
    SessionGrant, SessionProposal, SessionRequest,
};
pub use chain::{Address, Amount, Asset, TransactionRecord};
pub use config::{ConfigStore, EngineConfig, Environment, SecurityConfig, SessionPolicy};
pub use engine::WalletEngine;
pub use errors::{WalletError, WalletResult};
pub use network::NetworkConfig;
pub use rpc::{JsonRpcClient, NetworkClient, TokenBalance, TokenMetadata};
pub use session::{WalletRecord, WalletSession};
pub use signer::TransactionSigner;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageProbe, WalletStore};
pub use validation::InputValidator;
pub use vault::EncryptedPayload;
