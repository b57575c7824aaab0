/// Top-level wallet engine
///
/// Owns the session, signer, and broker, plus the per-network caches the
/// host UI reads. All mutating operations funnel through here; the KDF-heavy
/// session calls are pushed onto the blocking pool so the async runtime
/// stays responsive.
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use secrecy::SecretString;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::api::{BackupAnswer, BalanceSnapshot, WalletStatus};
use crate::broker::{
    ApprovedRequest, BrokerEvents, PairingBroker, PairingRelay, PairingSession, PendingRequest,
    RelayEvent, RequestMethod,
};
use crate::chain::{Amount, Asset, TransactionRecord, NATIVE_DECIMALS};
use crate::config::{self, ConfigStore, Environment, SessionPolicy};
use crate::errors::{WalletError, WalletResult};
use crate::network::{self, NetworkConfig};
use crate::rpc::NetworkClient;
use crate::session::WalletSession;
use crate::signer::TransactionSigner;
use crate::storage::{KeyValueStore, StorageProbe, WalletStore};
use crate::validation::InputValidator;

/// Transfers fetched per history refresh
const HISTORY_LIMIT: usize = 20;

/// Network-scoped caches, tagged with an epoch so a fetch that raced a
/// network switch can be discarded instead of written back
struct EngineState {
    network: NetworkConfig,
    epoch: u64,
    balance: u128,
    transactions: Vec<TransactionRecord>,
    tokens: Vec<Asset>,
}

pub struct WalletEngine<C, R> {
    store: WalletStore,
    session: Arc<WalletSession>,
    signer: TransactionSigner,
    broker: PairingBroker<R>,
    client: C,
    state: RwLock<EngineState>,
    validator: InputValidator,
    config_store: Option<ConfigStore>,
    policy: SessionPolicy,
    auto_lock_deadline: Mutex<Option<Instant>>,
}

impl<C: NetworkClient, R: PairingRelay> WalletEngine<C, R> {
    /// Wire up an engine over the given persistence, network, and relay
    /// backends, restoring the persisted network selection and record.
    pub fn new(store: Arc<dyn KeyValueStore>, client: C, relay: R) -> WalletResult<Self> {
        Self::build(store, client, relay, None)
    }

    /// Same wiring, with durable engine configuration (selected network,
    /// session policy) kept in a checksummed envelope at the given path.
    pub fn with_config_store(
        store: Arc<dyn KeyValueStore>,
        client: C,
        relay: R,
        config_store: ConfigStore,
    ) -> WalletResult<Self> {
        Self::build(store, client, relay, Some(config_store))
    }

    fn build(
        store: Arc<dyn KeyValueStore>,
        client: C,
        relay: R,
        config_store: Option<ConfigStore>,
    ) -> WalletResult<Self> {
        let store = WalletStore::new(store);

        let engine_config = match &config_store {
            Some(config_store) => Some(
                config_store.load_or_default(environment_name(), &network::default_network().name)?,
            ),
            None => None,
        };
        let policy = match &engine_config {
            Some(config) => config.session.clone(),
            None => SessionPolicy {
                auto_lock_minutes: config::get_security_config()
                    .and_then(|c| c.auto_lock_minutes())
                    .unwrap_or(15),
                max_failed_attempts: config::get_security_config()
                    .and_then(|c| c.max_failed_attempts())
                    .unwrap_or(5),
            },
        };

        let session = Arc::new(WalletSession::new(store.clone(), policy.max_failed_attempts)?);
        let signer = TransactionSigner::new(Arc::clone(&session))?;
        let broker = PairingBroker::new(relay, Arc::clone(&session))?;

        let persisted_name = match store.selected_network()? {
            Some(name) => Some(name),
            None => engine_config.map(|c| c.selected_network),
        };
        let network = match persisted_name {
            Some(name) => network::find_network(&name).unwrap_or_else(|_| {
                log::warn!("Persisted network {} is no longer a preset", name);
                network::default_network()
            }),
            None => network::default_network(),
        };

        Ok(WalletEngine {
            store,
            session,
            signer,
            broker,
            client,
            state: RwLock::new(EngineState {
                network,
                epoch: 0,
                balance: 0,
                transactions: Vec::new(),
                tokens: Vec::new(),
            }),
            validator: InputValidator::new()?,
            config_store,
            policy,
            auto_lock_deadline: Mutex::new(None),
        })
    }

    // ---- wallet lifecycle ----

    pub fn status(&self) -> WalletStatus {
        self.enforce_auto_lock();
        WalletStatus::from(self.session.record())
    }

    pub fn storage_probe(&self) -> WalletResult<StorageProbe> {
        self.store.probe()
    }

    /// Generate a new wallet; the KDF runs on the blocking pool
    pub async fn create_wallet(&self, word_count: u32, password: &str) -> WalletResult<String> {
        self.validator.validate_password(password)?;
        let session = Arc::clone(&self.session);
        let password = SecretString::from(password.to_string());

        let address = run_blocking(move || session.create(word_count, &password)).await?;
        Ok(address.to_checksum_string())
    }

    /// Import an existing phrase; the wallet comes up unlocked
    pub async fn import_wallet(&self, phrase: &str, password: &str) -> WalletResult<String> {
        self.validator.validate_password(password)?;
        self.validator.validate_phrase_shape(phrase.trim())?;
        let session = Arc::clone(&self.session);
        let phrase = phrase.to_string();
        let password = SecretString::from(password.to_string());

        let address = run_blocking(move || session.import(&phrase, &password)).await?;
        self.arm_auto_lock();
        Ok(address.to_checksum_string())
    }

    pub fn backup_challenge(&self) -> WalletResult<Vec<usize>> {
        self.session.backup_challenge()
    }

    pub fn verify_backup(&self, answers: Vec<BackupAnswer>) -> WalletResult<()> {
        let confirmed: Vec<(usize, String)> = answers
            .into_iter()
            .map(|a| (a.position, a.word))
            .collect();
        self.session.verify_backup(&confirmed)?;
        self.arm_auto_lock();
        Ok(())
    }

    pub fn export_phrase(&self) -> WalletResult<Zeroizing<String>> {
        self.session.export_phrase()
    }

    pub async fn unlock(&self, password: &str) -> WalletResult<()> {
        let session = Arc::clone(&self.session);
        let password = SecretString::from(password.to_string());
        run_blocking(move || session.unlock(&password)).await?;
        self.arm_auto_lock();
        Ok(())
    }

    /// Lock the session and drop the network caches with it; a locked
    /// wallet exposes no balances or history
    pub fn lock(&self) {
        self.session.lock();
        *self.auto_lock_deadline.lock() = None;
        let mut state = self.state.write();
        state.epoch += 1;
        state.balance = 0;
        state.transactions.clear();
        state.tokens.clear();
    }

    /// Lock the wallet once the configured idle window has elapsed.
    /// Hosts call this from their poll loop; `status` checks it too.
    /// Returns whether this call locked the wallet.
    pub fn enforce_auto_lock(&self) -> bool {
        let expired = self
            .auto_lock_deadline
            .lock()
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            log::info!(
                "Auto-locking after {} idle minutes",
                self.policy.auto_lock_minutes
            );
            self.lock();
        }
        expired
    }

    /// Restart the idle countdown; disabled when the policy says 0 minutes
    fn arm_auto_lock(&self) {
        let deadline = if self.policy.auto_lock_minutes > 0 && self.session.is_unlocked() {
            Some(
                Instant::now()
                    + Duration::from_secs(u64::from(self.policy.auto_lock_minutes) * 60),
            )
        } else {
            None
        };
        *self.auto_lock_deadline.lock() = deadline;
    }

    /// Erase the wallet and all network caches
    pub fn wipe(&self) -> WalletResult<()> {
        self.session.wipe()?;
        *self.auto_lock_deadline.lock() = None;
        let mut state = self.state.write();
        state.epoch += 1;
        state.balance = 0;
        state.transactions.clear();
        state.tokens.clear();
        Ok(())
    }

    // ---- network selection and caches ----

    pub fn supported_networks(&self) -> Vec<NetworkConfig> {
        network::supported_networks()
    }

    pub fn active_network(&self) -> NetworkConfig {
        self.state.read().network.clone()
    }

    /// Switch the active network, atomically resetting every cache before
    /// any fetch for the new network can run. In-flight fetches for the
    /// old network are invalidated by the epoch bump.
    pub fn switch_network(&self, name: &str) -> WalletResult<NetworkConfig> {
        let network = network::find_network(name)?;
        self.store.set_selected_network(&network.name)?;
        if let Some(config_store) = &self.config_store {
            config_store.update(environment_name(), &network.name, |config| {
                config.selected_network = network.name.clone();
                Ok(())
            })?;
        }

        let mut state = self.state.write();
        state.network = network.clone();
        state.epoch += 1;
        state.balance = 0;
        state.transactions.clear();
        state.tokens.clear();
        log::info!("Switched to network {}", network.name);
        Ok(network)
    }

    pub fn balance(&self) -> BalanceSnapshot {
        let state = self.state.read();
        let balance = Amount::from_base_units(state.balance, NATIVE_DECIMALS)
            .map(|a| a.as_string())
            .unwrap_or_else(|_| "0".to_string());
        BalanceSnapshot {
            symbol: state.network.symbol.clone(),
            balance,
            network: state.network.name.clone(),
        }
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.read().transactions.clone()
    }

    pub fn tokens(&self) -> Vec<Asset> {
        self.state.read().tokens.clone()
    }

    /// Re-fetch the native balance. A fetch failure or a network switch
    /// during the fetch leaves the cache at its reset default.
    pub async fn refresh_balance(&self) -> WalletResult<()> {
        let Some(address) = self.session.address() else {
            return Ok(());
        };
        let epoch = self.state.read().epoch;

        match self.client.get_balance(&address).await {
            Ok(balance) => {
                let mut state = self.state.write();
                if state.epoch == epoch {
                    state.balance = balance;
                }
            }
            Err(err) => log::warn!("Balance refresh failed: {}", err),
        }
        Ok(())
    }

    pub async fn refresh_transactions(&self) -> WalletResult<()> {
        let Some(address) = self.session.address() else {
            return Ok(());
        };
        let epoch = self.state.read().epoch;

        match self
            .client
            .get_transaction_history(&address, HISTORY_LIMIT)
            .await
        {
            Ok(transactions) => {
                let mut state = self.state.write();
                if state.epoch == epoch {
                    state.transactions = transactions;
                }
            }
            Err(err) => log::warn!("History refresh failed: {}", err),
        }
        Ok(())
    }

    /// Re-fetch ERC-20 holdings, resolving metadata per contract. Tokens
    /// whose metadata cannot be resolved are skipped, not fabricated.
    pub async fn refresh_tokens(&self) -> WalletResult<()> {
        let Some(address) = self.session.address() else {
            return Ok(());
        };
        let epoch = self.state.read().epoch;

        let balances = match self.client.get_token_balances(&address).await {
            Ok(balances) => balances,
            Err(err) => {
                log::warn!("Token refresh failed: {}", err);
                return Ok(());
            }
        };

        let mut tokens = Vec::with_capacity(balances.len());
        for entry in balances {
            let metadata = match self.client.get_token_metadata(&entry.contract_address).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    log::warn!(
                        "Skipping token {} with unresolvable metadata: {}",
                        entry.contract_address,
                        err
                    );
                    continue;
                }
            };
            let decimals = metadata.decimals.unwrap_or(NATIVE_DECIMALS);
            let balance = Amount::from_base_units(entry.balance, decimals)?.as_string();
            tokens.push(Asset {
                symbol: metadata
                    .symbol
                    .unwrap_or_else(|| entry.contract_address.clone()),
                balance,
                contract_address: Some(entry.contract_address),
                decimals,
            });
        }

        let mut state = self.state.write();
        if state.epoch == epoch {
            state.tokens = tokens;
        }
        Ok(())
    }

    pub async fn refresh_all(&self) -> WalletResult<()> {
        self.refresh_balance().await?;
        self.refresh_transactions().await?;
        self.refresh_tokens().await?;
        Ok(())
    }

    // ---- transfers ----

    /// Send a transfer of the native asset or one of the cached tokens.
    /// A successful broadcast triggers a balance refresh.
    pub async fn send_transaction(
        &self,
        recipient: &str,
        amount: &str,
        contract_address: Option<&str>,
    ) -> WalletResult<String> {
        let (network, asset) = {
            let state = self.state.read();
            let asset = match contract_address {
                None => {
                    let mut native = Asset::native(&state.network.symbol);
                    native.balance = Amount::from_base_units(state.balance, NATIVE_DECIMALS)
                        .map(|a| a.as_string())
                        .unwrap_or_else(|_| "0".to_string());
                    native
                }
                Some(contract) => state
                    .tokens
                    .iter()
                    .find(|t| t.contract_address.as_deref() == Some(contract))
                    .cloned()
                    .ok_or_else(|| {
                        WalletError::NotFound(format!("Unknown token: {}", contract))
                    })?,
            };
            (state.network.clone(), asset)
        };

        let hash = self
            .signer
            .send(&self.client, &network, recipient, amount, &asset)
            .await?;

        if let Err(err) = self.refresh_balance().await {
            log::warn!("Post-send balance refresh failed: {}", err);
        }
        self.arm_auto_lock();
        Ok(hash)
    }

    pub fn is_sending(&self) -> bool {
        self.signer.is_sending()
    }

    pub fn last_send_error(&self) -> Option<String> {
        self.signer.last_error()
    }

    pub fn clear_send_error(&self) {
        self.signer.clear_last_error();
    }

    pub fn sign_personal_message(&self, message: &str) -> WalletResult<String> {
        self.signer.sign_personal(message)
    }

    // ---- pairing ----

    /// Bring up the pairing relay, advertising the wallet identity.
    /// Idempotent once initialized.
    pub async fn initialize_pairing(&self, name: &str, url: &str) -> WalletResult<()> {
        let project_id = config::get_security_config()
            .map(|c| c.relay_project_id())
            .unwrap_or_default();
        self.broker.initialize(name, url, &project_id).await
    }

    pub async fn pair(&self, uri: &str) -> WalletResult<()> {
        self.broker.pair(uri).await
    }

    /// Relay driver entry point for inbound relay messages
    pub fn handle_relay_event(&self, event: RelayEvent) {
        self.broker.handle_relay_event(event);
    }

    pub fn broker_events(&self) -> &BrokerEvents {
        self.broker.events()
    }

    pub fn pending_request(&self) -> Option<PendingRequest> {
        self.broker.pending_request()
    }

    /// Approve a proposal, scoping the grant to the active network
    pub async fn approve_session(&self, proposal_id: u64) -> WalletResult<PairingSession> {
        let chain_id = self.state.read().network.chain_id;
        self.broker.approve_session(proposal_id, chain_id).await
    }

    pub async fn reject_session(&self, proposal_id: u64) -> WalletResult<()> {
        self.broker.reject_session(proposal_id).await
    }

    /// Approve the pending in-session request; a broadcasting method also
    /// refreshes the balance afterwards
    pub async fn approve_request(&self) -> WalletResult<Value> {
        let ApprovedRequest { method, result } = self
            .broker
            .approve_request(&self.signer, &self.client)
            .await?;

        if method == RequestMethod::EthSendTransaction {
            if let Err(err) = self.refresh_balance().await {
                log::warn!("Post-request balance refresh failed: {}", err);
            }
        }
        self.arm_auto_lock();
        Ok(result)
    }

    pub async fn reject_request(&self) -> WalletResult<()> {
        self.broker.reject_request().await
    }

    pub async fn disconnect_session(&self, topic: &str) -> WalletResult<()> {
        self.broker.disconnect_session(topic).await
    }

    pub fn get_active_sessions(&self) -> Vec<PairingSession> {
        self.broker.get_active_sessions()
    }

    pub async fn shutdown_pairing(&self) -> WalletResult<()> {
        self.broker.shutdown().await
    }
}

/// Profile name recorded in the durable config envelope
fn environment_name() -> &'static str {
    match config::get_security_config() {
        Ok(config) => match config.environment() {
            Environment::Production => "production",
            Environment::Test => "test",
            Environment::Development => "development",
        },
        Err(_) => "development",
    }
}

/// Run a KDF-heavy session call on the blocking pool
async fn run_blocking<T, F>(operation: F) -> WalletResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> WalletResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| WalletError::Unknown(format!("Blocking task failed: {}", e)))?
}
