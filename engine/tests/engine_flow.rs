// End-to-end wallet flows over the public engine API, backed by an
// in-memory store, a stub network client, and a fake pairing relay.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use basalt_wallet_lib::broker::{DisconnectReason, RelayMetadata};
use basalt_wallet_lib::{
    Address, BackupAnswer, FileStore, KeyValueStore, MemoryStore, NetworkClient, PairingRelay,
    PairingSession, RelayEvent, SessionGrant, SessionProposal, SessionRequest, TokenBalance,
    TokenMetadata, TransactionRecord, WalletEngine, WalletError, WalletResult, WalletStore,
};

const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const PHRASE_ADDRESS: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";
const PASSWORD: &str = "Str0ngPassw0rd!";
const RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

#[derive(Default)]
struct StubClient {
    balance: Mutex<u128>,
    tokens: Vec<TokenBalance>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
}

impl StubClient {
    fn funded() -> Self {
        StubClient {
            balance: Mutex::new(10 * 10_u128.pow(18)),
            ..StubClient::default()
        }
    }
}

impl NetworkClient for StubClient {
    async fn get_balance(&self, _address: &Address) -> WalletResult<u128> {
        Ok(*self.balance.lock())
    }
    async fn get_transaction_count(&self, _address: &Address) -> WalletResult<u64> {
        Ok(self.broadcasts.lock().len() as u64)
    }
    async fn gas_price(&self) -> WalletResult<u128> {
        Ok(2_000_000_000)
    }
    async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<String> {
        self.broadcasts.lock().push(raw.to_vec());
        Ok(format!("0xhash{}", self.broadcasts.lock().len()))
    }
    async fn call(&self, _to: &Address, _data: &[u8]) -> WalletResult<Vec<u8>> {
        Ok(Vec::new())
    }
    async fn await_confirmation(&self, _tx_hash: &str) -> WalletResult<u64> {
        Ok(1)
    }
    async fn get_token_balances(&self, _address: &Address) -> WalletResult<Vec<TokenBalance>> {
        Ok(self.tokens.clone())
    }
    async fn get_token_metadata(&self, _contract: &str) -> WalletResult<TokenMetadata> {
        Ok(TokenMetadata {
            name: Some("Tether USD".to_string()),
            symbol: Some("USDT".to_string()),
            decimals: Some(6),
        })
    }
    async fn get_transaction_history(
        &self,
        _address: &Address,
        _limit: usize,
    ) -> WalletResult<Vec<TransactionRecord>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct FakeRelay {
    responses: Mutex<Vec<(String, Value)>>,
}

impl PairingRelay for FakeRelay {
    async fn initialize(&self, _metadata: &RelayMetadata) -> WalletResult<()> {
        Ok(())
    }
    async fn pair(&self, _uri: &str) -> WalletResult<()> {
        Ok(())
    }
    async fn approve_session(
        &self,
        proposal: &SessionProposal,
        grant: &SessionGrant,
    ) -> WalletResult<PairingSession> {
        Ok(PairingSession {
            topic: format!("session-{}", proposal.id),
            peer: proposal.proposer.clone(),
            grant: grant.clone(),
        })
    }
    async fn reject_session(
        &self,
        _proposal: &SessionProposal,
        _reason: DisconnectReason,
    ) -> WalletResult<()> {
        Ok(())
    }
    async fn respond(&self, topic: &str, response: Value) -> WalletResult<()> {
        self.responses.lock().push((topic.to_string(), response));
        Ok(())
    }
    async fn disconnect_session(
        &self,
        _topic: &str,
        _reason: DisconnectReason,
    ) -> WalletResult<()> {
        Ok(())
    }
    async fn shutdown(&self) -> WalletResult<()> {
        Ok(())
    }
}

fn new_engine(client: StubClient) -> WalletEngine<StubClient, FakeRelay> {
    WalletEngine::new(Arc::new(MemoryStore::new()), client, FakeRelay::default()).unwrap()
}

fn backup_answers(
    engine: &WalletEngine<StubClient, FakeRelay>,
    positions: &[usize],
) -> Vec<BackupAnswer> {
    let phrase = engine.export_phrase().unwrap();
    let words: Vec<&str> = phrase.split_whitespace().collect();
    positions
        .iter()
        .map(|&p| BackupAnswer {
            position: p,
            word: words[p].to_string(),
        })
        .collect()
}

// Scenario A: create, verify backup, end up unlocked

#[tokio::test]
async fn create_backup_and_unlock_flow() {
    let engine = new_engine(StubClient::funded());

    let address = engine.create_wallet(12, PASSWORD).await.unwrap();
    assert!(address.starts_with("0x"));
    assert_eq!(address.len(), 42);

    let status = engine.status();
    assert!(status.needs_backup);
    assert!(!status.has_backed_up);
    assert!(!status.is_unlocked);

    let positions = engine.backup_challenge().unwrap();
    assert_eq!(positions.len(), 3);

    // A wrong word leaves the flags untouched
    let mut wrong = backup_answers(&engine, &positions);
    wrong[0].word = "zebra".to_string();
    assert!(engine.verify_backup(wrong).is_err());
    assert!(engine.status().needs_backup);

    engine
        .verify_backup(backup_answers(&engine, &positions))
        .unwrap();
    let status = engine.status();
    assert!(!status.needs_backup);
    assert!(status.has_backed_up);
    assert!(status.is_unlocked);

    // Lock then unlock with the password round-trips through the vault
    engine.lock();
    assert!(!engine.status().is_unlocked);
    assert!(engine.unlock("WrongPassword1!").await.is_err());
    engine.unlock(PASSWORD).await.unwrap();
    assert!(engine.status().is_unlocked);
}

// Scenario B: native transfer of "1.0" moves 10^18 base units

#[tokio::test]
async fn native_transfer_scales_to_base_units() {
    let engine = new_engine(StubClient::funded());
    engine.import_wallet(PHRASE, PASSWORD).await.unwrap();
    engine.refresh_balance().await.unwrap();

    let hash = engine
        .send_transaction(RECIPIENT, "1.0", None)
        .await
        .unwrap();
    assert!(hash.starts_with("0xhash"));
    assert!(!engine.is_sending());
    assert!(engine.last_send_error().is_none());
}

// Scenario C: 6-decimal token send becomes a contract call, not a value transfer

#[tokio::test]
async fn token_transfer_uses_contract_call() {
    let contract = "0xdac17f958d2ee523a2206206994597c13d831ec7";
    let engine = new_engine(StubClient {
        balance: Mutex::new(10_u128.pow(18)),
        tokens: vec![TokenBalance {
            contract_address: contract.to_string(),
            balance: 100_000_000,
        }],
        ..StubClient::default()
    });
    engine.import_wallet(PHRASE, PASSWORD).await.unwrap();
    engine.refresh_tokens().await.unwrap();

    let tokens = engine.tokens();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].symbol, "USDT");
    assert_eq!(tokens[0].balance, "100");

    engine
        .send_transaction(RECIPIENT, "50.0", Some(contract))
        .await
        .unwrap();

    // Exceeding the held amount never reaches broadcast
    let err = engine
        .send_transaction(RECIPIENT, "500", Some(contract))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds(_)));
    assert_eq!(engine.last_send_error().unwrap(), err.to_string());
}

// Scenario D: approve a session while locked, then fail the request dispatch

#[tokio::test]
async fn pairing_flow_respects_lock_state() {
    let engine = new_engine(StubClient::funded());
    engine.import_wallet(PHRASE, PASSWORD).await.unwrap();
    engine.lock();

    engine
        .initialize_pairing("Basalt Wallet", "https://example.invalid")
        .await
        .unwrap();
    engine.pair("wc:topic@2?relay-protocol=irn").await.unwrap();

    engine.handle_relay_event(RelayEvent::Proposal(SessionProposal {
        id: 1,
        pairing_topic: "pairing-1".to_string(),
        proposer: Default::default(),
    }));

    // Approving a session only exposes the address; no unlock needed
    let session = engine.approve_session(1).await.unwrap();
    assert_eq!(
        session.grant.accounts,
        vec![format!("eip155:11155111:{}", PHRASE_ADDRESS)]
    );

    engine.handle_relay_event(RelayEvent::Request(SessionRequest {
        id: 2,
        topic: session.topic.clone(),
        chain_id: "eip155:11155111".to_string(),
        method: "eth_sendTransaction".to_string(),
        params: serde_json::json!([{ "to": RECIPIENT, "value": "0xde0b6b3a7640000" }]),
    }));

    let err = engine.approve_request().await.unwrap_err();
    assert!(matches!(err, WalletError::AuthFailure));

    // Unlocked, the same pending request goes through
    engine.unlock(PASSWORD).await.unwrap();
    let result = engine.approve_request().await.unwrap();
    assert!(result.as_str().unwrap().starts_with("0xhash"));
    assert!(engine.pending_request().is_none());

    engine.disconnect_session(&session.topic).await.unwrap();
    assert!(engine.get_active_sessions().is_empty());
}

// Personal-sign request round-trips a 65-byte signature to the relay

#[tokio::test]
async fn personal_sign_request_responds_over_relay() {
    let engine = new_engine(StubClient::funded());
    engine.import_wallet(PHRASE, PASSWORD).await.unwrap();

    engine
        .initialize_pairing("Basalt Wallet", "https://example.invalid")
        .await
        .unwrap();
    engine.handle_relay_event(RelayEvent::Proposal(SessionProposal {
        id: 1,
        pairing_topic: "pairing-1".to_string(),
        proposer: Default::default(),
    }));
    let session = engine.approve_session(1).await.unwrap();

    engine.handle_relay_event(RelayEvent::Request(SessionRequest {
        id: 3,
        topic: session.topic,
        chain_id: "eip155:11155111".to_string(),
        method: "personal_sign".to_string(),
        params: serde_json::json!(["0x68656c6c6f", PHRASE_ADDRESS]),
    }));

    let result = engine.approve_request().await.unwrap();
    let signature = result.as_str().unwrap();
    assert_eq!(signature.len(), 2 + 65 * 2);

    // The host-side signature matches what went over the relay
    let direct = engine.sign_personal_message("0x68656c6c6f").unwrap();
    assert_eq!(signature, direct);
}

// Wallet state and the encrypted payload survive an engine restart on disk

#[tokio::test]
async fn wallet_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()).unwrap());

    {
        let engine = WalletEngine::new(
            Arc::clone(&store),
            StubClient::funded(),
            FakeRelay::default(),
        )
        .unwrap();
        engine.import_wallet(PHRASE, PASSWORD).await.unwrap();
        engine.switch_network("Polygon Mumbai").unwrap();
    }

    let engine = WalletEngine::new(store, StubClient::funded(), FakeRelay::default()).unwrap();
    let status = engine.status();
    assert!(status.is_created);
    assert!(status.has_backed_up);
    assert!(!status.is_unlocked, "restart always comes up locked");
    assert_eq!(engine.active_network().name, "Polygon Mumbai");

    engine.unlock(PASSWORD).await.unwrap();
    assert_eq!(
        engine.status().address.unwrap().to_lowercase(),
        PHRASE_ADDRESS
    );
}

// A legacy payload migrates to the current scheme on first unlock

#[tokio::test]
async fn legacy_payload_migrates_on_unlock() {
    use basalt_wallet_lib::vault;
    use secrecy::SecretString;

    let dir = tempfile::tempdir().unwrap();
    let file_store = Arc::new(FileStore::new(dir.path()).unwrap());
    let wallet_store = WalletStore::new(Arc::clone(&file_store) as Arc<dyn KeyValueStore>);

    let password = SecretString::from(PASSWORD.to_string());
    let payload = vault::encrypt_v1(PHRASE, &password).unwrap();
    wallet_store.store_payload(&payload).unwrap();
    wallet_store.set_address(PHRASE_ADDRESS).unwrap();
    wallet_store.set_needs_backup(false).unwrap();
    wallet_store.set_has_backed_up(true).unwrap();

    let engine = WalletEngine::new(
        file_store as Arc<dyn KeyValueStore>,
        StubClient::funded(),
        FakeRelay::default(),
    )
    .unwrap();
    assert!(engine.storage_probe().unwrap().needs_migration);

    engine.unlock(PASSWORD).await.unwrap();
    let probe = engine.storage_probe().unwrap();
    assert!(!probe.needs_migration);
    assert_eq!(probe.version, Some(2));

    // The old password keeps working against the migrated payload
    engine.lock();
    engine.unlock(PASSWORD).await.unwrap();
}

// Wipe drops the payload, flags, and caches

#[tokio::test]
async fn wipe_resets_everything() {
    let engine = new_engine(StubClient::funded());
    engine.import_wallet(PHRASE, PASSWORD).await.unwrap();
    engine.refresh_balance().await.unwrap();

    engine.wipe().unwrap();
    let status = engine.status();
    assert!(!status.is_created);
    assert!(status.address.is_none());
    assert_eq!(engine.balance().balance, "0");
    assert!(!engine.storage_probe().unwrap().has_wallet);
}
