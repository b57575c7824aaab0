/// Pairing broker: session and request lifecycle over a pub/sub relay
///
/// Mediates between external applications and the wallet without ever
/// handing out key material. The relay transport is injected, so tests
/// run against an in-memory fake.
pub mod events;
pub mod methods;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::Address;
use crate::errors::{WalletError, WalletResult};
use crate::rpc::NetworkClient;
use crate::session::WalletSession;
use crate::signer::TransactionSigner;
use crate::validation::InputValidator;

pub use events::{
    BrokerEvents, PeerMetadata, RelayEvent, SessionClosed, SessionProposal, SessionRequest,
};
pub use methods::RequestMethod;

/// Standard relay reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisconnectReason {
    pub code: u32,
    pub message: &'static str,
}

pub const USER_REJECTED: DisconnectReason = DisconnectReason {
    code: 5000,
    message: "User rejected.",
};
pub const USER_REJECTED_METHODS: DisconnectReason = DisconnectReason {
    code: 5002,
    message: "User rejected methods.",
};
pub const USER_DISCONNECTED: DisconnectReason = DisconnectReason {
    code: 6000,
    message: "User disconnected.",
};

/// The capability grant finalized when a proposal is approved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub chains: Vec<String>,
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

impl SessionGrant {
    /// Scope a grant to the single wallet account on the active chain
    pub fn for_account(chain_id: u64, address: &Address) -> Self {
        SessionGrant {
            chains: vec![format!("eip155:{}", chain_id)],
            accounts: vec![format!("eip155:{}:{}", chain_id, address.to_hex())],
            methods: RequestMethod::allowed_names(),
            events: vec!["chainChanged".to_string(), "accountsChanged".to_string()],
        }
    }
}

/// An established pairing, keyed by relay topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingSession {
    pub topic: String,
    pub peer: PeerMetadata,
    pub grant: SessionGrant,
}

/// Identity this wallet advertises to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub project_id: String,
    pub client_id: String,
}

/// Relay transport operations, implemented over the wire by the host and
/// by an in-memory fake in tests
#[allow(async_fn_in_trait)]
pub trait PairingRelay {
    async fn initialize(&self, metadata: &RelayMetadata) -> WalletResult<()>;
    async fn pair(&self, uri: &str) -> WalletResult<()>;
    async fn approve_session(
        &self,
        proposal: &SessionProposal,
        grant: &SessionGrant,
    ) -> WalletResult<PairingSession>;
    async fn reject_session(
        &self,
        proposal: &SessionProposal,
        reason: DisconnectReason,
    ) -> WalletResult<()>;
    /// Deliver a JSON-RPC response for an in-session request
    async fn respond(&self, topic: &str, response: Value) -> WalletResult<()>;
    async fn disconnect_session(&self, topic: &str, reason: DisconnectReason) -> WalletResult<()>;
    async fn shutdown(&self) -> WalletResult<()>;
}

/// The single slot a not-yet-decided proposal or request occupies.
///
/// A newly arriving item overwrites a still-pending one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PendingRequest {
    Proposal(SessionProposal),
    Request(SessionRequest),
}

/// A dispatched request, with the method so callers can follow up
/// (eth_sendTransaction triggers a balance refresh)
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedRequest {
    pub method: RequestMethod,
    pub result: Value,
}

#[derive(Default)]
struct BrokerState {
    initialized: bool,
    sessions: HashMap<String, PairingSession>,
    proposals: HashMap<u64, SessionProposal>,
    pending: Option<PendingRequest>,
}

pub struct PairingBroker<R> {
    relay: R,
    session: Arc<WalletSession>,
    validator: InputValidator,
    state: Mutex<BrokerState>,
    events: BrokerEvents,
    client_id: String,
}

impl<R: PairingRelay> PairingBroker<R> {
    pub fn new(relay: R, session: Arc<WalletSession>) -> WalletResult<Self> {
        Ok(PairingBroker {
            relay,
            session,
            validator: InputValidator::new()?,
            state: Mutex::new(BrokerState::default()),
            events: BrokerEvents::new(),
            client_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn events(&self) -> &BrokerEvents {
        &self.events
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn pending_request(&self) -> Option<PendingRequest> {
        self.state.lock().pending.clone()
    }

    /// Establish the relay client. Calling again while initialized is a no-op.
    pub async fn initialize(&self, name: &str, url: &str, project_id: &str) -> WalletResult<()> {
        if self.state.lock().initialized {
            return Ok(());
        }

        let metadata = RelayMetadata {
            name: name.to_string(),
            description: "Non-custodial wallet".to_string(),
            url: url.to_string(),
            project_id: project_id.to_string(),
            client_id: self.client_id.clone(),
        };
        self.relay.initialize(&metadata).await?;

        self.state.lock().initialized = true;
        log::info!("Pairing relay initialized as {}", self.client_id);
        Ok(())
    }

    /// Begin a pairing handshake from a scanned/pasted URI
    pub async fn pair(&self, uri: &str) -> WalletResult<()> {
        self.require_initialized()?;
        self.validator.validate_pairing_uri(uri)?;
        self.relay.pair(uri).await
    }

    /// Feed a relay-originated event into the broker.
    ///
    /// The host's relay driver calls this for every inbound message; the
    /// broker re-emits it on the typed channels after updating state.
    pub fn handle_relay_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::Proposal(proposal) => {
                let mut state = self.state.lock();
                if let Some(previous) = &state.pending {
                    log::warn!("Overwriting undecided pending item: {:?}", previous);
                }
                state.proposals.insert(proposal.id, proposal.clone());
                state.pending = Some(PendingRequest::Proposal(proposal.clone()));
                drop(state);
                self.events.emit_proposal(proposal);
            }
            RelayEvent::Request(request) => {
                let mut state = self.state.lock();
                if let Some(previous) = &state.pending {
                    log::warn!("Overwriting undecided pending item: {:?}", previous);
                }
                state.pending = Some(PendingRequest::Request(request.clone()));
                drop(state);
                self.events.emit_request(request);
            }
            RelayEvent::Delete { topic } => {
                let mut state = self.state.lock();
                state.sessions.remove(&topic);
                if pending_topic(&state.pending) == Some(topic.as_str()) {
                    state.pending = None;
                }
                drop(state);
                self.events.emit_closure(SessionClosed { topic });
            }
        }
    }

    /// Approve a session proposal, granting access to the wallet address
    /// on the given chain. Requires a created wallet but not an unlocked
    /// one; approving exposes the address only.
    pub async fn approve_session(
        &self,
        proposal_id: u64,
        chain_id: u64,
    ) -> WalletResult<PairingSession> {
        self.require_initialized()?;
        let address = self
            .session
            .address()
            .ok_or_else(|| WalletError::NotFound("No wallet exists".to_string()))?;

        let proposal = self.take_proposal(proposal_id)?;
        let grant = SessionGrant::for_account(chain_id, &address);
        let session = self.relay.approve_session(&proposal, &grant).await?;

        let mut state = self.state.lock();
        state.proposals.remove(&proposal_id);
        state
            .sessions
            .insert(session.topic.clone(), session.clone());
        if pending_proposal_id(&state.pending) == Some(proposal_id) {
            state.pending = None;
        }
        log::info!("Session approved: {}", session.topic);
        Ok(session)
    }

    /// Decline a session proposal with the standard rejection code
    pub async fn reject_session(&self, proposal_id: u64) -> WalletResult<()> {
        self.require_initialized()?;
        let proposal = self.take_proposal(proposal_id)?;
        self.relay.reject_session(&proposal, USER_REJECTED).await?;

        let mut state = self.state.lock();
        state.proposals.remove(&proposal_id);
        if pending_proposal_id(&state.pending) == Some(proposal_id) {
            state.pending = None;
        }
        Ok(())
    }

    /// Dispatch the pending in-session request and respond over the relay.
    ///
    /// Requires the wallet to be unlocked; the paired application never
    /// sees anything but the resulting signature/hash.
    pub async fn approve_request<C: NetworkClient>(
        &self,
        signer: &TransactionSigner,
        client: &C,
    ) -> WalletResult<ApprovedRequest> {
        let request = self.pending_session_request()?;
        if !self.session.is_unlocked() {
            return Err(WalletError::AuthFailure);
        }

        let method: RequestMethod = request.method.parse()?;
        let chain_id = numeric_chain_id(&request.chain_id)?;
        let wallet_address = self.session.address().map(|a| a.to_hex());

        let result = match method {
            RequestMethod::EthSign | RequestMethod::PersonalSign => {
                let message = message_param(&request.params, wallet_address.as_deref())?;
                Value::String(signer.sign_personal(&message)?)
            }
            RequestMethod::EthSignTypedData | RequestMethod::EthSignTypedDataV4 => {
                let typed = typed_param(&request.params, wallet_address.as_deref())?;
                Value::String(signer.sign_typed(&typed)?)
            }
            RequestMethod::EthSendTransaction => {
                let params = first_object_param(&request.params)?;
                let hash = signer
                    .send_request_transaction(client, chain_id, &params)
                    .await?;
                Value::String(hash)
            }
            RequestMethod::EthSignTransaction => {
                let params = first_object_param(&request.params)?;
                let raw = signer
                    .sign_request_transaction(client, chain_id, &params)
                    .await?;
                Value::String(format!("0x{}", hex::encode(raw)))
            }
        };

        let response = serde_json::json!({
            "id": request.id,
            "jsonrpc": "2.0",
            "result": result,
        });
        self.relay.respond(&request.topic, response).await?;

        let mut state = self.state.lock();
        if pending_request_id(&state.pending) == Some(request.id) {
            state.pending = None;
        }
        Ok(ApprovedRequest { method, result })
    }

    /// Decline the pending in-session request
    pub async fn reject_request(&self) -> WalletResult<()> {
        let request = self.pending_session_request()?;
        let response = serde_json::json!({
            "id": request.id,
            "jsonrpc": "2.0",
            "error": {
                "code": USER_REJECTED_METHODS.code,
                "message": USER_REJECTED_METHODS.message,
            },
        });
        self.relay.respond(&request.topic, response).await?;

        let mut state = self.state.lock();
        if pending_request_id(&state.pending) == Some(request.id) {
            state.pending = None;
        }
        Ok(())
    }

    /// Tear down an active session
    pub async fn disconnect_session(&self, topic: &str) -> WalletResult<()> {
        self.require_initialized()?;
        if !self.state.lock().sessions.contains_key(topic) {
            return Err(WalletError::SessionNotFound(topic.to_string()));
        }

        self.relay
            .disconnect_session(topic, USER_DISCONNECTED)
            .await?;

        let mut state = self.state.lock();
        state.sessions.remove(topic);
        if pending_topic(&state.pending) == Some(topic) {
            state.pending = None;
        }
        drop(state);
        self.events.emit_closure(SessionClosed {
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Current topic-keyed sessions; empty (not an error) when uninitialized
    pub fn get_active_sessions(&self) -> Vec<PairingSession> {
        self.state.lock().sessions.values().cloned().collect()
    }

    /// Disconnect the relay and drop all broker state; a later
    /// `initialize` starts fresh
    pub async fn shutdown(&self) -> WalletResult<()> {
        if !self.state.lock().initialized {
            return Ok(());
        }
        self.relay.shutdown().await?;
        *self.state.lock() = BrokerState::default();
        log::info!("Pairing relay shut down");
        Ok(())
    }

    fn require_initialized(&self) -> WalletResult<()> {
        if !self.state.lock().initialized {
            return Err(WalletError::NotInitialized);
        }
        Ok(())
    }

    fn take_proposal(&self, proposal_id: u64) -> WalletResult<SessionProposal> {
        self.state
            .lock()
            .proposals
            .get(&proposal_id)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("Unknown proposal: {}", proposal_id)))
    }

    fn pending_session_request(&self) -> WalletResult<SessionRequest> {
        let state = self.state.lock();
        match &state.pending {
            Some(PendingRequest::Request(request)) => {
                if !state.sessions.contains_key(&request.topic) {
                    return Err(WalletError::SessionNotFound(request.topic.clone()));
                }
                Ok(request.clone())
            }
            _ => Err(WalletError::NotFound(
                "No pending session request".to_string(),
            )),
        }
    }
}

fn pending_topic(pending: &Option<PendingRequest>) -> Option<&str> {
    match pending {
        Some(PendingRequest::Proposal(p)) => Some(p.pairing_topic.as_str()),
        Some(PendingRequest::Request(r)) => Some(r.topic.as_str()),
        None => None,
    }
}

fn pending_proposal_id(pending: &Option<PendingRequest>) -> Option<u64> {
    match pending {
        Some(PendingRequest::Proposal(p)) => Some(p.id),
        _ => None,
    }
}

fn pending_request_id(pending: &Option<PendingRequest>) -> Option<u64> {
    match pending {
        Some(PendingRequest::Request(r)) => Some(r.id),
        _ => None,
    }
}

/// `eip155:11155111` -> `11155111`
fn numeric_chain_id(caip2: &str) -> WalletResult<u64> {
    caip2
        .strip_prefix("eip155:")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| {
            WalletError::ValidationError(format!("Unsupported chain reference: {}", caip2))
        })
}

/// Pull the message out of sign-request params; dApps place it in either
/// position, with the account address in the other
fn message_param(params: &Value, wallet_address: Option<&str>) -> WalletResult<String> {
    let entries = params
        .as_array()
        .ok_or_else(|| WalletError::ValidationError("Malformed request params".to_string()))?;

    let strings: Vec<&str> = entries.iter().filter_map(Value::as_str).collect();
    let message = strings
        .iter()
        .find(|s| {
            wallet_address
                .map(|addr| !s.eq_ignore_ascii_case(addr))
                .unwrap_or(true)
        })
        .or_else(|| strings.first())
        .ok_or_else(|| {
            WalletError::ValidationError("Sign request carries no message".to_string())
        })?;
    Ok(message.to_string())
}

/// Typed-data payload: an object param, or a JSON string that parses to one
fn typed_param(params: &Value, wallet_address: Option<&str>) -> WalletResult<Value> {
    let entries = params
        .as_array()
        .ok_or_else(|| WalletError::ValidationError("Malformed request params".to_string()))?;

    for entry in entries {
        if entry.is_object() {
            return Ok(entry.clone());
        }
        if let Some(s) = entry.as_str() {
            if wallet_address.is_some_and(|addr| s.eq_ignore_ascii_case(addr)) {
                continue;
            }
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                if parsed.is_object() {
                    return Ok(parsed);
                }
            }
        }
    }
    Err(WalletError::ValidationError(
        "Typed data request carries no payload".to_string(),
    ))
}

fn first_object_param(params: &Value) -> WalletResult<Value> {
    params
        .as_array()
        .and_then(|entries| entries.iter().find(|e| e.is_object()))
        .cloned()
        .ok_or_else(|| {
            WalletError::ValidationError("Transaction request carries no fields".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TransactionRecord;
    use crate::rpc::{TokenBalance, TokenMetadata};
    use crate::storage::{MemoryStore, WalletStore};
    use secrecy::SecretString;

    const TEST_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const TEST_ADDRESS: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";

    #[derive(Default)]
    struct FakeRelay {
        responses: Mutex<Vec<(String, Value)>>,
        disconnects: Mutex<Vec<String>>,
        rejections: Mutex<Vec<u64>>,
        paired: Mutex<Vec<String>>,
    }

    impl PairingRelay for FakeRelay {
        async fn initialize(&self, _metadata: &RelayMetadata) -> WalletResult<()> {
            Ok(())
        }
        async fn pair(&self, uri: &str) -> WalletResult<()> {
            self.paired.lock().push(uri.to_string());
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
            proposal: &SessionProposal,
            reason: DisconnectReason,
        ) -> WalletResult<()> {
            assert_eq!(reason.code, 5000);
            self.rejections.lock().push(proposal.id);
            Ok(())
        }
        async fn respond(&self, topic: &str, response: Value) -> WalletResult<()> {
            self.responses.lock().push((topic.to_string(), response));
            Ok(())
        }
        async fn disconnect_session(
            &self,
            topic: &str,
            reason: DisconnectReason,
        ) -> WalletResult<()> {
            assert_eq!(reason.code, 6000);
            self.disconnects.lock().push(topic.to_string());
            Ok(())
        }
        async fn shutdown(&self) -> WalletResult<()> {
            Ok(())
        }
    }

    struct FakeClient;

    impl NetworkClient for FakeClient {
        async fn get_balance(&self, _address: &Address) -> WalletResult<u128> {
            Ok(10_u128.pow(18))
        }
        async fn get_transaction_count(&self, _address: &Address) -> WalletResult<u64> {
            Ok(0)
        }
        async fn gas_price(&self) -> WalletResult<u128> {
            Ok(1_000_000_000)
        }
        async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<String> {
            Ok(format!("0x{}", hex::encode(crate::keys::keccak256(raw))))
        }
        async fn call(&self, _to: &Address, _data: &[u8]) -> WalletResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn await_confirmation(&self, _tx_hash: &str) -> WalletResult<u64> {
            Ok(1)
        }
        async fn get_token_balances(
            &self,
            _address: &Address,
        ) -> WalletResult<Vec<TokenBalance>> {
            Ok(Vec::new())
        }
        async fn get_token_metadata(&self, _contract: &str) -> WalletResult<TokenMetadata> {
            Ok(TokenMetadata {
                name: None,
                symbol: None,
                decimals: None,
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

    fn wallet_session(unlocked: bool) -> Arc<WalletSession> {
        let store = WalletStore::new(Arc::new(MemoryStore::new()));
        let session = Arc::new(WalletSession::new(store, 5).unwrap());
        session
            .import(TEST_PHRASE, &SecretString::from("Str0ngPassw0rd!".to_string()))
            .unwrap();
        if !unlocked {
            session.lock();
        }
        session
    }

    fn proposal(id: u64) -> SessionProposal {
        SessionProposal {
            id,
            pairing_topic: format!("pairing-{}", id),
            proposer: PeerMetadata {
                name: "Test dApp".to_string(),
                ..PeerMetadata::default()
            },
        }
    }

    fn sign_request(id: u64, topic: &str, method: &str, params: Value) -> SessionRequest {
        SessionRequest {
            id,
            topic: topic.to_string(),
            chain_id: "eip155:11155111".to_string(),
            method: method.to_string(),
            params,
        }
    }

    async fn initialized_broker(unlocked: bool) -> (PairingBroker<FakeRelay>, TransactionSigner) {
        let session = wallet_session(unlocked);
        let signer = TransactionSigner::new(Arc::clone(&session)).unwrap();
        let broker = PairingBroker::new(FakeRelay::default(), session).unwrap();
        broker
            .initialize("Basalt Wallet", "https://example.invalid", "project")
            .await
            .unwrap();
        (broker, signer)
    }

    #[tokio::test]
    async fn test_pair_requires_initialize() {
        let session = wallet_session(true);
        let broker = PairingBroker::new(FakeRelay::default(), session).unwrap();
        let err = broker.pair("wc:abc123@2?relay").await.unwrap_err();
        assert!(matches!(err, WalletError::NotInitialized));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (broker, _signer) = initialized_broker(true).await;
        broker
            .initialize("Basalt Wallet", "https://example.invalid", "project")
            .await
            .unwrap();
        assert!(broker.is_initialized());
    }

    #[tokio::test]
    async fn test_pair_validates_uri_scheme() {
        let (broker, _signer) = initialized_broker(true).await;
        assert!(broker.pair("http://not-a-pairing").await.is_err());
        broker.pair("wc:abc123@2?relay").await.unwrap();
        assert_eq!(broker.relay.paired.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_approve_session_builds_scoped_grant() {
        let (broker, _signer) = initialized_broker(false).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));

        // Approving needs a created wallet but not an unlocked one
        let session = broker.approve_session(1, 11155111).await.unwrap();
        assert_eq!(session.grant.chains, vec!["eip155:11155111"]);
        assert_eq!(
            session.grant.accounts,
            vec![format!("eip155:11155111:{}", TEST_ADDRESS)]
        );
        assert_eq!(session.grant.methods.len(), 6);
        assert_eq!(session.grant.events, vec!["chainChanged", "accountsChanged"]);

        assert!(broker.pending_request().is_none());
        assert_eq!(broker.get_active_sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_session_sends_5000() {
        let (broker, _signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(7)));

        broker.reject_session(7).await.unwrap();
        assert_eq!(broker.relay.rejections.lock().as_slice(), &[7]);
        assert!(broker.pending_request().is_none());
        assert!(broker.get_active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_new_pending_item_overwrites_old() {
        let (broker, _signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        broker.handle_relay_event(RelayEvent::Proposal(proposal(2)));

        match broker.pending_request().unwrap() {
            PendingRequest::Proposal(p) => assert_eq!(p.id, 2),
            other => panic!("unexpected pending item: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_dispatch_personal_sign() {
        let (broker, signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.handle_relay_event(RelayEvent::Request(sign_request(
            10,
            &session.topic,
            "personal_sign",
            serde_json::json!(["0x68656c6c6f", TEST_ADDRESS]),
        )));

        let approved = broker.approve_request(&signer, &FakeClient).await.unwrap();
        assert_eq!(approved.method, RequestMethod::PersonalSign);

        let responses = broker.relay.responses.lock();
        let (topic, response) = &responses[0];
        assert_eq!(topic, &session.topic);
        assert_eq!(response["id"], 10);
        assert_eq!(response["jsonrpc"], "2.0");
        let sig = response["result"].as_str().unwrap();
        assert_eq!(sig.len(), 2 + 65 * 2);
    }

    #[tokio::test]
    async fn test_request_while_locked_fails_before_dispatch() {
        let (broker, signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.session.lock();
        broker.handle_relay_event(RelayEvent::Request(sign_request(
            11,
            &session.topic,
            "eth_sendTransaction",
            serde_json::json!([{ "to": "0x1111111111111111111111111111111111111111", "value": "0x1" }]),
        )));

        let err = broker
            .approve_request(&signer, &FakeClient)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::AuthFailure));
        // Nothing went out over the relay
        assert!(broker.relay.responses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let (broker, signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.handle_relay_event(RelayEvent::Request(sign_request(
            12,
            &session.topic,
            "wallet_addEthereumChain",
            serde_json::json!([]),
        )));

        let err = broker
            .approve_request(&signer, &FakeClient)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::UnsupportedMethod(_)));
    }

    #[tokio::test]
    async fn test_send_transaction_request_broadcasts() {
        let (broker, signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.handle_relay_event(RelayEvent::Request(sign_request(
            13,
            &session.topic,
            "eth_sendTransaction",
            serde_json::json!([{ "to": "0x1111111111111111111111111111111111111111", "value": "0x1" }]),
        )));

        let approved = broker.approve_request(&signer, &FakeClient).await.unwrap();
        assert_eq!(approved.method, RequestMethod::EthSendTransaction);
        assert!(approved.result.as_str().unwrap().starts_with("0x"));
    }

    #[tokio::test]
    async fn test_reject_request_sends_5002() {
        let (broker, _signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.handle_relay_event(RelayEvent::Request(sign_request(
            14,
            &session.topic,
            "personal_sign",
            serde_json::json!(["0xdeadbeef"]),
        )));

        broker.reject_request().await.unwrap();
        let responses = broker.relay.responses.lock();
        let (_, response) = &responses[0];
        assert_eq!(response["error"]["code"], 5002);
        assert!(broker.pending_request().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_and_session_not_found() {
        let (broker, signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.disconnect_session(&session.topic).await.unwrap();
        assert!(broker.get_active_sessions().is_empty());

        let err = broker.disconnect_session(&session.topic).await.unwrap_err();
        assert!(matches!(err, WalletError::SessionNotFound(_)));

        // A request referencing the dead topic can no longer be approved
        broker.handle_relay_event(RelayEvent::Request(sign_request(
            15,
            &session.topic,
            "personal_sign",
            serde_json::json!(["0x00"]),
        )));
        let err = broker
            .approve_request(&signer, &FakeClient)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_session_delete_clears_pending() {
        let (broker, _signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        let session = broker.approve_session(1, 11155111).await.unwrap();

        broker.handle_relay_event(RelayEvent::Request(sign_request(
            16,
            &session.topic,
            "personal_sign",
            serde_json::json!(["0x00"]),
        )));
        broker.handle_relay_event(RelayEvent::Delete {
            topic: session.topic.clone(),
        });

        assert!(broker.pending_request().is_none());
        assert!(broker.get_active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_clears_state() {
        let (broker, _signer) = initialized_broker(true).await;
        broker.handle_relay_event(RelayEvent::Proposal(proposal(1)));
        broker.approve_session(1, 11155111).await.unwrap();

        broker.shutdown().await.unwrap();
        assert!(!broker.is_initialized());
        assert!(broker.get_active_sessions().is_empty());
        assert!(broker.pending_request().is_none());
    }

    #[tokio::test]
    async fn test_sessions_empty_when_uninitialized() {
        let session = wallet_session(true);
        let broker = PairingBroker::new(FakeRelay::default(), session).unwrap();
        assert!(broker.get_active_sessions().is_empty());
    }

    #[test]
    fn test_param_extraction_helpers() {
        let params = serde_json::json!(["0x6d7367", TEST_ADDRESS]);
        assert_eq!(
            message_param(&params, Some(TEST_ADDRESS)).unwrap(),
            "0x6d7367"
        );

        // Reversed order still finds the message
        let reversed = serde_json::json!([TEST_ADDRESS, "0x6d7367"]);
        assert_eq!(
            message_param(&reversed, Some(TEST_ADDRESS)).unwrap(),
            "0x6d7367"
        );

        let typed_inline = serde_json::json!([TEST_ADDRESS, { "primaryType": "Mail" }]);
        assert!(typed_param(&typed_inline, Some(TEST_ADDRESS))
            .unwrap()
            .is_object());

        let typed_string =
            serde_json::json!([TEST_ADDRESS, "{\"primaryType\":\"Mail\"}"]);
        assert!(typed_param(&typed_string, Some(TEST_ADDRESS))
            .unwrap()
            .is_object());

        assert_eq!(numeric_chain_id("eip155:80001").unwrap(), 80001);
        assert!(numeric_chain_id("cosmos:hub").is_err());
    }
}
