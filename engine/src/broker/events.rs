/// Typed broadcast channels for relay-driven events
///
/// Each event kind gets its own channel so subscribers pick exactly what
/// they care about. Broadcast semantics give every live subscriber every
/// event in order; a lagging or dropped subscriber never blocks the rest.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events per channel before a slow subscriber starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identity the proposing application advertises during pairing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
}

/// An inbound request to establish a paired session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    pub id: u64,
    pub pairing_topic: String,
    pub proposer: PeerMetadata,
}

/// An in-session signing request from a paired application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub id: u64,
    pub topic: String,
    /// CAIP-2 chain reference, e.g. `eip155:11155111`
    pub chain_id: String,
    pub method: String,
    pub params: Value,
}

/// A session torn down by either side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosed {
    pub topic: String,
}

/// Everything the relay can push at the broker
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Proposal(SessionProposal),
    Request(SessionRequest),
    Delete { topic: String },
}

/// Per-kind broadcast senders held by the broker
pub struct BrokerEvents {
    proposals: broadcast::Sender<SessionProposal>,
    requests: broadcast::Sender<SessionRequest>,
    closures: broadcast::Sender<SessionClosed>,
}

impl BrokerEvents {
    pub fn new() -> Self {
        let (proposals, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (requests, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (closures, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        BrokerEvents {
            proposals,
            requests,
            closures,
        }
    }

    pub fn subscribe_proposals(&self) -> broadcast::Receiver<SessionProposal> {
        self.proposals.subscribe()
    }

    pub fn subscribe_requests(&self) -> broadcast::Receiver<SessionRequest> {
        self.requests.subscribe()
    }

    pub fn subscribe_closures(&self) -> broadcast::Receiver<SessionClosed> {
        self.closures.subscribe()
    }

    // send only fails when no subscriber is registered, which is fine

    pub(crate) fn emit_proposal(&self, proposal: SessionProposal) {
        let _ = self.proposals.send(proposal);
    }

    pub(crate) fn emit_request(&self, request: SessionRequest) {
        let _ = self.requests.send(request);
    }

    pub(crate) fn emit_closure(&self, closed: SessionClosed) {
        let _ = self.closures.send(closed);
    }
}

impl Default for BrokerEvents {
    fn default() -> Self {
        Self::new()
    }
}
