//! # Domain Entities
//!
//! Network configuration, channel state and the channel record tracked
//! through a deposit/withdraw cycle.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::amount::decimal;
use super::errors::OrchestratorError;
use super::value_objects::{Acknowledgement, Address, ChainId, ChannelId, ChannelStatus};

// =============================================================================
// NETWORK CONFIGURATION
// =============================================================================

/// Contracts deployed on one supported chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContracts {
    /// Chain identifier.
    pub chain_id: ChainId,
    /// Custody contract holding deposits and channels.
    pub custody: Address,
    /// Adjudicator validating channel states.
    pub adjudicator: Address,
}

/// Network configuration fetched from the node after authentication.
///
/// Read-only between (re)authentications; replaced wholesale after each one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Broker address owning the unified ledger.
    pub broker: Address,
    /// Supported chains.
    pub chains: Vec<ChainContracts>,
}

impl NetworkConfig {
    /// Contracts for `chain_id`, if supported.
    pub fn contracts_for(&self, chain_id: ChainId) -> Option<&ChainContracts> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Supported chain ids.
    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.chain_id.0).collect()
    }
}

/// Asset known to the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Token contract.
    pub token: Address,
    /// Chain the token lives on.
    pub chain_id: ChainId,
    /// Ledger symbol (e.g. "usdc").
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
}

// =============================================================================
// SESSION ALLOWANCES
// =============================================================================

/// Spending cap granted to a session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    /// Ledger asset symbol.
    pub asset: String,
    /// Maximum amount the key may move.
    #[serde(with = "decimal")]
    pub amount: U256,
}

// =============================================================================
// CHANNEL STATE
// =============================================================================

/// Purpose of a signed channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateIntent {
    /// Channel creation.
    Initialize,
    /// Custody funds locked into the channel.
    Resize,
    /// Channel funds released to the unified ledger.
    Allocate,
    /// Final state for a cooperative close.
    Finalize,
}

/// One participant's share of a channel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Recipient.
    pub destination: Address,
    /// Token contract.
    pub token: Address,
    /// Share in base units.
    #[serde(with = "decimal")]
    pub amount: U256,
}

/// A node-signed channel state, submitted on chain as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    /// Purpose of the state.
    pub intent: StateIntent,
    /// Monotonic version.
    pub version: u64,
    /// Opaque application data (hex).
    #[serde(default)]
    pub state_data: String,
    /// Participant shares.
    pub allocations: Vec<Allocation>,
    /// Node signature over the state (hex).
    #[serde(default)]
    pub server_signature: String,
}

impl ChannelState {
    /// Sum of the shares destined for `who`.
    pub fn allocated_to(&self, who: &Address) -> U256 {
        self.allocations
            .iter()
            .filter(|a| &a.destination == who)
            .fold(U256::zero(), |acc, a| acc.saturating_add(a.amount))
    }
}

/// Fixed parameters of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Wallet then broker.
    pub participants: Vec<Address>,
    /// Adjudicator contract.
    pub adjudicator: Address,
    /// Challenge period in seconds.
    pub challenge: u64,
    /// Creation nonce.
    pub nonce: u64,
}

// =============================================================================
// CHANNEL
// =============================================================================

/// Acknowledgements recorded for a channel's asynchronous waits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelAcks {
    /// Node's open notification after creation.
    pub opened: Option<Acknowledgement>,
    /// Node's notification after the lock resize.
    pub locked: Option<Acknowledgement>,
    /// Positive unified balance after allocation.
    pub funded: Option<Acknowledgement>,
}

/// A payment channel tracked by this client.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel id assigned by the node.
    pub id: ChannelId,
    /// Chain the channel lives on.
    pub chain_id: ChainId,
    /// Token locked in the channel.
    pub token: Address,
    /// Amount deposited for this channel.
    pub amount: U256,
    /// Local lifecycle status.
    pub status: ChannelStatus,
    /// Latest node-signed state.
    pub last_state: Option<ChannelState>,
    /// Acknowledgements observed so far.
    pub acks: ChannelAcks,
}

impl Channel {
    /// New channel record in `Creating`.
    pub fn new(id: ChannelId, chain_id: ChainId, token: Address, amount: U256) -> Self {
        Self {
            id,
            chain_id,
            token,
            amount,
            status: ChannelStatus::Creating,
            last_state: None,
            acks: ChannelAcks::default(),
        }
    }

    /// Move to `target`, refusing transitions the status machine forbids.
    pub fn transition_to(&mut self, target: ChannelStatus) -> Result<(), OrchestratorError> {
        if !self.status.can_transition_to(target) {
            return Err(OrchestratorError::InvalidChannelTransition {
                channel: self.id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }
}
