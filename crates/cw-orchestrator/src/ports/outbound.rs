//! # Outbound Ports
//!
//! Traits for the wallet, the chain, the credential store and the transport
//! to the clearing node.

use async_trait::async_trait;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{
    keccak256, Address, Allowance, CallKind, ChainId, ChannelId, ChannelParams, ChannelState,
    OrchestratorError, TxHash,
};

// =============================================================================
// WALLET
// =============================================================================

/// EIP-712 style typed data presented to the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    /// Domain name shown by the wallet.
    pub domain: String,
    /// Primary type.
    pub primary_type: String,
    /// Message body.
    pub message: Value,
}

impl TypedData {
    /// Session-key approval policy signed during authentication.
    pub fn session_policy(
        application: &str,
        challenge: &str,
        scope: &str,
        wallet: Address,
        session_key: Address,
        expires_at: u64,
        allowances: &[Allowance],
    ) -> Self {
        Self {
            domain: application.to_string(),
            primary_type: "Policy".to_string(),
            message: serde_json::json!({
                "challenge": challenge,
                "scope": scope,
                "wallet": wallet,
                "session_key": session_key,
                "expires_at": expires_at,
                "allowances": allowances,
            }),
        }
    }

    /// Digest the wallet signs.
    pub fn digest(&self) -> [u8; 32] {
        // Serializing a Value-bearing struct cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        keccak256(&bytes)
    }
}

/// Wallet or chain refusal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// User declined.
    #[error("rejected by user: {0}")]
    Rejected(String),
    /// Wallet or RPC failure.
    #[error("signer failure: {0}")]
    Failed(String),
}

/// An ABI-described contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// `approve(address,uint256)` on the token.
    Approve {
        /// Chain
        chain_id: ChainId,
        /// Token contract
        token: Address,
        /// Custody contract
        spender: Address,
        /// Allowance
        amount: U256,
    },
    /// `deposit(address,address,uint256)` on custody.
    Deposit {
        /// Chain
        chain_id: ChainId,
        /// Custody contract
        custody: Address,
        /// Credited account
        account: Address,
        /// Token
        token: Address,
        /// Amount
        amount: U256,
    },
    /// `create(channel,state)` on custody.
    CreateChannel {
        /// Chain
        chain_id: ChainId,
        /// Custody contract
        custody: Address,
        /// Channel id assigned by the node
        channel_id: ChannelId,
        /// Fixed parameters
        channel: ChannelParams,
        /// Node-signed initial state
        initial_state: ChannelState,
    },
    /// `resize(channelId,candidate,proofs)` moving custody funds into the channel.
    Resize {
        /// Chain
        chain_id: ChainId,
        /// Custody contract
        custody: Address,
        /// Channel
        channel_id: ChannelId,
        /// New state
        candidate: ChannelState,
        /// Previous states proving the transition
        proofs: Vec<ChannelState>,
    },
    /// `resize(channelId,candidate,proofs)` releasing channel funds to the ledger.
    Allocate {
        /// Chain
        chain_id: ChainId,
        /// Custody contract
        custody: Address,
        /// Channel
        channel_id: ChannelId,
        /// New state
        candidate: ChannelState,
        /// Previous states proving the transition
        proofs: Vec<ChannelState>,
    },
    /// `close(channelId,candidate,proofs)` on custody.
    Close {
        /// Chain
        chain_id: ChainId,
        /// Custody contract
        custody: Address,
        /// Channel
        channel_id: ChannelId,
        /// Final state
        candidate: ChannelState,
    },
    /// `withdraw(address,uint256)` on custody.
    Withdraw {
        /// Chain
        chain_id: ChainId,
        /// Custody contract
        custody: Address,
        /// Token
        token: Address,
        /// Amount
        amount: U256,
    },
}

impl ContractCall {
    /// Call kind.
    pub fn kind(&self) -> CallKind {
        match self {
            Self::Approve { .. } => CallKind::Approve,
            Self::Deposit { .. } => CallKind::Deposit,
            Self::CreateChannel { .. } => CallKind::CreateChannel,
            Self::Resize { .. } => CallKind::Resize,
            Self::Allocate { .. } => CallKind::Allocate,
            Self::Close { .. } => CallKind::Close,
            Self::Withdraw { .. } => CallKind::Withdraw,
        }
    }

    /// Chain the call targets.
    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::Approve { chain_id, .. }
            | Self::Deposit { chain_id, .. }
            | Self::CreateChannel { chain_id, .. }
            | Self::Resize { chain_id, .. }
            | Self::Allocate { chain_id, .. }
            | Self::Close { chain_id, .. }
            | Self::Withdraw { chain_id, .. } => *chain_id,
        }
    }

    /// Solidity signature of the function called.
    pub fn function_signature(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve(address,uint256)",
            Self::Deposit { .. } => "deposit(address,address,uint256)",
            Self::CreateChannel { .. } => {
                "create((address[],address,uint64,uint64),(uint8,uint256,bytes,(address,address,uint256)[],bytes[]))"
            }
            Self::Resize { .. } | Self::Allocate { .. } => {
                "resize(bytes32,(uint8,uint256,bytes,(address,address,uint256)[],bytes[]),(uint8,uint256,bytes,(address,address,uint256)[],bytes[])[])"
            }
            Self::Close { .. } => {
                "close(bytes32,(uint8,uint256,bytes,(address,address,uint256)[],bytes[]),(uint8,uint256,bytes,(address,address,uint256)[],bytes[])[])"
            }
            Self::Withdraw { .. } => "withdraw(address,uint256)",
        }
    }

    /// 4-byte function selector.
    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.function_signature().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

/// Mined transaction outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Transaction.
    pub tx_hash: TxHash,
    /// Whether execution succeeded.
    pub success: bool,
    /// Inclusion block.
    pub block_number: u64,
}

/// Wallet signer - outbound port.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Wallet address.
    fn address(&self) -> Address;

    /// Sign typed data; returns a `0x`-hex signature.
    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, SignerError>;

    /// Sign and broadcast a contract call.
    async fn submit(&self, call: ContractCall) -> Result<TxHash, SignerError>;
}

/// Chain reader - outbound port.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// ERC-20 allowance.
    async fn allowance(
        &self,
        chain_id: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, OrchestratorError>;

    /// Account balance held by the custody contract.
    async fn custody_balance(
        &self,
        chain_id: ChainId,
        custody: Address,
        account: Address,
        token: Address,
    ) -> Result<U256, OrchestratorError>;

    /// Block until the transaction is mined.
    async fn wait_for_receipt(
        &self,
        chain_id: ChainId,
        tx_hash: TxHash,
    ) -> Result<Receipt, OrchestratorError>;
}

// =============================================================================
// CREDENTIAL STORE
// =============================================================================

/// Persisted session credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Wallet that approved the key.
    pub wallet: Address,
    /// Session key secret (`0x`-hex).
    pub secret: String,
    /// Session key address.
    pub session_key: Address,
    /// Fingerprint of the configuration the key was approved under.
    pub fingerprint: String,
    /// Expiry (unix seconds).
    pub expires_at: u64,
    /// Allowances granted.
    pub allowances: Vec<Allowance>,
    /// Token for signature-less re-authentication.
    #[serde(default)]
    pub jwt: Option<String>,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("wallet", &self.wallet)
            .field("session_key", &self.session_key)
            .field("fingerprint", &self.fingerprint)
            .field("expires_at", &self.expires_at)
            .field("secret", &"***")
            .finish()
    }
}

/// Credential store - outbound port.
pub trait CredentialStore: Send + Sync {
    /// Credential stored for `wallet`.
    fn get(&self, wallet: &Address) -> Result<Option<StoredCredential>, OrchestratorError>;

    /// Store or replace the credential for its wallet.
    fn put(&self, credential: &StoredCredential) -> Result<(), OrchestratorError>;

    /// Remove the credential for `wallet`.
    fn invalidate(&self, wallet: &Address) -> Result<(), OrchestratorError>;
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Event delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame.
    Frame(String),
    /// Transport closed.
    Closed(String),
}

/// An open transport: send frames on `outbound`, read from `inbound`.
/// Dropping `outbound` closes the transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to the node.
    pub outbound: mpsc::Sender<String>,
    /// Frames and close notice from the node.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Node transport - outbound port.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Open a transport to `url`.
    async fn connect(&self, url: &str) -> Result<TransportLink, OrchestratorError>;
}
