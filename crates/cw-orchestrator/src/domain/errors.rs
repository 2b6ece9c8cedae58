//! # Domain Errors
//!
//! Error taxonomy for the orchestrator. Every public operation returns
//! [`OrchestratorError`]; flow failures wrap the underlying cause with the
//! stage it occurred in.

use primitive_types::U256;
use shared_bus::ErrorKind;
use std::time::Duration;
use thiserror::Error;

use super::flow::{FlowKind, FlowStage};
use super::value_objects::{CallKind, ChainId, ChannelId, ChannelStatus};
use crate::ledger::LedgerRejection;

/// Orchestrator error types.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Transport failure or reconnection exhausted.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Handshake did not complete in time.
    #[error("Authentication timed out after {0:?}")]
    AuthTimeout(Duration),

    /// Wallet refused the session approval or the node refused verification.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Chain not present in the node's network configuration.
    #[error("Unsupported chain: {0}")]
    ChainUnsupported(ChainId),

    /// Wallet balance or session budget too small.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount needed
        required: U256,
        /// Amount available
        available: U256,
    },

    /// No response within the request deadline.
    #[error("RPC timeout: {method} after {timeout:?}")]
    RpcTimeout {
        /// Method that timed out
        method: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// Node reported a failure for an outstanding request.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Wallet rejected a transaction or the transaction reverted.
    #[error("Transaction failed ({call}): {reason}")]
    TransactionFailure {
        /// Call that failed
        call: CallKind,
        /// Wallet or chain reason
        reason: String,
    },

    /// Malformed or unexpected message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persisted credential could not be read or written.
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Operation requires `initialize` first.
    #[error("Orchestrator not initialized")]
    NotInitialized,

    /// Operation requires an authenticated session key.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Another funds-moving flow holds the flow lock.
    #[error("A {0} flow is already in progress")]
    FlowInProgress(FlowKind),

    /// Amount zero, negative or unparseable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Tip or session close without an open session.
    #[error("No active session")]
    NoActiveSession,

    /// Transfer attempted before the channel's funds reached the unified ledger.
    #[error("Channel {channel} not allocated (status {status})")]
    ChannelNotAllocated {
        /// Channel checked
        channel: String,
        /// Its current status
        status: String,
    },

    /// Local channel status machine refused a transition.
    #[error("Invalid channel transition for {channel:?}: {from} -> {to}")]
    InvalidChannelTransition {
        /// Channel
        channel: ChannelId,
        /// Current status
        from: ChannelStatus,
        /// Attempted status
        to: ChannelStatus,
    },

    /// Session ledger refused a spend.
    #[error("Spend rejected: {0}")]
    Rejected(#[from] LedgerRejection),

    /// A stage of a multi-stage flow failed.
    #[error("{flow} failed at stage {stage}: {source}")]
    Flow {
        /// Flow that failed
        flow: FlowKind,
        /// Stage the failure occurred in
        stage: FlowStage,
        /// Underlying cause
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl OrchestratorError {
    /// Attach flow and stage context. Already-staged errors are returned as-is.
    pub fn at(self, flow: FlowKind, stage: FlowStage) -> Self {
        match self {
            e @ OrchestratorError::Flow { .. } => e,
            other => OrchestratorError::Flow {
                flow,
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Innermost cause, skipping flow context.
    pub fn root(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::Flow { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stage the error occurred in, for flow failures.
    pub fn stage(&self) -> Option<FlowStage> {
        match self {
            OrchestratorError::Flow { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Category used for the bus error event.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::Connection(_) => ErrorKind::Connection,
            Self::AuthTimeout(_) => ErrorKind::AuthTimeout,
            Self::AuthRejected(_) | Self::NotAuthenticated => ErrorKind::AuthRejected,
            Self::ChainUnsupported(_) => ErrorKind::ChainUnsupported,
            Self::InsufficientBalance { .. }
            | Self::Rejected(LedgerRejection::ExceedsRemaining { .. }) => {
                ErrorKind::InsufficientBalance
            }
            Self::RpcTimeout { .. } => ErrorKind::RpcTimeout,
            Self::Remote(_) => ErrorKind::Remote,
            Self::TransactionFailure { .. } => ErrorKind::Transaction,
            _ => ErrorKind::Internal,
        }
    }
}
