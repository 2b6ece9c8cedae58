//! # Inbound Ports
//!
//! What the orchestrator offers its embedder.

use async_trait::async_trait;
use primitive_types::U256;
use std::sync::Arc;

use crate::domain::{Address, ChainId, OrchestratorError};
use crate::ledger::{SessionSummary, SpendingCheck, TipReceipt};
use crate::lifecycle::{DepositOutcome, WithdrawOutcome};
use crate::reconcile::ReconcileSummary;

use super::outbound::{ChainReader, WalletSigner};

/// Channel orchestrator API - inbound port.
#[async_trait]
pub trait ChannelOrchestratorApi: Send + Sync {
    /// Connect, authenticate and fetch the network configuration.
    async fn initialize(
        &self,
        wallet: Address,
        signer: Arc<dyn WalletSigner>,
        chain: Arc<dyn ChainReader>,
    ) -> Result<(), OrchestratorError>;

    /// Move `amount` of `token` from the wallet into the unified ledger.
    async fn deposit_and_open_channel(
        &self,
        amount: U256,
        chain_id: ChainId,
        token: Address,
    ) -> Result<DepositOutcome, OrchestratorError>;

    /// Close the tracked channel and return custody funds to the wallet.
    async fn close_channel_and_withdraw(&self) -> Result<WithdrawOutcome, OrchestratorError>;

    /// Close every stale channel and drain custody. Never fails on
    /// per-channel errors.
    async fn deep_cleanup(
        &self,
        chain_id: ChainId,
        token: Address,
    ) -> Result<ReconcileSummary, OrchestratorError>;

    /// Open a spending session.
    async fn create_session(
        &self,
        streamer: Address,
        budget: U256,
        is_partner: bool,
    ) -> Result<String, OrchestratorError>;

    /// Tip `streamer` from the session budget.
    async fn send_tip(
        &self,
        amount: U256,
        streamer: Address,
        message: Option<String>,
    ) -> Result<TipReceipt, OrchestratorError>;

    /// Close the session and withdraw.
    async fn end_session(&self) -> Result<SessionSummary, OrchestratorError>;

    /// Pre-flight check against a caller-supplied limit.
    fn check_spending_limit(&self, amount: U256, limit: U256) -> SpendingCheck;

    /// Close the connection without reconnecting.
    async fn shutdown(&self);
}
