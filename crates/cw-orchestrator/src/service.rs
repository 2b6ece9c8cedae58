//! Channel orchestrator service - main entry point.
//!
//! Wires the connection, authenticator, correlator, lifecycle and ledger
//! together behind [`ChannelOrchestratorApi`]. Every operation that fails
//! publishes exactly one [`OrchestratorEvent::Error`] and returns the same
//! error to the caller.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use primitive_types::U256;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cw_telemetry::metrics::{FLOWS, TIPS_REJECTED, TIPS_SENT, UNIFIED_BALANCE};
use shared_bus::{EventPublisher, InMemoryEventBus, OrchestratorEvent};

use crate::auth::Authenticator;
use crate::config::OrchestratorConfig;
use crate::connection::{ConnectionManager, ReconnectHandler};
use crate::domain::{
    invariant_allocation_cleared, to_f64_lossy, Address, ChainId, ConnectionState, FlowKind,
    FlowStage, NetworkConfig, OrchestratorError,
};
use crate::ledger::{Session, SessionLedger, SessionSummary, SpendingCheck, TipReceipt};
use crate::lifecycle::{
    ChannelLifecycle, ChannelTracker, DepositOutcome, FlowContext, ProgressReporter,
    WithdrawOutcome,
};
use crate::ports::{
    ChainReader, ChannelOrchestratorApi, CredentialStore, NodeTransport, WalletSigner,
};
use crate::protocol::{
    ConfigResult, LedgerBalances, LedgerBalancesParams, Method, TransferAllocation,
    TransferParams, TransferResult,
};
use crate::reconcile::{ReconcileSummary, Reconciler};
use crate::rpc::{PushMessage, RpcCorrelator};

type SharedContext = Arc<RwLock<Option<FlowContext>>>;

/// Channel orchestrator service.
pub struct ChannelService {
    config: Arc<OrchestratorConfig>,
    bus: Arc<InMemoryEventBus>,
    rpc: Arc<RpcCorrelator>,
    connection: Arc<ConnectionManager>,
    auth: Arc<Authenticator>,
    tracker: Arc<ChannelTracker>,
    reconciler: Arc<Reconciler>,
    lifecycle: ChannelLifecycle,
    ledger: SessionLedger,
    context: SharedContext,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelService {
    /// Create a service; nothing is opened until
    /// [`initialize`](ChannelOrchestratorApi::initialize).
    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<dyn NodeTransport>,
        store: Arc<dyn CredentialStore>,
        bus: Arc<InMemoryEventBus>,
    ) -> Self {
        let config = Arc::new(config);
        let rpc = Arc::new(RpcCorrelator::new(config.timeouts.rpc()));
        let connection = Arc::new(ConnectionManager::new(
            transport,
            rpc.clone(),
            bus.clone(),
            config.reconnect.clone(),
            config.timeouts.keepalive(),
        ));
        let auth = Arc::new(Authenticator::new(
            config.clone(),
            store,
            rpc.clone(),
            bus.clone(),
        ));
        let tracker = Arc::new(ChannelTracker::new());
        let reconciler = Arc::new(Reconciler::new(rpc.clone(), tracker.clone()));
        let lifecycle = ChannelLifecycle::new(
            config.clone(),
            rpc.clone(),
            bus.clone(),
            tracker.clone(),
            reconciler.clone(),
            connection.watch_state(),
        );
        let ledger = SessionLedger::new(config.commission.clone());

        Self {
            config,
            bus,
            rpc,
            connection,
            auth,
            tracker,
            reconciler,
            lifecycle,
            ledger,
            context: Arc::new(RwLock::new(None)),
            router: Mutex::new(None),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Event bus the service publishes to.
    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    /// Channel tracker.
    pub fn tracker(&self) -> &Arc<ChannelTracker> {
        &self.tracker
    }

    /// Active session.
    pub fn active_session(&self) -> Option<Session> {
        self.ledger.active()
    }

    /// Network configuration fetched at initialization.
    pub fn network(&self) -> Option<Arc<NetworkConfig>> {
        self.context.read().as_ref().map(|ctx| ctx.network.clone())
    }

    fn fail(&self, error: OrchestratorError) -> OrchestratorError {
        self.bus.publish(OrchestratorEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
        error
    }

    fn require_context(&self) -> Result<FlowContext, OrchestratorError> {
        self.context
            .read()
            .clone()
            .ok_or(OrchestratorError::NotInitialized)
    }

    async fn establish(
        &self,
        wallet: Address,
        signer: Arc<dyn WalletSigner>,
        chain: Arc<dyn ChainReader>,
    ) -> Result<(), OrchestratorError> {
        if signer.address() != wallet {
            return Err(OrchestratorError::AuthRejected(format!(
                "signer {} does not control wallet {}",
                signer.address().short(),
                wallet.short()
            )));
        }

        self.start_router(wallet);
        self.connection.connect(&self.config.node_url).await?;

        if let Err(e) = self.auth.authenticate(wallet, signer.as_ref()).await {
            self.connection.disconnect().await;
            return Err(e);
        }
        self.connection.mark_authenticated(wallet);

        let network = match fetch_network(&self.rpc, &self.bus).await {
            Ok(network) => network,
            Err(e) => {
                self.connection.disconnect().await;
                return Err(e);
            }
        };
        *self.context.write() = Some(FlowContext {
            wallet,
            signer,
            chain,
            network,
        });

        self.connection.set_reconnect_handler(Arc::new(SessionRestorer {
            auth: self.auth.clone(),
            rpc: self.rpc.clone(),
            bus: self.bus.clone(),
            context: self.context.clone(),
        }));

        match self
            .rpc
            .call::<_, LedgerBalances>(
                Method::GetLedgerBalances,
                &LedgerBalancesParams {
                    participant: wallet,
                },
            )
            .await
        {
            Ok(balances) => {
                let amount = balances.amount_of(&self.config.asset);
                self.tracker.set_unified_balance(amount);
                UNIFIED_BALANCE.set(to_f64_lossy(amount));
            }
            Err(e) => warn!(error = %e, "[cw-flow] Initial balance query failed"),
        }

        info!(wallet = %wallet.short(), "[cw-flow] Orchestrator ready");
        Ok(())
    }

    fn start_router(&self, wallet: Address) {
        let mut pushes = self.rpc.subscribe();
        let tracker = self.tracker.clone();
        let bus = self.bus.clone();
        let asset = self.config.asset.clone();

        let handle = tokio::spawn(async move {
            loop {
                match pushes.recv().await {
                    Ok(PushMessage::Balances(balances)) => {
                        let amount = balances.amount_of(&asset);
                        tracker.set_unified_balance(amount);
                        UNIFIED_BALANCE.set(to_f64_lossy(amount));
                        bus.publish(OrchestratorEvent::BalanceUpdate {
                            asset: asset.clone(),
                            amount,
                        });
                    }
                    Ok(PushMessage::Transfer(transfer)) if transfer.to == wallet => {
                        info!(from = %transfer.from.short(), amount = %transfer.amount, "[cw-flow] Transfer received");
                        bus.publish(OrchestratorEvent::TipReceived {
                            from: transfer.from.to_string(),
                            amount: transfer.amount,
                            asset: transfer.asset,
                        });
                    }
                    Ok(PushMessage::Transfer(_)) | Ok(PushMessage::Assets(_)) => {}
                    Ok(PushMessage::Channel(info)) => tracker.apply_update(&info),
                    Ok(PushMessage::Error(message)) => {
                        warn!(message = %message, "[cw-flow] Node reported an error");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "[cw-flow] Push router lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("[cw-flow] Push router stopped");
        });

        if let Some(previous) = self.router.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn run_cleanup(
        &self,
        ctx: &FlowContext,
        chain_id: ChainId,
        token: Address,
    ) -> Result<ReconcileSummary, OrchestratorError> {
        let _guard = self.lifecycle.begin(FlowKind::Cleanup)?;
        let progress = ProgressReporter::new(self.bus.clone(), FlowKind::Cleanup);
        progress.stage(FlowStage::Reconcile, "Closing stale channels");

        let summary = self.reconciler.reconcile(ctx, chain_id, token).await;
        FLOWS
            .with_label_values(&[FlowKind::Cleanup.as_str(), "ok"])
            .inc();
        progress.complete(
            FlowStage::Reconcile,
            format!(
                "Closed {} channel(s), drained {}",
                summary.channels_closed.len(),
                summary.custody_drained.amount
            ),
        );
        Ok(summary)
    }

    async fn tip(
        &self,
        amount: U256,
        streamer: Address,
        message: Option<String>,
    ) -> Result<TipReceipt, OrchestratorError> {
        if let Err(rejection) = self.ledger.preview(streamer, amount) {
            TIPS_REJECTED.inc();
            return Err(rejection.into());
        }

        invariant_allocation_cleared(self.tracker.current().as_ref())?;

        // Recorded before the transfer; a failed transfer is not reverted.
        let mut receipt = self.ledger.record_spend(streamer, amount, message.clone())?;

        let result: TransferResult = self
            .rpc
            .call(
                Method::Transfer,
                &TransferParams {
                    destination: streamer,
                    allocations: vec![TransferAllocation {
                        asset: self.config.asset.clone(),
                        amount,
                    }],
                    memo: message,
                },
            )
            .await?;
        receipt.transfer_id = Some(result.transaction_id);

        TIPS_SENT.inc();
        self.bus.publish(OrchestratorEvent::TipSent {
            tip_id: receipt.tip_id.clone(),
            streamer: streamer.to_string(),
            amount,
            commission: receipt.commission,
            remaining: receipt.remaining,
        });
        info!(
            streamer = %streamer.short(),
            amount = %amount,
            remaining = %receipt.remaining,
            "[cw-flow] Tip sent"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl ChannelOrchestratorApi for ChannelService {
    async fn initialize(
        &self,
        wallet: Address,
        signer: Arc<dyn WalletSigner>,
        chain: Arc<dyn ChainReader>,
    ) -> Result<(), OrchestratorError> {
        let ready = self.connection.state() == ConnectionState::Authenticated
            && self.context.read().as_ref().map(|ctx| ctx.wallet) == Some(wallet);
        if ready {
            debug!(wallet = %wallet.short(), "[cw-flow] Already initialized");
            return Ok(());
        }

        self.establish(wallet, signer, chain)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn deposit_and_open_channel(
        &self,
        amount: U256,
        chain_id: ChainId,
        token: Address,
    ) -> Result<DepositOutcome, OrchestratorError> {
        let ctx = self.require_context().map_err(|e| self.fail(e))?;
        let outcome = self
            .lifecycle
            .deposit(&ctx, amount, chain_id, token)
            .await
            .map_err(|e| self.fail(e))?;
        self.ledger.record_deposit(amount);
        Ok(outcome)
    }

    async fn close_channel_and_withdraw(&self) -> Result<WithdrawOutcome, OrchestratorError> {
        let ctx = self.require_context().map_err(|e| self.fail(e))?;
        self.lifecycle.withdraw(&ctx).await.map_err(|e| self.fail(e))
    }

    async fn deep_cleanup(
        &self,
        chain_id: ChainId,
        token: Address,
    ) -> Result<ReconcileSummary, OrchestratorError> {
        let ctx = self.require_context().map_err(|e| self.fail(e))?;
        self.run_cleanup(&ctx, chain_id, token)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn create_session(
        &self,
        streamer: Address,
        budget: U256,
        is_partner: bool,
    ) -> Result<String, OrchestratorError> {
        let available = self
            .ledger
            .total_deposited()
            .max(self.tracker.unified_balance());
        if budget > available {
            return Err(self.fail(OrchestratorError::InsufficientBalance {
                required: budget,
                available,
            }));
        }

        let session = self
            .ledger
            .open(streamer, budget, is_partner)
            .map_err(|e| self.fail(e.into()))?;
        self.bus.publish(OrchestratorEvent::SessionCreated {
            session_id: session.id.clone(),
            streamer: streamer.to_string(),
            budget,
            commission_bps: session.commission_bps,
        });
        info!(
            session = %session.id,
            streamer = %streamer.short(),
            budget = %budget,
            "[cw-flow] Session opened"
        );
        Ok(session.id)
    }

    async fn send_tip(
        &self,
        amount: U256,
        streamer: Address,
        message: Option<String>,
    ) -> Result<TipReceipt, OrchestratorError> {
        self.tip(amount, streamer, message)
            .await
            .map_err(|e| self.fail(e))
    }

    async fn end_session(&self) -> Result<SessionSummary, OrchestratorError> {
        let summary = self.ledger.close().map_err(|e| self.fail(e.into()))?;
        self.bus.publish(OrchestratorEvent::SessionClosed {
            session_id: summary.session_id.clone(),
            total_spent: summary.total_spent,
            unused_balance: summary.unused_balance,
            duration_secs: summary.duration.as_secs(),
        });
        info!(
            session = %summary.session_id,
            tips = summary.tip_count,
            spent = %summary.total_spent,
            "[cw-flow] Session closed"
        );

        self.close_channel_and_withdraw().await?;
        Ok(summary)
    }

    fn check_spending_limit(&self, amount: U256, limit: U256) -> SpendingCheck {
        self.ledger.check_spending_limit(amount, limit)
    }

    async fn shutdown(&self) {
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        self.connection.disconnect().await;
    }
}

impl Drop for ChannelService {
    fn drop(&mut self) {
        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
    }
}

async fn fetch_network(
    rpc: &RpcCorrelator,
    bus: &InMemoryEventBus,
) -> Result<Arc<NetworkConfig>, OrchestratorError> {
    let result: ConfigResult = rpc.call(Method::GetConfig, &json!({})).await?;
    let network: NetworkConfig = result.into();
    bus.publish(OrchestratorEvent::ConfigReady {
        chains: network.chain_ids(),
        broker: network.broker.to_string(),
    });
    debug!(chains = ?network.chain_ids(), "[cw-flow] Network configuration loaded");
    Ok(Arc::new(network))
}

/// Re-authenticates after a reconnect and refreshes the network config.
struct SessionRestorer {
    auth: Arc<Authenticator>,
    rpc: Arc<RpcCorrelator>,
    bus: Arc<InMemoryEventBus>,
    context: SharedContext,
}

#[async_trait]
impl ReconnectHandler for SessionRestorer {
    async fn on_reopen(&self) -> Result<(), OrchestratorError> {
        let Some(ctx) = self.context.read().clone() else {
            return Ok(());
        };
        self.auth.authenticate(ctx.wallet, ctx.signer.as_ref()).await?;
        let network = fetch_network(&self.rpc, &self.bus).await?;
        if let Some(current) = self.context.write().as_mut() {
            current.network = network;
        }
        Ok(())
    }
}
