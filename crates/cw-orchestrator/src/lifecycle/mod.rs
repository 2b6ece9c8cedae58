//! # Channel Lifecycle
//!
//! Deposit (open) and withdraw (close) flows. Flows are strictly
//! sequential: one funds-moving flow at a time, one on-chain submission at
//! a time within it.
//!
//! ```text
//! deposit:  0 pre-check → 1 setup → 2 approve → 3 deposit → 4 create
//!           → 5 resize (lock) → 6 allocate → 7 confirm
//! withdraw: 1 close → 2 withdraw
//! ```

pub mod deposit;
pub mod progress;
pub mod tracker;
pub mod transactions;
pub mod waits;
pub mod withdraw;

pub use deposit::DepositOutcome;
pub use progress::ProgressReporter;
pub use tracker::ChannelTracker;
pub use withdraw::WithdrawOutcome;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::OrchestratorConfig;
use crate::domain::{Address, ConnectionState, FlowKind, NetworkConfig, OrchestratorError};
use crate::ports::{ChainReader, WalletSigner};
use crate::reconcile::Reconciler;
use crate::rpc::RpcCorrelator;
use shared_bus::InMemoryEventBus;

/// Collaborators a flow runs against.
#[derive(Clone)]
pub struct FlowContext {
    /// Wallet address.
    pub wallet: Address,
    /// Wallet signer.
    pub signer: Arc<dyn WalletSigner>,
    /// Chain reader.
    pub chain: Arc<dyn ChainReader>,
    /// Network configuration of the current connection.
    pub network: Arc<NetworkConfig>,
}

/// Holds the flow slot; released on drop.
pub struct FlowGuard<'a> {
    slot: &'a Mutex<Option<FlowKind>>,
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Channel lifecycle orchestrator.
pub struct ChannelLifecycle {
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) rpc: Arc<RpcCorrelator>,
    pub(crate) bus: Arc<InMemoryEventBus>,
    pub(crate) tracker: Arc<ChannelTracker>,
    pub(crate) reconciler: Arc<Reconciler>,
    pub(crate) connection: watch::Receiver<ConnectionState>,
    running: Mutex<Option<FlowKind>>,
}

impl ChannelLifecycle {
    /// Create the orchestrator.
    pub fn new(
        config: Arc<OrchestratorConfig>,
        rpc: Arc<RpcCorrelator>,
        bus: Arc<InMemoryEventBus>,
        tracker: Arc<ChannelTracker>,
        reconciler: Arc<Reconciler>,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            config,
            rpc,
            bus,
            tracker,
            reconciler,
            connection,
            running: Mutex::new(None),
        }
    }

    /// Take the flow slot for `kind`.
    pub fn begin(&self, kind: FlowKind) -> Result<FlowGuard<'_>, OrchestratorError> {
        let mut running = self.running.lock();
        if let Some(active) = *running {
            return Err(OrchestratorError::FlowInProgress(active));
        }
        *running = Some(kind);
        Ok(FlowGuard {
            slot: &self.running,
        })
    }

    /// Flow currently running.
    pub fn running(&self) -> Option<FlowKind> {
        *self.running.lock()
    }

    /// Channel tracker.
    pub fn tracker(&self) -> &Arc<ChannelTracker> {
        &self.tracker
    }
}
