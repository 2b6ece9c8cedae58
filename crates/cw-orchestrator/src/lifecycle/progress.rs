//! Stage progress reporting for funds-moving flows.

use std::sync::Arc;

use cw_telemetry::log_stage;
use shared_bus::{EventPublisher, InMemoryEventBus, OrchestratorEvent, ProgressUpdate};

use crate::domain::{FlowKind, FlowStage, CLEANUP_STAGES, DEPOSIT_STAGES, WITHDRAW_STAGES};

/// Emits `{step, total, message, complete}` for one flow run.
pub struct ProgressReporter {
    bus: Arc<InMemoryEventBus>,
    flow: FlowKind,
    total: u8,
}

impl ProgressReporter {
    /// Reporter for `flow`.
    pub fn new(bus: Arc<InMemoryEventBus>, flow: FlowKind) -> Self {
        let total = match flow {
            FlowKind::Deposit => DEPOSIT_STAGES,
            FlowKind::Withdraw => WITHDRAW_STAGES,
            FlowKind::Cleanup => CLEANUP_STAGES,
        };
        Self { bus, flow, total }
    }

    /// Stage entered or advanced.
    pub fn stage(&self, stage: FlowStage, message: impl Into<String>) {
        let message = message.into();
        log_stage!(info, self.flow.as_str(), stage.step(), "[cw-flow] Stage", detail = %message);
        self.emit(ProgressUpdate::stage(stage.step(), self.total, message));
    }

    /// Final stage reached.
    pub fn complete(&self, stage: FlowStage, message: impl Into<String>) {
        let message = message.into();
        log_stage!(info, self.flow.as_str(), stage.step(), "[cw-flow] Complete", detail = %message);
        self.emit(ProgressUpdate::completed(stage.step(), self.total, message));
    }

    fn emit(&self, update: ProgressUpdate) {
        let event = match self.flow {
            FlowKind::Deposit => OrchestratorEvent::DepositProgress(update),
            FlowKind::Withdraw | FlowKind::Cleanup => OrchestratorEvent::WithdrawProgress(update),
        };
        self.bus.publish(event);
    }
}
