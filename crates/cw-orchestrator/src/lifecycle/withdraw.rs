//! Withdraw flow: cooperative close, then custody back to the wallet.

use primitive_types::U256;
use serde::Serialize;
use tracing::info;

use cw_telemetry::metrics::FLOWS;

use super::progress::ProgressReporter;
use super::transactions::{close_cooperatively, drain_custody};
use super::{ChannelLifecycle, FlowContext};
use crate::domain::{CallKind, ChannelId, ChannelStatus, FlowKind, FlowStage, OrchestratorError, TxHash};

/// Result of a completed withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawOutcome {
    /// Channel closed, if one was open.
    pub closed: Option<ChannelId>,
    /// Amount returned to the wallet.
    #[serde(with = "crate::domain::amount::decimal")]
    pub withdrawn: U256,
    /// Transactions in submission order.
    pub transactions: Vec<(CallKind, TxHash)>,
}

impl ChannelLifecycle {
    /// Run the withdraw flow against the tracked channel.
    ///
    /// Without a tracked channel the close stage is skipped and custody for
    /// the last deposit target is drained. Without either, there is nothing
    /// to do and the outcome is empty.
    pub async fn withdraw(&self, ctx: &FlowContext) -> Result<WithdrawOutcome, OrchestratorError> {
        let _guard = self.begin(FlowKind::Withdraw)?;

        let outcome = self.run_withdraw(ctx).await;
        let label = if outcome.is_ok() { "ok" } else { "failed" };
        FLOWS.with_label_values(&[FlowKind::Withdraw.as_str(), label]).inc();
        outcome
    }

    async fn run_withdraw(&self, ctx: &FlowContext) -> Result<WithdrawOutcome, OrchestratorError> {
        let progress = ProgressReporter::new(self.bus.clone(), FlowKind::Withdraw);
        let at = |stage: FlowStage| move |e: OrchestratorError| e.at(FlowKind::Withdraw, stage);
        let mut transactions = Vec::new();

        let channel = self.tracker.current().filter(|c| c.status.is_live());
        let target = channel
            .as_ref()
            .map(|c| (c.chain_id, c.token))
            .or_else(|| self.tracker.last_target());

        // 1: close
        let closed = match channel {
            Some(mut channel) => {
                progress.stage(FlowStage::Close, format!("Closing channel {}", channel.id.short()));
                // A previous attempt may have stopped between the node's
                // close and the on-chain one.
                if channel.status != ChannelStatus::Closing {
                    channel
                        .transition_to(ChannelStatus::Closing)
                        .map_err(at(FlowStage::Close))?;
                    self.tracker
                        .update_current(channel.id, |c| c.status = ChannelStatus::Closing);
                }

                let tx = close_cooperatively(&self.rpc, ctx, channel.id, channel.chain_id)
                    .await
                    .map_err(at(FlowStage::Close))?;
                transactions.push((CallKind::Close, tx));
                self.tracker
                    .update_current(channel.id, |c| c.status = ChannelStatus::Closed);
                Some(channel.id)
            }
            None => {
                progress.stage(FlowStage::Close, "No open channel");
                None
            }
        };

        // 2: withdraw
        let withdrawn = match target {
            Some((chain_id, token)) => {
                progress.stage(FlowStage::Withdraw, "Withdrawing custody funds to the wallet");
                let (amount, tx) = drain_custody(ctx, chain_id, token)
                    .await
                    .map_err(at(FlowStage::Withdraw))?;
                if let Some(tx) = tx {
                    transactions.push((CallKind::Withdraw, tx));
                }
                amount
            }
            None => U256::zero(),
        };

        self.tracker.reset();
        let message = if withdrawn.is_zero() {
            "Withdraw complete, custody was empty".to_string()
        } else {
            format!("Withdrew {} to the wallet", withdrawn)
        };
        progress.complete(FlowStage::Withdraw, message);
        info!(
            closed = ?closed.map(|id| id.short()),
            withdrawn = %withdrawn,
            "[cw-flow] Withdraw finished"
        );

        Ok(WithdrawOutcome {
            closed,
            withdrawn,
            transactions,
        })
    }
}
