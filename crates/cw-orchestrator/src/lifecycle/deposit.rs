//! Deposit flow: wallet funds into the unified ledger through a channel.

use primitive_types::U256;
use serde::Serialize;
use tracing::{info, warn};

use cw_telemetry::metrics::{FLOWS, UNIFIED_BALANCE};

use super::progress::ProgressReporter;
use super::transactions::execute;
use super::waits::{wait_for_channel, wait_for_unified_balance, BalanceWait};
use super::{ChannelLifecycle, FlowContext};
use crate::domain::{
    invariant_chain_supported, invariant_positive_amount, to_f64_lossy, Acknowledgement, Address, CallKind,
    ChainId, Channel, ChannelAcks, ChannelId, ChannelStatus, FlowKind, FlowStage,
    OrchestratorError, TxHash,
};
use crate::ports::ContractCall;
use crate::protocol::{
    ChannelStateResult, CreateChannelParams, CreateChannelResult, Method, NodeChannelStatus,
    ResizeChannelParams,
};

/// Result of a completed deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositOutcome {
    /// Channel opened.
    pub channel_id: ChannelId,
    /// Chain.
    pub chain_id: ChainId,
    /// Token.
    pub token: Address,
    /// Amount moved.
    #[serde(with = "crate::domain::amount::decimal")]
    pub amount: U256,
    /// Unified balance last observed.
    #[serde(with = "crate::domain::amount::decimal")]
    pub unified_balance: U256,
    /// Whether the unified balance was seen positive before the deadline.
    pub funded: Acknowledgement,
    /// Transactions in submission order.
    pub transactions: Vec<(CallKind, TxHash)>,
}

impl ChannelLifecycle {
    /// Run the deposit flow.
    ///
    /// Any stage failure aborts with the stage attached; nothing is rolled
    /// back. Acknowledgement timeouts only produce warnings.
    pub async fn deposit(
        &self,
        ctx: &FlowContext,
        amount: U256,
        chain_id: ChainId,
        token: Address,
    ) -> Result<DepositOutcome, OrchestratorError> {
        invariant_positive_amount(amount)?;
        let _guard = self.begin(FlowKind::Deposit)?;

        let outcome = self.run_deposit(ctx, amount, chain_id, token).await;
        let label = if outcome.is_ok() { "ok" } else { "failed" };
        FLOWS.with_label_values(&[FlowKind::Deposit.as_str(), label]).inc();
        outcome
    }

    async fn run_deposit(
        &self,
        ctx: &FlowContext,
        amount: U256,
        chain_id: ChainId,
        token: Address,
    ) -> Result<DepositOutcome, OrchestratorError> {
        let progress = ProgressReporter::new(self.bus.clone(), FlowKind::Deposit);
        let at = |stage: FlowStage| move |e: OrchestratorError| e.at(FlowKind::Deposit, stage);
        let mut transactions = Vec::new();

        // Contracts are resolved before anything touches the chain.
        let contracts = invariant_chain_supported(&ctx.network, chain_id)
            .map_err(at(FlowStage::Setup))?
            .clone();
        let custody = contracts.custody;

        // 0: leftovers from earlier runs
        progress.stage(FlowStage::PreCheck, "Checking for leftover channels and custody funds");
        let summary = self.reconciler.reconcile(ctx, chain_id, token).await;
        for warning in &summary.errors {
            warn!(warning = %warning, "[cw-flow] Pre-check could not clear leftover state");
        }
        if !summary.is_empty() {
            info!(
                closed = summary.channels_closed.len(),
                drained = %summary.custody_drained.amount,
                "[cw-flow] Cleared leftover state"
            );
        }

        // 1: setup
        progress.stage(
            FlowStage::Setup,
            format!("Using custody {} on chain {}", custody.short(), chain_id),
        );

        // 2: approve
        let allowance = ctx
            .chain
            .allowance(chain_id, token, ctx.wallet, custody)
            .await
            .map_err(at(FlowStage::Approve))?;
        if allowance < amount {
            progress.stage(FlowStage::Approve, "Approving token spend");
            let receipt = execute(
                ctx,
                ContractCall::Approve {
                    chain_id,
                    token,
                    spender: custody,
                    amount,
                },
            )
            .await
            .map_err(at(FlowStage::Approve))?;
            transactions.push((CallKind::Approve, receipt.tx_hash));
        } else {
            progress.stage(FlowStage::Approve, "Allowance sufficient, skipping approval");
        }

        // 3: deposit
        progress.stage(FlowStage::Deposit, "Depositing into custody");
        let receipt = execute(
            ctx,
            ContractCall::Deposit {
                chain_id,
                custody,
                account: ctx.wallet,
                token,
                amount,
            },
        )
        .await
        .map_err(at(FlowStage::Deposit))?;
        transactions.push((CallKind::Deposit, receipt.tx_hash));

        // Subscribe before any request whose notification we wait for.
        let mut pushes = self.rpc.subscribe();

        // 4: create channel
        progress.stage(FlowStage::CreateChannel, "Opening payment channel");
        let created: CreateChannelResult = self
            .rpc
            .call(Method::CreateChannel, &CreateChannelParams { chain_id, token })
            .await
            .map_err(at(FlowStage::CreateChannel))?;
        let channel_id = created.channel_id;
        let mut channel = Channel::new(channel_id, chain_id, token, amount);
        channel.last_state = Some(created.state.clone());
        self.tracker.set_current(channel.clone());

        let receipt = execute(
            ctx,
            ContractCall::CreateChannel {
                chain_id,
                custody,
                channel_id,
                channel: created.channel,
                initial_state: created.state,
            },
        )
        .await
        .map_err(at(FlowStage::CreateChannel))?;
        transactions.push((CallKind::CreateChannel, receipt.tx_hash));
        self.advance(&mut channel, ChannelStatus::AwaitingAck)
            .map_err(at(FlowStage::CreateChannel))?;

        let opened = wait_for_channel(&mut pushes, "open", self.config.timeouts.ack(), |c| {
            c.channel_id == channel_id && c.status == NodeChannelStatus::Open
        })
        .await;
        channel.acks.opened = Some(opened);
        self.store_acks(&channel);

        // 5: resize (lock custody funds into the channel)
        progress.stage(FlowStage::Resize, "Locking funds into the channel");
        let locked: ChannelStateResult = self
            .rpc
            .call(
                Method::ResizeChannel,
                &ResizeChannelParams {
                    channel_id,
                    lock_amount: amount,
                    release_amount: U256::zero(),
                    funds_destination: ctx.wallet,
                },
            )
            .await
            .map_err(at(FlowStage::Resize))?;
        let receipt = execute(
            ctx,
            ContractCall::Resize {
                chain_id,
                custody,
                channel_id,
                candidate: locked.state.clone(),
                proofs: channel.last_state.iter().cloned().collect(),
            },
        )
        .await
        .map_err(at(FlowStage::Resize))?;
        transactions.push((CallKind::Resize, receipt.tx_hash));
        channel.last_state = Some(locked.state);
        self.advance(&mut channel, ChannelStatus::Locked)
            .map_err(at(FlowStage::Resize))?;

        let lock_ack = wait_for_channel(&mut pushes, "lock", self.config.timeouts.ack(), |c| {
            c.channel_id == channel_id && c.amount >= amount
        })
        .await;
        channel.acks.locked = Some(lock_ack);
        self.store_acks(&channel);

        // 6: allocate (release channel funds to the unified ledger)
        progress.stage(FlowStage::Allocate, "Moving funds to the unified balance");
        let allocated: ChannelStateResult = self
            .rpc
            .call(
                Method::ResizeChannel,
                &ResizeChannelParams {
                    channel_id,
                    lock_amount: U256::zero(),
                    release_amount: amount,
                    funds_destination: ctx.network.broker,
                },
            )
            .await
            .map_err(at(FlowStage::Allocate))?;
        let receipt = execute(
            ctx,
            ContractCall::Allocate {
                chain_id,
                custody,
                channel_id,
                candidate: allocated.state.clone(),
                proofs: channel.last_state.iter().cloned().collect(),
            },
        )
        .await
        .map_err(at(FlowStage::Allocate))?;
        transactions.push((CallKind::Allocate, receipt.tx_hash));
        channel.last_state = Some(allocated.state);
        self.advance(&mut channel, ChannelStatus::Allocated)
            .map_err(at(FlowStage::Allocate))?;

        // 7: confirm
        progress.stage(FlowStage::Confirm, "Waiting for the unified balance");
        let (funded, unified_balance) = wait_for_unified_balance(
            BalanceWait {
                rpc: &self.rpc,
                wallet: ctx.wallet,
                asset: &self.config.asset,
                poll: self.config.timeouts.poll(),
                timeout: self.config.timeouts.confirm(),
            },
            &mut pushes,
            &mut self.connection.clone(),
        )
        .await;
        channel.acks.funded = Some(funded);
        self.store_acks(&channel);
        self.tracker.set_unified_balance(unified_balance);
        UNIFIED_BALANCE.set(to_f64_lossy(unified_balance));
        self.tracker.mark_deposit_complete();

        let message = if funded.is_confirmed() {
            "Deposit complete"
        } else {
            "Deposit submitted; unified balance not yet confirmed"
        };
        progress.complete(FlowStage::Confirm, message);
        info!(
            channel = %channel_id.short(),
            amount = %amount,
            unified_balance = %unified_balance,
            funded = ?funded,
            "[cw-flow] Deposit finished"
        );

        Ok(DepositOutcome {
            channel_id,
            chain_id,
            token,
            amount,
            unified_balance,
            funded,
            transactions,
        })
    }

    fn advance(&self, channel: &mut Channel, status: ChannelStatus) -> Result<(), OrchestratorError> {
        channel.transition_to(status)?;
        let snapshot = channel.clone();
        self.tracker.update_current(channel.id, move |current| {
            current.status = snapshot.status;
            current.last_state = snapshot.last_state;
        });
        Ok(())
    }

    fn store_acks(&self, channel: &Channel) {
        let acks: ChannelAcks = channel.acks;
        self.tracker
            .update_current(channel.id, move |current| current.acks = acks);
    }
}
