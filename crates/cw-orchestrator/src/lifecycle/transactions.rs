//! On-chain submissions shared by the flows and the reconciler.

use primitive_types::U256;
use tracing::{debug, info};

use cw_telemetry::metrics::TRANSACTIONS_SUBMITTED;

use super::FlowContext;
use crate::domain::{invariant_chain_supported, Address, ChainId, ChannelId, OrchestratorError, TxHash};
use crate::ports::{ContractCall, Receipt};
use crate::protocol::{ChannelStateResult, CloseChannelParams, Method};
use crate::rpc::RpcCorrelator;

/// Submit `call` and wait for it to be mined. A revert is a failure.
pub async fn execute(ctx: &FlowContext, call: ContractCall) -> Result<Receipt, OrchestratorError> {
    let kind = call.kind();
    let chain_id = call.chain_id();
    TRANSACTIONS_SUBMITTED.with_label_values(&[kind.as_str()]).inc();

    let tx_hash = ctx
        .signer
        .submit(call)
        .await
        .map_err(|e| OrchestratorError::TransactionFailure {
            call: kind,
            reason: e.to_string(),
        })?;
    debug!(call = %kind, tx = %tx_hash.short(), "[cw-chain] Submitted");

    let receipt = ctx.chain.wait_for_receipt(chain_id, tx_hash).await?;
    if !receipt.success {
        return Err(OrchestratorError::TransactionFailure {
            call: kind,
            reason: format!("transaction {} reverted", tx_hash),
        });
    }
    info!(call = %kind, tx = %tx_hash.short(), block = receipt.block_number, "[cw-chain] Confirmed");
    Ok(receipt)
}

/// Close `channel_id` cooperatively: node-signed final state, then the
/// on-chain close.
pub async fn close_cooperatively(
    rpc: &RpcCorrelator,
    ctx: &FlowContext,
    channel_id: ChannelId,
    chain_id: ChainId,
) -> Result<TxHash, OrchestratorError> {
    let custody = invariant_chain_supported(&ctx.network, chain_id)?.custody;
    let params = CloseChannelParams {
        channel_id,
        funds_destination: ctx.wallet,
    };
    let result: ChannelStateResult = rpc.call(Method::CloseChannel, &params).await?;

    let receipt = execute(
        ctx,
        ContractCall::Close {
            chain_id,
            custody,
            channel_id,
            candidate: result.state,
        },
    )
    .await?;
    Ok(receipt.tx_hash)
}

/// Withdraw whatever custody holds for the wallet in `token`. Returns the
/// amount withdrawn (zero when nothing was there).
pub async fn drain_custody(
    ctx: &FlowContext,
    chain_id: ChainId,
    token: Address,
) -> Result<(U256, Option<TxHash>), OrchestratorError> {
    let custody = invariant_chain_supported(&ctx.network, chain_id)?.custody;
    let balance = ctx
        .chain
        .custody_balance(chain_id, custody, ctx.wallet, token)
        .await?;
    if balance.is_zero() {
        debug!(chain = %chain_id, "[cw-chain] Custody empty");
        return Ok((U256::zero(), None));
    }

    let receipt = execute(
        ctx,
        ContractCall::Withdraw {
            chain_id,
            custody,
            token,
            amount: balance,
        },
    )
    .await?;
    Ok((balance, Some(receipt.tx_hash)))
}
