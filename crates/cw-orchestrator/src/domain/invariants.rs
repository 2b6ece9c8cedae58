//! # Domain Invariants
//!
//! Rules checked before funds move.

use primitive_types::U256;

use super::entities::{Channel, ChainContracts, NetworkConfig};
use super::errors::OrchestratorError;
use super::value_objects::{ChainId, ChannelStatus};

/// Invariant: a deposit targets a chain present in the node's configuration.
///
/// Checked before any transaction is submitted.
pub fn invariant_chain_supported(
    config: &NetworkConfig,
    chain_id: ChainId,
) -> Result<&ChainContracts, OrchestratorError> {
    config
        .contracts_for(chain_id)
        .ok_or(OrchestratorError::ChainUnsupported(chain_id))
}

/// Invariant: amounts moved are strictly positive.
pub fn invariant_positive_amount(amount: U256) -> Result<(), OrchestratorError> {
    if amount.is_zero() {
        return Err(OrchestratorError::InvalidAmount("amount must be positive".into()));
    }
    Ok(())
}

/// Invariant: no off-chain transfer while a tracked channel still holds a
/// nonzero allocation.
///
/// Without a tracked channel the unified ledger was funded earlier and can
/// be spent from directly.
pub fn invariant_allocation_cleared(channel: Option<&Channel>) -> Result<(), OrchestratorError> {
    match channel {
        Some(channel) if channel.status.holds_allocation() => {
            Err(OrchestratorError::ChannelNotAllocated {
                channel: channel.id.to_string(),
                status: channel.status.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Invariant: session spend never exceeds its budget.
pub fn invariant_within_budget(spent: U256, amount: U256, budget: U256) -> bool {
    spent
        .checked_add(amount)
        .map(|total| total <= budget)
        .unwrap_or(false)
}
