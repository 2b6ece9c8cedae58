//! # Stale-State Reconciler
//!
//! Channels left open by an interrupted run and funds stranded in custody
//! block the next deposit. The reconciler closes every channel it can find
//! (tracked locally or reported by the node) and withdraws whatever custody
//! holds. Individual failures are collected, never raised.

use primitive_types::U256;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::amount::decimal;
use crate::domain::{Address, ChainId, ChannelId};
use crate::lifecycle::transactions::{close_cooperatively, drain_custody};
use crate::lifecycle::{ChannelTracker, FlowContext};
use crate::protocol::{ChannelList, GetChannelsParams, Method, NodeChannelStatus};
use crate::rpc::RpcCorrelator;

/// A step that failed during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationWarning {
    /// Step: `get_channels`, `close` or `withdraw`.
    pub step: &'static str,
    /// Channel concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    /// Failure description.
    pub reason: String,
}

impl fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(id) => write!(f, "{} {}: {}", self.step, id.short(), self.reason),
            None => write!(f, "{}: {}", self.step, self.reason),
        }
    }
}

/// Custody funds returned to the wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CustodyDrained {
    /// Amount withdrawn.
    #[serde(with = "decimal")]
    pub amount: U256,
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    /// Channels closed on chain.
    pub channels_closed: Vec<ChannelId>,
    /// Custody withdrawal.
    pub custody_drained: CustodyDrained,
    /// Steps that failed.
    pub errors: Vec<ReconciliationWarning>,
}

impl ReconcileSummary {
    /// Whether the pass found nothing to do and hit no errors.
    pub fn is_empty(&self) -> bool {
        self.channels_closed.is_empty()
            && self.custody_drained.amount.is_zero()
            && self.errors.is_empty()
    }
}

/// Stale-state reconciler.
pub struct Reconciler {
    rpc: Arc<RpcCorrelator>,
    tracker: Arc<ChannelTracker>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(rpc: Arc<RpcCorrelator>, tracker: Arc<ChannelTracker>) -> Self {
        Self { rpc, tracker }
    }

    /// Close every known channel and drain custody for `token` on `chain_id`.
    ///
    /// Running it twice in a row is harmless: the second pass finds no
    /// channels and an empty custody balance.
    pub async fn reconcile(
        &self,
        ctx: &FlowContext,
        chain_id: ChainId,
        token: Address,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let candidates = self.candidates(ctx, chain_id, &mut summary).await;
        debug!(candidates = candidates.len(), "[cw-reconcile] Channels to close");

        let mut unsettled = Vec::new();
        for (channel_id, channel_chain) in candidates {
            match close_cooperatively(&self.rpc, ctx, channel_id, channel_chain).await {
                Ok(tx) => {
                    info!(channel = %channel_id.short(), tx = %tx.short(), "[cw-reconcile] Closed stale channel");
                    summary.channels_closed.push(channel_id);
                }
                Err(e) => {
                    warn!(channel = %channel_id.short(), error = %e, "[cw-reconcile] Close failed");
                    unsettled.push((channel_id, channel_chain));
                    summary.errors.push(ReconciliationWarning {
                        step: "close",
                        channel: Some(channel_id),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match drain_custody(ctx, chain_id, token).await {
            Ok((amount, _)) => summary.custody_drained = CustodyDrained { amount },
            Err(e) => {
                warn!(error = %e, "[cw-reconcile] Custody withdrawal failed");
                summary.errors.push(ReconciliationWarning {
                    step: "withdraw",
                    channel: None,
                    reason: e.to_string(),
                });
            }
        }

        self.tracker.reset();
        // Channels whose close did not confirm stay candidates for the next pass.
        for (channel_id, channel_chain) in unsettled {
            self.tracker.observe(channel_id, Some(channel_chain));
        }
        info!(
            closed = summary.channels_closed.len(),
            drained = %summary.custody_drained.amount,
            errors = summary.errors.len(),
            "[cw-reconcile] Pass finished"
        );
        summary
    }

    /// Channels not known to be closed on chain, from the tracker and the
    /// node, deduplicated. Channels
    /// with no known chain are assumed to be on `fallback`.
    async fn candidates(
        &self,
        ctx: &FlowContext,
        fallback: ChainId,
        summary: &mut ReconcileSummary,
    ) -> Vec<(ChannelId, ChainId)> {
        let mut found: BTreeMap<ChannelId, ChainId> = BTreeMap::new();
        for (id, chain) in self.tracker.known_channels() {
            found.insert(id, chain.unwrap_or(fallback));
        }

        let params = GetChannelsParams {
            participant: ctx.wallet,
        };
        match self.rpc.call::<_, ChannelList>(Method::GetChannels, &params).await {
            Ok(list) => {
                // A channel the node reports closed may still be open on
                // chain, so the node's list only adds candidates.
                for info in list.channels {
                    if info.status != NodeChannelStatus::Closed {
                        found.insert(info.channel_id, info.chain_id);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "[cw-reconcile] Channel query failed, using local view");
                summary.errors.push(ReconciliationWarning {
                    step: "get_channels",
                    channel: None,
                    reason: e.to_string(),
                });
            }
        }

        found.into_iter().collect()
    }
}
