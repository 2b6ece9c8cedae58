//! Local channel tracking.
//!
//! Holds the single current channel, every other channel id seen on push
//! notifications (reconciliation candidates only), the last deposit target
//! and the cached unified balance.

use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::BTreeMap;

use crate::domain::{Address, ChainId, Channel, ChannelId};
use crate::protocol::{ChannelInfo, NodeChannelStatus};

#[derive(Default)]
struct TrackerState {
    current: Option<Channel>,
    observed: BTreeMap<ChannelId, Option<ChainId>>,
    target: Option<(ChainId, Address)>,
    deposit_complete: bool,
    unified_balance: U256,
}

/// Channel tracker shared by the lifecycle flows, the reconciler and the
/// push router.
#[derive(Default)]
pub struct ChannelTracker {
    state: RwLock<TrackerState>,
}

impl ChannelTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current channel.
    pub fn current(&self) -> Option<Channel> {
        self.state.read().current.clone()
    }

    /// Replace the current channel.
    pub fn set_current(&self, channel: Channel) {
        let mut state = self.state.write();
        state.target = Some((channel.chain_id, channel.token));
        state.observed.remove(&channel.id);
        state.current = Some(channel);
    }

    /// Mutate the current channel if it is `id`.
    pub fn update_current<F>(&self, id: ChannelId, f: F)
    where
        F: FnOnce(&mut Channel),
    {
        if let Some(channel) = self.state.write().current.as_mut().filter(|c| c.id == id) {
            f(channel);
        }
    }

    /// Remember a channel id reported by the node.
    pub fn observe(&self, id: ChannelId, chain_id: Option<ChainId>) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.current.as_ref().map(|c| c.id) == Some(id) {
            return;
        }
        let entry = state.observed.entry(id).or_insert(None);
        if chain_id.is_some() {
            *entry = chain_id;
        }
    }

    /// Apply a `cu` notification.
    ///
    /// A node-side close says nothing about the custody contract, so it
    /// never settles the current channel or drops a known candidate. Only
    /// a confirmed on-chain close does that.
    pub fn apply_update(&self, info: &ChannelInfo) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.current.as_ref().map(|c| c.id) == Some(info.channel_id) {
            return;
        }
        match state.observed.get_mut(&info.channel_id) {
            Some(chain) => *chain = Some(info.chain_id),
            None if info.status != NodeChannelStatus::Closed => {
                state.observed.insert(info.channel_id, Some(info.chain_id));
            }
            None => {}
        }
    }

    /// Every channel id that may still hold state: the live current channel
    /// plus all observed ids, with their chain when known.
    pub fn known_channels(&self) -> Vec<(ChannelId, Option<ChainId>)> {
        let state = self.state.read();
        let mut out: Vec<(ChannelId, Option<ChainId>)> = state
            .current
            .iter()
            .filter(|c| c.status.is_live())
            .map(|c| (c.id, Some(c.chain_id)))
            .collect();
        out.extend(state.observed.iter().map(|(id, chain)| (*id, *chain)));
        out
    }

    /// Chain and token of the last deposit.
    pub fn last_target(&self) -> Option<(ChainId, Address)> {
        self.state.read().target
    }

    /// Whether the last deposit ran to completion.
    pub fn deposit_complete(&self) -> bool {
        self.state.read().deposit_complete
    }

    /// Record deposit completion.
    pub fn mark_deposit_complete(&self) {
        self.state.write().deposit_complete = true;
    }

    /// Cached unified balance.
    pub fn unified_balance(&self) -> U256 {
        self.state.read().unified_balance
    }

    /// Update the cached unified balance.
    pub fn set_unified_balance(&self, amount: U256) {
        self.state.write().unified_balance = amount;
    }

    /// Forget every channel and the deposit flag. The balance cache and the
    /// last target survive.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.current = None;
        state.observed.clear();
        state.deposit_complete = false;
    }
}
