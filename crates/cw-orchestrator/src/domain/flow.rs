//! Funds-moving flows and their stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Last stage number of the deposit flow.
pub const DEPOSIT_STAGES: u8 = 7;

/// Last stage number of the withdraw flow.
pub const WITHDRAW_STAGES: u8 = 2;

/// Last stage number of a standalone cleanup.
pub const CLEANUP_STAGES: u8 = 1;

/// Multi-stage operations that move funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    /// Wallet → custody → channel → unified ledger.
    Deposit,
    /// Channel close and custody withdrawal.
    Withdraw,
    /// Stale-state reconciliation.
    Cleanup,
}

impl FlowKind {
    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage of a funds-moving flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStage {
    /// Deposit 0: close stale channels and drain custody.
    PreCheck,
    /// Deposit 1: resolve chain contracts.
    Setup,
    /// Deposit 2: token allowance.
    Approve,
    /// Deposit 3: wallet to custody.
    Deposit,
    /// Deposit 4: create the channel and wait for the open notification.
    CreateChannel,
    /// Deposit 5: lock custody funds into the channel.
    Resize,
    /// Deposit 6: release channel funds into the unified ledger.
    Allocate,
    /// Deposit 7: wait for a positive unified balance.
    Confirm,
    /// Withdraw 1: cooperative close.
    Close,
    /// Withdraw 2: custody to wallet.
    Withdraw,
    /// Reconciliation.
    Reconcile,
}

impl FlowStage {
    /// Stage number within its flow.
    pub fn step(&self) -> u8 {
        match self {
            Self::PreCheck => 0,
            Self::Setup | Self::Close | Self::Reconcile => 1,
            Self::Approve | Self::Withdraw => 2,
            Self::Deposit => 3,
            Self::CreateChannel => 4,
            Self::Resize => 5,
            Self::Allocate => 6,
            Self::Confirm => 7,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PreCheck => "pre-check",
            Self::Setup => "setup",
            Self::Approve => "approve",
            Self::Deposit => "deposit",
            Self::CreateChannel => "create channel",
            Self::Resize => "resize",
            Self::Allocate => "allocate",
            Self::Confirm => "confirm",
            Self::Close => "close channel",
            Self::Withdraw => "withdraw",
            Self::Reconcile => "reconcile",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.step(), self.label())
    }
}
