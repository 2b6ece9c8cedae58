//! # Orchestrator Events
//!
//! Every event the channel orchestrator exposes to its embedder (UI,
//! notification layer, analytics). Payloads use plain strings for
//! addresses so this crate stays independent of the orchestrator's
//! domain types.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Progress of a multi-stage funds-moving flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Current stage (0 = pre-check).
    pub step: u8,
    /// Number of stages in the flow.
    pub total: u8,
    /// Message suitable for direct display.
    pub message: String,
    /// Set on the final event of a successful flow.
    pub complete: bool,
}

impl ProgressUpdate {
    /// Progress event for an intermediate stage.
    pub fn stage(step: u8, total: u8, message: impl Into<String>) -> Self {
        Self {
            step,
            total,
            message: message.into(),
            complete: false,
        }
    }

    /// Final progress event of a flow.
    pub fn completed(step: u8, total: u8, message: impl Into<String>) -> Self {
        Self {
            step,
            total,
            message: message.into(),
            complete: true,
        }
    }
}

/// Error categories surfaced through [`OrchestratorEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport failure or reconnection exhausted.
    Connection,
    /// Handshake timed out.
    AuthTimeout,
    /// Wallet refused the session approval or the node refused verification.
    AuthRejected,
    /// Requested chain is absent from the node's configuration.
    ChainUnsupported,
    /// Wallet balance or session budget too small.
    InsufficientBalance,
    /// No response within the request deadline.
    RpcTimeout,
    /// Node reported a failure for an outstanding request.
    Remote,
    /// Wallet rejection or on-chain revert.
    Transaction,
    /// Anything else.
    Internal,
}

/// All events published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    // =========================================================================
    // CONNECTION
    // =========================================================================
    /// Transport opened.
    Connected {
        /// Node endpoint.
        url: String,
    },

    /// Transport closed.
    Disconnected {
        /// Close reason reported by the transport.
        reason: String,
        /// Whether a reconnect has been scheduled.
        will_retry: bool,
    },

    /// A reconnect attempt has been scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay_ms: u64,
    },

    /// Handshake completed and a delegated session key is active.
    Authenticated {
        /// Wallet address.
        wallet: String,
        /// Delegated session key address.
        session_key: String,
        /// Credential expiry (unix seconds).
        expires_at: u64,
    },

    /// Network configuration fetched from the node.
    ConfigReady {
        /// Supported chain ids.
        chains: Vec<u64>,
        /// Broker (unified ledger) address.
        broker: String,
    },

    // =========================================================================
    // CHANNEL LIFECYCLE
    // =========================================================================
    /// Deposit flow stage transition.
    DepositProgress(ProgressUpdate),

    /// Withdraw flow stage transition.
    WithdrawProgress(ProgressUpdate),

    // =========================================================================
    // SESSION
    // =========================================================================
    /// Spending session opened.
    SessionCreated {
        /// Session identifier.
        session_id: String,
        /// Recipient of the session's tips.
        streamer: String,
        /// Initial budget.
        budget: U256,
        /// Commission in basis points.
        commission_bps: u32,
    },

    /// Outgoing tip accepted by the node.
    TipSent {
        /// Tip identifier.
        tip_id: String,
        /// Recipient.
        streamer: String,
        /// Gross amount.
        amount: U256,
        /// Commission retained.
        commission: U256,
        /// Remaining session budget.
        remaining: U256,
    },

    /// Incoming transfer pushed by the node.
    TipReceived {
        /// Sender address.
        from: String,
        /// Amount received.
        amount: U256,
        /// Asset symbol.
        asset: String,
    },

    /// Unified ledger balance changed.
    BalanceUpdate {
        /// Asset symbol.
        asset: String,
        /// New balance.
        amount: U256,
    },

    /// Spending session closed.
    SessionClosed {
        /// Session identifier.
        session_id: String,
        /// Total spent in the session.
        total_spent: U256,
        /// Budget left unspent.
        unused_balance: U256,
        /// Session length in seconds.
        duration_secs: u64,
    },

    // =========================================================================
    // ERRORS
    // =========================================================================
    /// Terminal failure of an operation.
    Error {
        /// Category.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

impl OrchestratorEvent {
    /// Topic used for subscription filtering.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Connected { .. }
            | Self::Disconnected { .. }
            | Self::Reconnecting { .. }
            | Self::Authenticated { .. }
            | Self::ConfigReady { .. } => EventTopic::Connection,
            Self::DepositProgress(_) | Self::WithdrawProgress(_) => EventTopic::Channel,
            Self::SessionCreated { .. } | Self::TipSent { .. } | Self::SessionClosed { .. } => {
                EventTopic::Session
            }
            Self::TipReceived { .. } | Self::BalanceUpdate { .. } => EventTopic::Balance,
            Self::Error { .. } => EventTopic::Error,
        }
    }

    /// Short event name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Authenticated { .. } => "authenticated",
            Self::ConfigReady { .. } => "configReady",
            Self::DepositProgress(_) => "depositProgress",
            Self::WithdrawProgress(_) => "withdrawProgress",
            Self::SessionCreated { .. } => "sessionCreated",
            Self::TipSent { .. } => "tipSent",
            Self::TipReceived { .. } => "tipReceived",
            Self::BalanceUpdate { .. } => "balanceUpdate",
            Self::SessionClosed { .. } => "sessionClosed",
            Self::Error { .. } => "error",
        }
    }
}

/// Event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Connection and authentication lifecycle.
    Connection,
    /// Deposit and withdraw progress.
    Channel,
    /// Spending session lifecycle.
    Session,
    /// Balance pushes and incoming transfers.
    Balance,
    /// Terminal errors.
    Error,
    /// Wildcard.
    All,
}

/// Subscription filter. An empty topic list matches everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to receive.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Match every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Match the given topics only.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Check whether an event passes the filter.
    #[must_use]
    pub fn matches(&self, event: &OrchestratorEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}
