//! # Clearway Channel Orchestrator
//!
//! Client-side orchestration of custody deposits, payment channels and a
//! clearing-node session for streamer tipping.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          ChannelService                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────────────────┐  │
//! │  │  Connection │──→│ RpcCorrelator│←──│      Authenticator        │  │
//! │  │   Manager   │   │ (pending ids)│   │ (challenge / session key) │  │
//! │  └──────┬──────┘   └──────┬───────┘   └───────────────────────────┘  │
//! │         │ reconnect       │ pushes                                   │
//! │  ┌──────┴─────────────────┴───────┐   ┌───────────────────────────┐  │
//! │  │     Channel Lifecycle          │──→│    Stale-State Reconciler │  │
//! │  │ deposit 0..7 │ withdraw 1..2   │   └───────────────────────────┘  │
//! │  └──────────────┬─────────────────┘   ┌───────────────────────────┐  │
//! │                 │ wallet / chain      │      Session Ledger       │  │
//! │                 ▼                     │ (budget, tips, commission)│  │
//! │        WalletSigner, ChainReader      └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!                               │
//!                          Event Bus (shared-bus)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cw_orchestrator::{ChannelService, OrchestratorConfig, WsTransport, FileCredentialStore};
//!
//! let service = ChannelService::new(
//!     OrchestratorConfig::from_env(),
//!     Arc::new(WsTransport::default()),
//!     Arc::new(FileCredentialStore::new("credentials.json")),
//!     Arc::new(InMemoryEventBus::new()),
//! );
//! service.initialize(wallet, signer, chain).await?;
//! service.deposit_and_open_channel(amount, 137, token).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod auth;
pub mod config;
pub mod connection;
pub mod domain;
pub mod ledger;
pub mod lifecycle;
pub mod ports;
pub mod protocol;
pub mod reconcile;
pub mod rpc;
pub mod service;

pub use adapters::{
    FileCredentialStore, InMemoryChain, InMemoryCredentialStore, LoopbackNode, WsTransport,
};
pub use config::{CommissionConfig, OrchestratorConfig, ReconnectPolicy, TimeoutConfig};
pub use domain::{Address, ChainId, ChannelId, ChannelStatus, OrchestratorError, TxHash};
pub use ledger::{SessionLedger, SessionSummary, SpendingCheck, TipReceipt};
pub use lifecycle::{DepositOutcome, WithdrawOutcome};
pub use ports::{ChainReader, ChannelOrchestratorApi, CredentialStore, NodeTransport, WalletSigner};
pub use reconcile::{CustodyDrained, ReconcileSummary, ReconciliationWarning};
pub use service::ChannelService;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
