//! # RPC
//!
//! Request correlation over the node connection.

pub mod correlator;
pub mod pending;

pub use correlator::{PushMessage, RpcCorrelator};
pub use pending::{PendingGuard, PendingRequestStore, PendingSnapshot, RpcOutcome};
