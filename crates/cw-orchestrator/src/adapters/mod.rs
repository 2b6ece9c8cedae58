//! # Adapters
//!
//! Implementations of the outbound ports.
//!
//! - [`WsTransport`]: WebSocket connection to a real clearing node
//! - [`LoopbackNode`]: in-process clearing node
//! - [`InMemoryChain`]: simulated wallet and chain
//! - [`InMemoryCredentialStore`], [`FileCredentialStore`]: credential persistence

pub mod credential_store;
pub mod in_memory_chain;
pub mod loopback_node;
pub mod ws_transport;

pub use credential_store::{FileCredentialStore, InMemoryCredentialStore};
pub use in_memory_chain::{InMemoryChain, OnChainChannel};
pub use loopback_node::LoopbackNode;
pub use ws_transport::WsTransport;
