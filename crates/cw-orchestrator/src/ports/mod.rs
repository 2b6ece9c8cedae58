//! # Ports
//!
//! Inbound API and outbound dependency traits.

pub mod inbound;
pub mod outbound;

pub use inbound::ChannelOrchestratorApi;
pub use outbound::{
    ChainReader, ContractCall, CredentialStore, NodeTransport, Receipt, SignerError,
    StoredCredential, TransportEvent, TransportLink, TypedData, WalletSigner,
};
