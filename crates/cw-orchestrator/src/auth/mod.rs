//! # Authentication
//!
//! Delegated session keys and the challenge-response handshake.

pub mod authenticator;
pub mod credential;

pub use authenticator::Authenticator;
pub use credential::{fingerprint, SessionCredential};
