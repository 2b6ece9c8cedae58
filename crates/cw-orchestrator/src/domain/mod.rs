//! # Domain Module
//!
//! Core types for the channel orchestrator.

pub mod amount;
pub mod entities;
pub mod errors;
pub mod flow;
pub mod invariants;
pub mod request_id;
pub mod session_key;
pub mod value_objects;

pub use amount::{parse_amount, to_f64_lossy};
pub use entities::*;
pub use errors::*;
pub use flow::*;
pub use invariants::*;
pub use request_id::RequestId;
pub use session_key::{keccak256, recover_address, recover_hex, SessionKey};
pub use value_objects::*;
