//! # Clearway Test Suite
//!
//! End-to-end scenarios that drive [`cw_orchestrator::ChannelService`]
//! against the in-process clearing node and simulated chain.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs        # World setup, event helpers
//!     ├── deposit_flows.rs   # Deposit, pre-check and cleanup
//!     ├── session_flows.rs   # Sessions, tips, session close + withdraw
//!     └── resilience.rs      # Auth failures, reconnects, flow exclusion
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p cw-tests
//!
//! # By category
//! cargo test -p cw-tests integration::deposit_flows
//! cargo test -p cw-tests integration::resilience
//!
//! # Benchmarks
//! cargo bench -p cw-tests
//! ```

#![allow(dead_code)]

pub mod integration;
