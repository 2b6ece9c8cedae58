//! # Value Objects
//!
//! Identifiers, addresses and the small state enums shared by every
//! component of the orchestrator.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure to parse a `0x`-prefixed hex value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid hex value: {0}")]
pub struct ParseHexError(pub String);

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseHexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| ParseHexError(format!("{s}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| ParseHexError(format!("{s}: expected {N} bytes")))
}

macro_rules! hex_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Wrap raw bytes.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Abbreviated form for log lines (`0x1234…abcd`).
            pub fn short(&self) -> String {
                let full = hex::encode(self.0);
                format!("0x{}…{}", &full[..4], &full[full.len() - 4..])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_bytes!(
    /// 20-byte account or contract address.
    Address,
    20
);

hex_bytes!(
    /// 32-byte payment channel identifier.
    ChannelId,
    32
);

hex_bytes!(
    /// 32-byte transaction hash.
    TxHash,
    32
);

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address([0u8; 20]);
}

/// EVM chain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of the single connection to the clearing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Transport being opened.
    Connecting,
    /// Transport open, not yet authenticated.
    Connected,
    /// Transport open and session key active.
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
        };
        f.write_str(s)
    }
}

/// Local view of a payment channel's lifecycle.
///
/// ```text
/// Creating ──→ AwaitingAck ──→ Locked ──→ Allocated
///    │              │            │           │
///    └──────────────┴────────────┴───────────┴──→ Closing ──→ Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Channel requested from the node, not yet on chain.
    Creating,
    /// Create transaction mined, waiting for the node's open notification.
    AwaitingAck,
    /// Deposit moved from custody into the channel.
    Locked,
    /// Channel funds released into the unified ledger.
    Allocated,
    /// Cooperative close in progress.
    Closing,
    /// Closed on chain.
    Closed,
}

impl ChannelStatus {
    /// Check if transition to `target` is valid.
    pub fn can_transition_to(&self, target: ChannelStatus) -> bool {
        use ChannelStatus::*;
        matches!(
            (self, target),
            (Creating, AwaitingAck)
                | (AwaitingAck, Locked)
                | (Locked, Allocated)
                | (Creating | AwaitingAck | Locked | Allocated, Closing)
                | (Closing, Closed)
        )
    }

    /// Whether the channel may still be open on chain.
    pub fn is_live(&self) -> bool {
        !matches!(self, ChannelStatus::Closed)
    }

    /// Whether deposited funds may still sit in the channel's allocation
    /// rather than the unified ledger.
    pub fn holds_allocation(&self) -> bool {
        matches!(
            self,
            ChannelStatus::Creating | ChannelStatus::AwaitingAck | ChannelStatus::Locked
        )
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthState {
    /// Nothing sent.
    Idle,
    /// Auth request sent, waiting for the challenge.
    RequestSent,
    /// Challenge received, wallet signature pending.
    ChallengeReceived,
    /// Verification sent.
    VerifySent,
    /// Session key active.
    Authenticated,
    /// Attempt failed; a new attempt restarts from `Idle`.
    Failed,
}

impl AuthState {
    /// Check if transition to `target` is valid.
    pub fn can_transition_to(&self, target: AuthState) -> bool {
        use AuthState::*;
        matches!(
            (self, target),
            (Idle | Failed | Authenticated, RequestSent)
                | (RequestSent, ChallengeReceived)
                | (ChallengeReceived, VerifySent)
                | (VerifySent, Authenticated)
                | (RequestSent | ChallengeReceived | VerifySent, Failed)
        )
    }
}

/// Outcome of a bounded wait for an asynchronous acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Acknowledgement {
    /// The expected notification or balance was observed.
    Confirmed,
    /// The wait expired; the step proceeded anyway.
    Unconfirmed,
}

impl Acknowledgement {
    /// Whether the acknowledgement was observed.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Acknowledgement::Confirmed)
    }
}

/// Commission tier applied to a session's tips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissionTier {
    /// Default platform rate.
    Standard,
    /// Reduced rate for partner streamers.
    Partner,
}

/// On-chain call kinds, used for logs, metrics and failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Token allowance for the custody contract.
    Approve,
    /// Wallet to custody.
    Deposit,
    /// Channel creation.
    CreateChannel,
    /// Custody to channel.
    Resize,
    /// Channel to unified ledger.
    Allocate,
    /// Cooperative close.
    Close,
    /// Custody to wallet.
    Withdraw,
}

impl CallKind {
    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deposit => "deposit",
            Self::CreateChannel => "create_channel",
            Self::Resize => "resize",
            Self::Allocate => "allocate",
            Self::Close => "close",
            Self::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
