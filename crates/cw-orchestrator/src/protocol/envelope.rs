//! Wire envelopes.
//!
//! ```text
//! client → node   {"req": {"id", "method", "params", "ts"}, "sig": ["0x…"]}
//! node → client   {"res": {"id" | null, "method", "result", "ts"}, "sig": [...]}
//! ```
//!
//! Responses echo the request id. Notifications carry no id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::domain::{keccak256, OrchestratorError, RequestId, SessionKey};

/// Method names on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Handshake step 1: announce wallet and session key.
    AuthRequest,
    /// Node's reply to `auth_request`.
    AuthChallenge,
    /// Handshake step 2: signed challenge.
    AuthVerify,
    /// Network configuration.
    GetConfig,
    /// Unified ledger balances; also used as keep-alive.
    GetLedgerBalances,
    /// Channels the node holds for a participant.
    GetChannels,
    /// Request a new channel.
    CreateChannel,
    /// Request a lock or release state.
    ResizeChannel,
    /// Request a final state.
    CloseChannel,
    /// Off-chain transfer from the unified ledger.
    Transfer,
    /// Notification: balance update.
    #[serde(rename = "bu")]
    BalanceUpdate,
    /// Notification: channel update.
    #[serde(rename = "cu")]
    ChannelUpdate,
    /// Notification: asset list.
    Assets,
    /// Notification: incoming transfer.
    #[serde(rename = "tr")]
    TransferNotification,
    /// Error reply or notification.
    Error,
    /// Anything this client does not know.
    #[serde(other)]
    Unknown,
}

impl Method {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequest => "auth_request",
            Self::AuthChallenge => "auth_challenge",
            Self::AuthVerify => "auth_verify",
            Self::GetConfig => "get_config",
            Self::GetLedgerBalances => "get_ledger_balances",
            Self::GetChannels => "get_channels",
            Self::CreateChannel => "create_channel",
            Self::ResizeChannel => "resize_channel",
            Self::CloseChannel => "close_channel",
            Self::Transfer => "transfer",
            Self::BalanceUpdate => "bu",
            Self::ChannelUpdate => "cu",
            Self::Assets => "assets",
            Self::TransferNotification => "tr",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the node sends this unsolicited.
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::BalanceUpdate | Self::ChannelUpdate | Self::Assets | Self::TransferNotification
        )
    }

    /// Method a successful response to this request carries.
    pub fn response_method(&self) -> Method {
        match self {
            Self::AuthRequest => Self::AuthChallenge,
            other => *other,
        }
    }

    /// Whether the request is sent before a session key exists.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::AuthRequest | Self::AuthVerify)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id.
    pub id: RequestId,
    /// Method.
    pub method: Method,
    /// Parameters.
    pub params: Value,
    /// Client timestamp (ms).
    pub ts: u64,
}

impl RpcRequest {
    /// New request stamped with the current time.
    pub fn new(id: RequestId, method: Method, params: Value) -> Self {
        Self {
            id,
            method,
            params,
            ts: now_ms(),
        }
    }

    /// Keccak-256 over the canonical JSON of the request body.
    pub fn digest(&self) -> Result<[u8; 32], OrchestratorError> {
        let bytes = serde_json::to_vec(self).map_err(|e| OrchestratorError::Protocol(e.to_string()))?;
        Ok(keccak256(&bytes))
    }
}

/// Outbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Request body.
    pub req: RpcRequest,
    /// Signatures over the body.
    #[serde(default)]
    pub sig: Vec<String>,
}

impl RequestEnvelope {
    /// Envelope signed with `key`, or unsigned when no key is active.
    pub fn signed(req: RpcRequest, key: Option<&SessionKey>) -> Result<Self, OrchestratorError> {
        let sig = match key {
            Some(key) => {
                let digest = req.digest()?;
                let raw = key.sign_digest(&digest)?;
                vec![format!("0x{}", hex::encode(raw))]
            }
            None => Vec::new(),
        };
        Ok(Self { req, sig })
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String, OrchestratorError> {
        serde_json::to_string(self).map_err(|e| OrchestratorError::Protocol(e.to_string()))
    }
}

/// Response or notification body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request id; absent on notifications.
    #[serde(default)]
    pub id: Option<RequestId>,
    /// Method.
    pub method: Method,
    /// Payload.
    #[serde(default)]
    pub result: Value,
    /// Node timestamp (ms).
    #[serde(default)]
    pub ts: u64,
}

/// Inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Response body.
    pub res: RpcResponse,
    /// Node signatures.
    #[serde(default)]
    pub sig: Vec<String>,
}

impl ResponseEnvelope {
    /// Reply to request `id`.
    pub fn reply(id: RequestId, method: Method, result: Value) -> Self {
        Self {
            res: RpcResponse {
                id: Some(id),
                method,
                result,
                ts: now_ms(),
            },
            sig: Vec::new(),
        }
    }

    /// Unsolicited notification.
    pub fn notification(method: Method, result: Value) -> Self {
        Self {
            res: RpcResponse {
                id: None,
                method,
                result,
                ts: now_ms(),
            },
            sig: Vec::new(),
        }
    }

    /// Parse a text frame.
    pub fn from_frame(frame: &str) -> Result<Self, OrchestratorError> {
        serde_json::from_str(frame).map_err(|e| OrchestratorError::Protocol(e.to_string()))
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String, OrchestratorError> {
        serde_json::to_string(self).map_err(|e| OrchestratorError::Protocol(e.to_string()))
    }
}
