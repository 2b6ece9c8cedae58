//! # Orchestrator Configuration
//!
//! Node endpoint, session identity, timeouts, reconnect policy and
//! commission rates.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::domain::amount::decimal;
use crate::domain::{parse_amount, CommissionTier};

/// Timeouts and intervals (seconds).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per-request deadline.
    pub rpc_secs: u64,
    /// Whole handshake deadline.
    pub auth_secs: u64,
    /// Keep-alive interval while authenticated.
    pub keepalive_secs: u64,
    /// Channel open / lock acknowledgement wait.
    pub ack_secs: u64,
    /// Unified balance poll interval.
    pub poll_secs: u64,
    /// Unified balance confirmation wait.
    pub confirm_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rpc_secs: 60,
            auth_secs: 30,
            keepalive_secs: 25,
            ack_secs: 30,
            poll_secs: 10,
            confirm_secs: 120,
        }
    }
}

impl TimeoutConfig {
    /// Per-request deadline.
    pub fn rpc(&self) -> Duration {
        Duration::from_secs(self.rpc_secs)
    }

    /// Handshake deadline.
    pub fn auth(&self) -> Duration {
        Duration::from_secs(self.auth_secs)
    }

    /// Keep-alive interval.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Acknowledgement wait.
    pub fn ack(&self) -> Duration {
        Duration::from_secs(self.ack_secs)
    }

    /// Balance poll interval.
    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    /// Balance confirmation wait.
    pub fn confirm(&self) -> Duration {
        Duration::from_secs(self.confirm_secs)
    }
}

/// Exponential backoff for reconnects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay_ms: u64,
    /// Upper bound on any delay.
    pub max_delay_ms: u64,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (0-based): `min(base * 2^attempt, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Commission rates (basis points).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionConfig {
    /// Default rate.
    pub standard_bps: u32,
    /// Partner rate.
    pub partner_bps: u32,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            standard_bps: 1000,
            partner_bps: 500,
        }
    }
}

impl CommissionConfig {
    /// Rate for `tier`.
    pub fn bps(&self, tier: CommissionTier) -> u32 {
        match tier {
            CommissionTier::Standard => self.standard_bps,
            CommissionTier::Partner => self.partner_bps,
        }
    }
}

/// Orchestrator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Clearing node endpoint.
    pub node_url: String,
    /// Application identity presented during authentication.
    pub application: String,
    /// Permission scope requested for the session key.
    pub scope: String,
    /// Ledger asset symbol.
    pub asset: String,
    /// Allowance granted to the session key.
    #[serde(with = "decimal")]
    pub session_allowance: U256,
    /// Session key lifetime.
    pub session_ttl_secs: u64,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// Commission rates.
    pub commission: CommissionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            node_url: "wss://clearnet.example.org/ws".to_string(),
            application: "clearway".to_string(),
            scope: "tips".to_string(),
            asset: "usdc".to_string(),
            session_allowance: U256::from(1_000_000_000u64),
            session_ttl_secs: 24 * 3600,
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectPolicy::default(),
            commission: CommissionConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a config for testing (loopback endpoint, defaults otherwise;
    /// tests drive timers with a paused clock).
    pub fn for_testing() -> Self {
        Self {
            node_url: "loopback://node".to_string(),
            application: "clearway-test".to_string(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `CW_*` environment variables.
    ///
    /// - `CW_NODE_URL`, `CW_APPLICATION`, `CW_SCOPE`, `CW_ASSET`
    /// - `CW_SESSION_ALLOWANCE`, `CW_SESSION_TTL_SECS`
    /// - `CW_RPC_TIMEOUT_SECS`, `CW_AUTH_TIMEOUT_SECS`, `CW_KEEPALIVE_SECS`,
    ///   `CW_ACK_TIMEOUT_SECS`, `CW_POLL_SECS`, `CW_CONFIRM_TIMEOUT_SECS`
    /// - `CW_RECONNECT_BASE_MS`, `CW_RECONNECT_MAX_MS`, `CW_RECONNECT_ATTEMPTS`
    /// - `CW_COMMISSION_STANDARD_BPS`, `CW_COMMISSION_PARTNER_BPS`
    ///
    /// Unparseable values keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("CW_NODE_URL") {
            config.node_url = url;
        }
        if let Ok(app) = env::var("CW_APPLICATION") {
            config.application = app;
        }
        if let Ok(scope) = env::var("CW_SCOPE") {
            config.scope = scope;
        }
        if let Ok(asset) = env::var("CW_ASSET") {
            config.asset = asset.to_lowercase();
        }
        if let Some(amount) = env::var("CW_SESSION_ALLOWANCE")
            .ok()
            .and_then(|v| parse_amount(&v).ok())
        {
            config.session_allowance = amount;
        }

        let t = &mut config.timeouts;
        env_number("CW_SESSION_TTL_SECS", &mut config.session_ttl_secs);
        env_number("CW_RPC_TIMEOUT_SECS", &mut t.rpc_secs);
        env_number("CW_AUTH_TIMEOUT_SECS", &mut t.auth_secs);
        env_number("CW_KEEPALIVE_SECS", &mut t.keepalive_secs);
        env_number("CW_ACK_TIMEOUT_SECS", &mut t.ack_secs);
        env_number("CW_POLL_SECS", &mut t.poll_secs);
        env_number("CW_CONFIRM_TIMEOUT_SECS", &mut t.confirm_secs);

        let r = &mut config.reconnect;
        env_number("CW_RECONNECT_BASE_MS", &mut r.base_delay_ms);
        env_number("CW_RECONNECT_MAX_MS", &mut r.max_delay_ms);
        env_number("CW_RECONNECT_ATTEMPTS", &mut r.max_attempts);

        let c = &mut config.commission;
        env_number("CW_COMMISSION_STANDARD_BPS", &mut c.standard_bps);
        env_number("CW_COMMISSION_PARTNER_BPS", &mut c.partner_bps);

        config
    }
}

fn env_number<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Some(value) = env::var(key).ok().and_then(|v| v.trim().parse().ok()) {
        *slot = value;
    }
}
