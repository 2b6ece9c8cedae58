//! Request parameters, results and notification payloads.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::domain::amount::decimal;
use crate::domain::{
    Address, Allowance, AssetInfo, ChainContracts, ChainId, ChannelId, ChannelParams,
    ChannelState, NetworkConfig,
};

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// `auth_request` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestParams {
    /// Wallet address.
    pub address: Address,
    /// Session key address being delegated to.
    pub session_key: Address,
    /// Application identity.
    pub application: String,
    /// Spending caps for the session key.
    pub allowances: Vec<Allowance>,
    /// Expiry (unix seconds).
    pub expires_at: u64,
    /// Permission scope.
    pub scope: String,
}

/// `auth_challenge` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Opaque challenge to sign.
    pub challenge_message: String,
}

/// `auth_verify` parameters. Carries either the wallet's typed-data
/// signature or a previously issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyParams {
    /// Challenge being answered.
    pub challenge: String,
    /// Wallet signature over the policy typed data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Token from an earlier verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

/// `auth_verify` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyResult {
    /// Whether the session key is now active.
    pub success: bool,
    /// Wallet address.
    pub address: Address,
    /// Session key address.
    pub session_key: Address,
    /// Token for signature-less re-authentication.
    #[serde(default)]
    pub jwt_token: Option<String>,
}

// =============================================================================
// CONFIGURATION AND BALANCES
// =============================================================================

/// One supported network in `get_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Chain id.
    pub chain_id: ChainId,
    /// Custody contract.
    pub custody_address: Address,
    /// Adjudicator contract.
    pub adjudicator_address: Address,
}

/// `get_config` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResult {
    /// Broker address.
    pub broker_address: Address,
    /// Supported networks.
    pub networks: Vec<NetworkInfo>,
}

impl From<ConfigResult> for NetworkConfig {
    fn from(result: ConfigResult) -> Self {
        NetworkConfig {
            broker: result.broker_address,
            chains: result
                .networks
                .into_iter()
                .map(|n| ChainContracts {
                    chain_id: n.chain_id,
                    custody: n.custody_address,
                    adjudicator: n.adjudicator_address,
                })
                .collect(),
        }
    }
}

/// Balance of one asset in the unified ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    /// Asset symbol.
    pub asset: String,
    /// Balance.
    #[serde(with = "decimal")]
    pub amount: U256,
}

/// `get_ledger_balances` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalancesParams {
    /// Account queried.
    pub participant: Address,
}

/// `get_ledger_balances` result and `bu` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerBalances {
    /// Balances by asset.
    pub ledger_balances: Vec<LedgerBalance>,
}

impl LedgerBalances {
    /// Balance of `asset` (case-insensitive), zero if absent.
    pub fn amount_of(&self, asset: &str) -> U256 {
        self.ledger_balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(|b| b.amount)
            .unwrap_or_default()
    }
}

/// `assets` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetList {
    /// Known assets.
    pub assets: Vec<AssetInfo>,
}

// =============================================================================
// CHANNELS
// =============================================================================

/// Node-side channel status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeChannelStatus {
    /// Created, waiting for the on-chain transaction.
    Joining,
    /// Active.
    Open,
    /// Resize pending.
    Resizing,
    /// Under challenge.
    Challenged,
    /// Closed.
    Closed,
}

/// Channel as reported by the node (`get_channels` entries and `cu` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id.
    pub channel_id: ChannelId,
    /// Participant (wallet).
    pub participant: Address,
    /// Chain.
    pub chain_id: ChainId,
    /// Token.
    pub token: Address,
    /// Participant's current allocation in the channel.
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Node-side status.
    pub status: NodeChannelStatus,
    /// Latest state version.
    pub version: u64,
}

/// `get_channels` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChannelsParams {
    /// Participant filter.
    pub participant: Address,
}

/// `get_channels` result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelList {
    /// Channels.
    pub channels: Vec<ChannelInfo>,
}

/// `create_channel` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChannelParams {
    /// Chain.
    pub chain_id: ChainId,
    /// Token.
    pub token: Address,
}

/// `create_channel` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChannelResult {
    /// Assigned channel id.
    pub channel_id: ChannelId,
    /// Fixed channel parameters.
    pub channel: ChannelParams,
    /// Initial node-signed state.
    pub state: ChannelState,
}

/// `resize_channel` parameters.
///
/// `lock_amount` moves custody funds into the channel; `release_amount`
/// moves channel funds into the unified ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeChannelParams {
    /// Channel.
    pub channel_id: ChannelId,
    /// Custody → channel.
    #[serde(with = "decimal")]
    pub lock_amount: U256,
    /// Channel → unified ledger.
    #[serde(with = "decimal")]
    pub release_amount: U256,
    /// Destination of released funds.
    pub funds_destination: Address,
}

/// `resize_channel` and `close_channel` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStateResult {
    /// Channel.
    pub channel_id: ChannelId,
    /// New node-signed state.
    pub state: ChannelState,
}

/// `close_channel` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseChannelParams {
    /// Channel.
    pub channel_id: ChannelId,
    /// Where the participant's share goes.
    pub funds_destination: Address,
}

// =============================================================================
// TRANSFERS
// =============================================================================

/// One asset line of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAllocation {
    /// Asset symbol.
    pub asset: String,
    /// Amount.
    #[serde(with = "decimal")]
    pub amount: U256,
}

/// `transfer` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    /// Recipient.
    pub destination: Address,
    /// Asset lines.
    pub allocations: Vec<TransferAllocation>,
    /// Optional note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// `transfer` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Ledger transaction id.
    pub transaction_id: String,
}

/// `tr` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferNotification {
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Asset symbol.
    pub asset: String,
    /// Amount.
    #[serde(with = "decimal")]
    pub amount: U256,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    /// Description.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_result_converts() {
        let raw = json!({
            "broker_address": format!("0x{}", "bb".repeat(20)),
            "networks": [{
                "chain_id": 137,
                "custody_address": format!("0x{}", "c1".repeat(20)),
                "adjudicator_address": format!("0x{}", "ad".repeat(20)),
            }]
        });
        let config: NetworkConfig = serde_json::from_value::<ConfigResult>(raw).unwrap().into();
        assert_eq!(config.chain_ids(), vec![137]);
        assert_eq!(config.broker, Address([0xbb; 20]));
    }

    #[test]
    fn test_ledger_balance_lookup_is_case_insensitive() {
        let balances: LedgerBalances = serde_json::from_value(json!({
            "ledger_balances": [{"asset": "USDC", "amount": "250"}]
        }))
        .unwrap();
        assert_eq!(balances.amount_of("usdc"), U256::from(250u64));
        assert_eq!(balances.amount_of("eth"), U256::zero());
    }

    #[test]
    fn test_verify_params_omit_absent_fields() {
        let params = AuthVerifyParams {
            challenge: "c".into(),
            signature: None,
            jwt: Some("t".into()),
        };
        let value = serde_json::to_value(&params).unwrap();
        assert!(value.get("signature").is_none());
        assert_eq!(value["jwt"], "t");
    }
}
