//! Session credential and its configuration fingerprint.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::OrchestratorConfig;
use crate::domain::{Address, Allowance, OrchestratorError, SessionKey};
use crate::ports::StoredCredential;

/// Fingerprint of the configuration a session key was approved under.
///
/// SHA-256 over `asset|scope|application`; changing any of them makes
/// stored credentials unusable.
pub fn fingerprint(asset: &str, scope: &str, application: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(asset.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(scope.as_bytes());
    hasher.update(b"|");
    hasher.update(application.as_bytes());
    hex::encode(hasher.finalize())
}

/// Delegated session credential held in memory.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    /// Wallet that approved the key.
    pub wallet: Address,
    /// Session key.
    pub key: SessionKey,
    /// Expiry (unix seconds).
    pub expires_at: u64,
    /// Allowances granted to the key.
    pub allowances: Vec<Allowance>,
    /// Configuration fingerprint.
    pub fingerprint: String,
    /// Token for signature-less re-authentication.
    pub jwt: Option<String>,
}

impl SessionCredential {
    /// Fresh credential for `wallet` under `config`.
    pub fn generate(wallet: Address, config: &OrchestratorConfig) -> Self {
        Self {
            wallet,
            key: SessionKey::generate(),
            expires_at: unix_now() + config.session_ttl_secs,
            allowances: vec![Allowance {
                asset: config.asset.clone(),
                amount: config.session_allowance,
            }],
            fingerprint: fingerprint(&config.asset, &config.scope, &config.application),
            jwt: None,
        }
    }

    /// Restore from storage.
    pub fn restore(stored: &StoredCredential) -> Result<Self, OrchestratorError> {
        let key = SessionKey::from_hex(&stored.secret)?;
        if key.address() != stored.session_key {
            return Err(OrchestratorError::CredentialStore(format!(
                "stored key does not match address {}",
                stored.session_key.short()
            )));
        }
        Ok(Self {
            wallet: stored.wallet,
            key,
            expires_at: stored.expires_at,
            allowances: stored.allowances.clone(),
            fingerprint: stored.fingerprint.clone(),
            jwt: stored.jwt.clone(),
        })
    }

    /// Storage form.
    pub fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            wallet: self.wallet,
            secret: self.key.secret_hex(),
            session_key: self.key.address(),
            fingerprint: self.fingerprint.clone(),
            expires_at: self.expires_at,
            allowances: self.allowances.clone(),
            jwt: self.jwt.clone(),
        }
    }

    /// Whether the credential can be reused for `wallet` under `fingerprint`.
    pub fn is_usable(&self, wallet: Address, fingerprint: &str) -> bool {
        self.wallet == wallet && self.fingerprint == fingerprint && self.expires_at > unix_now()
    }
}

pub(crate) fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_each_input() {
        let base = fingerprint("usdc", "tips", "clearway");
        assert_eq!(base, fingerprint("USDC", "tips", "clearway"));
        assert_ne!(base, fingerprint("usdt", "tips", "clearway"));
        assert_ne!(base, fingerprint("usdc", "all", "clearway"));
        assert_ne!(base, fingerprint("usdc", "tips", "other-app"));
    }

    #[test]
    fn test_store_round_trip_keeps_key() {
        let config = OrchestratorConfig::for_testing();
        let wallet = Address([7; 20]);
        let credential = SessionCredential::generate(wallet, &config);

        let restored = SessionCredential::restore(&credential.to_stored()).unwrap();
        assert_eq!(restored.key.address(), credential.key.address());
        assert!(restored.is_usable(wallet, &credential.fingerprint));
    }

    #[test]
    fn test_expired_or_foreign_credential_unusable() {
        let config = OrchestratorConfig::for_testing();
        let wallet = Address([7; 20]);
        let mut credential = SessionCredential::generate(wallet, &config);
        let fp = credential.fingerprint.clone();

        assert!(!credential.is_usable(Address([8; 20]), &fp));
        assert!(!credential.is_usable(wallet, "other"));
        credential.expires_at = 1;
        assert!(!credential.is_usable(wallet, &fp));
    }

    #[test]
    fn test_restore_rejects_mismatched_address() {
        let config = OrchestratorConfig::for_testing();
        let mut stored = SessionCredential::generate(Address([7; 20]), &config).to_stored();
        stored.session_key = Address([1; 20]);
        assert!(matches!(
            SessionCredential::restore(&stored),
            Err(OrchestratorError::CredentialStore(_))
        ));
    }
}
