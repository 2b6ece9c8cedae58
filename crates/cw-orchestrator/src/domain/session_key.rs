//! # Session Key
//!
//! Ephemeral secp256k1 key delegated by the wallet for a bounded time and
//! allowance. Every request after authentication is signed with it.
//!
//! Signatures are Ethereum-style 65-byte `r || s || v` over a Keccak-256
//! digest, with `v` in {27, 28}.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use super::errors::OrchestratorError;
use super::value_objects::Address;

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Derive the account address of a public key (last 20 bytes of the
/// Keccak-256 of the uncompressed point without its prefix).
pub fn address_from_pubkey(public_key: &VerifyingKey) -> Address {
    let point = public_key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}

/// Recover the signer address of a 65-byte signature over `digest`.
pub fn recover_address(digest: &[u8; 32], signature: &[u8]) -> Result<Address, OrchestratorError> {
    if signature.len() != 65 {
        return Err(OrchestratorError::Protocol(format!(
            "signature must be 65 bytes, got {}",
            signature.len()
        )));
    }
    let v = match signature[64] {
        v @ 0..=1 => v,
        v @ 27..=28 => v - 27,
        v => {
            return Err(OrchestratorError::Protocol(format!(
                "invalid recovery id {v}"
            )))
        }
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| OrchestratorError::Protocol("invalid recovery id".into()))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| OrchestratorError::Protocol(format!("malformed signature: {e}")))?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| OrchestratorError::Protocol(format!("signature recovery failed: {e}")))?;
    Ok(address_from_pubkey(&key))
}

/// Recover the signer of a `0x`-hex signature.
pub fn recover_hex(digest: &[u8; 32], signature: &str) -> Result<Address, OrchestratorError> {
    let bytes = hex::decode(signature.strip_prefix("0x").unwrap_or(signature))
        .map_err(|e| OrchestratorError::Protocol(format!("signature is not hex: {e}")))?;
    recover_address(digest, &bytes)
}

/// Delegated signing key. Secret material is zeroized on drop and never
/// printed.
pub struct SessionKey {
    signing_key: SigningKey,
    address: Address,
}

impl SessionKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Restore from secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, OrchestratorError> {
        let signing_key = SigningKey::from_bytes((&bytes).into())
            .map_err(|_| OrchestratorError::CredentialStore("invalid session key bytes".into()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Restore from a `0x`-hex secret.
    pub fn from_hex(secret: &str) -> Result<Self, OrchestratorError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret.strip_prefix("0x").unwrap_or(secret), &mut bytes)
            .map_err(|e| OrchestratorError::CredentialStore(format!("session key: {e}")))?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        key
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_from_pubkey(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Address the node knows this key by.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Secret bytes as hex, for the credential store only.
    pub fn secret_hex(&self) -> String {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        let encoded = format!("0x{}", hex::encode(bytes));
        bytes.zeroize();
        encoded
    }

    /// Sign a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 65], OrchestratorError> {
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| OrchestratorError::Protocol(format!("signing failed: {e}")))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recovery_id.to_byte() + 27;
        Ok(out)
    }

    /// Sign the Keccak-256 of `payload`, returning `0x`-hex.
    pub fn sign_payload(&self, payload: &[u8]) -> Result<String, OrchestratorError> {
        let sig = self.sign_digest(&keccak256(payload))?;
        Ok(format!("0x{}", hex::encode(sig)))
    }
}

impl Clone for SessionKey {
    fn clone(&self) -> Self {
        Self::from_signing_key(self.signing_key.clone())
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey({})", self.address)
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}
