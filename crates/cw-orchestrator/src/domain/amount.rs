//! Token amounts.
//!
//! Amounts are unbounded-precision integers in the token's base units. They
//! travel as decimal strings on the wire so no consumer has to deal with
//! 256-bit JSON numbers.

use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serializer};

use super::errors::OrchestratorError;

/// Parse a decimal (or `0x` hex) amount string.
pub fn parse_amount(s: &str) -> Result<U256, OrchestratorError> {
    let trimmed = s.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(trimmed).map_err(|e| format!("{e:?}")),
    };
    parsed.map_err(|e| OrchestratorError::InvalidAmount(format!("{s}: {e}")))
}

/// Lossy float view for gauges.
pub fn to_f64_lossy(amount: U256) -> f64 {
    amount.to_string().parse().unwrap_or(f64::MAX)
}

/// Serde adapter for `U256` as a decimal string.
pub mod decimal {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    /// Serialize as a decimal string.
    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    /// Accept a decimal string, a hex string or a small JSON number.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => parse_amount(&s).map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(U256::from(n)),
        }
    }
}
