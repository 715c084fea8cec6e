//! Content addressing for uploaded files
//!
//! Every cached verdict is keyed by the SHA-256 digest of the raw bytes.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const CONTENT_HASH_LEN: usize = 64;

/// Lower-case hex SHA-256 digest of a file's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a caller-supplied digest. Upper-case input is normalised.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let trimmed = input.trim();
        if trimmed.len() != CONTENT_HASH_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidIdentifier(format!(
                "expected {} hex characters, got {:?}",
                CONTENT_HASH_LEN, input
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hash data directly
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ContentHash(hex::encode(hasher.finalize()))
}

/// Opaque token the provider hands out for an in-progress scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(String);

impl AnalysisId {
    pub fn parse(input: &str) -> CoreResult<Self> {
        let trimmed = input.trim();
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-');
        if trimmed.is_empty() || !trimmed.chars().all(allowed) {
            return Err(CoreError::InvalidIdentifier(format!(
                "malformed analysis id {:?}",
                input
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AnalysisId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
