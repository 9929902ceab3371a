//! Artifact identifiers and stored records

use crate::errors::{RegistryError, Result};
use autoprice_core::serde_canon::blake3_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three artifact families; each is versioned independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Schema,
    EncoderSet,
    Model,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Schema, ArtifactKind::EncoderSet, ArtifactKind::Model];

    pub fn name(self) -> &'static str {
        match self {
            ArtifactKind::Schema => "schema",
            ArtifactKind::EncoderSet => "encoder-set",
            ArtifactKind::Model => "model",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of one immutable artifact, e.g. `encoder-set:v3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub kind: ArtifactKind,
    /// Starts at 1 and increases by one per publish of `kind`
    pub number: u64,
}

impl ArtifactVersion {
    pub fn new(kind: ArtifactKind, number: u64) -> Self {
        Self { kind, number }
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.kind, self.number)
    }
}

impl FromStr for ArtifactVersion {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RegistryError::InvalidVersion(format!("`{s}` (expected e.g. model:v2)"));
        let (kind, number) = s.split_once(':').ok_or_else(invalid)?;
        let kind = ArtifactKind::ALL
            .into_iter()
            .find(|k| k.name() == kind)
            .ok_or_else(invalid)?;
        let number = number
            .strip_prefix('v')
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(invalid)?;
        Ok(Self { kind, number })
    }
}

/// How a caller picks an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Pinned(u64),
}

/// A stored artifact: payload bytes plus their digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub version: ArtifactVersion,
    /// BLAKE3 hex digest of `payload`
    pub blake3: String,
    pub created_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl ArtifactRecord {
    pub fn new(version: ArtifactVersion, payload: Vec<u8>) -> Self {
        Self {
            version,
            blake3: blake3_hex(&payload),
            created_at: Utc::now(),
            payload,
        }
    }

    /// Recompute the digest and compare it with the recorded one
    pub fn verify(&self) -> Result<()> {
        let actual = blake3_hex(&self.payload);
        if actual != self.blake3 {
            return Err(RegistryError::Corrupted {
                version: self.version.to_string(),
                detail: format!("digest {actual} does not match recorded {}", self.blake3),
            });
        }
        Ok(())
    }
}
