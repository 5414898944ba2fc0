//! Identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// The per-delivery identifier assigned by a Git provider to a webhook request.
///
/// Retried deliveries carry the same identifier, which makes it the
/// correlation key between a webhook and the PipelineRun it produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("delivery id is empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Generate a random delivery id, for events that did not arrive over a webhook.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for DeliveryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A random lowercase alphanumeric suffix of `len` characters (at most 16),
/// safe to append to Kubernetes object names.
pub fn name_suffix(len: usize) -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(len.min(16))
        .map(|b| SUFFIX_ALPHABET[*b as usize % SUFFIX_ALPHABET.len()] as char)
        .collect()
}
