//! Backend-agnostic artifact store trait and key types.
//!
//! An artifact is an immutable byte payload addressed by job ID and
//! role ("input" or a stem name). Immutability is enforced at the store
//! boundary: a second `put` for an existing key fails with
//! [`StorageError::AlreadyExists`] instead of overwriting, which is
//! what protects the at-most-once stem delivery invariant against
//! double-reporting workers.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Role of an artifact within its job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// The uploaded input audio.
    Input,
    /// One produced stem, by name (e.g. "vocals").
    Stem(String),
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Stem(name) => write!(f, "{name}"),
        }
    }
}

/// Storage key, derived deterministically from job ID and role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub job_id: Uuid,
    pub role: ArtifactRole,
}

impl ArtifactKey {
    /// Key for a job's input artifact.
    pub fn input(job_id: Uuid) -> Self {
        Self {
            job_id,
            role: ArtifactRole::Input,
        }
    }

    /// Key for one of a job's stems.
    pub fn stem(job_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            job_id,
            role: ArtifactRole::Stem(name.into()),
        }
    }

    /// The stem name, if this key addresses a stem.
    pub fn stem_name(&self) -> Option<&str> {
        match &self.role {
            ArtifactRole::Stem(name) => Some(name),
            ArtifactRole::Input => None,
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_id, self.role)
    }
}

/// A stored byte payload with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl Artifact {
    /// A WAV-typed artifact, the service's common case.
    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            media_type: "audio/wav".to_string(),
        }
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Backend-agnostic artifact store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact. Fails with `AlreadyExists` if the key is
    /// taken; the original bytes remain unchanged.
    async fn put(&self, key: &ArtifactKey, artifact: Artifact) -> Result<(), StorageError>;

    /// Store a set of artifacts as a scoped transaction: either every
    /// key is free and all are written, or `AlreadyExists` is returned
    /// and nothing is written.
    async fn put_set(
        &self,
        artifacts: Vec<(ArtifactKey, Artifact)>,
    ) -> Result<(), StorageError>;

    /// Fetch a single artifact.
    async fn get(&self, key: &ArtifactKey) -> Result<Artifact, StorageError>;

    /// Fetch a set of artifacts atomically with respect to
    /// `delete_job`: either the complete pre-deletion set is returned,
    /// in key order, or `NotFound`. Never a partial read.
    async fn get_set(&self, keys: &[ArtifactKey]) -> Result<Vec<Artifact>, StorageError>;

    /// Remove the input and all stems for a job as one logical unit.
    /// Deleting a job with no stored artifacts is not an error.
    async fn delete_job(&self, job_id: Uuid) -> Result<(), StorageError>;

    /// Check whether a key holds an artifact.
    async fn exists(&self, key: &ArtifactKey) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        let id = Uuid::nil();
        assert_eq!(
            ArtifactKey::input(id).to_string(),
            format!("{id}/input")
        );
        assert_eq!(
            ArtifactKey::stem(id, "vocals").to_string(),
            format!("{id}/vocals")
        );
    }

    #[test]
    fn stem_name_accessor() {
        let id = Uuid::new_v4();
        assert_eq!(ArtifactKey::stem(id, "drums").stem_name(), Some("drums"));
        assert_eq!(ArtifactKey::input(id).stem_name(), None);
    }
}
