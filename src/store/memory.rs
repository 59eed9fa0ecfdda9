//! In-memory artifact store.
//!
//! The default backend, and the one tests run against. Enforces the
//! same duplicate-key rejection as the durable backend; the single
//! `RwLock` makes `get_set` and `delete_job` atomic with respect to
//! each other.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::store::traits::{Artifact, ArtifactKey, ArtifactStore};

/// Artifact store backed by a process-local map.
pub struct MemoryArtifactStore {
    inner: RwLock<HashMap<ArtifactKey, Artifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored artifacts.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &ArtifactKey, artifact: Artifact) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
            });
        }
        tracing::debug!(key = %key, size = artifact.len(), "Artifact stored");
        inner.insert(key.clone(), artifact);
        Ok(())
    }

    async fn put_set(
        &self,
        artifacts: Vec<(ArtifactKey, Artifact)>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        for (key, _) in &artifacts {
            if inner.contains_key(key) {
                return Err(StorageError::AlreadyExists {
                    key: key.to_string(),
                });
            }
        }
        for (key, artifact) in artifacts {
            tracing::debug!(key = %key, size = artifact.len(), "Artifact stored");
            inner.insert(key, artifact);
        }
        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact, StorageError> {
        self.inner
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn get_set(&self, keys: &[ArtifactKey]) -> Result<Vec<Artifact>, StorageError> {
        let inner = self.inner.read().await;
        keys.iter()
            .map(|key| {
                inner
                    .get(key)
                    .cloned()
                    .ok_or_else(|| StorageError::NotFound {
                        key: key.to_string(),
                    })
            })
            .collect()
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|key, _| key.job_id != job_id);
        tracing::debug!(job_id = %job_id, removed = before - inner.len(), "Job artifacts deleted");
        Ok(())
    }

    async fn exists(&self, key: &ArtifactKey) -> bool {
        self.inner.read().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(payload: &[u8]) -> Artifact {
        Artifact::wav(payload.to_vec())
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::input(Uuid::new_v4());
        store.put(&key, art(b"audio")).await.unwrap();

        let fetched = store.get(&key).await.unwrap();
        assert_eq!(fetched.bytes, b"audio");
        assert_eq!(fetched.media_type, "audio/wav");
    }

    #[tokio::test]
    async fn duplicate_put_rejected_original_unchanged() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::stem(Uuid::new_v4(), "vocals");
        store.put(&key, art(b"first")).await.unwrap();

        let err = store.put(&key, art(b"second")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.get(&key).await.unwrap().bytes, b"first");
    }

    #[tokio::test]
    async fn put_set_is_all_or_nothing() {
        let store = MemoryArtifactStore::new();
        let job_id = Uuid::new_v4();
        let taken = ArtifactKey::stem(job_id, "drums");
        store.put(&taken, art(b"old")).await.unwrap();

        let err = store
            .put_set(vec![
                (ArtifactKey::stem(job_id, "vocals"), art(b"v")),
                (taken.clone(), art(b"d")),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        // Nothing from the failed set was written.
        assert!(!store.exists(&ArtifactKey::stem(job_id, "vocals")).await);
        assert_eq!(store.get(&taken).await.unwrap().bytes, b"old");
    }

    #[tokio::test]
    async fn get_set_complete_or_not_found() {
        let store = MemoryArtifactStore::new();
        let job_id = Uuid::new_v4();
        let a = ArtifactKey::stem(job_id, "vocals");
        let b = ArtifactKey::stem(job_id, "drums");
        store.put(&a, art(b"v")).await.unwrap();

        let err = store.get_set(&[a.clone(), b.clone()]).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));

        store.put(&b, art(b"d")).await.unwrap();
        let set = store.get_set(&[a, b]).await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].bytes, b"v");
        assert_eq!(set[1].bytes, b"d");
    }

    #[tokio::test]
    async fn delete_job_removes_full_set_only_for_that_job() {
        let store = MemoryArtifactStore::new();
        let victim = Uuid::new_v4();
        let survivor = Uuid::new_v4();
        store
            .put(&ArtifactKey::input(victim), art(b"in"))
            .await
            .unwrap();
        store
            .put(&ArtifactKey::stem(victim, "vocals"), art(b"v"))
            .await
            .unwrap();
        store
            .put(&ArtifactKey::input(survivor), art(b"keep"))
            .await
            .unwrap();

        store.delete_job(victim).await.unwrap();
        assert!(!store.exists(&ArtifactKey::input(victim)).await);
        assert!(!store.exists(&ArtifactKey::stem(victim, "vocals")).await);
        assert!(store.exists(&ArtifactKey::input(survivor)).await);

        // Deleting again is not an error.
        store.delete_job(victim).await.unwrap();
    }
}
