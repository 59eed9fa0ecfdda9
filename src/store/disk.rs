//! Disk-backed artifact store.
//!
//! Layout: one directory per job, one payload file per artifact role,
//! plus a small JSON sidecar carrying the media type. Writes survive a
//! process restart; duplicate rejection rides on `create_new`.
//!
//! Stem names reach this store only after Result Intake has validated
//! them against the model catalog, so roles are plain file-name-safe
//! tokens.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::store::traits::{Artifact, ArtifactKey, ArtifactStore};

/// Sidecar metadata stored next to each payload.
#[derive(Debug, Serialize, Deserialize)]
struct ArtifactMeta {
    media_type: String,
    len: usize,
}

/// Artifact store rooted at a data directory.
pub struct DiskArtifactStore {
    root: PathBuf,
    /// Readers (put/get) share; `put_set` and `delete_job` take the
    /// write side so a set is never observed half-written or
    /// half-deleted.
    gate: RwLock<()>,
}

impl DiskArtifactStore {
    /// Open a store at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            gate: RwLock::new(()),
        })
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn payload_path(&self, key: &ArtifactKey) -> PathBuf {
        self.job_dir(key.job_id).join(key.role.to_string())
    }

    fn meta_path(&self, key: &ArtifactKey) -> PathBuf {
        self.job_dir(key.job_id)
            .join(format!("{}.meta.json", key.role))
    }

    /// Write one artifact, assuming the caller holds the gate.
    async fn write_one(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.job_dir(key.job_id)).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.payload_path(key))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists {
                        key: key.to_string(),
                    }
                } else {
                    StorageError::Io(e)
                }
            })?;
        file.write_all(&artifact.bytes).await?;
        file.flush().await?;

        let meta = ArtifactMeta {
            media_type: artifact.media_type.clone(),
            len: artifact.len(),
        };
        let meta_bytes = serde_json::to_vec(&meta)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(self.meta_path(key), meta_bytes).await?;

        tracing::debug!(key = %key, size = artifact.len(), "Artifact written to disk");
        Ok(())
    }

    async fn read_one(&self, key: &ArtifactKey) -> Result<Artifact, StorageError> {
        let bytes = tokio::fs::read(self.payload_path(key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;

        // A missing sidecar (crash between payload and meta writes) is
        // tolerated; the payload's media type defaults to WAV.
        let media_type = match tokio::fs::read(self.meta_path(key)).await {
            Ok(meta_bytes) => serde_json::from_slice::<ArtifactMeta>(&meta_bytes)
                .map(|m| m.media_type)
                .unwrap_or_else(|_| "audio/wav".to_string()),
            Err(_) => "audio/wav".to_string(),
        };

        Ok(Artifact { bytes, media_type })
    }

    async fn path_exists(path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

#[async_trait]
impl ArtifactStore for DiskArtifactStore {
    async fn put(&self, key: &ArtifactKey, artifact: Artifact) -> Result<(), StorageError> {
        let _gate = self.gate.read().await;
        self.write_one(key, &artifact).await
    }

    async fn put_set(
        &self,
        artifacts: Vec<(ArtifactKey, Artifact)>,
    ) -> Result<(), StorageError> {
        let _gate = self.gate.write().await;
        for (key, _) in &artifacts {
            if Self::path_exists(&self.payload_path(key)).await {
                return Err(StorageError::AlreadyExists {
                    key: key.to_string(),
                });
            }
        }
        for (key, artifact) in &artifacts {
            self.write_one(key, artifact).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Artifact, StorageError> {
        let _gate = self.gate.read().await;
        self.read_one(key).await
    }

    async fn get_set(&self, keys: &[ArtifactKey]) -> Result<Vec<Artifact>, StorageError> {
        let _gate = self.gate.read().await;
        let mut artifacts = Vec::with_capacity(keys.len());
        for key in keys {
            artifacts.push(self.read_one(key).await?);
        }
        Ok(artifacts)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<(), StorageError> {
        let _gate = self.gate.write().await;
        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Job artifacts deleted from disk");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, key: &ArtifactKey) -> bool {
        let _gate = self.gate.read().await;
        Self::path_exists(&self.payload_path(key)).await
    }
}
