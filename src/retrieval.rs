//! Query/Retrieval facade — job status, stem downloads, and cleanup.
//!
//! Retrieval composes with deletion: `fetch_stems` resolves the job
//! snapshot first and then reads the stem set through the store's
//! atomic multi-get, so a concurrent purge yields a clean `NotFound`,
//! never a partial mapping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{JobError, RetrievalError, StorageError};
use crate::job::{JobBoard, JobState};
use crate::model::ModelId;
use crate::store::{Artifact, ArtifactKey, ArtifactStore};

/// Client-facing view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub state: JobState,
    pub model: ModelId,
    pub filename: String,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present for terminal `Failed` jobs.
    pub failure_reason: Option<String>,
    /// Stem names, present once the job is `Ready`.
    pub stems: Vec<String>,
}

/// Resolves job identifiers to status and stored stems.
pub struct RetrievalFacade {
    jobs: Arc<JobBoard>,
    store: Arc<dyn ArtifactStore>,
}

impl RetrievalFacade {
    pub fn new(jobs: Arc<JobBoard>, store: Arc<dyn ArtifactStore>) -> Arc<Self> {
        Arc::new(Self { jobs, store })
    }

    /// Current status of a job.
    pub async fn status(&self, job_id: Uuid) -> Result<JobStatus, RetrievalError> {
        let job = self.job(job_id).await?;
        Ok(JobStatus {
            job_id: job.id,
            state: job.state,
            model: job.model,
            filename: job.filename,
            worker_id: job.worker_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
            failure_reason: job.failure_reason,
            stems: job
                .stem_keys
                .iter()
                .filter_map(|k| k.stem_name().map(str::to_string))
                .collect(),
        })
    }

    /// The complete stem set for a `Ready` job, as `(name, artifact)`
    /// pairs in the model's stem order. Any non-`Ready` state
    /// (including `Failed`) is `NotReady`.
    pub async fn fetch_stems(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<(String, Artifact)>, RetrievalError> {
        let job = self.job(job_id).await?;
        if job.state != JobState::Ready {
            return Err(RetrievalError::NotReady {
                id: job_id,
                state: job.state,
            });
        }

        let artifacts = self
            .store
            .get_set(&job.stem_keys)
            .await
            .map_err(|e| match e {
                // Deleted underneath us — a clean NotFound, not a
                // partial read.
                StorageError::NotFound { .. } => RetrievalError::NotFound { id: job_id },
                other => RetrievalError::Storage(other),
            })?;

        Ok(job
            .stem_keys
            .iter()
            .zip(artifacts)
            .map(|(key, artifact)| {
                (
                    key.stem_name().unwrap_or_default().to_string(),
                    artifact,
                )
            })
            .collect())
    }

    /// One stem of a `Ready` job, for single-file downloads.
    pub async fn fetch_stem(
        &self,
        job_id: Uuid,
        name: &str,
    ) -> Result<Artifact, RetrievalError> {
        let job = self.job(job_id).await?;
        if job.state != JobState::Ready {
            return Err(RetrievalError::NotReady {
                id: job_id,
                state: job.state,
            });
        }
        let key = job
            .stem_keys
            .iter()
            .find(|k| k.stem_name() == Some(name))
            .cloned()
            .ok_or(RetrievalError::NotFound { id: job_id })?;

        self.store.get(&key).await.map_err(|e| match e {
            StorageError::NotFound { .. } => RetrievalError::NotFound { id: job_id },
            other => RetrievalError::Storage(other),
        })
    }

    /// The stored input audio for a job. Served to the assigned worker,
    /// which fetches bytes by the reference carried in the dispatch
    /// message; available in any state.
    pub async fn fetch_input(&self, job_id: Uuid) -> Result<Artifact, RetrievalError> {
        let job = self.job(job_id).await?;
        self.store
            .get(&ArtifactKey::input(job.id))
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => RetrievalError::NotFound { id: job_id },
                other => RetrievalError::Storage(other),
            })
    }

    /// Explicit cleanup: remove the job record and its full artifact
    /// set (input + stems) together. The record goes first so no new
    /// retrieval can start against a half-deleted set.
    pub async fn purge(&self, job_id: Uuid) -> Result<(), RetrievalError> {
        self.jobs
            .remove(job_id)
            .await
            .map_err(|_| RetrievalError::NotFound { id: job_id })?;
        self.store.delete_job(job_id).await?;
        tracing::info!(job_id = %job_id, "Job purged");
        Ok(())
    }

    async fn job(&self, job_id: Uuid) -> Result<crate::job::Job, RetrievalError> {
        self.jobs.get(job_id).await.map_err(|e| match e {
            JobError::NotFound { id } => RetrievalError::NotFound { id },
            // get() never reports transition errors.
            _ => RetrievalError::NotFound { id: job_id },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryArtifactStore;

    struct Fixture {
        jobs: Arc<JobBoard>,
        store: Arc<MemoryArtifactStore>,
        facade: Arc<RetrievalFacade>,
    }

    fn fixture() -> Fixture {
        let jobs = JobBoard::new();
        let store = Arc::new(MemoryArtifactStore::new());
        let facade = RetrievalFacade::new(
            Arc::clone(&jobs),
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
        );
        Fixture {
            jobs,
            store,
            facade,
        }
    }

    async fn ready_job(fix: &Fixture) -> Uuid {
        let job = fix.jobs.create(ModelId::Scnet, "track.wav").await;
        fix.store
            .put(&ArtifactKey::input(job.id), Artifact::wav(b"input".to_vec()))
            .await
            .unwrap();

        let mut keys = Vec::new();
        for name in ["vocals", "drums", "bass", "other"] {
            let key = ArtifactKey::stem(job.id, name);
            fix.store
                .put(&key, Artifact::wav(name.as_bytes().to_vec()))
                .await
                .unwrap();
            keys.push(key);
        }

        let entry = fix.jobs.entry(job.id).await.unwrap();
        let mut guard = entry.lock().await;
        guard.transition_to(JobState::Dispatched).unwrap();
        guard.worker_id = Some("w1".to_string());
        guard.stem_keys = keys;
        guard.transition_to(JobState::Ready).unwrap();
        job.id
    }

    #[tokio::test]
    async fn status_unknown_job() {
        let fix = fixture();
        let err = fix.facade.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_stems_not_ready_for_queued() {
        let fix = fixture();
        let job = fix.jobs.create(ModelId::Scnet, "track.wav").await;
        let err = fix.facade.fetch_stems(job.id).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::NotReady {
                state: JobState::Queued,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_job_exposes_reason_but_not_stems() {
        let fix = fixture();
        let job = fix.jobs.create(ModelId::Scnet, "track.wav").await;
        {
            let entry = fix.jobs.entry(job.id).await.unwrap();
            let mut guard = entry.lock().await;
            guard.transition_to(JobState::Dispatched).unwrap();
            guard.worker_id = Some("w1".to_string());
            guard.failure_reason = Some("decode error".to_string());
            guard.transition_to(JobState::Failed).unwrap();
        }

        let status = fix.facade.status(job.id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.failure_reason.as_deref(), Some("decode error"));

        let err = fix.facade.fetch_stems(job.id).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotReady { .. }));
    }

    #[tokio::test]
    async fn ready_job_returns_complete_stem_set() {
        let fix = fixture();
        let job_id = ready_job(&fix).await;

        let status = fix.facade.status(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Ready);
        assert_eq!(status.stems, vec!["vocals", "drums", "bass", "other"]);

        let stems = fix.facade.fetch_stems(job_id).await.unwrap();
        assert_eq!(stems.len(), 4);
        for (name, artifact) in &stems {
            assert_eq!(artifact.bytes, name.as_bytes());
        }
    }

    #[tokio::test]
    async fn fetch_single_stem() {
        let fix = fixture();
        let job_id = ready_job(&fix).await;

        let vocals = fix.facade.fetch_stem(job_id, "vocals").await.unwrap();
        assert_eq!(vocals.bytes, b"vocals");

        let err = fix.facade.fetch_stem(job_id, "piano").await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_input_any_state() {
        let fix = fixture();
        let job = fix.jobs.create(ModelId::Scnet, "track.wav").await;
        fix.store
            .put(&job.input_key, Artifact::wav(b"input".to_vec()))
            .await
            .unwrap();

        let input = fix.facade.fetch_input(job.id).await.unwrap();
        assert_eq!(input.bytes, b"input");
    }

    #[tokio::test]
    async fn purge_removes_record_and_artifacts() {
        let fix = fixture();
        let job_id = ready_job(&fix).await;

        fix.facade.purge(job_id).await.unwrap();

        assert!(matches!(
            fix.facade.status(job_id).await,
            Err(RetrievalError::NotFound { .. })
        ));
        assert!(!fix.store.exists(&ArtifactKey::input(job_id)).await);
        assert!(!fix.store.exists(&ArtifactKey::stem(job_id, "vocals")).await);

        let err = fix.facade.purge(job_id).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }

    #[tokio::test]
    async fn deleted_artifacts_yield_clean_not_found_never_partial() {
        let fix = fixture();
        let job_id = ready_job(&fix).await;

        // Simulate a purge that got to the store before this read.
        fix.store.delete_job(job_id).await.unwrap();

        let err = fix.facade.fetch_stems(job_id).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound { .. }));
    }
}
