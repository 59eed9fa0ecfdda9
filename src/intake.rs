//! Result Intake — the boundary workers report completion through.
//!
//! Success reports are verified three ways before anything is written:
//! the job must currently be `Dispatched`, the report must come from
//! the worker the job was dispatched to, and the stem map must match
//! the model's expected stem set exactly. Stems are then written as a
//! scoped transaction and the job moves to `Ready` in the same guarded
//! step, so a reader can never observe `Ready` with an incomplete set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{IntakeError, JobError, StorageError};
use crate::job::{JobBoard, JobState};
use crate::registry::WorkerRegistry;
use crate::store::{Artifact, ArtifactKey, ArtifactStore};

/// Receives completion reports from workers.
pub struct ResultIntake {
    jobs: Arc<JobBoard>,
    store: Arc<dyn ArtifactStore>,
    registry: Arc<WorkerRegistry>,
}

impl ResultIntake {
    pub fn new(
        jobs: Arc<JobBoard>,
        store: Arc<dyn ArtifactStore>,
        registry: Arc<WorkerRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            store,
            registry,
        })
    }

    /// Record a successful separation: write every stem, then move the
    /// job to `Ready` atomically. Replayed or mismatched reports are
    /// rejected with `InvalidTransition`; a storage-level duplicate
    /// surfaces as `DuplicateArtifact` with the job state preserved.
    pub async fn report_success(
        &self,
        job_id: Uuid,
        worker_id: &str,
        stems: HashMap<String, Vec<u8>>,
    ) -> Result<(), IntakeError> {
        let entry = self.jobs.entry(job_id).await?;
        let mut job = entry.lock().await;

        if job.state != JobState::Dispatched || job.worker_id.as_deref() != Some(worker_id) {
            tracing::warn!(
                job_id = %job_id,
                worker_id = %worker_id,
                state = %job.state,
                assigned = job.worker_id.as_deref().unwrap_or("none"),
                "Rejected success report: duplicate, late, or from wrong worker"
            );
            return Err(JobError::InvalidTransition {
                id: job_id,
                state: job.state,
                target: JobState::Ready,
            }
            .into());
        }

        validate_stem_set(job_id, job.model.stem_names(), &stems)?;

        let keys: Vec<ArtifactKey> = job
            .model
            .stem_names()
            .iter()
            .map(|name| ArtifactKey::stem(job_id, *name))
            .collect();
        let artifacts: Vec<(ArtifactKey, Artifact)> = keys
            .iter()
            .map(|key| {
                let name = key.stem_name().unwrap_or_default();
                let bytes = stems.get(name).cloned().unwrap_or_default();
                (key.clone(), Artifact::wav(bytes))
            })
            .collect();

        match self.store.put_set(artifacts).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists { key }) => {
                tracing::warn!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    key = %key,
                    "Rejected stem delivery: artifact already stored (double report?)"
                );
                return Err(IntakeError::DuplicateArtifact { job_id, key });
            }
            Err(e) => return Err(e.into()),
        }

        job.stem_keys = keys;
        // Cannot fail: guard held and state checked above.
        job.transition_to(JobState::Ready)?;
        let _ = self.registry.mark_available(worker_id).await;

        tracing::info!(
            job_id = %job_id,
            worker_id = %worker_id,
            stems = job.stem_keys.len(),
            "Job ready"
        );
        Ok(())
    }

    /// Record a failed separation. The job moves to terminal `Failed`
    /// with the worker's reason; no artifacts are written.
    pub async fn report_failure(
        &self,
        job_id: Uuid,
        worker_id: &str,
        reason: &str,
    ) -> Result<(), IntakeError> {
        let entry = self.jobs.entry(job_id).await?;
        let mut job = entry.lock().await;

        if job.state != JobState::Dispatched || job.worker_id.as_deref() != Some(worker_id) {
            tracing::warn!(
                job_id = %job_id,
                worker_id = %worker_id,
                state = %job.state,
                "Rejected failure report: duplicate, late, or from wrong worker"
            );
            return Err(JobError::InvalidTransition {
                id: job_id,
                state: job.state,
                target: JobState::Failed,
            }
            .into());
        }

        job.failure_reason = Some(reason.to_string());
        job.transition_to(JobState::Failed)?;
        let _ = self.registry.mark_available(worker_id).await;

        tracing::warn!(job_id = %job_id, worker_id = %worker_id, reason, "Job failed");
        Ok(())
    }
}

/// Reject reports whose stem map does not match the model's stem set
/// exactly, or that carry empty payloads.
fn validate_stem_set(
    job_id: Uuid,
    expected: &[&str],
    stems: &HashMap<String, Vec<u8>>,
) -> Result<(), IntakeError> {
    let expected_set: BTreeSet<&str> = expected.iter().copied().collect();
    let got_set: BTreeSet<&str> = stems.keys().map(String::as_str).collect();

    if expected_set != got_set {
        let missing: Vec<&str> = expected_set.difference(&got_set).copied().collect();
        let extra: Vec<&str> = got_set.difference(&expected_set).copied().collect();
        return Err(IntakeError::StemSetMismatch {
            job_id,
            detail: format!("missing {missing:?}, unexpected {extra:?}"),
        });
    }

    if let Some((name, _)) = stems.iter().find(|(_, bytes)| bytes.is_empty()) {
        return Err(IntakeError::StemSetMismatch {
            job_id,
            detail: format!("empty payload for stem {name:?}"),
        });
    }

    Ok(())
}
