//! Job record, state machine, and the in-memory job board.
//!
//! A job is the authoritative record of one separation request. Its
//! state only ever moves forward:
//!
//! ```text
//! Queued ──► Dispatched ──► Ready
//!                      └──► Failed
//! ```
//!
//! Terminal states never transition again; an attempt to do so is an
//! [`JobError::InvalidTransition`]. That guard is what turns the
//! at-least-once worker callback transport into exactly-once semantics:
//! a replayed or late report simply fails the transition check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::JobError;
use crate::model::ModelId;
use crate::store::ArtifactKey;

/// State of a separation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for a worker. Re-dispatch is allowed from here.
    Queued,
    /// Accepted by a worker; inference is in flight.
    Dispatched,
    /// Terminal success: the complete stem set is stored.
    Ready,
    /// Terminal failure: see the job's failure reason.
    Failed,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Queued, Dispatched) | (Dispatched, Ready) | (Dispatched, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One separation request, tracked end-to-end.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique job ID, assigned at submission and never reused.
    pub id: Uuid,
    /// Requested separation model.
    pub model: ModelId,
    /// Current state.
    pub state: JobState,
    /// Client-supplied filename of the uploaded audio.
    pub filename: String,
    /// Storage key of the uploaded input.
    pub input_key: ArtifactKey,
    /// Storage keys of the produced stems. Empty until `Ready`; once
    /// `Ready`, exactly the model's stem set. Partial sets are never
    /// recorded here.
    pub stem_keys: Vec<ArtifactKey>,
    /// Worker the job was dispatched to. None only while `Queued`.
    pub worker_id: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job last changed state.
    pub updated_at: DateTime<Utc>,
    /// Why the job failed, for terminal `Failed` jobs.
    pub failure_reason: Option<String>,
}

impl Job {
    /// Create a new queued job for the given model.
    pub fn new(model: ModelId, filename: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            model,
            state: JobState::Queued,
            filename: filename.into(),
            input_key: ArtifactKey::input(id),
            stem_keys: Vec::new(),
            worker_id: None,
            created_at: now,
            updated_at: now,
            failure_reason: None,
        }
    }

    /// Transition to a new state, enforcing the state machine.
    pub fn transition_to(&mut self, target: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id,
                state: self.state,
                target,
            });
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// In-memory job board.
///
/// Each entry is wrapped in its own `Mutex` so state transitions for one
/// job are atomic and mutually exclusive (a retried dispatch and a late
/// duplicate result report cannot both succeed), while unrelated jobs
/// never contend with each other.
pub struct JobBoard {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>,
}

impl JobBoard {
    /// Create an empty job board.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
        })
    }

    /// Create and register a new queued job. Returns a snapshot.
    pub async fn create(&self, model: ModelId, filename: impl Into<String>) -> Job {
        let job = Job::new(model, filename);
        let snapshot = job.clone();
        self.jobs
            .write()
            .await
            .insert(job.id, Arc::new(Mutex::new(job)));
        tracing::info!(job_id = %snapshot.id, model = %snapshot.model, "Job created");
        snapshot
    }

    /// Get the guarded entry for a job, for check-and-transition
    /// sequences that must hold the per-job lock across other work.
    pub async fn entry(&self, id: Uuid) -> Result<Arc<Mutex<Job>>, JobError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobError::NotFound { id })
    }

    /// Get a point-in-time snapshot of a job.
    pub async fn get(&self, id: Uuid) -> Result<Job, JobError> {
        let entry = self.entry(id).await?;
        let job = entry.lock().await;
        Ok(job.clone())
    }

    /// Remove a job record entirely (explicit cleanup only).
    pub async fn remove(&self, id: Uuid) -> Result<Job, JobError> {
        let entry = self
            .jobs
            .write()
            .await
            .remove(&id)
            .ok_or(JobError::NotFound { id })?;
        let job = entry.lock().await;
        Ok(job.clone())
    }

    /// IDs of jobs currently in the given state.
    ///
    /// Snapshots the entry handles first and releases the board map
    /// before inspecting any job, so a scan never pins the map behind
    /// a per-job guard held across network calls. An entry whose guard
    /// is currently held is mid-transition; it is skipped this scan
    /// rather than waited on.
    pub async fn in_state(&self, state: JobState) -> Vec<Uuid> {
        let entries: Vec<Arc<Mutex<Job>>> =
            self.jobs.read().await.values().cloned().collect();
        let mut ids = Vec::new();
        for entry in entries {
            let Ok(job) = entry.try_lock() else {
                continue;
            };
            if job.state == state {
                ids.push(job.id);
            }
        }
        ids
    }

    /// Number of tracked jobs.
    pub async fn count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(JobState::Queued.can_transition_to(JobState::Dispatched));
        assert!(JobState::Dispatched.can_transition_to(JobState::Ready));
        assert!(JobState::Dispatched.can_transition_to(JobState::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!JobState::Queued.can_transition_to(JobState::Ready));
        assert!(!JobState::Queued.can_transition_to(JobState::Failed));
        assert!(!JobState::Ready.can_transition_to(JobState::Queued));
        assert!(!JobState::Ready.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Dispatched));
        assert!(!JobState::Dispatched.can_transition_to(JobState::Queued));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Ready.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Dispatched.is_terminal());
    }

    #[test]
    fn transition_updates_timestamp() {
        let mut job = Job::new(ModelId::Scnet, "track.wav");
        let created = job.updated_at;
        job.transition_to(JobState::Dispatched).unwrap();
        assert_eq!(job.state, JobState::Dispatched);
        assert!(job.updated_at >= created);
    }

    #[test]
    fn terminal_job_rejects_transition() {
        let mut job = Job::new(ModelId::Scnet, "track.wav");
        job.transition_to(JobState::Dispatched).unwrap();
        job.transition_to(JobState::Ready).unwrap();

        let err = job.transition_to(JobState::Failed).unwrap_err();
        match err {
            JobError::InvalidTransition { state, target, .. } => {
                assert_eq!(state, JobState::Ready);
                assert_eq!(target, JobState::Failed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn board_create_and_get() {
        let board = JobBoard::new();
        let job = board.create(ModelId::Dttnet, "mix.wav").await;

        let fetched = board.get(job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.state, JobState::Queued);
        assert_eq!(fetched.model, ModelId::Dttnet);
        assert!(fetched.worker_id.is_none());
    }

    #[tokio::test]
    async fn board_unknown_job() {
        let board = JobBoard::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            board.get(id).await,
            Err(JobError::NotFound { id: missing }) if missing == id
        ));
    }

    #[tokio::test]
    async fn board_in_state_filters() {
        let board = JobBoard::new();
        let a = board.create(ModelId::Scnet, "a.wav").await;
        let b = board.create(ModelId::Scnet, "b.wav").await;

        {
            let entry = board.entry(b.id).await.unwrap();
            let mut job = entry.lock().await;
            job.transition_to(JobState::Dispatched).unwrap();
            job.worker_id = Some("w1".into());
        }

        let queued = board.in_state(JobState::Queued).await;
        assert_eq!(queued, vec![a.id]);
        let dispatched = board.in_state(JobState::Dispatched).await;
        assert_eq!(dispatched, vec![b.id]);
    }

    #[tokio::test]
    async fn in_state_scan_does_not_block_unrelated_jobs() {
        let board = JobBoard::new();
        let a = board.create(ModelId::Scnet, "a.wav").await;
        let b = board.create(ModelId::Scnet, "b.wav").await;

        // Hold A's guard, as a dispatch in flight does across its
        // network calls.
        let entry = board.entry(a.id).await.unwrap();
        let _guard = entry.lock().await;

        let scanner = {
            let board = Arc::clone(&board);
            tokio::spawn(async move { board.in_state(JobState::Queued).await })
        };

        // Creating an unrelated job must not queue up behind A's guard
        // via the scan.
        let start = std::time::Instant::now();
        board.create(ModelId::Dttnet, "c.wav").await;
        assert!(
            start.elapsed() < std::time::Duration::from_millis(200),
            "unrelated job creation blocked behind a held job guard"
        );

        let queued = scanner.await.unwrap();
        assert!(queued.contains(&b.id));
        // A's guard is held, so the scan skips it.
        assert!(!queued.contains(&a.id));
    }

    #[tokio::test]
    async fn board_remove() {
        let board = JobBoard::new();
        let job = board.create(ModelId::Scnet, "a.wav").await;
        board.remove(job.id).await.unwrap();
        assert!(board.get(job.id).await.is_err());
        assert_eq!(board.count().await, 0);
    }
}
