//! Error types for stem-split, one enum per boundary. Each service
//! returns its own enum directly; the HTTP layer maps them to status
//! codes, and `main` wraps boot failures in `anyhow`.

use uuid::Uuid;

use crate::job::JobState;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Worker directory file not found: {0}")]
    WorkerDirectoryMissing(String),

    #[error("Failed to parse worker directory: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A put for a key that already holds an artifact. Artifacts are
    /// immutable; the original bytes are never overwritten.
    #[error("Artifact already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Artifact not found: {key}")]
    NotFound { key: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Worker registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Worker {worker_id} is already registered")]
    DuplicateWorker { worker_id: String },

    #[error("Worker {worker_id} is not registered")]
    UnknownWorker { worker_id: String },
}

/// Job record and state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    /// State-machine violation. Indicates a duplicate or out-of-order
    /// report; logged upstream, never silently accepted.
    #[error("Job {id} is {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: JobState,
        target: JobState,
    },
}

/// Dispatcher errors. Both recoverable: the job stays `Queued` and the
/// caller (or the queue sweeper) may retry later.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No worker registered for model {model}")]
    NoCapacity { model: String },

    #[error("No reachable worker for model {model} after {attempts} attempts")]
    WorkerUnreachable { model: String, attempts: u32 },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Result intake errors.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Replayed stem delivery — the store refused to overwrite. The job
    /// state is preserved; logged as a recoverable anomaly.
    #[error("Duplicate artifact for job {job_id}: {key}")]
    DuplicateArtifact { job_id: Uuid, key: String },

    /// Reported stems do not match the model's expected stem set.
    #[error("Stem set mismatch for job {job_id}: {detail}")]
    StemSetMismatch { job_id: Uuid, detail: String },

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Submission boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Audio validation failed: {reason}")]
    InvalidAudio { reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Query/retrieval facade errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} is {state}, stems are not available")]
    NotReady { id: Uuid, state: JobState },

    #[error(transparent)]
    Storage(#[from] StorageError),
}
