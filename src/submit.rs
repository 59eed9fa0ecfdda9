//! Submission boundary — accepts uploads and turns them into jobs.
//!
//! Audio decoding proper is an external collaborator; this layer only
//! runs the validator it is handed, stores the normalized input, and
//! creates the job record. The first dispatch attempt is kicked off in
//! the background — if it fails, the job stays queued and the sweeper
//! picks it up.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::Dispatcher;
use crate::error::SubmissionError;
use crate::job::{Job, JobBoard};
use crate::model::ModelId;
use crate::store::{Artifact, ArtifactStore};

/// Normalized audio produced by the validation collaborator.
#[derive(Debug, Clone)]
pub struct ValidatedAudio {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Audio validation/decoding collaborator (out of scope here; the
/// inference side owns real decoding).
#[async_trait]
pub trait AudioValidator: Send + Sync {
    async fn validate(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ValidatedAudio, SubmissionError>;
}

/// Shape-level WAV checks: non-empty, within the size cap, RIFF magic.
pub struct BasicWavValidator {
    max_bytes: usize,
}

impl BasicWavValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl AudioValidator for BasicWavValidator {
    async fn validate(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ValidatedAudio, SubmissionError> {
        if bytes.is_empty() {
            return Err(SubmissionError::InvalidAudio {
                reason: "empty upload".to_string(),
            });
        }
        if bytes.len() > self.max_bytes {
            return Err(SubmissionError::InvalidAudio {
                reason: format!("upload of {} bytes exceeds limit {}", bytes.len(), self.max_bytes),
            });
        }
        if bytes.len() < 12 || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            tracing::info!(filename, "Upload rejected: not a RIFF/WAVE file");
            return Err(SubmissionError::InvalidAudio {
                reason: "not a RIFF/WAVE file".to_string(),
            });
        }
        Ok(ValidatedAudio {
            bytes: bytes.to_vec(),
            media_type: "audio/wav".to_string(),
        })
    }
}

/// Accepts `(model, raw audio)` and produces a queued job.
pub struct SubmissionService {
    validator: Arc<dyn AudioValidator>,
    store: Arc<dyn ArtifactStore>,
    jobs: Arc<JobBoard>,
    dispatcher: Arc<Dispatcher>,
}

impl SubmissionService {
    pub fn new(
        validator: Arc<dyn AudioValidator>,
        store: Arc<dyn ArtifactStore>,
        jobs: Arc<JobBoard>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            validator,
            store,
            jobs,
            dispatcher,
        })
    }

    /// Validate and store the upload, create the job, and spawn the
    /// initial dispatch attempt. Returns a snapshot of the new job.
    pub async fn submit(
        &self,
        model: ModelId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Job, SubmissionError> {
        let audio = self.validator.validate(filename, &bytes).await?;

        let job = self.jobs.create(model, filename).await;
        let artifact = Artifact {
            bytes: audio.bytes,
            media_type: audio.media_type,
        };
        if let Err(e) = self.store.put(&job.input_key, artifact).await {
            // Don't leave a job record pointing at nothing.
            let _ = self.jobs.remove(job.id).await;
            return Err(e.into());
        }

        tracing::info!(
            job_id = %job.id,
            model = %model,
            filename,
            "Submission accepted"
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let job_id = job.id;
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(job_id).await {
                tracing::info!(job_id = %job_id, error = %e, "Initial dispatch attempt failed, job stays queued");
            }
        });

        Ok(job)
    }
}
