//! Dispatcher — assigns queued jobs to workers and transmits them.
//!
//! A dispatch call holds the job's transition guard across the whole
//! check–send–transition sequence, so invoking `dispatch` concurrently
//! (user retry racing the queue sweeper) can succeed at most once; the
//! loser sees `InvalidTransition`. The job only moves to `Dispatched`
//! after a worker has *accepted* it, never merely because a network
//! call returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, JobError};
use crate::job::{JobBoard, JobState};
use crate::model::ModelId;
use crate::registry::{WorkerDescriptor, WorkerRegistry};
use crate::store::ArtifactKey;

/// Job transmission sent to a worker's address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub job_id: Uuid,
    pub model: ModelId,
    /// Reference to the stored input; the worker fetches the bytes
    /// through the retrieval boundary.
    pub input_artifact: ArtifactKey,
    /// Model parameters, opaque to this layer.
    pub parameters: serde_json::Value,
}

/// Synchronous acknowledgment from a worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchAck {
    pub accepted: bool,
}

/// Transport-level failure talking to one worker. An overloaded
/// worker's rejection is treated identically to unreachability.
#[derive(Debug, thiserror::Error)]
pub enum WorkerSendError {
    #[error("request to {address} timed out")]
    Timeout { address: String },

    #[error("request to {address} failed: {reason}")]
    Failed { address: String, reason: String },
}

/// Transport used to transmit jobs to workers. The HTTP implementation
/// is the production path; tests substitute a scripted stub.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    async fn send_job(
        &self,
        worker: &WorkerDescriptor,
        request: &DispatchRequest,
    ) -> Result<DispatchAck, WorkerSendError>;
}

/// reqwest-backed worker transport with a bounded per-request timeout.
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn send_job(
        &self,
        worker: &WorkerDescriptor,
        request: &DispatchRequest,
    ) -> Result<DispatchAck, WorkerSendError> {
        let url = format!("http://{}/jobs", worker.worker_address);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WorkerSendError::Timeout {
                        address: worker.worker_address.clone(),
                    }
                } else {
                    WorkerSendError::Failed {
                        address: worker.worker_address.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(WorkerSendError::Failed {
                address: worker.worker_address.clone(),
                reason: format!("status {}", response.status()),
            });
        }

        response
            .json::<DispatchAck>()
            .await
            .map_err(|e| WorkerSendError::Failed {
                address: worker.worker_address.clone(),
                reason: format!("invalid ack: {e}"),
            })
    }
}

/// Selects a worker for a queued job and transmits it.
pub struct Dispatcher {
    jobs: Arc<JobBoard>,
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn WorkerClient>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<JobBoard>,
        registry: Arc<WorkerRegistry>,
        client: Arc<dyn WorkerClient>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs,
            registry,
            client,
            config,
        })
    }

    /// Dispatch a queued job. On success the job is `Dispatched` and
    /// the accepting worker's ID is returned. On `NoCapacity` or
    /// `WorkerUnreachable` the job remains `Queued` for a later retry.
    pub async fn dispatch(&self, job_id: Uuid) -> Result<String, DispatchError> {
        let entry = self.jobs.entry(job_id).await?;
        let mut job = entry.lock().await;

        if job.state != JobState::Queued {
            return Err(JobError::InvalidTransition {
                id: job.id,
                state: job.state,
                target: JobState::Dispatched,
            }
            .into());
        }

        let pool = self.registry.workers_for(job.model).await;
        if pool.is_empty() {
            tracing::info!(job_id = %job.id, model = %job.model, "No worker registered, job stays queued");
            return Err(DispatchError::NoCapacity {
                model: job.model.to_string(),
            });
        }

        // First-fit over eligible workers; flagged ones (busy or
        // unreachable) go to the back of the line rather than being
        // skipped outright, since the flag is only a hint and retrying
        // is how a recovered worker gets flagged eligible again.
        let (available, flagged): (Vec<_>, Vec<_>) =
            pool.into_iter().partition(|w| w.available);
        let candidates: Vec<WorkerDescriptor> =
            available.into_iter().chain(flagged).collect();

        let request = DispatchRequest {
            job_id: job.id,
            model: job.model,
            input_artifact: job.input_key.clone(),
            parameters: serde_json::json!({ "filename": job.filename }),
        };

        let mut attempts = 0u32;
        for worker in candidates.iter().take(self.config.max_attempts as usize) {
            if attempts > 0 {
                tokio::time::sleep(self.backoff()).await;
            }
            attempts += 1;

            match self.client.send_job(worker, &request).await {
                Ok(DispatchAck { accepted: true }) => {
                    // Cannot fail: the guard is held and state was
                    // checked above.
                    job.transition_to(JobState::Dispatched)?;
                    job.worker_id = Some(worker.worker_id.clone());
                    // Held busy until Result Intake releases it on
                    // completion.
                    let _ = self.registry.mark_unavailable(&worker.worker_id).await;
                    tracing::info!(
                        job_id = %job.id,
                        worker_id = %worker.worker_id,
                        attempts,
                        "Job dispatched"
                    );
                    return Ok(worker.worker_id.clone());
                }
                Ok(DispatchAck { accepted: false }) => {
                    tracing::warn!(
                        job_id = %job.id,
                        worker_id = %worker.worker_id,
                        "Worker declined job"
                    );
                    let _ = self.registry.mark_unavailable(&worker.worker_id).await;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        worker_id = %worker.worker_id,
                        error = %e,
                        "Worker unreachable"
                    );
                    let _ = self.registry.mark_unavailable(&worker.worker_id).await;
                }
            }
        }

        tracing::info!(
            job_id = %job.id,
            model = %job.model,
            attempts,
            "All dispatch attempts failed, job stays queued"
        );
        Err(DispatchError::WorkerUnreachable {
            model: job.model.to_string(),
            attempts,
        })
    }

    fn backoff(&self) -> Duration {
        let base = self.config.retry_backoff.as_millis() as u64;
        let jitter = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=base.max(1) / 2)
        };
        Duration::from_millis(base + jitter)
    }
}

/// Spawn the queue sweeper: periodically re-attempts dispatch for jobs
/// still queued (earlier `NoCapacity`/`WorkerUnreachable` outcomes).
/// Safe to race with user-triggered dispatch — the state machine lets
/// only one succeed.
pub fn spawn_queue_sweeper(dispatcher: Arc<Dispatcher>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so freshly booted
        // services don't double-dispatch submissions in flight.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let queued = dispatcher.jobs.in_state(JobState::Queued).await;
            if queued.is_empty() {
                continue;
            }
            tracing::debug!(count = queued.len(), "Queue sweep: retrying dispatch");
            for job_id in queued {
                match dispatcher.dispatch(job_id).await {
                    Ok(worker_id) => {
                        tracing::info!(job_id = %job_id, worker_id = %worker_id, "Sweeper dispatched job");
                    }
                    Err(DispatchError::NoCapacity { .. })
                    | Err(DispatchError::WorkerUnreachable { .. }) => {}
                    Err(DispatchError::Job(_)) => {
                        // Raced with another dispatcher or cleanup.
                    }
                }
            }
        }
    })
}
