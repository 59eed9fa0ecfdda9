//! Worker registry — directory of separation workers by model capability.
//!
//! Loaded from static configuration at startup; workers may also
//! self-register over HTTP when they come up. Availability flags are
//! best-effort eligibility hints — cleared by the Dispatcher when a
//! worker takes a job or proves unreachable, set by Result Intake on
//! completion — not a correctness-critical lock: two dispatch attempts
//! may race on the same worker, and the worker itself rejects
//! overload.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::model::ModelId;

/// One registered worker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Unique worker identifier (e.g. "scnet01").
    pub worker_id: String,
    /// Model family this worker runs.
    pub model_type: ModelId,
    /// Reachable network address, host:port.
    pub worker_address: String,
    /// Eligibility hint: cleared while the worker holds a dispatched
    /// job or after it proved unreachable, set again on release.
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

/// In-memory worker directory.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerDescriptor>>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
        })
    }

    /// Register a worker. Two descriptors never share an identifier;
    /// a duplicate registration is rejected.
    pub async fn register(&self, descriptor: WorkerDescriptor) -> Result<(), RegistryError> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&descriptor.worker_id) {
            tracing::warn!(
                worker_id = %descriptor.worker_id,
                model = %descriptor.model_type,
                "Worker registration rejected: already registered"
            );
            return Err(RegistryError::DuplicateWorker {
                worker_id: descriptor.worker_id,
            });
        }
        tracing::info!(
            worker_id = %descriptor.worker_id,
            model = %descriptor.model_type,
            address = %descriptor.worker_address,
            "Worker registered"
        );
        workers.insert(descriptor.worker_id.clone(), descriptor);
        Ok(())
    }

    /// Workers declaring the given model capability, ordered by worker
    /// ID for deterministic first-fit. An empty list is a valid result
    /// meaning "no capacity", not an error.
    pub async fn workers_for(&self, model: ModelId) -> Vec<WorkerDescriptor> {
        let workers = self.workers.read().await;
        let mut matched: Vec<WorkerDescriptor> = workers
            .values()
            .filter(|w| w.model_type == model)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        matched
    }

    /// Flag a worker as unreachable.
    pub async fn mark_unavailable(&self, worker_id: &str) -> Result<(), RegistryError> {
        self.set_available(worker_id, false).await
    }

    /// Flag a worker as reachable again.
    pub async fn mark_available(&self, worker_id: &str) -> Result<(), RegistryError> {
        self.set_available(worker_id, true).await
    }

    async fn set_available(&self, worker_id: &str, available: bool) -> Result<(), RegistryError> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| RegistryError::UnknownWorker {
                worker_id: worker_id.to_string(),
            })?;
        if worker.available != available {
            tracing::info!(worker_id = %worker_id, available, "Worker availability changed");
        }
        worker.available = available;
        Ok(())
    }

    /// All registered workers, ordered by worker ID.
    pub async fn list(&self) -> Vec<WorkerDescriptor> {
        let workers = self.workers.read().await;
        let mut all: Vec<WorkerDescriptor> = workers.values().cloned().collect();
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, model: ModelId) -> WorkerDescriptor {
        WorkerDescriptor {
            worker_id: id.to_string(),
            model_type: model,
            worker_address: format!("{id}.local:9000"),
            available: true,
        }
    }

    #[tokio::test]
    async fn register_and_query_by_model() {
        let registry = WorkerRegistry::new();
        registry
            .register(descriptor("scnet02", ModelId::Scnet))
            .await
            .unwrap();
        registry
            .register(descriptor("scnet01", ModelId::Scnet))
            .await
            .unwrap();
        registry
            .register(descriptor("dttnet01", ModelId::Dttnet))
            .await
            .unwrap();

        let scnet = registry.workers_for(ModelId::Scnet).await;
        let ids: Vec<&str> = scnet.iter().map(|w| w.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["scnet01", "scnet02"]);

        assert_eq!(registry.workers_for(ModelId::Dttnet).await.len(), 1);
    }

    #[tokio::test]
    async fn empty_pool_is_not_an_error() {
        let registry = WorkerRegistry::new();
        assert!(registry.workers_for(ModelId::Scnet).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let registry = WorkerRegistry::new();
        registry
            .register(descriptor("scnet01", ModelId::Scnet))
            .await
            .unwrap();

        let err = registry
            .register(descriptor("scnet01", ModelId::Dttnet))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateWorker { .. }));
        // Original entry untouched.
        let workers = registry.workers_for(ModelId::Scnet).await;
        assert_eq!(workers.len(), 1);
    }

    #[tokio::test]
    async fn availability_flags() {
        let registry = WorkerRegistry::new();
        registry
            .register(descriptor("scnet01", ModelId::Scnet))
            .await
            .unwrap();

        registry.mark_unavailable("scnet01").await.unwrap();
        assert!(!registry.workers_for(ModelId::Scnet).await[0].available);

        registry.mark_available("scnet01").await.unwrap();
        assert!(registry.workers_for(ModelId::Scnet).await[0].available);

        let err = registry.mark_unavailable("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownWorker { .. }));
    }
}
