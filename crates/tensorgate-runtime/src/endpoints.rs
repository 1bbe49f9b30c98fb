//! The endpoints registry maps canonical model names to live workers and
//! reference-counts loads so repeated loads of the same model share one
//! kernel instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use tensorgate_core::{Error, MemoryPool, ParameterMap, Result, TensorDesc};

use crate::batcher::IngressItem;
use crate::kernel::{KernelRegistry, KernelSpec};
use crate::worker::{StateProbe, Worker, WorkerState};

/// Observational description of a loaded model.
#[derive(Clone, Debug, Serialize)]
pub struct ModelMetadata {
    pub name: String,
    pub platform: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
}

struct Entry {
    worker: Arc<AsyncMutex<Worker>>,
    ingress: mpsc::Sender<IngressItem>,
    state: StateProbe,
    spec: Arc<KernelSpec>,
    platform: String,
    refs: usize,
}

/// Model name in its canonical registry form.
pub fn canonical(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub struct Endpoints {
    kernels: Arc<KernelRegistry>,
    pool: Arc<MemoryPool>,
    entries: Mutex<HashMap<String, Entry>>,
    // serializes load/unload per model name; distinct names stay parallel
    name_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Endpoints {
    pub fn new(kernels: Arc<KernelRegistry>, pool: Arc<MemoryPool>) -> Self {
        Self {
            kernels,
            pool,
            entries: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> Arc<MemoryPool> {
        self.pool.clone()
    }

    fn name_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.name_locks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Load the named endpoint. If it is already present only the
    /// reference count grows; otherwise the kernel named by the `worker`
    /// parameter (defaulting to the endpoint name) is instantiated and
    /// driven to `Running`. Returns the endpoint name.
    pub async fn load(&self, name: &str, params: &ParameterMap) -> Result<String> {
        let endpoint = canonical(name);
        let lock = self.name_lock(&endpoint);
        let _serialized = lock.lock().await;

        if let Some(entry) = self.entries.lock().unwrap().get_mut(&endpoint) {
            entry.refs += 1;
            info!(endpoint = %endpoint, refs = entry.refs, "endpoint already loaded");
            return Ok(endpoint);
        }

        let kernel_name = params.get_str("worker").unwrap_or(&endpoint).to_string();
        let kernel = self.kernels.create(&kernel_name)?;

        let mut worker = Worker::new(endpoint.clone(), kernel, self.pool.clone());
        worker.init(params)?;
        worker.acquire(params)?;
        worker.run()?;

        let entry = Entry {
            ingress: worker.ingress()?,
            state: worker.state_probe(),
            spec: worker
                .spec()
                .ok_or_else(|| Error::internal("running worker has no spec"))?,
            platform: kernel_name,
            refs: 1,
            worker: Arc::new(AsyncMutex::new(worker)),
        };
        self.entries.lock().unwrap().insert(endpoint.clone(), entry);
        info!(endpoint = %endpoint, "endpoint loaded");
        Ok(endpoint)
    }

    /// Drop one reference; at zero the worker is driven through release
    /// and destroy and the endpoint disappears. Unloading a name that is
    /// not present is benign.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let endpoint = canonical(name);
        let lock = self.name_lock(&endpoint);
        let _serialized = lock.lock().await;

        let retired = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(&endpoint) {
                None => {
                    warn!(endpoint = %endpoint, "unload of unknown endpoint ignored");
                    return Ok(());
                }
                Some(entry) => {
                    entry.refs -= 1;
                    if entry.refs == 0 {
                        entries.remove(&endpoint)
                    } else {
                        info!(endpoint = %endpoint, refs = entry.refs, "endpoint dereferenced");
                        None
                    }
                }
            }
        };

        if let Some(entry) = retired {
            retire(&endpoint, entry).await;
            info!(endpoint = %endpoint, "endpoint unloaded");
        }
        Ok(())
    }

    pub fn ready(&self, name: &str) -> bool {
        let endpoint = canonical(name);
        let entries = self.entries.lock().unwrap();
        match entries.get(&endpoint) {
            Some(entry) => *entry.state.lock().unwrap() == WorkerState::Running,
            None => false,
        }
    }

    pub fn metadata(&self, name: &str) -> Result<ModelMetadata> {
        let endpoint = canonical(name);
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(&endpoint)
            .ok_or_else(|| Error::not_found(format!("model {endpoint} is not loaded")))?;
        Ok(ModelMetadata {
            name: endpoint,
            platform: entry.platform.clone(),
            inputs: entry.spec.inputs.clone(),
            outputs: entry.spec.outputs.clone(),
        })
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Reference count of one endpoint, mainly for tests and diagnostics.
    pub fn ref_count(&self, name: &str) -> usize {
        let endpoint = canonical(name);
        self.entries
            .lock()
            .unwrap()
            .get(&endpoint)
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    /// The pieces the infer path needs, fetched under one short lock.
    pub fn route(&self, name: &str) -> Result<(mpsc::Sender<IngressItem>, StateProbe)> {
        let endpoint = canonical(name);
        let entries = self.entries.lock().unwrap();
        let entry = entries
            .get(&endpoint)
            .ok_or_else(|| Error::not_found(format!("model {endpoint} is not loaded")))?;
        Ok((entry.ingress.clone(), entry.state.clone()))
    }

    /// Drive every endpoint to destruction regardless of reference count.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        for name in names {
            let retired = self.entries.lock().unwrap().remove(&name);
            if let Some(entry) = retired {
                retire(&name, entry).await;
            }
        }
    }
}

/// Drain and destroy a retired endpoint's worker. The entry's ingress
/// sender must drop first: the batcher treats a closed queue as its
/// shutdown sentinel.
async fn retire(endpoint: &str, entry: Entry) {
    let Entry { worker, ingress, .. } = entry;
    drop(ingress);

    let mut worker = worker.lock().await;
    if let Err(err) = worker.release().await {
        warn!(endpoint = %endpoint, error = %err, "release failed while retiring endpoint");
    }
    if let Err(err) = worker.destroy() {
        warn!(endpoint = %endpoint, error = %err, "destroy failed while retiring endpoint");
    }
}
