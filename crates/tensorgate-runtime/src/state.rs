//! The dispatch facade: the single surface every protocol front-end and
//! the in-process client consume.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, info_span, warn};

use tensorgate_core::metrics::METRICS;
use tensorgate_core::{Error, MemoryPool, ParameterMap, Result};

use crate::batcher::IngressItem;
use crate::endpoints::{Endpoints, ModelMetadata};
use crate::hardware;
use crate::kernel::KernelRegistry;
use crate::repository;
use crate::request::{response_channel, InferenceRequest, InferenceResponseFuture};
use crate::worker::WorkerState;

#[derive(Clone, Debug)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    /// Compile-time features present in this build.
    pub extensions: BTreeSet<String>,
}

pub struct SharedState {
    endpoints: Endpoints,
    repository: Mutex<Option<PathBuf>>,
    extensions: BTreeSet<String>,
}

impl SharedState {
    pub fn new(
        kernels: Arc<KernelRegistry>,
        pool: Arc<MemoryPool>,
        extensions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            endpoints: Endpoints::new(kernels, pool),
            repository: Mutex::new(None),
            extensions: extensions.into_iter().collect(),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn server_metadata(&self) -> ServerMetadata {
        ServerMetadata {
            name: "tensorgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extensions: self.extensions.clone(),
        }
    }

    pub fn server_live(&self) -> bool {
        true
    }

    pub fn server_ready(&self) -> bool {
        true
    }

    pub fn model_ready(&self, model: &str) -> bool {
        self.endpoints.ready(model)
    }

    pub fn model_metadata(&self, model: &str) -> Result<ModelMetadata> {
        self.endpoints.metadata(model)
    }

    pub fn model_list(&self) -> Vec<String> {
        self.endpoints.list()
    }

    /// Point the facade at a model repository. With `load_existing`, every
    /// model directory already present is loaded immediately.
    pub async fn set_repository(&self, path: &Path, load_existing: bool) {
        *self.repository.lock().unwrap() = Some(path.to_path_buf());
        if !load_existing {
            return;
        }
        let models = repository::list_models(path);
        for model in models {
            if let Err(err) = self.model_load(&model, &ParameterMap::new()).await {
                info!(model = %model, error = %err, "skipping model during repository scan");
            }
        }
    }

    pub fn repository_path(&self) -> Option<PathBuf> {
        self.repository.lock().unwrap().clone()
    }

    /// Load a model by resolving its platform from the repository config,
    /// then handing the merged parameters to the worker factory.
    pub async fn model_load(&self, model: &str, params: &ParameterMap) -> Result<()> {
        let repo = self
            .repository_path()
            .ok_or_else(|| Error::runtime("no model repository configured"))?;
        let mut merged = repository::parse_model(&repo, model)?;
        merged.merge(params);
        self.endpoints.load(model, &merged).await.map(|_| ())
    }

    pub async fn model_unload(&self, model: &str) -> Result<()> {
        self.endpoints.unload(model).await
    }

    /// Load a worker directly from its parameters, bypassing the
    /// repository. Returns the endpoint name.
    pub async fn worker_load(&self, worker: &str, params: &ParameterMap) -> Result<String> {
        self.endpoints.load(worker, params).await
    }

    pub async fn worker_unload(&self, worker: &str) -> Result<()> {
        self.endpoints.unload(worker).await
    }

    /// Enqueue a request on the model's ingress queue and return the
    /// completion future immediately.
    pub async fn model_infer(
        &self,
        model: &str,
        mut request: InferenceRequest,
    ) -> Result<InferenceResponseFuture> {
        if request.inputs.is_empty() {
            return Err(Error::invalid_argument("request has no inputs"));
        }

        let (ingress, state) = self.endpoints.route(model)?;
        {
            let state = *state.lock().unwrap();
            if state != WorkerState::Running {
                return Err(Error::unavailable(format!("model {model} is {state}")));
            }
        }

        let (callback, future) = response_channel();
        request.callback = callback;
        let item = IngressItem {
            trace: info_span!("infer", model = %model, id = %request.id),
            received: Instant::now(),
            request,
        };

        METRICS.requests_total.inc();
        METRICS.queue_depth.inc();
        if let Err(err) = ingress.send(item).await {
            METRICS.queue_depth.dec();
            let mut item = err.0;
            warn!(model = %model, id = %item.request.id, "ingress queue closed");
            item.request
                .complete_error(model, "worker shut down before accepting request");
            return Err(Error::unavailable(format!("model {model} stopped accepting requests")));
        }
        Ok(future)
    }

    pub fn has_hardware(&self, name: &str, num: i32) -> bool {
        hardware::has_hardware(name, num)
    }

    /// Drain and destroy every worker. Called after the protocol
    /// front-ends have stopped accepting requests; the memory pool is
    /// torn down after this returns.
    pub async fn shutdown(&self) {
        self.endpoints.shutdown().await;
    }
}
