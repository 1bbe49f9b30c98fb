//! The worker owns a model kernel and drives it through its lifecycle:
//! init -> acquire -> run-loop -> release -> destroy. While running it
//! consumes batches from its batcher and completes every request exactly
//! once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tensorgate_core::metrics::METRICS;
use tensorgate_core::{Error, MemoryPool, ParameterMap, Result};

use crate::batch::Batch;
use crate::batcher::{BatchPolicy, Batcher, IngressItem};
use crate::kernel::{Kernel, KernelSpec};
use crate::request::InferenceResponse;

const INGRESS_QUEUE_DEPTH: usize = 1024;
const BATCH_QUEUE_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    Unloaded,
    Initialized,
    Acquired,
    Running,
    Released,
    Destroyed,
    Failed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Unloaded => "unloaded",
            WorkerState::Initialized => "initialized",
            WorkerState::Acquired => "acquired",
            WorkerState::Running => "running",
            WorkerState::Released => "released",
            WorkerState::Destroyed => "destroyed",
            WorkerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared view of a worker's state, cheap enough to probe on every infer.
pub type StateProbe = Arc<Mutex<WorkerState>>;

pub struct Worker {
    name: String,
    state: StateProbe,
    kernel: Option<Box<dyn Kernel>>,
    spec: Option<Arc<KernelSpec>>,
    batch_size: usize,
    batch_timeout: Duration,
    pool: Arc<MemoryPool>,
    ingress: Option<mpsc::Sender<IngressItem>>,
    batch_rx: Option<mpsc::Receiver<Batch>>,
    batcher_task: Option<JoinHandle<()>>,
    run_task: Option<JoinHandle<()>>,
    kernel_return: Option<oneshot::Receiver<Box<dyn Kernel>>>,
}

impl Worker {
    pub fn new(name: impl Into<String>, kernel: Box<dyn Kernel>, pool: Arc<MemoryPool>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(WorkerState::Unloaded)),
            kernel: Some(kernel),
            spec: None,
            batch_size: 1,
            batch_timeout: Duration::ZERO,
            pool,
            ingress: None,
            batch_rx: None,
            batcher_task: None,
            run_task: None,
            kernel_return: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    pub fn state_probe(&self) -> StateProbe {
        self.state.clone()
    }

    pub fn spec(&self) -> Option<Arc<KernelSpec>> {
        self.spec.clone()
    }

    /// The ingress queue, available while the worker is running.
    pub fn ingress(&self) -> Result<mpsc::Sender<IngressItem>> {
        if self.state() != WorkerState::Running {
            return Err(Error::unavailable(format!(
                "worker {} is {}, not running",
                self.name,
                self.state()
            )));
        }
        self.ingress
            .clone()
            .ok_or_else(|| Error::internal("running worker lost its ingress queue"))
    }

    /// The state may only advance. `Failed` is reachable from anywhere and
    /// leads only to `Destroyed`.
    fn advance(&self, to: WorkerState) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let legal = match (*state, to) {
            (_, WorkerState::Failed) => *state != WorkerState::Destroyed,
            (WorkerState::Failed, WorkerState::Destroyed) => true,
            (WorkerState::Failed, _) => false,
            (from, to) => to > from,
        };
        if !legal {
            return Err(Error::runtime(format!(
                "worker {} cannot move from {} to {}",
                self.name, *state, to
            )));
        }
        debug!(worker = %self.name, from = %*state, to = %to, "worker state change");
        *state = to;
        Ok(())
    }

    fn fail(&self, err: Error) -> Error {
        let _ = self.advance(WorkerState::Failed);
        err
    }

    fn expect_state(&self, expected: WorkerState) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(Error::runtime(format!(
                "worker {} is {}, expected {}",
                self.name, state, expected
            )));
        }
        Ok(())
    }

    /// Set the batch size and validate kernel parameters.
    pub fn init(&mut self, params: &ParameterMap) -> Result<()> {
        self.expect_state(WorkerState::Unloaded)?;

        let batch_size = params.get_i32("batch_size").unwrap_or(1);
        if batch_size < 1 {
            return Err(self.fail(Error::invalid_argument(format!(
                "batch_size must be positive, got {batch_size}"
            ))));
        }
        self.batch_size = batch_size as usize;

        let timeout_ms = params.get_i32("timeout_ms").unwrap_or(0);
        if timeout_ms < 0 {
            return Err(self.fail(Error::invalid_argument(format!(
                "timeout_ms must be non-negative, got {timeout_ms}"
            ))));
        }
        self.batch_timeout = Duration::from_millis(timeout_ms as u64);

        let kernel = self
            .kernel
            .as_mut()
            .ok_or_else(|| Error::internal("worker has no kernel"))?;
        if let Err(err) = kernel.init(params) {
            return Err(self.fail(err));
        }

        self.advance(WorkerState::Initialized)
    }

    /// Obtain the kernel's declared tensors and allocators, bind a fresh
    /// ingress queue and spawn the batcher.
    pub fn acquire(&mut self, params: &ParameterMap) -> Result<()> {
        self.expect_state(WorkerState::Initialized)?;

        let kernel = self
            .kernel
            .as_mut()
            .ok_or_else(|| Error::internal("worker has no kernel"))?;
        let spec = match kernel.acquire(params) {
            Ok(spec) => Arc::new(spec),
            Err(err) => return Err(self.fail(err)),
        };
        if spec.inputs.is_empty() {
            return Err(self.fail(Error::runtime(format!(
                "worker {} declared no input tensors",
                self.name
            ))));
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_QUEUE_DEPTH);
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_DEPTH);

        let policy = BatchPolicy {
            kind: spec.batcher,
            max_batch: self.batch_size,
            timeout: self.batch_timeout,
        };
        let batcher = Batcher::new(
            self.name.clone(),
            policy,
            spec.clone(),
            self.pool.clone(),
            ingress_rx,
            batch_tx,
        );
        self.batcher_task = Some(tokio::spawn(batcher.run()));
        self.ingress = Some(ingress_tx);
        self.batch_rx = Some(batch_rx);
        self.spec = Some(spec);

        self.advance(WorkerState::Acquired)
    }

    /// Spawn the run loop: the long-running consumer of batches.
    pub fn run(&mut self) -> Result<()> {
        self.expect_state(WorkerState::Acquired)?;

        let kernel = self
            .kernel
            .take()
            .ok_or_else(|| Error::internal("worker has no kernel"))?;
        let batch_rx = self
            .batch_rx
            .take()
            .ok_or_else(|| Error::internal("worker has no batch queue"))?;
        let (done_tx, done_rx) = oneshot::channel();
        self.kernel_return = Some(done_rx);

        let name = self.name.clone();
        let pool = self.pool.clone();
        self.run_task = Some(tokio::spawn(run_loop(name, kernel, batch_rx, pool, done_tx)));

        self.advance(WorkerState::Running)
    }

    /// Stop accepting new requests and drain what is already queued;
    /// in-flight batches complete normally.
    pub async fn release(&mut self) -> Result<()> {
        self.expect_state(WorkerState::Running)?;

        // dropping the ingress sender is the shutdown sentinel
        self.ingress.take();
        if let Some(task) = self.batcher_task.take() {
            if task.await.is_err() {
                error!(worker = %self.name, "batcher task panicked");
            }
        }
        if let Some(task) = self.run_task.take() {
            if task.await.is_err() {
                error!(worker = %self.name, "run task panicked");
            }
        }
        if let Some(done) = self.kernel_return.take() {
            if let Ok(mut kernel) = done.await {
                kernel.release();
                self.kernel = Some(kernel);
            }
        }

        self.advance(WorkerState::Released)
    }

    /// Deallocate kernel resources. After this the endpoint is removed
    /// from the registry.
    pub fn destroy(&mut self) -> Result<()> {
        if let Some(mut kernel) = self.kernel.take() {
            kernel.destroy();
        }
        self.advance(WorkerState::Destroyed)?;
        info!(worker = %self.name, "worker destroyed");
        Ok(())
    }
}

/// Consume batches until the batcher hangs up. For each batch, invoke the
/// kernel once, then complete every request: outputs on success, an error
/// string otherwise. Buffers return to the pool only after the whole batch
/// has been dispatched.
async fn run_loop(
    worker: String,
    mut kernel: Box<dyn Kernel>,
    mut batch_rx: mpsc::Receiver<Batch>,
    pool: Arc<MemoryPool>,
    done: oneshot::Sender<Box<dyn Kernel>>,
) {
    info!(worker = %worker, "worker run loop started");
    while let Some(mut batch) = batch_rx.recv().await {
        METRICS.pipeline_ingress_worker.inc();

        let mut results = kernel.execute(&mut batch);
        let size = batch.size();
        // a kernel that miscounts its slots fails the unanswered requests
        while results.len() < size {
            results.push(Err(Error::runtime("kernel produced no result for slot")));
        }

        let (requests, traces, start_times, inputs, outputs) = batch.into_parts();
        for (index, (mut request, result)) in requests.into_iter().zip(results).enumerate() {
            let _span = traces[index].enter();
            match result {
                Ok(tensors) => {
                    let response =
                        InferenceResponse::ok(request.id.clone(), worker.clone(), tensors);
                    request.complete(response);
                    METRICS.pipeline_egress_worker.inc();
                    METRICS
                        .request_latency
                        .observe(start_times[index].elapsed().as_secs_f64());
                }
                Err(err) => {
                    request.complete_error(&worker, err.to_string());
                }
            }
        }

        for buffer in inputs.into_iter().chain(outputs) {
            pool.put(buffer);
        }
    }
    info!(worker = %worker, "worker run loop ending");
    let _ = done.send(kernel);
}
