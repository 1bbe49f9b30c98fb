//! The batcher turns the unbounded stream of inbound requests for one
//! worker into a stream of bounded batches, laying request tensors into
//! pooled buffers along the way.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant as TokioInstant};
use tracing::{debug, warn, Span};

use tensorgate_core::metrics::METRICS;
use tensorgate_core::{Buffer, Error, MemoryPool, Result};

use crate::batch::Batch;
use crate::kernel::{BatcherKind, KernelSpec};
use crate::request::InferenceRequest;

/// A request travelling from the dispatch facade to a batcher, together
/// with the bookkeeping that must stay aligned with it inside a batch.
#[derive(Debug)]
pub struct IngressItem {
    pub request: InferenceRequest,
    pub trace: Span,
    pub received: Instant,
}

impl IngressItem {
    pub fn new(request: InferenceRequest) -> Self {
        Self {
            request,
            trace: Span::current(),
            received: Instant::now(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BatchPolicy {
    pub kind: BatcherKind,
    pub max_batch: usize,
    pub timeout: Duration,
}

impl BatchPolicy {
    /// Defaults mean pass-through: batches of one, no waiting.
    pub fn pass_through(kind: BatcherKind) -> Self {
        Self {
            kind,
            max_batch: 1,
            timeout: Duration::ZERO,
        }
    }
}

pub struct Batcher {
    worker: String,
    policy: BatchPolicy,
    spec: Arc<KernelSpec>,
    pool: Arc<MemoryPool>,
    rx: mpsc::Receiver<IngressItem>,
    batch_tx: mpsc::Sender<Batch>,
}

impl Batcher {
    pub fn new(
        worker: impl Into<String>,
        policy: BatchPolicy,
        spec: Arc<KernelSpec>,
        pool: Arc<MemoryPool>,
        rx: mpsc::Receiver<IngressItem>,
        batch_tx: mpsc::Sender<Batch>,
    ) -> Self {
        Self {
            worker: worker.into(),
            policy,
            spec,
            pool,
            rx,
            batch_tx,
        }
    }

    /// Consume the ingress queue until it closes. Closing the queue is the
    /// shutdown sentinel: any partial batch is flushed before exit.
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            self.assemble(first).await;
        }
        debug!(worker = %self.worker, "batcher exiting");
    }

    /// Build one batch starting from `first` and hand it to the worker.
    async fn assemble(&mut self, first: IngressItem) {
        let max_batch = self.policy.max_batch.max(1);

        let (inputs, outputs) = match self.acquire_buffers(max_batch) {
            Ok(buffers) => buffers,
            Err(err) => {
                // batch-wide failure: no buffers means nothing can be laid
                // out, so the whole attempt fails
                warn!(worker = %self.worker, error = %err, "buffer acquisition failed");
                let mut item = first;
                item.request.complete_error(&self.worker, err.to_string());
                return;
            }
        };

        let mut batch = Batch::new(self.worker.clone(), inputs, outputs);
        let deadline = TokioInstant::now() + self.policy.timeout;
        self.admit(&mut batch, first);

        while batch.size() < max_batch {
            match self.policy.kind {
                BatcherKind::Hard => match self.rx.recv().await {
                    Some(item) => self.admit(&mut batch, item),
                    None => break,
                },
                BatcherKind::Timeout => {
                    if self.policy.timeout.is_zero() {
                        match self.rx.try_recv() {
                            Ok(item) => self.admit(&mut batch, item),
                            Err(_) => break,
                        }
                    } else {
                        tokio::select! {
                            item = self.rx.recv() => match item {
                                Some(item) => self.admit(&mut batch, item),
                                None => break,
                            },
                            _ = sleep_until(deadline) => break,
                        }
                    }
                }
            }
        }

        if batch.is_empty() {
            // every admitted request was rejected during layout
            let (inputs, outputs) = batch.take_buffers();
            self.return_buffers(inputs, outputs);
            return;
        }

        METRICS.batch_size.observe(batch.size() as f64);
        debug!(worker = %self.worker, size = batch.size(), "dispatching batch");

        if let Err(send_err) = self.batch_tx.send(batch).await {
            // worker already gone; fail everything still in the batch
            let mut batch = send_err.0;
            let (inputs, outputs) = batch.take_buffers();
            for mut request in batch.drain_requests() {
                request.complete_error(&self.worker, "worker shut down before running batch");
            }
            self.return_buffers(inputs, outputs);
        }
    }

    /// Acquire one buffer per declared input and output tensor, each sized
    /// for `max_batch` requests. Already-acquired buffers go back to the
    /// pool if a later acquisition fails.
    fn acquire_buffers(&self, max_batch: usize) -> Result<(Vec<Buffer>, Vec<Buffer>)> {
        let mut inputs = Vec::with_capacity(self.spec.inputs.len());
        let mut outputs = Vec::with_capacity(self.spec.outputs.len());

        let result = (|| -> Result<()> {
            for tensor in &self.spec.inputs {
                inputs.push(self.pool.get(&self.spec.allocators, tensor, max_batch)?);
            }
            for tensor in &self.spec.outputs {
                outputs.push(self.pool.get(&self.spec.allocators, tensor, max_batch)?);
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok((inputs, outputs)),
            Err(err) => {
                self.return_buffers(inputs, outputs);
                Err(err)
            }
        }
    }

    fn return_buffers(&self, inputs: Vec<Buffer>, outputs: Vec<Buffer>) {
        for buffer in inputs.into_iter().chain(outputs) {
            self.pool.put(buffer);
        }
    }

    /// Lay one request into the next batch slot, or fail only that request.
    fn admit(&self, batch: &mut Batch, item: IngressItem) {
        let IngressItem {
            mut request,
            trace,
            received,
        } = item;

        METRICS.queue_depth.dec();
        if let Err(err) = self.lay_out(batch, &request) {
            warn!(worker = %self.worker, id = %request.id, error = %err, "rejecting request");
            request.complete_error(&self.worker, err.to_string());
            return;
        }
        batch.add_request(request, trace, received);
    }

    /// Validate a request against the declared tensors, then copy each
    /// input into its slot of the corresponding batch buffer. Validation
    /// happens up front so a rejected request never half-writes a slot.
    fn lay_out(&self, batch: &mut Batch, request: &InferenceRequest) -> Result<()> {
        if request.inputs.len() != self.spec.inputs.len() {
            return Err(Error::invalid_argument(format!(
                "expected {} input tensors, got {}",
                self.spec.inputs.len(),
                request.inputs.len()
            )));
        }

        for (input, declared) in request.inputs.iter().zip(&self.spec.inputs) {
            if input.datatype != declared.datatype {
                return Err(Error::invalid_argument(format!(
                    "input {} expects {}, got {}",
                    declared.name, declared.datatype, input.datatype
                )));
            }
            if input.shape.rank() != declared.shape.rank() {
                return Err(Error::invalid_argument(format!(
                    "input {} expects rank {}, got {}",
                    declared.name,
                    declared.shape.rank(),
                    input.shape.rank()
                )));
            }
            if input.num_elements() > declared.num_elements() {
                return Err(Error::invalid_argument(format!(
                    "input {} holds {} elements, capacity is {}",
                    declared.name,
                    input.num_elements(),
                    declared.num_elements()
                )));
            }
            let expected_bytes = input.num_elements() as usize * input.datatype.size();
            if input.data.len() != expected_bytes {
                return Err(Error::invalid_argument(format!(
                    "input {} carries {} bytes, shape implies {}",
                    declared.name,
                    input.data.len(),
                    expected_bytes
                )));
            }
        }

        let slot = batch.size();
        for (index, input) in request.inputs.iter().enumerate() {
            let declared = &self.spec.inputs[index];
            let offset = slot * declared.num_elements() as usize;
            batch.input_buffer_mut(index).write_bytes(offset, &input.data)?;
        }
        Ok(())
    }
}
