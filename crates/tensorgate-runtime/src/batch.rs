use std::time::Instant;

use tracing::Span;

use tensorgate_core::Buffer;

use crate::request::InferenceRequest;

/// What the batcher produces and pushes to a worker: the grouped requests,
/// the pooled buffers their tensor data was laid into, and per-request
/// bookkeeping. Request slot `i` owns slot `i` of every buffer.
#[derive(Debug)]
pub struct Batch {
    worker: String,
    requests: Vec<InferenceRequest>,
    input_buffers: Vec<Buffer>,
    output_buffers: Vec<Buffer>,
    traces: Vec<Span>,
    start_times: Vec<Instant>,
}

impl Batch {
    pub fn new(worker: impl Into<String>, input_buffers: Vec<Buffer>, output_buffers: Vec<Buffer>) -> Self {
        Self {
            worker: worker.into(),
            requests: Vec::new(),
            input_buffers,
            output_buffers,
            traces: Vec::new(),
            start_times: Vec::new(),
        }
    }

    /// Append a request together with its trace span and ingress
    /// timestamp. The three vectors must stay aligned, so they are only
    /// ever appended through this single call.
    pub fn add_request(&mut self, request: InferenceRequest, trace: Span, start_time: Instant) {
        self.requests.push(request);
        self.traces.push(trace);
        self.start_times.push(start_time);
    }

    pub fn size(&self) -> usize {
        debug_assert_eq!(self.requests.len(), self.traces.len());
        debug_assert_eq!(self.requests.len(), self.start_times.len());
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn request(&self, index: usize) -> &InferenceRequest {
        &self.requests[index]
    }

    pub fn requests(&self) -> &[InferenceRequest] {
        &self.requests
    }

    pub fn trace(&self, index: usize) -> &Span {
        &self.traces[index]
    }

    pub fn start_time(&self, index: usize) -> Instant {
        self.start_times[index]
    }

    pub fn input_buffer(&self, index: usize) -> &Buffer {
        &self.input_buffers[index]
    }

    pub fn input_buffer_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.input_buffers[index]
    }

    pub fn output_buffer_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.output_buffers[index]
    }

    pub fn num_input_buffers(&self) -> usize {
        self.input_buffers.len()
    }

    pub fn num_output_buffers(&self) -> usize {
        self.output_buffers.len()
    }

    /// Tear the batch apart for completion: requests with their
    /// bookkeeping, plus the buffers to hand back to the pool.
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Vec<InferenceRequest>,
        Vec<Span>,
        Vec<Instant>,
        Vec<Buffer>,
        Vec<Buffer>,
    ) {
        (
            self.requests,
            self.traces,
            self.start_times,
            self.input_buffers,
            self.output_buffers,
        )
    }

    /// Take the buffers out without touching the requests. Used when a
    /// partial batch is destroyed before reaching a worker.
    pub fn take_buffers(&mut self) -> (Vec<Buffer>, Vec<Buffer>) {
        (
            std::mem::take(&mut self.input_buffers),
            std::mem::take(&mut self.output_buffers),
        )
    }

    /// Drain the requests, e.g. to fail them all on a batch-wide error.
    pub fn drain_requests(&mut self) -> Vec<InferenceRequest> {
        self.traces.clear();
        self.start_times.clear();
        std::mem::take(&mut self.requests)
    }
}
