//! Prometheus counters for the request pipeline. All metrics live in one
//! process-wide registry gathered by the HTTP adapter at `/metrics`.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

pub struct Metrics {
    pub registry: Registry,

    /// Requests accepted by the dispatch façade.
    pub requests_total: IntCounter,

    /// Requests completed with an error response.
    pub requests_failed: IntCounter,

    /// Batches handed from a batcher to its worker.
    pub pipeline_ingress_worker: IntCounter,

    /// Requests completed by a worker.
    pub pipeline_egress_worker: IntCounter,

    /// Fresh allocations made by the memory pool.
    pub pool_allocations: IntCounter,

    /// Size distribution of emitted batches.
    pub batch_size: Histogram,

    /// End-to-end request latency as observed by the worker.
    pub request_latency: Histogram,

    /// Current depth of all worker ingress queues combined.
    pub queue_depth: IntGauge,
}

lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let requests_total =
            IntCounter::new("tensorgate_requests_total", "Inference requests accepted").unwrap();
        let requests_failed = IntCounter::new(
            "tensorgate_requests_failed_total",
            "Inference requests completed with an error",
        )
        .unwrap();
        let pipeline_ingress_worker = IntCounter::new(
            "tensorgate_pipeline_ingress_worker_total",
            "Batches received by workers",
        )
        .unwrap();
        let pipeline_egress_worker = IntCounter::new(
            "tensorgate_pipeline_egress_worker_total",
            "Requests completed by workers",
        )
        .unwrap();
        let pool_allocations = IntCounter::new(
            "tensorgate_pool_allocations_total",
            "Fresh buffer allocations made by the memory pool",
        )
        .unwrap();
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("tensorgate_batch_size", "Batch size distribution")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
        )
        .unwrap();
        let request_latency = Histogram::with_opts(
            HistogramOpts::new(
                "tensorgate_request_latency_seconds",
                "Latency from ingress to completion",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ]),
        )
        .unwrap();
        let queue_depth = IntGauge::new(
            "tensorgate_queue_depth",
            "Requests waiting on worker ingress queues",
        )
        .unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(requests_failed.clone())).unwrap();
        registry
            .register(Box::new(pipeline_ingress_worker.clone()))
            .unwrap();
        registry
            .register(Box::new(pipeline_egress_worker.clone()))
            .unwrap();
        registry.register(Box::new(pool_allocations.clone())).unwrap();
        registry.register(Box::new(batch_size.clone())).unwrap();
        registry.register(Box::new(request_latency.clone())).unwrap();
        registry.register(Box::new(queue_depth.clone())).unwrap();

        Self {
            registry,
            requests_total,
            requests_failed,
            pipeline_ingress_worker,
            pipeline_egress_worker,
            pool_allocations,
            batch_size,
            request_latency,
            queue_depth,
        }
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_renders_counters() {
        METRICS.requests_total.inc();
        let text = METRICS.gather();
        assert!(text.contains("tensorgate_requests_total"));
    }
}
