//! The kernel capability surface workers are built around, and the
//! registry that maps worker names to kernel factories. Factories are
//! registered at program start; the dispatch core never loads shared
//! objects itself.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tensorgate_core::{AllocatorTag, Error, ParameterMap, Result, TensorDesc};

use crate::batch::Batch;
use crate::request::ResponseOutput;

/// How a worker's batcher groups requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatcherKind {
    /// Fill batches to exactly the configured size, flushing a partial
    /// batch only at shutdown.
    Hard,
    /// Emit when the batch is full or the window since the first queued
    /// request has elapsed.
    Timeout,
}

/// What a kernel declares when it is acquired: the tensors it consumes and
/// produces per request, the allocators it accepts buffers from, and its
/// preferred batching discipline.
#[derive(Clone, Debug)]
pub struct KernelSpec {
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub allocators: Vec<AllocatorTag>,
    pub batcher: BatcherKind,
}

/// A model kernel as the worker sees it. `execute` runs the compute step
/// over a whole batch and yields one result per request slot; a per-slot
/// error fails only that request.
pub trait Kernel: Send + std::fmt::Debug + 'static {
    fn init(&mut self, params: &ParameterMap) -> Result<()>;

    fn acquire(&mut self, params: &ParameterMap) -> Result<KernelSpec>;

    fn execute(&mut self, batch: &mut Batch) -> Vec<Result<Vec<ResponseOutput>>>;

    fn release(&mut self) {}

    fn destroy(&mut self) {}
}

pub type KernelFactory = Arc<dyn Fn() -> Box<dyn Kernel> + Send + Sync>;

/// Maps worker names to kernel factories.
#[derive(Default)]
pub struct KernelRegistry {
    factories: RwLock<HashMap<String, KernelFactory>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Kernel> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap()
            .insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().unwrap().contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Kernel>> {
        let factories = self.factories.read().unwrap();
        let factory = factories
            .get(name)
            .ok_or_else(|| Error::not_found(format!("no worker named {name}")))?;
        Ok(factory())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NoopKernel;

    impl Kernel for NoopKernel {
        fn init(&mut self, _params: &ParameterMap) -> Result<()> {
            Ok(())
        }

        fn acquire(&mut self, _params: &ParameterMap) -> Result<KernelSpec> {
            Ok(KernelSpec {
                inputs: Vec::new(),
                outputs: Vec::new(),
                allocators: vec![AllocatorTag::Cpu],
                batcher: BatcherKind::Timeout,
            })
        }

        fn execute(&mut self, _batch: &mut Batch) -> Vec<Result<Vec<ResponseOutput>>> {
            Vec::new()
        }
    }

    #[test]
    fn registry_creates_registered_kernels() {
        let registry = KernelRegistry::new();
        registry.register("noop", || Box::new(NoopKernel));

        assert!(registry.contains("noop"));
        assert!(registry.create("noop").is_ok());
        assert!(matches!(
            registry.create("missing").unwrap_err(),
            Error::NotFound(_)
        ));
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }
}
