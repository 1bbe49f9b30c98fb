//! The memory pool vends buffers sized for a (tensor, batch) pair and
//! reclaims them when a batch retires, keeping buffer churn off the
//! request hot path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

use crate::buffer::{AllocatorTag, Buffer};
use crate::error::{Error, Result};
use crate::metrics::METRICS;
use crate::tensor::TensorDesc;

/// Returned buffers accumulate per bucket up to this count; beyond it they
/// are released back to the allocator.
const BUCKET_HIGH_WATER: usize = 8;

type Bucket = Arc<Mutex<Vec<Buffer>>>;

/// Free lists keyed by (allocator, power-of-two byte size). Buckets are
/// unbounded in number and individually serialized so workers on different
/// tensors never contend.
#[derive(Default)]
pub struct MemoryPool {
    buckets: RwLock<HashMap<(AllocatorTag, u32), Bucket>>,
}

fn bucket_exponent(byte_size: usize) -> u32 {
    byte_size.max(1).next_power_of_two().trailing_zeros()
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supports(&self, allocator: AllocatorTag) -> bool {
        matches!(allocator, AllocatorTag::Cpu | AllocatorTag::Pinned)
    }

    fn bucket(&self, allocator: AllocatorTag, exponent: u32) -> Bucket {
        if let Some(bucket) = self.buckets.read().unwrap().get(&(allocator, exponent)) {
            return bucket.clone();
        }
        let mut buckets = self.buckets.write().unwrap();
        buckets
            .entry((allocator, exponent))
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Vend a buffer whose capacity is at least `byte_size(tensor) *
    /// batch_size`, produced by the first allocator in `allowed` that the
    /// pool supports. Never blocks on a returned buffer: an empty free
    /// list allocates fresh.
    pub fn get(
        &self,
        allowed: &[AllocatorTag],
        tensor: &TensorDesc,
        batch_size: usize,
    ) -> Result<Buffer> {
        let allocator = allowed
            .iter()
            .copied()
            .find(|tag| self.supports(*tag))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "no supported allocator among {allowed:?} for tensor {}",
                    tensor.name
                ))
            })?;

        let byte_size = tensor.byte_size() * batch_size.max(1);
        let exponent = bucket_exponent(byte_size);
        let bucket = self.bucket(allocator, exponent);

        let reused = bucket.lock().unwrap().pop();
        let mut buffer = match reused {
            Some(buffer) => buffer,
            None => {
                METRICS.pool_allocations.inc();
                trace!(allocator = %allocator, bytes = 1usize << exponent, "pool allocating");
                Buffer::alloc(allocator, 1usize << exponent, tensor.datatype.size())?
            }
        };
        buffer.bind(tensor, batch_size);
        Ok(buffer)
    }

    /// Return a buffer to its free list. Contents are not inspected;
    /// beyond the per-bucket high-water mark the buffer is dropped.
    pub fn put(&self, buffer: Buffer) {
        let exponent = bucket_exponent(buffer.capacity());
        let bucket = self.bucket(buffer.allocator(), exponent);
        let mut free = bucket.lock().unwrap();
        if free.len() < BUCKET_HIGH_WATER {
            free.push(buffer);
        }
    }

    /// Number of buffers currently cached across all buckets.
    pub fn cached(&self) -> usize {
        self.buckets
            .read()
            .unwrap()
            .values()
            .map(|bucket| bucket.lock().unwrap().len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DataType;

    #[test]
    fn vended_buffer_fits_tensor_and_batch() {
        let pool = MemoryPool::new();
        let tensor = TensorDesc::new("input", &[3], DataType::Uint32);

        let buffer = pool.get(&[AllocatorTag::Cpu], &tensor, 4).unwrap();
        assert!(buffer.capacity() >= 48);
        assert_eq!(buffer.allocator(), AllocatorTag::Cpu);
    }

    #[test]
    fn returned_buffers_are_reused() {
        let pool = MemoryPool::new();
        let tensor = TensorDesc::new("input", &[1], DataType::Int32);

        let buffer = pool.get(&[AllocatorTag::Cpu], &tensor, 1).unwrap();
        pool.put(buffer);
        assert_eq!(pool.cached(), 1);

        let _again = pool.get(&[AllocatorTag::Cpu], &tensor, 1).unwrap();
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn first_supported_allocator_wins() {
        let pool = MemoryPool::new();
        let tensor = TensorDesc::new("input", &[1], DataType::Fp32);

        let buffer = pool
            .get(&[AllocatorTag::Pinned, AllocatorTag::Cpu], &tensor, 1)
            .unwrap();
        assert_eq!(buffer.allocator(), AllocatorTag::Pinned);
    }

    #[test]
    fn empty_allocator_set_is_invalid() {
        let pool = MemoryPool::new();
        let tensor = TensorDesc::new("input", &[1], DataType::Fp32);

        let err = pool.get(&[], &tensor, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn high_water_mark_bounds_bucket() {
        let pool = MemoryPool::new();
        let tensor = TensorDesc::new("input", &[1], DataType::Uint8);

        let buffers: Vec<_> = (0..12)
            .map(|_| pool.get(&[AllocatorTag::Cpu], &tensor, 1).unwrap())
            .collect();
        for buffer in buffers {
            pool.put(buffer);
        }
        assert_eq!(pool.cached(), BUCKET_HIGH_WATER);
    }
}
