//! Buffers back the tensor data of in-flight batches. A buffer is tagged
//! with the allocator that produced it and is owned by exactly one holder
//! at a time: either the memory pool's free list or an active batch.

use smallvec::SmallVec;

use crate::dtype::ScalarCodec;
use crate::error::{Error, Result};
use crate::tensor::TensorDesc;

/// Memory domains a buffer can live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocatorTag {
    Cpu,
    Pinned,
}

impl std::fmt::Display for AllocatorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocatorTag::Cpu => f.write_str("cpu"),
            AllocatorTag::Pinned => f.write_str("pinned"),
        }
    }
}

fn alloc_bytes(capacity: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| Error::runtime(format!("allocation of {capacity} bytes failed")))?;
    data.resize(capacity, 0);
    Ok(data)
}

/// Plain contiguous host memory.
#[derive(Debug)]
pub struct CpuBuffer {
    data: Vec<u8>,
}

/// Host memory addressed the way a device tensor is: a logical element
/// offset is first decomposed into coordinates of the bound shape and only
/// then mapped to an address. Kept contiguous here; the decomposition is
/// what device allocators key on.
#[derive(Debug)]
pub struct PinnedBuffer {
    data: Vec<u8>,
    layout: SmallVec<[u64; 6]>,
}

impl PinnedBuffer {
    /// Translate a flat element offset through the bound shape: offset ->
    /// coordinates -> linear index. With no layout bound the offset passes
    /// through unchanged.
    fn translate(&self, mut offset: usize) -> usize {
        if self.layout.is_empty() {
            return offset;
        }
        let dims = &self.layout;
        let mut index = 0usize;
        let mut stride: usize = dims.iter().map(|d| *d as usize).product();
        for dim in dims.iter() {
            stride /= (*dim as usize).max(1);
            let coord = offset / stride.max(1);
            offset -= coord * stride;
            index = index * (*dim as usize).max(1) + coord;
        }
        index
    }
}

/// A typed region of memory tagged with its allocator. `elem_width` and the
/// write cursor are rebound every time the pool hands the buffer out.
#[derive(Debug)]
pub struct Buffer {
    payload: Payload,
    elem_width: usize,
    cursor: usize,
}

#[derive(Debug)]
enum Payload {
    Cpu(CpuBuffer),
    Pinned(PinnedBuffer),
}

impl Buffer {
    pub fn alloc(allocator: AllocatorTag, capacity: usize, elem_width: usize) -> Result<Self> {
        let data = alloc_bytes(capacity)?;
        let payload = match allocator {
            AllocatorTag::Cpu => Payload::Cpu(CpuBuffer { data }),
            AllocatorTag::Pinned => Payload::Pinned(PinnedBuffer {
                data,
                layout: SmallVec::new(),
            }),
        };
        Ok(Self {
            payload,
            elem_width: elem_width.max(1),
            cursor: 0,
        })
    }

    pub fn allocator(&self) -> AllocatorTag {
        match &self.payload {
            Payload::Cpu(_) => AllocatorTag::Cpu,
            Payload::Pinned(_) => AllocatorTag::Pinned,
        }
    }

    pub fn capacity(&self) -> usize {
        match &self.payload {
            Payload::Cpu(b) => b.data.len(),
            Payload::Pinned(b) => b.data.len(),
        }
    }

    /// Rebind the buffer for a (tensor, batch) pair: element width for
    /// offset arithmetic, the batched shape for strided translation, and a
    /// rewound cursor.
    pub fn bind(&mut self, tensor: &TensorDesc, batch_size: usize) {
        self.elem_width = tensor.datatype.size().max(1);
        self.cursor = 0;
        if let Payload::Pinned(b) = &mut self.payload {
            b.layout.clear();
            b.layout.push(batch_size as u64);
            b.layout.extend(tensor.shape.dims().iter().copied());
        }
    }

    fn byte_offset(&self, elem_offset: usize) -> usize {
        match &self.payload {
            Payload::Cpu(_) => elem_offset * self.elem_width,
            Payload::Pinned(b) => b.translate(elem_offset) * self.elem_width,
        }
    }

    /// Read access at a flat element offset.
    pub fn data(&self, elem_offset: usize) -> &[u8] {
        let start = self.byte_offset(elem_offset);
        match &self.payload {
            Payload::Cpu(b) => &b.data[start..],
            Payload::Pinned(b) => &b.data[start..],
        }
    }

    /// Write access at a flat element offset.
    pub fn data_mut(&mut self, elem_offset: usize) -> &mut [u8] {
        let start = self.byte_offset(elem_offset);
        match &mut self.payload {
            Payload::Cpu(b) => &mut b.data[start..],
            Payload::Pinned(b) => &mut b.data[start..],
        }
    }

    /// Copy raw bytes into the buffer starting at an element offset.
    pub fn write_bytes(&mut self, elem_offset: usize, src: &[u8]) -> Result<()> {
        let start = self.byte_offset(elem_offset);
        let end = start
            .checked_add(src.len())
            .ok_or_else(|| Error::invalid_argument("buffer write overflows"))?;
        if end > self.capacity() {
            return Err(Error::invalid_argument(format!(
                "write of {} bytes at element {} exceeds buffer capacity {}",
                src.len(),
                elem_offset,
                self.capacity()
            )));
        }
        self.data_mut(elem_offset)[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Write one scalar at the internal cursor and advance it. Returns the
    /// cursor position after the write.
    pub fn write<T: ScalarCodec>(&mut self, value: T) -> Result<usize> {
        let start = self.cursor;
        let end = start + T::WIDTH;
        if end > self.capacity() {
            return Err(Error::invalid_argument("typed write exceeds buffer capacity"));
        }
        let dst = match &mut self.payload {
            Payload::Cpu(b) => &mut b.data[start..end],
            Payload::Pinned(b) => &mut b.data[start..end],
        };
        T::encode(std::slice::from_ref(&value), dst);
        self.cursor = end;
        Ok(end)
    }

    /// Write a null-terminated string at the cursor.
    pub fn write_str(&mut self, value: &str) -> Result<usize> {
        let start = self.cursor;
        let end = start + value.len() + 1;
        if end > self.capacity() {
            return Err(Error::invalid_argument("string write exceeds buffer capacity"));
        }
        let dst = match &mut self.payload {
            Payload::Cpu(b) => &mut b.data[start..end],
            Payload::Pinned(b) => &mut b.data[start..end],
        };
        dst[..value.len()].copy_from_slice(value.as_bytes());
        dst[value.len()] = 0;
        self.cursor = end;
        Ok(end)
    }

    pub fn seek(&mut self, byte_pos: usize) {
        self.cursor = byte_pos.min(self.capacity());
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DataType;

    #[test]
    fn typed_writes_advance_cursor() {
        let mut buffer = Buffer::alloc(AllocatorTag::Cpu, 16, 4).unwrap();
        assert_eq!(buffer.write(7u32).unwrap(), 4);
        assert_eq!(buffer.write(8u32).unwrap(), 8);

        let mut values = [0u32; 2];
        u32::decode(&buffer.data(0)[..8], &mut values);
        assert_eq!(values, [7, 8]);
    }

    #[test]
    fn write_at_element_offset() {
        let tensor = TensorDesc::new("t", &[2], DataType::Uint32);
        let mut buffer = Buffer::alloc(AllocatorTag::Cpu, 32, 1).unwrap();
        buffer.bind(&tensor, 4);

        // slot 1 of a [4, 2] u32 buffer starts at element 2
        buffer.write_bytes(2, &5u32.to_le_bytes()).unwrap();
        assert_eq!(&buffer.data(2)[..4], &5u32.to_le_bytes());
        assert_eq!(&buffer.data(0)[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn strided_translation_is_consistent() {
        let tensor = TensorDesc::new("t", &[2, 3], DataType::Uint8);
        let mut buffer = Buffer::alloc(AllocatorTag::Pinned, 32, 1).unwrap();
        buffer.bind(&tensor, 4);

        // with a dense layout, decompose/recompose round-trips every offset
        for offset in 0..24 {
            buffer.write_bytes(offset, &[offset as u8]).unwrap();
        }
        for offset in 0..24 {
            assert_eq!(buffer.data(offset)[0], offset as u8);
        }
    }

    #[test]
    fn overflowing_write_is_rejected() {
        let mut buffer = Buffer::alloc(AllocatorTag::Cpu, 4, 1).unwrap();
        assert!(buffer.write_bytes(0, &[0u8; 8]).is_err());
        buffer.seek(2);
        assert!(buffer.write(1u32).is_err());
    }

    #[test]
    fn string_writes_are_null_terminated() {
        let mut buffer = Buffer::alloc(AllocatorTag::Cpu, 16, 1).unwrap();
        let end = buffer.write_str("abc").unwrap();
        assert_eq!(end, 4);
        assert_eq!(&buffer.data(0)[..4], b"abc\0");
    }
}
