//! The invert_image kernel flips every byte of an 8-bit image, up to a
//! fixed per-request capacity.

use bytes::Bytes;

use tensorgate_core::{AllocatorTag, DataType, ParameterMap, Result, TensorDesc};
use tensorgate_runtime::{Batch, BatcherKind, Kernel, KernelSpec, ResponseOutput};

/// Enough for a 1080p RGB frame.
const MAX_PIXEL_BYTES: u64 = 1920 * 1080 * 3;

#[derive(Default, Debug)]
pub struct InvertImageKernel;

impl Kernel for InvertImageKernel {
    fn init(&mut self, _params: &ParameterMap) -> Result<()> {
        Ok(())
    }

    fn acquire(&mut self, _params: &ParameterMap) -> Result<KernelSpec> {
        Ok(KernelSpec {
            inputs: vec![TensorDesc::new("image", &[MAX_PIXEL_BYTES], DataType::Uint8)],
            outputs: vec![TensorDesc::new("image", &[MAX_PIXEL_BYTES], DataType::Uint8)],
            allocators: vec![AllocatorTag::Cpu],
            batcher: BatcherKind::Timeout,
        })
    }

    fn execute(&mut self, batch: &mut Batch) -> Vec<Result<Vec<ResponseOutput>>> {
        let mut results = Vec::with_capacity(batch.size());
        for slot in 0..batch.size() {
            let request = batch.request(slot);
            let pixels = request.inputs[0].num_elements() as usize;
            let shape = request.inputs[0].shape.clone();

            let offset = slot * MAX_PIXEL_BYTES as usize;
            let inverted: Vec<u8> = batch.input_buffer(0).data(offset)[..pixels]
                .iter()
                .map(|byte| 255 - byte)
                .collect();

            let result = batch
                .output_buffer_mut(0)
                .write_bytes(offset, &inverted)
                .map(|_| {
                    vec![ResponseOutput {
                        name: "image".to_string(),
                        shape,
                        datatype: DataType::Uint8,
                        parameters: ParameterMap::new(),
                        data: Bytes::from(inverted),
                    }]
                });
            results.push(result);
        }
        results
    }
}
