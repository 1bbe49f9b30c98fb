//! The echo kernel accepts a single uint32 value and returns it plus one.

use bytes::Bytes;
use tracing::debug;

use tensorgate_core::{AllocatorTag, DataType, ParameterMap, Result, ScalarCodec, TensorDesc};
use tensorgate_runtime::{Batch, BatcherKind, Kernel, KernelSpec, ResponseOutput};

#[derive(Default, Debug)]
pub struct EchoKernel;

impl Kernel for EchoKernel {
    fn init(&mut self, _params: &ParameterMap) -> Result<()> {
        Ok(())
    }

    fn acquire(&mut self, _params: &ParameterMap) -> Result<KernelSpec> {
        Ok(KernelSpec {
            inputs: vec![TensorDesc::new("input", &[1], DataType::Uint32)],
            outputs: vec![TensorDesc::new("output", &[1], DataType::Uint32)],
            allocators: vec![AllocatorTag::Cpu],
            batcher: BatcherKind::Hard,
        })
    }

    fn execute(&mut self, batch: &mut Batch) -> Vec<Result<Vec<ResponseOutput>>> {
        debug!(size = batch.size(), "echo got batch");
        let mut results = Vec::with_capacity(batch.size());
        for slot in 0..batch.size() {
            let mut value = [0u32; 1];
            u32::decode(&batch.input_buffer(0).data(slot)[..4], &mut value);
            let answer = value[0].wrapping_add(1);

            let request = batch.request(slot);
            let name = request
                .outputs
                .first()
                .map(|output| output.name.clone())
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| request.inputs[0].name.clone());

            let result = batch
                .output_buffer_mut(0)
                .write_bytes(slot, &answer.to_le_bytes())
                .map(|_| {
                    vec![ResponseOutput {
                        name,
                        shape: tensorgate_core::Shape::from_slice(&[1]),
                        datatype: DataType::Uint32,
                        parameters: ParameterMap::new(),
                        data: Bytes::copy_from_slice(&answer.to_le_bytes()),
                    }]
                });
            results.push(result);
        }
        results
    }
}
