//! The echo_multi kernel demonstrates tensors of differing shapes: it
//! gathers every input value of a request and distributes them round-robin
//! over three fixed-length outputs.

use bytes::Bytes;

use tensorgate_core::{AllocatorTag, DataType, ParameterMap, Result, ScalarCodec, Shape, TensorDesc};
use tensorgate_runtime::{Batch, BatcherKind, Kernel, KernelSpec, ResponseOutput};

const INPUT_LENGTHS: [u64; 2] = [1, 2];
const OUTPUT_LENGTHS: [u64; 3] = [1, 4, 3];

#[derive(Default, Debug)]
pub struct EchoMultiKernel;

impl Kernel for EchoMultiKernel {
    fn init(&mut self, _params: &ParameterMap) -> Result<()> {
        Ok(())
    }

    fn acquire(&mut self, _params: &ParameterMap) -> Result<KernelSpec> {
        let inputs = INPUT_LENGTHS
            .iter()
            .enumerate()
            .map(|(i, len)| TensorDesc::new(format!("input{i}"), &[*len], DataType::Uint32))
            .collect();
        let outputs = OUTPUT_LENGTHS
            .iter()
            .enumerate()
            .map(|(i, len)| TensorDesc::new(format!("output{i}"), &[*len], DataType::Uint32))
            .collect();
        Ok(KernelSpec {
            inputs,
            outputs,
            allocators: vec![AllocatorTag::Cpu],
            batcher: BatcherKind::Timeout,
        })
    }

    fn execute(&mut self, batch: &mut Batch) -> Vec<Result<Vec<ResponseOutput>>> {
        let mut results = Vec::with_capacity(batch.size());
        for slot in 0..batch.size() {
            // gather this request's values across all of its input tensors
            let mut args = Vec::new();
            for (index, declared_len) in INPUT_LENGTHS.iter().enumerate() {
                let actual = batch.request(slot).inputs[index].num_elements() as usize;
                let offset = slot * *declared_len as usize;
                let raw = &batch.input_buffer(index).data(offset)[..actual * 4];
                let mut values = vec![0u32; actual];
                u32::decode(raw, &mut values);
                args.extend(values);
            }
            if args.is_empty() {
                results.push(Err(tensorgate_core::Error::invalid_argument(
                    "request carries no input values",
                )));
                continue;
            }

            // one cursor cycles over the gathered values across every output
            let mut cursor = 0usize;
            let mut outputs = Vec::with_capacity(OUTPUT_LENGTHS.len());
            let mut failed = None;
            for (index, len) in OUTPUT_LENGTHS.iter().enumerate() {
                let len = *len as usize;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(args[cursor % args.len()]);
                    cursor += 1;
                }
                let mut raw = vec![0u8; len * 4];
                u32::encode(&values, &mut raw);

                let offset = slot * len;
                if let Err(err) = batch.output_buffer_mut(index).write_bytes(offset, &raw) {
                    failed = Some(err);
                    break;
                }
                outputs.push(ResponseOutput {
                    name: format!("output{index}"),
                    shape: Shape::from_slice(&[len as u64]),
                    datatype: DataType::Uint32,
                    parameters: ParameterMap::new(),
                    data: Bytes::from(raw),
                });
            }
            results.push(match failed {
                Some(err) => Err(err),
                None => Ok(outputs),
            });
        }
        results
    }
}
