//! Kernel-level tests: drive execute() directly against hand-built
//! batches, the way the batcher would lay them out.

use std::time::Instant;

use bytes::Bytes;

use tensorgate_core::{DataType, MemoryPool, ParameterMap, ScalarCodec};
use tensorgate_runtime::{Batch, InferenceRequest, InferenceRequestInput, Kernel, KernelSpec};
use tensorgate_workers::{EchoKernel, EchoMultiKernel, InvertImageKernel};

/// Lay a batch out the way the batcher does: one pooled buffer per
/// declared tensor, request data written at its slot offset.
fn build_batch(spec: &KernelSpec, pool: &MemoryPool, requests: Vec<InferenceRequest>) -> Batch {
    let batch_size = requests.len();
    let inputs = spec
        .inputs
        .iter()
        .map(|tensor| pool.get(&spec.allocators, tensor, batch_size).unwrap())
        .collect();
    let outputs = spec
        .outputs
        .iter()
        .map(|tensor| pool.get(&spec.allocators, tensor, batch_size).unwrap())
        .collect();

    let mut batch = Batch::new("test", inputs, outputs);
    for request in requests {
        let slot = batch.size();
        for (index, input) in request.inputs.iter().enumerate() {
            let offset = slot * spec.inputs[index].num_elements() as usize;
            batch
                .input_buffer_mut(index)
                .write_bytes(offset, &input.data)
                .unwrap();
        }
        batch.add_request(request, tracing::Span::none(), Instant::now());
    }
    batch
}

fn uint32_input(name: &str, values: &[u32]) -> InferenceRequestInput {
    let mut raw = vec![0u8; values.len() * 4];
    u32::encode(values, &mut raw);
    InferenceRequestInput::new(name, &[values.len() as u64], DataType::Uint32, Bytes::from(raw))
}

fn decode_u32(data: &Bytes) -> Vec<u32> {
    let mut values = vec![0u32; data.len() / 4];
    u32::decode(data, &mut values);
    values
}

#[test]
fn echo_adds_one_per_slot() {
    let pool = MemoryPool::new();
    let mut kernel = EchoKernel::default();
    kernel.init(&ParameterMap::new()).unwrap();
    let spec = kernel.acquire(&ParameterMap::new()).unwrap();

    let requests = vec![
        InferenceRequest::new("0").add_input(uint32_input("input", &[7])),
        InferenceRequest::new("1").add_input(uint32_input("input", &[41])),
    ];
    let mut batch = build_batch(&spec, &pool, requests);

    let results = kernel.execute(&mut batch);
    assert_eq!(results.len(), 2);
    let first = results[0].as_ref().unwrap();
    assert_eq!(decode_u32(&first[0].data), vec![8]);
    let second = results[1].as_ref().unwrap();
    assert_eq!(decode_u32(&second[0].data), vec![42]);
}

#[test]
fn echo_multi_round_robins_across_outputs() {
    let pool = MemoryPool::new();
    let mut kernel = EchoMultiKernel::default();
    kernel.init(&ParameterMap::new()).unwrap();
    let spec = kernel.acquire(&ParameterMap::new()).unwrap();
    assert_eq!(spec.inputs.len(), 2);
    assert_eq!(spec.outputs.len(), 3);

    let request = InferenceRequest::new("0")
        .add_input(uint32_input("input0", &[1]))
        .add_input(uint32_input("input1", &[2, 3]));
    let mut batch = build_batch(&spec, &pool, vec![request]);

    let results = kernel.execute(&mut batch);
    let outputs = results[0].as_ref().unwrap();
    assert_eq!(decode_u32(&outputs[0].data), vec![1]);
    assert_eq!(decode_u32(&outputs[1].data), vec![2, 3, 1, 2]);
    assert_eq!(decode_u32(&outputs[2].data), vec![3, 1, 2]);
}

#[test]
fn invert_image_flips_every_byte() {
    let pool = MemoryPool::new();
    let mut kernel = InvertImageKernel::default();
    kernel.init(&ParameterMap::new()).unwrap();
    let spec = kernel.acquire(&ParameterMap::new()).unwrap();

    let pixels: Vec<u8> = vec![0, 64, 255];
    let request = InferenceRequest::new("0").add_input(InferenceRequestInput::new(
        "image",
        &[pixels.len() as u64],
        DataType::Uint8,
        Bytes::from(pixels),
    ));
    let mut batch = build_batch(&spec, &pool, vec![request]);

    let results = kernel.execute(&mut batch);
    let outputs = results[0].as_ref().unwrap();
    assert_eq!(&outputs[0].data[..], &[255u8, 191, 0]);
}
