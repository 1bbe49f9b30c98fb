//! The canonical end-to-end scenarios, driven through the in-process
//! client against the demonstration kernels.

use std::sync::Arc;

use bytes::Bytes;

use tensorgate_client::{
    infer_async_ordered, infer_async_ordered_batched, server_has_extension,
    wait_until_model_ready, wait_until_server_ready, Client, NativeClient,
};
use tensorgate_core::{DataType, Error, MemoryPool, ParameterMap, ScalarCodec};
use tensorgate_runtime::{InferenceRequest, InferenceRequestInput, SharedState};

fn client() -> NativeClient {
    let state = Arc::new(SharedState::new(
        tensorgate_workers::default_registry(),
        Arc::new(MemoryPool::new()),
        ["grpc".to_string(), "metrics".to_string(), "logging".to_string()],
    ));
    NativeClient::new(state)
}

fn uint32_request(id: &str, values: &[u32]) -> InferenceRequest {
    let mut raw = vec![0u8; values.len() * 4];
    u32::encode(values, &mut raw);
    InferenceRequest::new(id).add_input(InferenceRequestInput::new(
        "input",
        &[values.len() as u64],
        DataType::Uint32,
        Bytes::from(raw),
    ))
}

fn decode_u32(data: &Bytes) -> Vec<u32> {
    let mut values = vec![0u32; data.len() / 4];
    u32::decode(data, &mut values);
    values
}

#[tokio::test]
async fn echo_round_trip() {
    let client = client();
    wait_until_server_ready(&client).await.unwrap();

    let endpoint = client
        .worker_load("echo", &ParameterMap::new())
        .await
        .unwrap();
    assert_eq!(endpoint, "echo");
    wait_until_model_ready(&client, "echo").await.unwrap();

    let response = client
        .model_infer("echo", uint32_request("1", &[7]))
        .await
        .unwrap();
    assert!(!response.is_error());
    assert_eq!(decode_u32(&response.outputs[0].data), vec![8]);

    client.model_unload("echo").await.unwrap();
    assert!(client.model_list().await.unwrap().is_empty());
}

#[tokio::test]
async fn loading_two_models_lists_both() {
    let client = client();

    client
        .worker_load("echo", &ParameterMap::new())
        .await
        .unwrap();
    client
        .worker_load("invert_image", &ParameterMap::new())
        .await
        .unwrap();

    let models = client.model_list().await.unwrap();
    assert_eq!(models, vec!["echo".to_string(), "invert_image".to_string()]);
    for model in &models {
        assert!(client.model_ready(model).await.unwrap());
    }

    client.model_unload("echo").await.unwrap();
    client.model_unload("invert_image").await.unwrap();
    assert!(client.model_list().await.unwrap().is_empty());
}

#[tokio::test]
async fn inferring_unknown_model_is_not_found() {
    let client = client();
    let err = client
        .model_infer("does_not_exist", uint32_request("1", &[7]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn empty_inputs_are_invalid() {
    let client = client();
    client
        .worker_load("echo", &ParameterMap::new())
        .await
        .unwrap();

    let err = client
        .model_infer("echo", InferenceRequest::new("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn echo_multi_round_robins_values() {
    let client = client();
    client
        .worker_load("echo_multi", &ParameterMap::new())
        .await
        .unwrap();

    let mut first = vec![0u8; 4];
    u32::encode(&[1], &mut first);
    let mut second = vec![0u8; 8];
    u32::encode(&[2, 3], &mut second);
    let request = InferenceRequest::new("1")
        .add_input(InferenceRequestInput::new(
            "input0",
            &[1],
            DataType::Uint32,
            Bytes::from(first),
        ))
        .add_input(InferenceRequestInput::new(
            "input1",
            &[2],
            DataType::Uint32,
            Bytes::from(second),
        ));

    let response = client.model_infer("echo_multi", request).await.unwrap();
    assert!(!response.is_error());
    assert_eq!(response.outputs.len(), 3);
    assert_eq!(decode_u32(&response.outputs[0].data), vec![1]);
    assert_eq!(decode_u32(&response.outputs[1].data), vec![2, 3, 1, 2]);
    assert_eq!(decode_u32(&response.outputs[2].data), vec![3, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_loads_share_the_endpoint() {
    let client = client();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.worker_load("echo", &ParameterMap::new()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "echo");
    }
    assert_eq!(client.state().endpoints().ref_count("echo"), 4);

    for _ in 0..4 {
        client.model_unload("echo").await.unwrap();
    }
    assert!(client.model_list().await.unwrap().is_empty());
}

#[tokio::test]
async fn ordered_inference_preserves_submission_order() {
    let client = client();
    client
        .worker_load("echo", &ParameterMap::new())
        .await
        .unwrap();

    let requests: Vec<_> = (0..8u32)
        .map(|i| uint32_request(&i.to_string(), &[i * 3]))
        .collect();
    let responses = infer_async_ordered(&client, "echo", requests).await.unwrap();

    assert_eq!(responses.len(), 8);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(decode_u32(&response.outputs[0].data), vec![i as u32 * 3 + 1]);
    }
}

#[tokio::test]
async fn ordered_inference_intermixes_error_responses() {
    let client = client();
    client
        .worker_load("echo", &ParameterMap::new())
        .await
        .unwrap();

    // the middle request exceeds the declared single-element capacity
    let requests = vec![
        uint32_request("0", &[10]),
        uint32_request("1", &[20, 21, 22]),
        uint32_request("2", &[30]),
    ];
    let responses = infer_async_ordered(&client, "echo", requests).await.unwrap();

    assert_eq!(responses.len(), 3);
    assert_eq!(decode_u32(&responses[0].outputs[0].data), vec![11]);
    assert!(responses[1].is_error());
    assert_eq!(decode_u32(&responses[2].outputs[0].data), vec![31]);
}

#[tokio::test]
async fn batched_ordered_inference_submits_every_request() {
    let client = client();
    client
        .worker_load("echo", &ParameterMap::new())
        .await
        .unwrap();

    // 10 requests in rounds of 4: two full rounds and a remainder of 2
    let requests: Vec<_> = (0..10u32)
        .map(|i| uint32_request(&i.to_string(), &[i]))
        .collect();
    let responses = infer_async_ordered_batched(&client, "echo", requests, 4)
        .await
        .unwrap();

    assert_eq!(responses.len(), 10);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(decode_u32(&response.outputs[0].data), vec![i as u32 + 1]);
    }
}

#[tokio::test]
async fn invert_image_flips_bytes() {
    let client = client();
    client
        .worker_load("invert_image", &ParameterMap::new())
        .await
        .unwrap();

    let pixels = Bytes::from_static(&[0u8, 1, 127, 254, 255]);
    let request = InferenceRequest::new("1").add_input(InferenceRequestInput::new(
        "image",
        &[5],
        DataType::Uint8,
        pixels,
    ));

    let response = client.model_infer("invert_image", request).await.unwrap();
    assert!(!response.is_error());
    assert_eq!(&response.outputs[0].data[..], &[255u8, 254, 128, 1, 0]);
}

#[tokio::test]
async fn server_metadata_lists_extensions() {
    let client = client();
    assert!(client.server_live().await.unwrap());
    assert!(server_has_extension(&client, "metrics").await.unwrap());
    assert!(!server_has_extension(&client, "quantum").await.unwrap());

    let metadata = client.server_metadata().await.unwrap();
    assert_eq!(metadata.name, "tensorgate");
    assert!(!metadata.version.is_empty());
}

#[tokio::test]
async fn hardware_probe_reports_cpu_only() {
    let client = client();
    assert!(client.has_hardware("cpu", 1).await.unwrap());
    assert!(!client.has_hardware("fpga", 1).await.unwrap());
}
