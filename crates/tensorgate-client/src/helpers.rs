//! Convenience helpers layered over any [`Client`] implementation.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::debug;

use tensorgate_core::{Error, Result};
use tensorgate_runtime::{InferenceRequest, InferenceResponse};

use crate::client::Client;

/// Whether the server build advertises the named extension.
pub async fn server_has_extension(client: &dyn Client, extension: &str) -> Result<bool> {
    let metadata = client.server_metadata().await?;
    Ok(metadata.extensions.contains(extension))
}

/// Poll until the server reports ready. Connection errors are expected
/// while the server is still coming up and retry after one second.
pub async fn wait_until_server_ready(client: &dyn Client) -> Result<()> {
    loop {
        match client.server_ready().await {
            Ok(true) => return Ok(()),
            Ok(false) => tokio::task::yield_now().await,
            Err(err) if err.is_retryable() => {
                debug!(error = %err, "server not reachable yet");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Poll until the named model reports ready.
pub async fn wait_until_model_ready(client: &dyn Client, model: &str) -> Result<()> {
    loop {
        if client.model_ready(model).await? {
            return Ok(());
        }
        tokio::task::yield_now().await;
    }
}

async fn drain(
    queue: &mut VecDeque<tensorgate_runtime::InferenceResponseFuture>,
    responses: &mut Vec<InferenceResponse>,
) -> Result<()> {
    while let Some(future) = queue.pop_front() {
        let response = future
            .await
            .map_err(|_| Error::internal("request dropped before completion"))?;
        responses.push(response);
    }
    Ok(())
}

/// Submit every request asynchronously and resolve the responses in
/// submission order. Error responses appear in order alongside the
/// successful ones.
pub async fn infer_async_ordered(
    client: &dyn Client,
    model: &str,
    requests: Vec<InferenceRequest>,
) -> Result<Vec<InferenceResponse>> {
    let mut responses = Vec::with_capacity(requests.len());
    let mut queue = VecDeque::with_capacity(requests.len());
    for request in requests {
        queue.push_back(client.model_infer_async(model, request).await?);
    }
    drain(&mut queue, &mut responses).await?;
    Ok(responses)
}

/// Like [`infer_async_ordered`], but submitting at most `batch_size`
/// requests before collecting them, bounding the number of outstanding
/// futures. Every full round submits exactly `batch_size` requests; the
/// final round takes whatever remains.
pub async fn infer_async_ordered_batched(
    client: &dyn Client,
    model: &str,
    requests: Vec<InferenceRequest>,
    batch_size: usize,
) -> Result<Vec<InferenceResponse>> {
    let batch_size = batch_size.max(1);
    let mut responses = Vec::with_capacity(requests.len());
    let mut requests = requests.into_iter();

    loop {
        let mut queue = VecDeque::with_capacity(batch_size);
        for request in requests.by_ref().take(batch_size) {
            queue.push_back(client.model_infer_async(model, request).await?);
        }
        if queue.is_empty() {
            return Ok(responses);
        }
        drain(&mut queue, &mut responses).await?;
    }
}
