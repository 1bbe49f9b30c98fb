use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::warn;

use tensorgate_core::metrics::METRICS;
use tensorgate_core::{DataType, ParameterMap, Shape};

/// One named input tensor of a request. `data` points into the client's
/// payload until the batcher lays it into a pooled buffer.
#[derive(Clone, Debug)]
pub struct InferenceRequestInput {
    pub name: String,
    pub shape: Shape,
    pub datatype: DataType,
    pub parameters: ParameterMap,
    pub data: Bytes,
}

impl InferenceRequestInput {
    pub fn new(name: impl Into<String>, dims: &[u64], datatype: DataType, data: Bytes) -> Self {
        Self {
            name: name.into(),
            shape: Shape::from_slice(dims),
            datatype,
            parameters: ParameterMap::new(),
            data,
        }
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.num_elements()
    }
}

/// An output the client asked for by name.
#[derive(Clone, Debug, Default)]
pub struct InferenceRequestOutput {
    pub name: String,
    pub parameters: ParameterMap,
    pub data: Option<Bytes>,
}

impl InferenceRequestOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One output tensor of a response.
#[derive(Clone, Debug)]
pub struct ResponseOutput {
    pub name: String,
    pub shape: Shape,
    pub datatype: DataType,
    pub parameters: ParameterMap,
    pub data: Bytes,
}

#[derive(Clone, Debug)]
pub struct InferenceResponse {
    pub id: String,
    pub model: String,
    pub outputs: Vec<ResponseOutput>,
    /// Non-empty on per-request failure.
    pub error: Option<String>,
}

impl InferenceResponse {
    pub fn ok(id: impl Into<String>, model: impl Into<String>, outputs: Vec<ResponseOutput>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            outputs,
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            outputs: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().map(|e| !e.is_empty()).unwrap_or(false)
    }
}

/// The receiving half of a request's completion channel.
pub type InferenceResponseFuture = oneshot::Receiver<InferenceResponse>;

/// One-shot completion channel from a request back to the caller that
/// submitted it. Completion consumes the sender, so a response can be
/// delivered at most once; dropping an armed callback without completing
/// is reported by the receiver as a closed channel.
#[derive(Debug, Default)]
pub struct Callback {
    tx: Option<oneshot::Sender<InferenceResponse>>,
}

impl Callback {
    /// A callback with nothing listening. Useful for requests built before
    /// submission; the dispatch facade arms the real channel.
    pub fn unarmed() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.tx.is_some()
    }

    /// Deliver the response. Returns false if the callback already fired
    /// or the receiver went away.
    pub fn complete(&mut self, response: InferenceResponse) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

/// Create a callback/future pair.
pub fn response_channel() -> (Callback, InferenceResponseFuture) {
    let (tx, rx) = oneshot::channel();
    (Callback { tx: Some(tx) }, rx)
}

/// The unit of work a client submits: inputs, requested outputs,
/// parameters, an id and the completion callback.
#[derive(Debug, Default)]
pub struct InferenceRequest {
    pub id: String,
    pub parameters: ParameterMap,
    pub inputs: Vec<InferenceRequestInput>,
    pub outputs: Vec<InferenceRequestOutput>,
    pub callback: Callback,
}

impl InferenceRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn add_input(mut self, input: InferenceRequestInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn add_requested_output(mut self, output: InferenceRequestOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Fire the callback with a successful response.
    pub fn complete(&mut self, response: InferenceResponse) {
        if !self.callback.complete(response) {
            warn!(id = %self.id, "completion dropped: callback already fired or caller gone");
        }
    }

    /// Fire the callback with an error response.
    pub fn complete_error(&mut self, model: &str, message: impl Into<String>) {
        METRICS.requests_failed.inc();
        let response = InferenceResponse::error(self.id.clone(), model, message);
        if !self.callback.complete(response) {
            warn!(id = %self.id, "error completion dropped: callback already fired or caller gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callback_fires_exactly_once() {
        let (mut callback, future) = response_channel();
        assert!(callback.is_armed());
        assert!(callback.complete(InferenceResponse::ok("1", "echo", Vec::new())));
        assert!(!callback.complete(InferenceResponse::ok("1", "echo", Vec::new())));

        let response = future.await.unwrap();
        assert_eq!(response.id, "1");
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn error_completion_reaches_future() {
        let (callback, future) = response_channel();
        let mut request = InferenceRequest::new("7");
        request.callback = callback;
        request.complete_error("echo", "bad shape");

        let response = future.await.unwrap();
        assert!(response.is_error());
        assert_eq!(response.error.as_deref(), Some("bad shape"));
    }
}
