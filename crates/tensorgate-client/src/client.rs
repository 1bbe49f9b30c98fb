use async_trait::async_trait;

use tensorgate_core::{ParameterMap, Result};
use tensorgate_runtime::{
    InferenceRequest, InferenceResponse, InferenceResponseFuture, ModelMetadata, ServerMetadata,
};

/// The operations every client implementation provides. The surface
/// follows the KServe API with the tensorgate extensions.
#[async_trait]
pub trait Client: Send + Sync {
    async fn server_metadata(&self) -> Result<ServerMetadata>;

    async fn server_live(&self) -> Result<bool>;

    async fn server_ready(&self) -> Result<bool>;

    async fn model_ready(&self, model: &str) -> Result<bool>;

    async fn model_metadata(&self, model: &str) -> Result<ModelMetadata>;

    async fn model_list(&self) -> Result<Vec<String>>;

    /// Load a model whose directory exists in the server's repository.
    async fn model_load(&self, model: &str, parameters: &ParameterMap) -> Result<()>;

    async fn model_unload(&self, model: &str) -> Result<()>;

    /// Load a worker directly from parameters; returns the endpoint name.
    async fn worker_load(&self, worker: &str, parameters: &ParameterMap) -> Result<String>;

    async fn worker_unload(&self, worker: &str) -> Result<()>;

    /// Synchronous inference: submit and wait for the response.
    async fn model_infer(&self, model: &str, request: InferenceRequest)
        -> Result<InferenceResponse>;

    /// Asynchronous inference: submit and hold the future for later.
    async fn model_infer_async(
        &self,
        model: &str,
        request: InferenceRequest,
    ) -> Result<InferenceResponseFuture>;

    async fn has_hardware(&self, name: &str, num: i32) -> Result<bool>;
}
