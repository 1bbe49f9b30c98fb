//! The in-process client: a thin veneer over the dispatch facade, used by
//! embedding applications and the test suite.

use std::sync::Arc;

use async_trait::async_trait;

use tensorgate_core::{Error, ParameterMap, Result};
use tensorgate_runtime::{
    InferenceRequest, InferenceResponse, InferenceResponseFuture, ModelMetadata, ServerMetadata,
    SharedState,
};

use crate::client::Client;

#[derive(Clone)]
pub struct NativeClient {
    state: Arc<SharedState>,
}

impl NativeClient {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }
}

#[async_trait]
impl Client for NativeClient {
    async fn server_metadata(&self) -> Result<ServerMetadata> {
        Ok(self.state.server_metadata())
    }

    async fn server_live(&self) -> Result<bool> {
        Ok(self.state.server_live())
    }

    async fn server_ready(&self) -> Result<bool> {
        Ok(self.state.server_ready())
    }

    async fn model_ready(&self, model: &str) -> Result<bool> {
        Ok(self.state.model_ready(model))
    }

    async fn model_metadata(&self, model: &str) -> Result<ModelMetadata> {
        self.state.model_metadata(model)
    }

    async fn model_list(&self) -> Result<Vec<String>> {
        Ok(self.state.model_list())
    }

    async fn model_load(&self, model: &str, parameters: &ParameterMap) -> Result<()> {
        self.state.model_load(model, parameters).await
    }

    async fn model_unload(&self, model: &str) -> Result<()> {
        self.state.model_unload(model).await
    }

    async fn worker_load(&self, worker: &str, parameters: &ParameterMap) -> Result<String> {
        self.state.worker_load(worker, parameters).await
    }

    async fn worker_unload(&self, worker: &str) -> Result<()> {
        self.state.worker_unload(worker).await
    }

    async fn model_infer(
        &self,
        model: &str,
        request: InferenceRequest,
    ) -> Result<InferenceResponse> {
        let future = self.state.model_infer(model, request).await?;
        future
            .await
            .map_err(|_| Error::internal("request dropped before completion"))
    }

    async fn model_infer_async(
        &self,
        model: &str,
        request: InferenceRequest,
    ) -> Result<InferenceResponseFuture> {
        self.state.model_infer(model, request).await
    }

    async fn has_hardware(&self, name: &str, num: i32) -> Result<bool> {
        Ok(self.state.has_hardware(name, num))
    }
}
