//! gRPC client over the KServe inference service.

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::{Code, Status};

use tensorgate_core::{Error, ParameterMap, Result};
use tensorgate_proto::tensorgate::v1 as pb;
use tensorgate_runtime::{
    response_channel, InferenceRequest, InferenceResponse, InferenceResponseFuture, ModelMetadata,
    ServerMetadata,
};

use crate::client::Client;
use crate::grpc_internal;

type RawClient = pb::inference_service_client::InferenceServiceClient<Channel>;

#[derive(Clone)]
pub struct GrpcClient {
    raw: RawClient,
}

impl GrpcClient {
    /// Connect eagerly so startup races surface as retryable connection
    /// errors rather than failing the first call.
    pub async fn connect(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        let raw = RawClient::connect(address.clone())
            .await
            .map_err(|err| Error::connection(format!("{address}: {err}")))?;
        Ok(Self { raw })
    }
}

fn from_status(status: Status) -> Error {
    match status.code() {
        Code::NotFound => Error::not_found(status.message()),
        Code::InvalidArgument => Error::invalid_argument(status.message()),
        Code::Unavailable => Error::unavailable(status.message()),
        code => Error::BadStatus {
            code: code as u16,
            message: status.message().to_string(),
        },
    }
}

#[async_trait]
impl Client for GrpcClient {
    async fn server_metadata(&self) -> Result<ServerMetadata> {
        let mut raw = self.raw.clone();
        let response = raw
            .server_metadata(pb::ServerMetadataRequest {})
            .await
            .map_err(from_status)?
            .into_inner();
        Ok(ServerMetadata {
            name: response.name,
            version: response.version,
            extensions: response.extensions.into_iter().collect(),
        })
    }

    async fn server_live(&self) -> Result<bool> {
        let mut raw = self.raw.clone();
        match raw.server_live(pb::ServerLiveRequest {}).await {
            Ok(response) => Ok(response.into_inner().live),
            Err(status) if status.code() == Code::Unavailable => {
                Err(Error::connection(status.message()))
            }
            Err(status) => Err(from_status(status)),
        }
    }

    async fn server_ready(&self) -> Result<bool> {
        let mut raw = self.raw.clone();
        match raw.server_ready(pb::ServerReadyRequest {}).await {
            Ok(response) => Ok(response.into_inner().ready),
            Err(status) if status.code() == Code::Unavailable => {
                Err(Error::connection(status.message()))
            }
            Err(status) => Err(from_status(status)),
        }
    }

    async fn model_ready(&self, model: &str) -> Result<bool> {
        let mut raw = self.raw.clone();
        let response = raw
            .model_ready(pb::ModelReadyRequest {
                name: model.to_string(),
            })
            .await
            .map_err(from_status)?;
        Ok(response.into_inner().ready)
    }

    async fn model_metadata(&self, model: &str) -> Result<ModelMetadata> {
        let mut raw = self.raw.clone();
        let response = raw
            .model_metadata(pb::ModelMetadataRequest {
                name: model.to_string(),
            })
            .await
            .map_err(from_status)?
            .into_inner();

        fn tensor(
            meta: &pb::model_metadata_response::TensorMetadata,
        ) -> Result<tensorgate_core::TensorDesc> {
            let dims: Vec<u64> = meta.shape.iter().map(|d| (*d).max(0) as u64).collect();
            Ok(tensorgate_core::TensorDesc::new(
                meta.name.clone(),
                &dims,
                meta.datatype.parse()?,
            ))
        }

        Ok(ModelMetadata {
            name: response.name,
            platform: response.platform,
            inputs: response.inputs.iter().map(tensor).collect::<Result<_>>()?,
            outputs: response.outputs.iter().map(tensor).collect::<Result<_>>()?,
        })
    }

    async fn model_list(&self) -> Result<Vec<String>> {
        let mut raw = self.raw.clone();
        let response = raw
            .model_list(pb::ModelListRequest {})
            .await
            .map_err(from_status)?;
        Ok(response.into_inner().models)
    }

    async fn model_load(&self, model: &str, parameters: &ParameterMap) -> Result<()> {
        let mut raw = self.raw.clone();
        raw.model_load(pb::ModelLoadRequest {
            name: model.to_string(),
            parameters: grpc_internal::params_to_pb(parameters),
        })
        .await
        .map_err(from_status)?;
        Ok(())
    }

    async fn model_unload(&self, model: &str) -> Result<()> {
        let mut raw = self.raw.clone();
        raw.model_unload(pb::ModelUnloadRequest {
            name: model.to_string(),
        })
        .await
        .map_err(from_status)?;
        Ok(())
    }

    async fn worker_load(&self, worker: &str, parameters: &ParameterMap) -> Result<String> {
        let mut raw = self.raw.clone();
        let response = raw
            .worker_load(pb::WorkerLoadRequest {
                name: worker.to_string(),
                parameters: grpc_internal::params_to_pb(parameters),
            })
            .await
            .map_err(from_status)?;
        Ok(response.into_inner().endpoint)
    }

    async fn worker_unload(&self, worker: &str) -> Result<()> {
        let mut raw = self.raw.clone();
        raw.worker_unload(pb::WorkerUnloadRequest {
            name: worker.to_string(),
        })
        .await
        .map_err(from_status)?;
        Ok(())
    }

    async fn model_infer(
        &self,
        model: &str,
        request: InferenceRequest,
    ) -> Result<InferenceResponse> {
        let mut raw = self.raw.clone();
        let message = grpc_internal::request_to_pb(model, &request);
        let response = raw.model_infer(message).await.map_err(from_status)?;
        grpc_internal::response_from_pb(model, response.into_inner())
    }

    async fn model_infer_async(
        &self,
        model: &str,
        request: InferenceRequest,
    ) -> Result<InferenceResponseFuture> {
        let mut raw = self.raw.clone();
        let message = grpc_internal::request_to_pb(model, &request);
        let id = request.id.clone();
        let model = model.to_string();

        let (mut callback, future) = response_channel();
        tokio::spawn(async move {
            let response = match raw.model_infer(message).await {
                Ok(response) => grpc_internal::response_from_pb(&model, response.into_inner())
                    .unwrap_or_else(|err| InferenceResponse::error(id.clone(), &model, err.to_string())),
                Err(status) => InferenceResponse::error(id.clone(), &model, status.message()),
            };
            callback.complete(response);
        });
        Ok(future)
    }

    async fn has_hardware(&self, name: &str, num: i32) -> Result<bool> {
        let mut raw = self.raw.clone();
        let response = raw
            .has_hardware(pb::HasHardwareRequest {
                name: name.to_string(),
                num,
            })
            .await
            .map_err(from_status)?;
        Ok(response.into_inner().found)
    }
}
