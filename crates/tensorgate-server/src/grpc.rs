//! gRPC adapter: translates the KServe inference service onto the
//! dispatch facade.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use tensorgate_client::grpc_internal;
use tensorgate_core::Error;
use tensorgate_proto::tensorgate::v1 as pb;
use tensorgate_runtime::SharedState;

pub struct GrpcService {
    pub state: Arc<SharedState>,
}

fn status_from(err: Error) -> Status {
    match err {
        Error::InvalidArgument(msg) => Status::invalid_argument(msg),
        Error::NotFound(msg) | Error::FileNotFound(msg) => Status::not_found(msg),
        Error::Unavailable(msg) => Status::unavailable(msg),
        other => Status::unknown(other.to_string()),
    }
}

#[tonic::async_trait]
impl pb::inference_service_server::InferenceService for GrpcService {
    async fn server_live(
        &self,
        _request: Request<pb::ServerLiveRequest>,
    ) -> Result<Response<pb::ServerLiveResponse>, Status> {
        Ok(Response::new(pb::ServerLiveResponse {
            live: self.state.server_live(),
        }))
    }

    async fn server_ready(
        &self,
        _request: Request<pb::ServerReadyRequest>,
    ) -> Result<Response<pb::ServerReadyResponse>, Status> {
        Ok(Response::new(pb::ServerReadyResponse {
            ready: self.state.server_ready(),
        }))
    }

    async fn server_metadata(
        &self,
        _request: Request<pb::ServerMetadataRequest>,
    ) -> Result<Response<pb::ServerMetadataResponse>, Status> {
        let metadata = self.state.server_metadata();
        Ok(Response::new(pb::ServerMetadataResponse {
            name: metadata.name,
            version: metadata.version,
            extensions: metadata.extensions.into_iter().collect(),
        }))
    }

    async fn model_ready(
        &self,
        request: Request<pb::ModelReadyRequest>,
    ) -> Result<Response<pb::ModelReadyResponse>, Status> {
        Ok(Response::new(pb::ModelReadyResponse {
            ready: self.state.model_ready(&request.into_inner().name),
        }))
    }

    async fn model_metadata(
        &self,
        request: Request<pb::ModelMetadataRequest>,
    ) -> Result<Response<pb::ModelMetadataResponse>, Status> {
        let metadata = self
            .state
            .model_metadata(&request.into_inner().name)
            .map_err(status_from)?;
        Ok(Response::new(grpc_internal::metadata_to_pb(metadata)))
    }

    async fn model_infer(
        &self,
        request: Request<pb::ModelInferRequest>,
    ) -> Result<Response<pb::ModelInferResponse>, Status> {
        let message = request.into_inner();
        let model = message.model_name.clone();
        let core_request = grpc_internal::request_from_pb(message).map_err(status_from)?;

        let future = self
            .state
            .model_infer(&model, core_request)
            .await
            .map_err(status_from)?;
        let response = future
            .await
            .map_err(|_| Status::internal("request dropped before completion"))?;

        if response.is_error() {
            return Err(Status::unknown(response.error.unwrap_or_default()));
        }
        Ok(Response::new(grpc_internal::response_to_pb(response)))
    }

    async fn model_load(
        &self,
        request: Request<pb::ModelLoadRequest>,
    ) -> Result<Response<pb::ModelLoadResponse>, Status> {
        let message = request.into_inner();
        let params = grpc_internal::params_from_pb(&message.parameters);
        self.state
            .model_load(&message.name, &params)
            .await
            .map_err(status_from)?;
        Ok(Response::new(pb::ModelLoadResponse {}))
    }

    async fn model_unload(
        &self,
        request: Request<pb::ModelUnloadRequest>,
    ) -> Result<Response<pb::ModelUnloadResponse>, Status> {
        self.state
            .model_unload(&request.into_inner().name)
            .await
            .map_err(status_from)?;
        Ok(Response::new(pb::ModelUnloadResponse {}))
    }

    async fn worker_load(
        &self,
        request: Request<pb::WorkerLoadRequest>,
    ) -> Result<Response<pb::WorkerLoadResponse>, Status> {
        let message = request.into_inner();
        let params = grpc_internal::params_from_pb(&message.parameters);
        let endpoint = self
            .state
            .worker_load(&message.name, &params)
            .await
            .map_err(status_from)?;
        Ok(Response::new(pb::WorkerLoadResponse { endpoint }))
    }

    async fn worker_unload(
        &self,
        request: Request<pb::WorkerUnloadRequest>,
    ) -> Result<Response<pb::WorkerUnloadResponse>, Status> {
        self.state
            .worker_unload(&request.into_inner().name)
            .await
            .map_err(status_from)?;
        Ok(Response::new(pb::WorkerUnloadResponse {}))
    }

    async fn model_list(
        &self,
        _request: Request<pb::ModelListRequest>,
    ) -> Result<Response<pb::ModelListResponse>, Status> {
        Ok(Response::new(pb::ModelListResponse {
            models: self.state.model_list(),
        }))
    }

    async fn has_hardware(
        &self,
        request: Request<pb::HasHardwareRequest>,
    ) -> Result<Response<pb::HasHardwareResponse>, Status> {
        let message = request.into_inner();
        Ok(Response::new(pb::HasHardwareResponse {
            found: self.state.has_hardware(&message.name, message.num),
        }))
    }
}
