//! HTTP/REST adapter: the KServe v2 JSON surface plus the Prometheus
//! metrics exposition.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tensorgate_core::metrics::METRICS;
use tensorgate_core::{with_scalar, DataType, Error, ParameterMap, ScalarCodec};
use tensorgate_runtime::{
    InferenceRequest, InferenceRequestInput, InferenceRequestOutput, InferenceResponse,
    SharedState,
};

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/v2", get(server_metadata))
        .route("/v2/health/live", get(server_live))
        .route("/v2/health/ready", get(server_ready))
        .route("/v2/models", get(model_list))
        .route("/v2/models/{model}", get(model_metadata))
        .route("/v2/models/{model}/ready", get(model_ready))
        .route("/v2/models/{model}/infer", post(model_infer))
        .route("/v2/repository/models/{model}/load", post(repository_load))
        .route("/v2/repository/models/{model}/unload", post(repository_unload))
        .route("/v2/workers/{worker}/load", post(worker_load))
        .route("/v2/workers/{worker}/unload", post(worker_unload))
        .route("/v2/hardware", post(has_hardware))
        .route("/metrics", get(metrics))
        .with_state(state)
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::FileNotFound(_) => StatusCode::NOT_FOUND,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// JSON tensor payloads

trait JsonScalar: ScalarCodec {
    fn from_json(value: &Value) -> Option<Self>;
    fn to_json(self) -> Value;
}

macro_rules! impl_json_unsigned {
    ($($ty:ty),*) => {
        $(impl JsonScalar for $ty {
            fn from_json(value: &Value) -> Option<Self> {
                value.as_u64().and_then(|v| Self::try_from(v).ok())
            }
            fn to_json(self) -> Value {
                Value::from(self as u64)
            }
        })*
    };
}

macro_rules! impl_json_signed {
    ($($ty:ty),*) => {
        $(impl JsonScalar for $ty {
            fn from_json(value: &Value) -> Option<Self> {
                value.as_i64().and_then(|v| Self::try_from(v).ok())
            }
            fn to_json(self) -> Value {
                Value::from(self as i64)
            }
        })*
    };
}

impl_json_unsigned!(u8, u16, u32, u64);
impl_json_signed!(i8, i16, i32, i64);

impl JsonScalar for f32 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
    fn to_json(self) -> Value {
        Value::from(self as f64)
    }
}

impl JsonScalar for f64 {
    fn from_json(value: &Value) -> Option<Self> {
        value.as_f64()
    }
    fn to_json(self) -> Value {
        Value::from(self)
    }
}

fn json_to_bytes(datatype: DataType, values: &[Value]) -> Result<Bytes, Error> {
    match datatype {
        DataType::String => {
            let mut raw = Vec::new();
            for value in values {
                let s = value
                    .as_str()
                    .ok_or_else(|| Error::invalid_argument("string tensor expects strings"))?;
                raw.extend_from_slice(s.as_bytes());
                raw.push(0);
            }
            Ok(Bytes::from(raw))
        }
        DataType::Bool => {
            let mut raw = Vec::with_capacity(values.len());
            for value in values {
                let b = value
                    .as_bool()
                    .ok_or_else(|| Error::invalid_argument("bool tensor expects booleans"))?;
                raw.push(u8::from(b));
            }
            Ok(Bytes::from(raw))
        }
        DataType::Fp16 => Err(Error::invalid_argument("fp16 tensors are not supported over JSON")),
        _ => with_scalar!(datatype, T => {
            let mut scalars = Vec::<T>::with_capacity(values.len());
            for value in values {
                scalars.push(<T as JsonScalar>::from_json(value).ok_or_else(|| {
                    Error::invalid_argument(format!("value {value} does not fit {datatype}"))
                })?);
            }
            let mut raw = vec![0u8; scalars.len() * T::WIDTH];
            T::encode(&scalars, &mut raw);
            Ok(Bytes::from(raw))
        }),
    }
}

fn bytes_to_json(datatype: DataType, data: &Bytes) -> Result<Vec<Value>, Error> {
    match datatype {
        DataType::String => Ok(data
            .split(|byte| *byte == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| Value::from(String::from_utf8_lossy(chunk).into_owned()))
            .collect()),
        DataType::Bool => Ok(data.iter().map(|byte| Value::from(*byte != 0)).collect()),
        DataType::Fp16 => Err(Error::invalid_argument("fp16 tensors are not supported over JSON")),
        _ => with_scalar!(datatype, T => {
            let mut values = vec![T::default(); data.len() / T::WIDTH];
            T::decode(data, &mut values);
            Ok(values.into_iter().map(JsonScalar::to_json).collect())
        }),
    }
}

#[derive(Debug, Deserialize)]
struct RestInputTensor {
    name: String,
    shape: Vec<u64>,
    datatype: DataType,
    #[serde(default)]
    parameters: Option<ParameterMap>,
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RestRequestedOutput {
    name: String,
    #[serde(default)]
    parameters: Option<ParameterMap>,
}

#[derive(Debug, Deserialize)]
struct RestRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    parameters: Option<ParameterMap>,
    inputs: Vec<RestInputTensor>,
    #[serde(default)]
    outputs: Option<Vec<RestRequestedOutput>>,
}

#[derive(Debug, Serialize)]
struct RestOutputTensor {
    name: String,
    shape: Vec<u64>,
    datatype: DataType,
    data: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct RestResponse {
    model_name: String,
    id: String,
    outputs: Vec<RestOutputTensor>,
}

fn request_from_rest(body: RestRequest) -> Result<InferenceRequest, Error> {
    let mut request = InferenceRequest::new(body.id.unwrap_or_default());
    request.parameters = body.parameters.unwrap_or_default();

    for tensor in body.inputs {
        let data = json_to_bytes(tensor.datatype, &tensor.data)?;
        let mut input =
            InferenceRequestInput::new(tensor.name, &tensor.shape, tensor.datatype, data);
        input.parameters = tensor.parameters.unwrap_or_default();
        request.inputs.push(input);
    }
    for output in body.outputs.unwrap_or_default() {
        let mut requested = InferenceRequestOutput::new(output.name);
        requested.parameters = output.parameters.unwrap_or_default();
        request.outputs.push(requested);
    }
    Ok(request)
}

fn response_to_rest(response: InferenceResponse) -> Result<RestResponse, Error> {
    let mut outputs = Vec::with_capacity(response.outputs.len());
    for output in response.outputs {
        outputs.push(RestOutputTensor {
            name: output.name,
            shape: output.shape.dims().to_vec(),
            datatype: output.datatype,
            data: bytes_to_json(output.datatype, &output.data)?,
        });
    }
    Ok(RestResponse {
        model_name: response.model,
        id: response.id,
        outputs,
    })
}

// ---------------------------------------------------------------------------
// handlers

async fn server_metadata(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let metadata = state.server_metadata();
    Json(json!({
        "name": metadata.name,
        "version": metadata.version,
        "extensions": metadata.extensions,
    }))
}

async fn server_live(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    Json(json!({ "live": state.server_live() }))
}

async fn server_ready(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    Json(json!({ "ready": state.server_ready() }))
}

async fn model_list(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    Json(json!({ "models": state.model_list() }))
}

async fn model_metadata(
    State(state): State<Arc<SharedState>>,
    Path(model): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let metadata = state.model_metadata(&model)?;
    Ok(Json(json!({
        "name": metadata.name,
        "platform": metadata.platform,
        "inputs": metadata.inputs,
        "outputs": metadata.outputs,
    })))
}

async fn model_ready(
    State(state): State<Arc<SharedState>>,
    Path(model): Path<String>,
) -> impl IntoResponse {
    Json(json!({ "ready": state.model_ready(&model) }))
}

async fn model_infer(
    State(state): State<Arc<SharedState>>,
    Path(model): Path<String>,
    Json(body): Json<RestRequest>,
) -> Result<Json<RestResponse>, ApiError> {
    let request = request_from_rest(body)?;
    let future = state.model_infer(&model, request).await?;
    let response = future
        .await
        .map_err(|_| Error::internal("request dropped before completion"))?;

    if response.is_error() {
        return Err(ApiError(Error::invalid_argument(
            response.error.unwrap_or_default(),
        )));
    }
    Ok(Json(response_to_rest(response)?))
}

async fn repository_load(
    State(state): State<Arc<SharedState>>,
    Path(model): Path<String>,
    body: Option<Json<ParameterMap>>,
) -> Result<impl IntoResponse, ApiError> {
    let params = body.map(|Json(params)| params).unwrap_or_default();
    state.model_load(&model, &params).await?;
    Ok(StatusCode::OK)
}

async fn repository_unload(
    State(state): State<Arc<SharedState>>,
    Path(model): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.model_unload(&model).await?;
    Ok(StatusCode::OK)
}

async fn worker_load(
    State(state): State<Arc<SharedState>>,
    Path(worker): Path<String>,
    body: Option<Json<ParameterMap>>,
) -> Result<impl IntoResponse, ApiError> {
    let params = body.map(|Json(params)| params).unwrap_or_default();
    let endpoint = state.worker_load(&worker, &params).await?;
    Ok(Json(json!({ "endpoint": endpoint })))
}

async fn worker_unload(
    State(state): State<Arc<SharedState>>,
    Path(worker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.worker_unload(&worker).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct HardwareQuery {
    name: String,
    #[serde(default)]
    num: i32,
}

async fn has_hardware(
    State(state): State<Arc<SharedState>>,
    Json(query): Json<HardwareQuery>,
) -> impl IntoResponse {
    Json(json!({ "found": state.has_hardware(&query.name, query.num) }))
}

async fn metrics() -> impl IntoResponse {
    METRICS.gather()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_for_uint32() {
        let values = vec![Value::from(7u64), Value::from(8u64)];
        let bytes = json_to_bytes(DataType::Uint32, &values).unwrap();
        assert_eq!(&bytes[..], &[7, 0, 0, 0, 8, 0, 0, 0]);

        let back = bytes_to_json(DataType::Uint32, &bytes).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn json_rejects_out_of_range_values() {
        let values = vec![Value::from(300u64)];
        assert!(json_to_bytes(DataType::Uint8, &values).is_err());
        let values = vec![Value::from(-1i64)];
        assert!(json_to_bytes(DataType::Uint32, &values).is_err());
    }

    #[test]
    fn json_strings_are_null_separated() {
        let values = vec![Value::from("ab"), Value::from("c")];
        let bytes = json_to_bytes(DataType::String, &values).unwrap();
        assert_eq!(&bytes[..], b"ab\0c\0");

        let back = bytes_to_json(DataType::String, &bytes).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn rest_request_builds_core_request() {
        let body = RestRequest {
            id: Some("9".to_string()),
            parameters: None,
            inputs: vec![RestInputTensor {
                name: "input".to_string(),
                shape: vec![1],
                datatype: DataType::Uint32,
                parameters: None,
                data: vec![Value::from(7u64)],
            }],
            outputs: None,
        };
        let request = request_from_rest(body).unwrap();
        assert_eq!(request.id, "9");
        assert_eq!(request.inputs.len(), 1);
        assert_eq!(&request.inputs[0].data[..], &7u32.to_le_bytes());
    }
}
