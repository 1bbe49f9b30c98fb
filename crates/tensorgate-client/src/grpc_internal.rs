//! Mapping between the wire protobuf types and the core request/response
//! types. Shared by the gRPC client here and the server adapter.

use std::collections::HashMap;

use bytes::Bytes;

use tensorgate_core::{DataType, Error, ParameterMap, ParameterValue, Result, ScalarCodec};
use tensorgate_proto::tensorgate::v1 as pb;
use tensorgate_runtime::{
    InferenceRequest, InferenceRequestInput, InferenceRequestOutput, InferenceResponse,
    ModelMetadata, ResponseOutput,
};

pub fn params_to_pb(params: &ParameterMap) -> HashMap<String, pb::InferParameter> {
    params
        .iter()
        .map(|(key, value)| {
            let choice = match value {
                ParameterValue::Bool(v) => pb::infer_parameter::ParameterChoice::BoolParam(*v),
                ParameterValue::Int(v) => {
                    pb::infer_parameter::ParameterChoice::Int64Param(*v as i64)
                }
                ParameterValue::Double(v) => {
                    pb::infer_parameter::ParameterChoice::DoubleParam(*v)
                }
                ParameterValue::Str(v) => {
                    pb::infer_parameter::ParameterChoice::StringParam(v.clone())
                }
            };
            (
                key.clone(),
                pb::InferParameter {
                    parameter_choice: Some(choice),
                },
            )
        })
        .collect()
}

pub fn params_from_pb(params: &HashMap<String, pb::InferParameter>) -> ParameterMap {
    let mut map = ParameterMap::new();
    for (key, value) in params {
        match &value.parameter_choice {
            Some(pb::infer_parameter::ParameterChoice::BoolParam(v)) => map.put(key.clone(), *v),
            Some(pb::infer_parameter::ParameterChoice::Int64Param(v)) => {
                map.put(key.clone(), *v as i32)
            }
            Some(pb::infer_parameter::ParameterChoice::DoubleParam(v)) => map.put(key.clone(), *v),
            Some(pb::infer_parameter::ParameterChoice::StringParam(v)) => {
                map.put(key.clone(), v.clone())
            }
            None => {}
        }
    }
    map
}

/// Decode typed tensor contents into the flat little-endian byte layout
/// the core works with.
pub fn contents_to_bytes(datatype: DataType, contents: &pb::InferTensorContents) -> Result<Bytes> {
    fn encode<T: ScalarCodec>(values: Vec<T>) -> Bytes {
        let mut raw = vec![0u8; values.len() * T::WIDTH];
        T::encode(&values, &mut raw);
        Bytes::from(raw)
    }

    Ok(match datatype {
        DataType::Bool => encode(
            contents
                .bool_contents
                .iter()
                .map(|v| u8::from(*v))
                .collect::<Vec<u8>>(),
        ),
        DataType::Uint8 => encode(
            contents
                .uint_contents
                .iter()
                .map(|v| *v as u8)
                .collect::<Vec<u8>>(),
        ),
        DataType::Uint16 => encode(
            contents
                .uint_contents
                .iter()
                .map(|v| *v as u16)
                .collect::<Vec<u16>>(),
        ),
        DataType::Uint32 => encode(contents.uint_contents.clone()),
        DataType::Uint64 => encode(contents.uint64_contents.clone()),
        DataType::Int8 => encode(
            contents
                .int_contents
                .iter()
                .map(|v| *v as i8)
                .collect::<Vec<i8>>(),
        ),
        DataType::Int16 => encode(
            contents
                .int_contents
                .iter()
                .map(|v| *v as i16)
                .collect::<Vec<i16>>(),
        ),
        DataType::Int32 => encode(contents.int_contents.clone()),
        DataType::Int64 => encode(contents.int64_contents.clone()),
        DataType::Fp32 => encode(contents.fp32_contents.clone()),
        DataType::Fp64 => encode(contents.fp64_contents.clone()),
        DataType::String => {
            let mut raw = Vec::new();
            for element in &contents.bytes_contents {
                raw.extend_from_slice(element);
                raw.push(0);
            }
            Bytes::from(raw)
        }
        DataType::Fp16 => {
            return Err(Error::invalid_argument(
                "fp16 tensors are not supported over typed contents",
            ));
        }
    })
}

pub fn request_to_pb(model: &str, request: &InferenceRequest) -> pb::ModelInferRequest {
    let mut inputs = Vec::with_capacity(request.inputs.len());
    let mut raw_input_contents = Vec::with_capacity(request.inputs.len());
    for input in &request.inputs {
        inputs.push(pb::model_infer_request::InferInputTensor {
            name: input.name.clone(),
            datatype: input.datatype.to_string(),
            shape: input.shape.dims().iter().map(|d| *d as i64).collect(),
            parameters: params_to_pb(&input.parameters),
            contents: None,
        });
        raw_input_contents.push(input.data.to_vec());
    }

    let outputs = request
        .outputs
        .iter()
        .map(|output| pb::model_infer_request::InferRequestedOutputTensor {
            name: output.name.clone(),
            parameters: params_to_pb(&output.parameters),
        })
        .collect();

    pb::ModelInferRequest {
        model_name: model.to_string(),
        id: request.id.clone(),
        parameters: params_to_pb(&request.parameters),
        inputs,
        outputs,
        raw_input_contents,
    }
}

pub fn request_from_pb(message: pb::ModelInferRequest) -> Result<InferenceRequest> {
    let mut request = InferenceRequest::new(message.id);
    request.parameters = params_from_pb(&message.parameters);

    let mut raw = message.raw_input_contents.into_iter();
    for tensor in message.inputs {
        let datatype: DataType = tensor.datatype.parse()?;
        let data = match raw.next() {
            Some(bytes) if !bytes.is_empty() => Bytes::from(bytes),
            _ => match &tensor.contents {
                Some(contents) => contents_to_bytes(datatype, contents)?,
                None => {
                    return Err(Error::invalid_argument(format!(
                        "input {} carries no data",
                        tensor.name
                    )));
                }
            },
        };
        let dims: Vec<u64> = tensor.shape.iter().map(|d| (*d).max(0) as u64).collect();
        let mut input = InferenceRequestInput::new(tensor.name, &dims, datatype, data);
        input.parameters = params_from_pb(&tensor.parameters);
        request.inputs.push(input);
    }

    for tensor in message.outputs {
        let mut output = InferenceRequestOutput::new(tensor.name);
        output.parameters = params_from_pb(&tensor.parameters);
        request.outputs.push(output);
    }
    Ok(request)
}

pub fn response_to_pb(response: InferenceResponse) -> pb::ModelInferResponse {
    let mut outputs = Vec::with_capacity(response.outputs.len());
    let mut raw_output_contents = Vec::with_capacity(response.outputs.len());
    for output in response.outputs {
        outputs.push(pb::model_infer_response::InferOutputTensor {
            name: output.name,
            datatype: output.datatype.to_string(),
            shape: output.shape.dims().iter().map(|d| *d as i64).collect(),
            parameters: params_to_pb(&output.parameters),
            contents: None,
        });
        raw_output_contents.push(output.data.to_vec());
    }

    pb::ModelInferResponse {
        model_name: response.model,
        id: response.id,
        parameters: HashMap::new(),
        outputs,
        raw_output_contents,
    }
}

pub fn response_from_pb(model: &str, message: pb::ModelInferResponse) -> Result<InferenceResponse> {
    let mut outputs = Vec::with_capacity(message.outputs.len());
    let mut raw = message.raw_output_contents.into_iter();
    for tensor in message.outputs {
        let datatype: DataType = tensor.datatype.parse()?;
        let data = match raw.next() {
            Some(bytes) if !bytes.is_empty() => Bytes::from(bytes),
            _ => match &tensor.contents {
                Some(contents) => contents_to_bytes(datatype, contents)?,
                None => Bytes::new(),
            },
        };
        let dims: Vec<u64> = tensor.shape.iter().map(|d| (*d).max(0) as u64).collect();
        outputs.push(ResponseOutput {
            name: tensor.name,
            shape: tensorgate_core::Shape::from_slice(&dims),
            datatype,
            parameters: params_from_pb(&tensor.parameters),
            data,
        });
    }
    Ok(InferenceResponse::ok(message.id, model, outputs))
}

pub fn metadata_to_pb(metadata: ModelMetadata) -> pb::ModelMetadataResponse {
    fn tensor(desc: &tensorgate_core::TensorDesc) -> pb::model_metadata_response::TensorMetadata {
        pb::model_metadata_response::TensorMetadata {
            name: desc.name.clone(),
            datatype: desc.datatype.to_string(),
            shape: desc.shape.dims().iter().map(|d| *d as i64).collect(),
        }
    }

    pb::ModelMetadataResponse {
        name: metadata.name,
        platform: metadata.platform,
        inputs: metadata.inputs.iter().map(tensor).collect(),
        outputs: metadata.outputs.iter().map(tensor).collect(),
    }
}
