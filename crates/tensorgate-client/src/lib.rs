pub mod client;
pub mod grpc;
pub mod grpc_internal;
pub mod helpers;
pub mod native;

pub use client::Client;
pub use grpc::GrpcClient;
pub use helpers::*;
pub use native::NativeClient;
