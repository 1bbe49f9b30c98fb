pub mod cli;
pub mod grpc;
pub mod http;
pub mod repository;
