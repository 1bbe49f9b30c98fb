use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tensorgate_core::MemoryPool;
use tensorgate_proto::tensorgate::v1::inference_service_server::InferenceServiceServer;
use tensorgate_runtime::SharedState;

use tensorgate_server::cli::{Cli, Command};
use tensorgate_server::grpc::GrpcService;
use tensorgate_server::{http, repository};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            http_addr,
            grpc_addr,
            log,
            model_repository,
            repository_load_existing,
            repository_monitoring,
        } => {
            serve(
                http_addr,
                grpc_addr,
                log,
                model_repository.map(PathBuf::from),
                repository_load_existing,
                repository_monitoring,
            )
            .await
        }
    }
}

fn extensions() -> Vec<String> {
    ["grpc", "http", "metrics", "logging", "tracing"]
        .into_iter()
        .map(String::from)
        .collect()
}

async fn serve(
    http_addr: String,
    grpc_addr: String,
    log: String,
    model_repository: Option<PathBuf>,
    repository_load_existing: bool,
    repository_monitoring: bool,
) -> Result<()> {
    std::env::set_var("RUST_LOG", &log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let pool = Arc::new(MemoryPool::new());
    let kernels = tensorgate_workers::default_registry();
    let state = Arc::new(SharedState::new(kernels, pool, extensions()));

    // the watcher handle must outlive the servers
    let mut _watcher = None;
    if let Some(repository) = &model_repository {
        state
            .set_repository(repository, repository_load_existing)
            .await;
        if repository_monitoring {
            _watcher = Some(repository::watch(state.clone(), repository)?);
        }
    }

    // HTTP server
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {http_addr}"))?;
    let http_router = http::router(state.clone());
    info!(addr = %http_addr, "tensorgated HTTP listening");
    let http_server = async move { axum::serve(http_listener, http_router).await };

    // gRPC server
    let grpc_addr = grpc_addr.parse().context("invalid gRPC bind address")?;
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(tensorgate_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| anyhow::anyhow!("reflection build failed: {e}"))?;
    let grpc_service = GrpcService {
        state: state.clone(),
    };
    info!(addr = %grpc_addr, "tensorgated gRPC listening");
    let grpc_server = tonic::transport::Server::builder()
        .add_service(InferenceServiceServer::new(grpc_service))
        .add_service(reflection)
        .serve(grpc_addr);

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server exited");
            }
        }
        result = grpc_server => {
            if let Err(e) = result {
                error!(error = %e, "gRPC server exited");
            }
        }
    }

    // front-ends have stopped accepting; drain and destroy every worker,
    // then the pool drops last with the state
    state.shutdown().await;
    info!("tensorgated shutdown complete");
    Ok(())
}
