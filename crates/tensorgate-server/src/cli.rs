use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tensorgated", version, about = "tensorgate inference daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the inference server
    Serve {
        /// Bind address for HTTP/REST
        #[arg(long, default_value = "0.0.0.0:8998")]
        http_addr: String,

        /// Bind address for gRPC
        #[arg(long, default_value = "0.0.0.0:50051")]
        grpc_addr: String,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,

        /// Model repository directory
        #[arg(long)]
        model_repository: Option<String>,

        /// Load models already present in the repository at startup
        #[arg(long, default_value_t = false)]
        repository_load_existing: bool,

        /// Watch the repository and load/unload models on config changes
        #[arg(long, default_value_t = false)]
        repository_monitoring: bool,
    },
}
