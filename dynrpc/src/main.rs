//! # Dynrpc Entry Point
//!
//! Serves the gRPC services described by a descriptor set:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and sets up logging.
//! 2. **Configuration**: Reads the config file when given, otherwise uses the arguments.
//! 3. **Startup**: Loads and resolves the schema, binds the greeting to the methods it fits
//!    and opens the listener. Any failure here exits with status 1.
//! 4. **Serving**: Until Ctrl-C.
//!
//! ```bash
//! protoc --include_imports --descriptor_set_out=helloworld.bin helloworld.proto
//! dynrpc helloworld.bin --port 50051 --reflection
//! ```
mod cli;
mod config;
mod greeter;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::ServerConfig;
use dynrpc_core::server::{DynamicServer, StartupError};
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    init_logging(&args.log_level);

    if let Err(err) = run(args).await {
        match err.downcast_ref::<StartupError>() {
            Some(startup) => error!(phase = %startup.phase(), "{err:#}"),
            None => error!("{err:#}"),
        }
        process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            ServerConfig::from_file(path)
                .with_context(|| format!("Invalid config file '{}'", path.display()))?
        }
        None => ServerConfig::from(&args),
    };

    info!(%config, "dynrpc v{}", env!("CARGO_PKG_VERSION"));

    let schema = std::fs::read(&args.schema)
        .with_context(|| format!("Failed to read schema '{}'", args.schema.display()))?;

    let mut server = DynamicServer::new().reflection(config.reflection);

    if let Some(principal) = &config.principal_file {
        server = server.principal_file(principal);
    }

    if let Some(limit) = config.max_message_size {
        server = server
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);
    }

    let server = server.load_schema(&schema)?.resolve()?;
    let handlers = greeter::handlers(server.registry());
    let server = server.register(handlers)?.bind(config.socket_addr()).await?;

    info!(addr = %server.local_addr(), "ready");

    server
        .serve_with_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;

    Ok(())
}
