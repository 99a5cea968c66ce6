//! # CLI
//!
//! This module defines the command-line interface of `dynrpc` using `clap`.
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dynrpc", version, about = "Serve any gRPC contract from a descriptor set")]
pub struct Cli {
    /// Path to the descriptor set (.bin)
    ///
    /// Produce it with `protoc --include_imports --descriptor_set_out=schema.bin my.proto`.
    pub schema: PathBuf,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Configuration file (JSON format). When given, it replaces every other server option.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// File of the descriptor set whose services are served (e.g. helloworld.proto)
    #[arg(long)]
    pub principal_file: Option<String>,

    /// Also serve the gRPC server reflection service
    #[arg(long)]
    pub reflection: bool,

    /// Maximum size of a request or response message, in bytes
    #[arg(long, value_parser = parse_size)]
    pub max_message_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn parse_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("Message size must be greater than zero".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(format!("Invalid message size '{value}': {e}")),
    }
}
