//! Server configuration, read from a JSON file or assembled from the command line.
use crate::cli::Cli;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: '{0}'")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// File of the descriptor set whose services are served
    #[serde(default)]
    pub principal_file: Option<String>,

    /// Serve `grpc.reflection.v1.ServerReflection`
    #[serde(default)]
    pub reflection: bool,

    /// Maximum request/response message size in bytes
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            principal_file: None,
            reflection: false,
            max_message_size: None,
        }
    }
}

impl From<&Cli> for ServerConfig {
    fn from(args: &Cli) -> Self {
        Self {
            bind_address: args.bind,
            port: args.port,
            principal_file: args.principal_file.clone(),
            reflection: args.reflection,
            max_message_size: args.max_message_size,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == Some(0) {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than zero".to_string(),
            ));
        }

        if self.principal_file.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid(
                "principal_file cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind={}", self.socket_addr())?;
        write!(
            f,
            " reflection={}",
            if self.reflection { "on" } else { "off" }
        )?;

        if let Some(principal) = &self.principal_file {
            write!(f, " principal={principal}")?;
        }

        if let Some(size) = self.max_message_size {
            write!(f, " max_message_size={size}")?;
        }

        Ok(())
    }
}
