//! # Dynamic Server
//!
//! The [`DynamicServer`] drives the startup of a descriptor-driven gRPC server. It uses a
//! **Typestate Pattern** so the phases can only run in order:
//!
//! 1. **[`Unstarted`]**: options only (principal file, reflection, message size limits).
//! 2. **[`SchemaLoaded`]**: the descriptor set is parsed.
//! 3. **[`Resolved`]**: every type reference is resolved. The registry is exposed so the
//!    application can decide which callbacks to bind.
//! 4. **[`Registered`]**: one record and route per method.
//! 5. **[`Bound`]**: the listener is open and ready to serve.
//!
//! Every failure up to this point is a [`StartupError`] and nothing has been served yet.
//! Once serving, a failing call only affects that call.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynrpc_core::server::DynamicServer;
//! use dynrpc_core::service::HandlerSet;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("descriptor.bin")?;
//!
//! let resolved = DynamicServer::new()
//!     .reflection(true)
//!     .load_schema(&bytes)?
//!     .resolve()?;
//!
//! for service in resolved.registry().services() {
//!     println!("{}", service.full_name());
//! }
//!
//! let server = resolved
//!     .register(HandlerSet::new())?
//!     .bind("127.0.0.1:0".parse()?)
//!     .await?;
//!
//! println!("listening on {}", server.local_addr());
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```
use crate::reflection::reflection_service;
use crate::registry::{DescriptorRegistry, RegistryError};
use crate::schema::{Schema, SchemaError};
use crate::service::{HandlerSet, ServiceRecord, build_services};
use crate::transport::{self, MessageLimits};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::transport::Server;

/// Phases of the server lifecycle, as they appear in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Unstarted,
    LoadingSchema,
    ResolvingDescriptors,
    RegisteringServices,
    Binding,
    Serving,
    ShuttingDown,
    Terminal,
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerPhase::Unstarted => "unstarted",
            ServerPhase::LoadingSchema => "loading-schema",
            ServerPhase::ResolvingDescriptors => "resolving-descriptors",
            ServerPhase::RegisteringServices => "registering-services",
            ServerPhase::Binding => "binding",
            ServerPhase::Serving => "serving",
            ServerPhase::ShuttingDown => "shutting-down",
            ServerPhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to load schema: '{0}'")]
    Schema(#[from] SchemaError),
    #[error("Failed to resolve descriptors: '{0}'")]
    Registry(#[from] RegistryError),
    #[error("Failed to build the reflection service: '{0}'")]
    Reflection(#[from] tonic_reflection::server::Error),
    #[error("Failed to bind listener on '{addr}': '{source}'")]
    ListenerBind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

impl StartupError {
    /// The phase that failed.
    pub fn phase(&self) -> ServerPhase {
        match self {
            StartupError::Schema(_) => ServerPhase::LoadingSchema,
            StartupError::Registry(_) => ServerPhase::ResolvingDescriptors,
            StartupError::Reflection(_) => ServerPhase::RegisteringServices,
            StartupError::ListenerBind { .. } => ServerPhase::Binding,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ServerOptions {
    principal_file: Option<String>,
    reflection: bool,
    limits: MessageLimits,
}

/// A gRPC server whose services are described by a descriptor set loaded at runtime.
///
/// The generic parameter `S` represents the current startup phase.
#[derive(Debug)]
pub struct DynamicServer<S = Unstarted> {
    options: ServerOptions,
    state: S,
}

/// State: nothing loaded yet.
#[derive(Debug, Default)]
pub struct Unstarted;

/// State: descriptor set parsed.
#[derive(Debug)]
pub struct SchemaLoaded {
    schema: Schema,
}

/// State: descriptors resolved.
#[derive(Debug)]
pub struct Resolved {
    schema: Schema,
    registry: DescriptorRegistry,
}

/// State: every method has a route.
#[derive(Debug)]
pub struct Registered {
    services: Vec<ServiceRecord>,
    routes: Routes,
}

/// State: listening.
#[derive(Debug)]
pub struct Bound {
    services: Vec<ServiceRecord>,
    routes: Routes,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Default for DynamicServer<Unstarted> {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicServer<Unstarted> {
    pub fn new() -> Self {
        Self {
            options: ServerOptions::default(),
            state: Unstarted,
        }
    }

    /// Forces the file whose services are served (e.g. `helloworld.proto`) instead of
    /// selecting it automatically.
    pub fn principal_file(mut self, name: impl Into<String>) -> Self {
        self.options.principal_file = Some(name.into());
        self
    }

    /// Also serves `grpc.reflection.v1.ServerReflection` describing the loaded schema.
    pub fn reflection(mut self, enabled: bool) -> Self {
        self.options.reflection = enabled;
        self
    }

    /// Limits the size of a decoded request message.
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.options.limits.max_decoding_message_size = Some(limit);
        self
    }

    /// Limits the size of an encoded response message.
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.options.limits.max_encoding_message_size = Some(limit);
        self
    }

    /// Parses a serialized `FileDescriptorSet`.
    pub fn load_schema(self, bytes: &[u8]) -> Result<DynamicServer<SchemaLoaded>, StartupError> {
        tracing::info!(phase = %ServerPhase::LoadingSchema, bytes = bytes.len(), "loading schema");

        let schema = Schema::decode_with_principal(bytes, self.options.principal_file.as_deref())?;

        tracing::info!(
            files = schema.files().len(),
            principal = schema.principal().name(),
            "schema loaded"
        );

        Ok(self.with_schema(schema))
    }

    /// Starts from an already parsed schema.
    pub fn with_schema(self, schema: Schema) -> DynamicServer<SchemaLoaded> {
        DynamicServer {
            options: self.options,
            state: SchemaLoaded { schema },
        }
    }
}

impl DynamicServer<SchemaLoaded> {
    pub fn schema(&self) -> &Schema {
        &self.state.schema
    }

    /// Resolves every type reference of the schema.
    pub fn resolve(self) -> Result<DynamicServer<Resolved>, StartupError> {
        tracing::info!(phase = %ServerPhase::ResolvingDescriptors, "resolving descriptors");

        let schema = self.state.schema;
        let registry = DescriptorRegistry::resolve(&schema)?;

        tracing::info!(services = registry.services().count(), "descriptors resolved");

        Ok(DynamicServer {
            options: self.options,
            state: Resolved { schema, registry },
        })
    }
}

impl DynamicServer<Resolved> {
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.state.registry
    }

    /// Builds one record and route per method, binding the callbacks of `handlers`.
    pub fn register(self, handlers: HandlerSet) -> Result<DynamicServer<Registered>, StartupError> {
        tracing::info!(
            phase = %ServerPhase::RegisteringServices,
            handlers = handlers.len(),
            "registering services"
        );

        let Resolved { schema, registry } = self.state;
        let services = build_services(&registry, &handlers);
        let mut routes = transport::routes(&services, self.options.limits);

        if self.options.reflection {
            routes = routes.add_service(reflection_service(&schema)?);
            tracing::info!("server reflection enabled");
        }

        for service in &services {
            tracing::info!(
                service = service.name(),
                methods = service.methods().len(),
                "registered service"
            );
        }

        Ok(DynamicServer {
            options: self.options,
            state: Registered { services, routes },
        })
    }
}

impl DynamicServer<Registered> {
    pub fn services(&self) -> &[ServiceRecord] {
        &self.state.services
    }

    /// The routes serving every registered method, e.g. to mount them on another server or
    /// to call them in-process.
    pub fn routes(&self) -> Routes {
        self.state.routes.clone()
    }

    /// Opens the listener. A port of `0` picks a free port, see [`DynamicServer::local_addr`].
    pub async fn bind(self, addr: SocketAddr) -> Result<DynamicServer<Bound>, StartupError> {
        let bind_error = |source| StartupError::ListenerBind { addr, source };

        tracing::info!(phase = %ServerPhase::Binding, %addr, "binding listener");

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(%local_addr, "listener bound");

        let Registered { services, routes } = self.state;

        Ok(DynamicServer {
            options: self.options,
            state: Bound {
                services,
                routes,
                listener,
                local_addr,
            },
        })
    }
}

impl DynamicServer<Bound> {
    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    pub fn services(&self) -> &[ServiceRecord] {
        &self.state.services
    }

    /// Serves until the process is killed.
    pub async fn serve(self) -> Result<(), tonic::transport::Error> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serves until `signal` completes, then lets in-flight calls finish.
    pub async fn serve_with_shutdown(
        self,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), tonic::transport::Error> {
        let Bound {
            routes,
            listener,
            local_addr,
            ..
        } = self.state;

        tracing::info!(phase = %ServerPhase::Serving, %local_addr, "serving");

        let shutdown = async {
            signal.await;
            tracing::info!(phase = %ServerPhase::ShuttingDown, "shutting down");
        };

        let result = Server::builder()
            .add_routes(routes)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await;

        tracing::info!(phase = %ServerPhase::Terminal, "server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn greeter_bytes() -> Vec<u8> {
        fixtures::encode_set(vec![fixtures::common_file(), fixtures::greeter_file()])
    }

    #[test]
    fn test_phases_follow_each_other() {
        let server = DynamicServer::new().load_schema(&greeter_bytes()).unwrap();
        assert_eq!(server.schema().principal().name(), "greeter.proto");

        let server = server.resolve().unwrap();
        assert!(server.registry().get_service("greeter.Greeter").is_some());

        let server = server.register(HandlerSet::new()).unwrap();
        assert_eq!(server.services().len(), 1);
        assert_eq!(server.services()[0].methods().len(), 4);
    }

    #[test]
    fn test_startup_errors_name_the_failed_phase() {
        let err = DynamicServer::new().load_schema(&[0x0a, 0x10, 0x01]).unwrap_err();
        assert!(matches!(err, StartupError::Schema(SchemaError::Parse(_))));
        assert_eq!(err.phase(), ServerPhase::LoadingSchema);

        // greeter.proto without the file it imports.
        let bytes = fixtures::encode_set(vec![fixtures::greeter_file()]);
        let err = DynamicServer::new()
            .load_schema(&bytes)
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, StartupError::Registry(_)));
        assert_eq!(err.phase(), ServerPhase::ResolvingDescriptors);
    }

    #[test]
    fn test_principal_file_option() {
        let err = DynamicServer::new()
            .principal_file("ghost.proto")
            .load_schema(&greeter_bytes())
            .unwrap_err();

        assert!(matches!(
            err,
            StartupError::Schema(SchemaError::PrincipalNotFound(_))
        ));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(ServerPhase::ResolvingDescriptors.to_string(), "resolving-descriptors");
        assert_eq!(ServerPhase::Binding.to_string(), "binding");
        assert_eq!(ServerPhase::Terminal.to_string(), "terminal");
    }
}
