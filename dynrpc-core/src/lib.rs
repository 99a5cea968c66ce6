//! # Dynrpc Core
//!
//! `dynrpc-core` is the foundational library powering the `dynrpc` server. It serves any
//! unary gRPC contract described by a Protobuf `FileDescriptorSet` loaded at runtime,
//! without generated bindings for the messages or services involved.
//!
//! ## Key Components
//!
//! * **[`schema::Schema`]:** Parses a serialized descriptor set and selects the principal file.
//! * **[`registry::DescriptorRegistry`]:** Resolves every type reference once at startup and
//!   rejects duplicate or dangling definitions. Immutable afterwards.
//! * **[`codec`]:** Decodes and encodes `DynamicMessage`s purely from descriptor metadata.
//! * **[`dispatch::Dispatcher`]:** Runs one call: decode, application callback, encode.
//! * **[`service::build_services`]:** Produces one registration record per described method.
//! * **[`server::DynamicServer`]:** A typestate wrapper driving the startup phases up to `Serving`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynrpc_core::dispatch::handler_fn;
//! use dynrpc_core::codec::MessageExt;
//! use dynrpc_core::server::DynamicServer;
//! use dynrpc_core::service::HandlerSet;
//! use dynrpc_core::prost_reflect::Value;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("descriptor.bin")?;
//!
//! let mut handlers = HandlerSet::new();
//! handlers.insert(
//!     "helloworld.Greeter/SayHello",
//!     handler_fn(|ctx, request| async move {
//!         let name = request.get_str("name").map_err(dynrpc_core::tonic::Status::from)?;
//!         let mut reply = ctx.new_response();
//!         reply
//!             .set("message", Value::String(format!("Hello {name}")))
//!             .map_err(dynrpc_core::tonic::Status::from)?;
//!         Ok::<_, dynrpc_core::tonic::Status>(reply)
//!     }),
//! );
//!
//! DynamicServer::new()
//!     .load_schema(&bytes)?
//!     .resolve()?
//!     .register(handlers)?
//!     .bind("127.0.0.1:8080".parse()?)
//!     .await?
//!     .serve_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod codec;
pub mod dispatch;
pub mod reflection;
pub mod registry;
pub mod schema;
pub mod server;
pub mod service;
pub mod transport;

#[cfg(test)]
mod fixtures;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
