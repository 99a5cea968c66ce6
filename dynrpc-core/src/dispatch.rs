//! # Generic Dispatcher
//!
//! This module runs a single unary call against a method described at runtime:
//!
//! 1. **Decode** the request bytes with the method's input descriptor.
//! 2. **Invoke** the application callback ([`MethodHandler`]) bound to the method.
//! 3. **Encode** the callback's result with the method's output descriptor.
//!
//! A [`Dispatcher`] only holds immutable descriptors and a shared handler, so one instance can
//! serve any number of concurrent calls. Every call gets its own [`CallContext`] and its own
//! messages; nothing is shared between calls.
//!
//! ## Cancellation
//!
//! The [`CallContext`] carries the caller's deadline and a cancellation token. The dispatcher
//! gives up with [`CallError::Cancelled`] (or [`CallError::DeadlineExceeded`]) if the call is
//! cancelled before the callback starts. Once the callback runs it is never interrupted; it can
//! watch [`CallContext::cancelled`] on its own.
use crate::codec::{self, CodecError};
use prost::bytes::Bytes;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::{fmt, future::Future, sync::Arc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::{Status, metadata::MetadataMap};

/// Errors a single call can end with. None of them affects other calls.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Failed to decode request of '{method}': '{source}'")]
    Decode {
        method: String,
        #[source]
        source: CodecError,
    },
    #[error("Response of '{method}' does not match the schema: '{source}'")]
    TypeMismatch {
        method: String,
        #[source]
        source: CodecError,
    },
    #[error("Failed to encode response of '{method}': '{source}'")]
    Encode {
        method: String,
        #[source]
        source: CodecError,
    },
    #[error("Method '{0}' is not implemented")]
    Unimplemented(String),
    #[error("Method '{0}' is a streaming method, only unary calls are supported")]
    Streaming(String),
    #[error("Call to '{0}' was cancelled")]
    Cancelled(String),
    #[error("Deadline exceeded for '{0}'")]
    DeadlineExceeded(String),
    #[error("Handler of '{method}' failed: '{}'", status.message())]
    Handler { method: String, status: Status },
}

impl From<CallError> for Status {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Handler { status, .. } => status,
            CallError::Decode { .. } | CallError::TypeMismatch { .. } | CallError::Encode { .. } => {
                Status::internal(err.to_string())
            }
            CallError::Unimplemented(_) | CallError::Streaming(_) => {
                Status::unimplemented(err.to_string())
            }
            CallError::Cancelled(_) => Status::cancelled(err.to_string()),
            CallError::DeadlineExceeded(_) => Status::deadline_exceeded(err.to_string()),
        }
    }
}

/// An application callback bound to one method.
///
/// The request has already been decoded with the method's input descriptor; the returned
/// message must be of the method's output type (see [`CallContext::new_response`]).
/// A returned `Status` is sent to the caller as is.
#[tonic::async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: CallContext,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status>;
}

/// A [`MethodHandler`] backed by an async closure. See [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wraps an async closure into a [`MethodHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CallContext, DynamicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DynamicMessage, Status>> + Send + 'static,
{
    HandlerFn(f)
}

#[tonic::async_trait]
impl<F, Fut> MethodHandler for HandlerFn<F>
where
    F: Fn(CallContext, DynamicMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DynamicMessage, Status>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        (self.0)(ctx, request).await
    }
}

/// Per call information handed to the [`MethodHandler`].
#[derive(Debug, Clone)]
pub struct CallContext {
    method: MethodDescriptor,
    metadata: MetadataMap,
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl CallContext {
    pub fn new(method: MethodDescriptor) -> Self {
        Self {
            method,
            metadata: MetadataMap::new(),
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    /// Request metadata (gRPC headers).
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// An empty message of the method's output type.
    pub fn new_response(&self) -> DynamicMessage {
        DynamicMessage::new(self.method.output())
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Whether the caller went away or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.is_deadline_exceeded()
    }

    /// Completes once the call is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    fn check(&self) -> Result<(), CallError> {
        if self.is_deadline_exceeded() {
            return Err(CallError::DeadlineExceeded(
                self.method.full_name().to_string(),
            ));
        }

        if self.token.is_cancelled() {
            return Err(CallError::Cancelled(self.method.full_name().to_string()));
        }

        Ok(())
    }
}

/// The generic handler of one method: its descriptors plus the optional application callback.
#[derive(Clone)]
pub struct Dispatcher {
    method: MethodDescriptor,
    handler: Option<Arc<dyn MethodHandler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("method", &self.method.full_name())
            .field("bound", &self.handler.is_some())
            .finish()
    }
}

impl Dispatcher {
    /// Creates a dispatcher for `method`. Without a handler every call fails with
    /// [`CallError::Unimplemented`].
    pub fn new(method: MethodDescriptor, handler: Option<Arc<dyn MethodHandler>>) -> Self {
        Self { method, handler }
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn is_streaming(&self) -> bool {
        self.method.is_client_streaming() || self.method.is_server_streaming()
    }

    /// Whether calls can succeed: the method is unary and has a handler.
    pub fn is_implemented(&self) -> bool {
        self.handler.is_some() && !self.is_streaming()
    }

    /// Runs one call.
    ///
    /// # Arguments
    ///
    /// * `input` - The request, wire encoded.
    /// * `ctx` - The call context, handed over to the handler.
    ///
    /// # Returns
    ///
    /// * `Ok(Bytes)` - The wire encoded response.
    /// * `Err(CallError)` - The reason this call failed.
    pub async fn invoke(&self, input: &[u8], ctx: CallContext) -> Result<Bytes, CallError> {
        let method = self.method.full_name();

        if self.is_streaming() {
            return Err(CallError::Streaming(method.to_string()));
        }

        let Some(handler) = &self.handler else {
            return Err(CallError::Unimplemented(method.to_string()));
        };

        ctx.check()?;

        let request =
            codec::decode(input, &self.method.input()).map_err(|source| CallError::Decode {
                method: method.to_string(),
                source,
            })?;

        ctx.check()?;

        let response = handler
            .call(ctx, request)
            .await
            .map_err(|status| CallError::Handler {
                method: method.to_string(),
                status,
            })?;

        codec::encode(&response, &self.method.output()).map_err(|source| {
            if source.is_type_mismatch() {
                CallError::TypeMismatch {
                    method: method.to_string(),
                    source,
                }
            } else {
                CallError::Encode {
                    method: method.to_string(),
                    source,
                }
            }
        })
    }
}
