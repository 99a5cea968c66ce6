//! # Transport
//!
//! Glue between the [`Dispatcher`]s built from the schema and `tonic`'s server.
//!
//! Generated gRPC servers know their routes at compile time (`NamedService::NAME`). Here the
//! routes only exist once the schema is loaded, so they are assembled on an `axum::Router`
//! (the router `tonic::service::Routes` is built on) with one route per method path.
//!
//! ## Per call
//!
//! * The `grpc-timeout` header, when present, becomes the deadline of the [`CallContext`].
//! * The call runs inside a `call` tracing span carrying the method name.
//! * If the transport drops the call before it completes (the client went away), the
//!   context's cancellation token fires.
//! * Unknown paths answer `UNIMPLEMENTED`.
pub mod codec;

use self::codec::BytesCodec;
use crate::BoxError;
use crate::dispatch::{CallContext, Dispatcher};
use crate::service::ServiceRecord;
use http_body::Body as HttpBody;
use prost::bytes::Bytes;
use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::{
    Request, Response, Status,
    codegen::{BoxFuture, Service},
    server::{Grpc, UnaryService},
    service::Routes,
};
use tracing::Instrument;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Maximum message sizes enforced while reading requests and writing responses.
/// `None` keeps tonic's defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageLimits {
    pub max_decoding_message_size: Option<usize>,
    pub max_encoding_message_size: Option<usize>,
}

/// Builds the routes serving every method of `services`.
pub fn routes(services: &[ServiceRecord], limits: MessageLimits) -> Routes {
    let mut router = axum::Router::new();

    for service in services {
        for method in service.methods() {
            let path = method.path();
            tracing::info!(
                path = %path,
                input = method.input().full_name(),
                output = method.output().full_name(),
                implemented = method.is_implemented(),
                "registered method"
            );

            let route = MethodRoute {
                dispatcher: method.dispatcher().clone(),
                limits,
            };
            router = router.route_service(&path, route);
        }
    }

    Routes::from(router.fallback(unknown_method))
}

async fn unknown_method(uri: http::Uri) -> http::Response<axum::body::Body> {
    tracing::debug!(path = uri.path(), "call to an unknown method");
    Status::unimplemented(format!("Unknown method '{}'", uri.path())).into_http()
}

/// The HTTP service behind one method path.
#[derive(Debug, Clone)]
struct MethodRoute {
    dispatcher: Dispatcher,
    limits: MessageLimits,
}

impl<B> Service<http::Request<B>> for MethodRoute
where
    B: HttpBody + Send + 'static,
    B::Error: Into<BoxError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let deadline = grpc_timeout(req.headers()).map(|timeout| Instant::now() + timeout);
        let span = tracing::info_span!("call", method = self.dispatcher.method().full_name());
        let call = UnaryCall {
            dispatcher: self.dispatcher.clone(),
            deadline,
        };
        let limits = self.limits;

        let fut = async move {
            let mut grpc = Grpc::new(BytesCodec).apply_max_message_size_config(
                limits.max_decoding_message_size,
                limits.max_encoding_message_size,
            );
            Ok(grpc.unary(call, req).await)
        };

        Box::pin(fut.instrument(span))
    }
}

struct UnaryCall {
    dispatcher: Dispatcher,
    deadline: Option<Instant>,
}

impl UnaryService<Bytes> for UnaryCall {
    type Response = Bytes;
    type Future = BoxFuture<Response<Bytes>, Status>;

    fn call(&mut self, request: Request<Bytes>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        let deadline = self.deadline;

        Box::pin(async move {
            let token = CancellationToken::new();
            // Cancels the token if this future is dropped before the call completes.
            let guard = token.clone().drop_guard();

            let (metadata, _, input) = request.into_parts();
            let mut ctx = CallContext::new(dispatcher.method().clone())
                .with_metadata(metadata)
                .with_cancellation_token(token);
            if let Some(deadline) = deadline {
                ctx = ctx.with_deadline(deadline);
            }

            let result = dispatcher.invoke(&input, ctx).await;
            guard.disarm();

            match result {
                Ok(output) => {
                    tracing::debug!(bytes = output.len(), "call completed");
                    Ok(Response::new(output))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "call failed");
                    Err(err.into())
                }
            }
        })
    }
}

/// Parses a `grpc-timeout` header value: up to 8 digits followed by a unit.
fn grpc_timeout(headers: &http::HeaderMap) -> Option<Duration> {
    let value = headers.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;

    if value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (amount, unit) = value.split_at(value.len() - 1);
    let amount: u64 = amount.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };

    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageExt;
    use crate::dispatch::handler_fn;
    use crate::fixtures;
    use crate::registry::RegistryBuilder;
    use http::{HeaderMap, HeaderValue};
    use prost::Message;
    use prost_reflect::{DynamicMessage, Value};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn timeout(value: &'static str) -> Option<Duration> {
        let mut headers = HeaderMap::new();
        headers.insert(GRPC_TIMEOUT_HEADER, HeaderValue::from_static(value));
        grpc_timeout(&headers)
    }

    #[test]
    fn test_grpc_timeout_units() {
        assert_eq!(timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(timeout("10S"), Some(Duration::from_secs(10)));
        assert_eq!(timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(timeout("7u"), Some(Duration::from_micros(7)));
        assert_eq!(timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));
    }

    #[test]
    fn test_malformed_grpc_timeout_is_ignored() {
        assert_eq!(timeout("S"), None);
        assert_eq!(timeout("10"), None);
        assert_eq!(timeout("10s"), None);
        assert_eq!(timeout("123456789S"), None);
        assert_eq!(timeout("-1S"), None);
        assert_eq!(grpc_timeout(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_dropped_call_cancels_the_running_handler() {
        let mut builder = RegistryBuilder::new();
        builder.register(fixtures::common_file()).unwrap();
        builder.register(fixtures::greeter_file()).unwrap();
        let registry = builder.build("greeter.proto").unwrap();
        let method = registry.get_method("greeter.Greeter", "SayHello").unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (cancelled_tx, mut cancelled_rx) = mpsc::unbounded_channel();

        let handler = handler_fn(move |ctx, _| {
            let started_tx = started_tx.clone();
            let cancelled_tx = cancelled_tx.clone();
            async move {
                let watcher = ctx.clone();
                tokio::spawn(async move {
                    watcher.cancelled().await;
                    let _ = cancelled_tx.send(watcher.is_cancelled());
                });

                let _ = started_tx.send(());
                std::future::pending::<()>().await;
                Ok::<_, Status>(ctx.new_response())
            }
        });

        let mut call = UnaryCall {
            dispatcher: Dispatcher::new(method.clone(), Some(Arc::new(handler))),
            deadline: None,
        };

        let mut input = DynamicMessage::new(method.input());
        input.set("name", Value::String("World".to_string())).unwrap();
        let request = Request::new(Bytes::from(input.encode_to_vec()));

        let task = tokio::spawn(call.call(request));

        tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .expect("handler never started")
            .unwrap();

        // The client going away drops the in-flight call.
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let observed = tokio::time::timeout(Duration::from_secs(5), cancelled_rx.recv())
            .await
            .expect("handler was not told about the cancellation")
            .unwrap();
        assert!(observed);
    }

    #[tokio::test]
    async fn test_completed_call_does_not_cancel_its_context() {
        let mut builder = RegistryBuilder::new();
        builder.register(fixtures::common_file()).unwrap();
        builder.register(fixtures::greeter_file()).unwrap();
        let registry = builder.build("greeter.proto").unwrap();
        let method = registry.get_method("greeter.Greeter", "SayHello").unwrap();

        let (token_tx, mut token_rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |ctx, _| {
            let token_tx = token_tx.clone();
            async move {
                let _ = token_tx.send(ctx.cancellation_token().clone());
                let mut reply = ctx.new_response();
                reply.set("message", Value::String("done".to_string()))?;
                Ok::<_, Status>(reply)
            }
        });

        let mut call = UnaryCall {
            dispatcher: Dispatcher::new(method.clone(), Some(Arc::new(handler))),
            deadline: None,
        };

        let response = call.call(Request::new(Bytes::new())).await.unwrap();
        assert!(!response.into_inner().is_empty());

        let token = token_rx.recv().await.unwrap();
        assert!(!token.is_cancelled());
    }
}
