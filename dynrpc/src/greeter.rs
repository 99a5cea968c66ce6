//! # Greeter
//!
//! The placeholder callback served by the binary: replies `Hello {name}`.
//!
//! It is bound to every unary method whose request has a string `name` field and whose
//! reply has a string `message` field (the shape of the classic `helloworld.Greeter`).
//! Other methods are left unbound and answer `UNIMPLEMENTED`.
use dynrpc_core::codec::MessageExt;
use dynrpc_core::dispatch::{CallContext, MethodHandler};
use dynrpc_core::prost_reflect::{DynamicMessage, Kind, MessageDescriptor, MethodDescriptor, Value};
use dynrpc_core::registry::DescriptorRegistry;
use dynrpc_core::service::HandlerSet;
use dynrpc_core::tonic::{self, Status};
use std::sync::Arc;

const NAME_FIELD: &str = "name";
const MESSAGE_FIELD: &str = "message";

pub struct Greeter;

#[tonic::async_trait]
impl MethodHandler for Greeter {
    async fn call(
        &self,
        ctx: CallContext,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        let name = request.get_str(NAME_FIELD)?;

        let mut reply = ctx.new_response();
        reply.set(MESSAGE_FIELD, Value::String(format!("Hello {name}")))?;

        Ok(reply)
    }
}

/// Whether the greeting can serve `method`.
pub fn fits(method: &MethodDescriptor) -> bool {
    !method.is_client_streaming()
        && !method.is_server_streaming()
        && has_string_field(&method.input(), NAME_FIELD)
        && has_string_field(&method.output(), MESSAGE_FIELD)
}

fn has_string_field(message: &MessageDescriptor, name: &str) -> bool {
    message
        .get_field_by_name(name)
        .is_some_and(|field| field.kind() == Kind::String && !field.is_list())
}

/// Binds the greeting to every method of the principal file it fits.
pub fn handlers(registry: &DescriptorRegistry) -> HandlerSet {
    let greeter: Arc<dyn MethodHandler> = Arc::new(Greeter);
    let mut handlers = HandlerSet::new();

    for service in registry.services() {
        for method in service.methods() {
            if fits(&method) {
                tracing::info!(method = method.full_name(), "greeting bound");
                handlers.insert_shared(method.full_name(), greeter.clone());
            } else {
                tracing::debug!(method = method.full_name(), "method left unimplemented");
            }
        }
    }

    handlers
}
