//! `helloworld.proto` built by hand, the prost messages a client would generate for it, and
//! helpers to call the in-process routes.
#![allow(dead_code)]

use dynrpc_core::codec::MessageExt;
use dynrpc_core::dispatch::{MethodHandler, handler_fn};
use dynrpc_core::prost_reflect::Value;
use dynrpc_core::tonic::codegen::http::uri::PathAndQuery;
use dynrpc_core::tonic::service::Routes;
use dynrpc_core::tonic::{Request, Response, Status};
use dynrpc_core::transport::codec::BytesCodec;
use prost::Message;
use prost::bytes::Bytes;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};

pub const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";
pub const SAY_GOODBYE: &str = "/helloworld.Greeter/SayGoodbye";
pub const LOTS_OF_REPLIES: &str = "/helloworld.Greeter/LotsOfReplies";

#[derive(Clone, PartialEq, Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// A newer client revision of `HelloRequest`, with a field the server does not know about.
#[derive(Clone, PartialEq, Message)]
pub struct HelloRequestV2 {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "7")]
    pub retries: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

pub fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

pub fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        ..Default::default()
    }
}

/// `helloworld.proto` with the given methods on `helloworld.Greeter`.
pub fn greeter_file(methods: Vec<MethodDescriptorProto>) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("helloworld.proto".to_string()),
        package: Some("helloworld".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![
            message("HelloRequest", vec![field("name", 1, Type::String)]),
            message("HelloReply", vec![field("message", 1, Type::String)]),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Greeter".to_string()),
            method: methods,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// `SayHello` and `SayGoodbye` (unary) plus `LotsOfReplies` (server streaming).
pub fn helloworld() -> FileDescriptorProto {
    let lots_of_replies = MethodDescriptorProto {
        server_streaming: Some(true),
        ..method(
            "LotsOfReplies",
            ".helloworld.HelloRequest",
            ".helloworld.HelloReply",
        )
    };

    greeter_file(vec![
        method("SayHello", ".helloworld.HelloRequest", ".helloworld.HelloReply"),
        method("SayGoodbye", ".helloworld.HelloRequest", ".helloworld.HelloReply"),
        lots_of_replies,
    ])
}

pub fn encode_set(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

pub fn helloworld_bytes() -> Vec<u8> {
    encode_set(vec![helloworld()])
}

/// Answers `Hello {name}`.
pub fn greet() -> impl MethodHandler {
    handler_fn(|ctx, request| async move {
        let name = request.get_str("name")?;
        let mut reply = ctx.new_response();
        reply.set("message", Value::String(format!("Hello {name}")))?;
        Ok::<_, Status>(reply)
    })
}

pub async fn call(routes: &Routes, path: &'static str, body: Vec<u8>) -> Result<Bytes, Status> {
    call_with(routes, path, Request::new(Bytes::from(body))).await
}

pub async fn call_with(
    routes: &Routes,
    path: &'static str,
    request: Request<Bytes>,
) -> Result<Bytes, Status> {
    let mut client = dynrpc_core::tonic::client::Grpc::new(routes.clone());

    client.ready().await.expect("routes are always ready");

    client
        .unary(request, PathAndQuery::from_static(path), BytesCodec)
        .await
        .map(Response::into_inner)
}

pub async fn say_hello(routes: &Routes, name: &str) -> Result<HelloReply, Status> {
    let request = HelloRequest {
        name: name.to_string(),
    };

    let bytes = call(routes, SAY_HELLO, request.encode_to_vec()).await?;

    Ok(HelloReply::decode(bytes).expect("server replied with a valid HelloReply"))
}
