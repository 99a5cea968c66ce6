//! # Server Reflection
//!
//! Exposes the loaded schema through the standard `grpc.reflection.v1.ServerReflection`
//! service, so tools such as `grpcurl` can list and describe the served methods without
//! having a copy of the descriptor set.
use crate::schema::Schema;
use tonic_reflection::server::Error;
use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};

/// Builds a reflection service describing every file of `schema`.
pub fn reflection_service(
    schema: &Schema,
) -> Result<ServerReflectionServer<impl ServerReflection>, Error> {
    tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(schema.to_file_descriptor_set())
        .build_v1()
}
