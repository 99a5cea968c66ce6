//! # Dynamic Message Codec
//!
//! Encodes and decodes Protobuf wire bytes into `prost_reflect::DynamicMessage`s, using nothing
//! but the `MessageDescriptor` of the target type.
//!
//! ## Guarantees
//!
//! * **Decoding** fails only on structurally invalid bytes (truncated varints, bad tags, lengths
//!   past the end of the buffer). Fields unknown to the descriptor are kept and re-emitted.
//! * **Encoding** checks that the message is of the expected type and that every value set on
//!   it matches its field declaration before writing anything. Fields are written in ascending
//!   tag order, so the output is reproducible.
//!
//! The [`MessageExt`] extension trait offers type checked accessors for application callbacks.
use prost::Message;
use prost::bytes::{Bytes, BytesMut};
use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, SetFieldError,
    Value,
};
use std::borrow::Cow;
use tonic::Status;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to decode '{message}': '{source}'")]
    Decode {
        message: String,
        #[source]
        source: prost::DecodeError,
    },
    #[error("Failed to encode '{message}': '{source}'")]
    Encode {
        message: String,
        #[source]
        source: prost::EncodeError,
    },
    #[error("Expected a '{expected}' message, got '{found}'")]
    DescriptorMismatch { expected: String, found: String },
    #[error("Field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
    #[error("Message '{message}' has no field named '{field}'")]
    FieldNotFound { message: String, field: String },
}

impl CodecError {
    /// Whether a value, or a whole message, did not match its declared type.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(
            self,
            CodecError::TypeMismatch { .. } | CodecError::DescriptorMismatch { .. }
        )
    }
}

impl From<CodecError> for Status {
    fn from(err: CodecError) -> Self {
        Status::internal(err.to_string())
    }
}

/// Decodes `bytes` as a message of type `descriptor`.
pub fn decode(bytes: &[u8], descriptor: &MessageDescriptor) -> Result<DynamicMessage, CodecError> {
    DynamicMessage::decode(descriptor.clone(), bytes).map_err(|source| CodecError::Decode {
        message: descriptor.full_name().to_string(),
        source,
    })
}

/// Encodes `message`, which must be of type `descriptor`.
pub fn encode(
    message: &DynamicMessage,
    descriptor: &MessageDescriptor,
) -> Result<Bytes, CodecError> {
    let found = message.descriptor();
    if found.full_name() != descriptor.full_name() {
        return Err(CodecError::DescriptorMismatch {
            expected: descriptor.full_name().to_string(),
            found: found.full_name().to_string(),
        });
    }

    validate(message)?;

    let mut buf = BytesMut::with_capacity(message.encoded_len());
    message
        .encode(&mut buf)
        .map_err(|source| CodecError::Encode {
            message: descriptor.full_name().to_string(),
            source,
        })?;

    Ok(buf.freeze())
}

/// Recursively checks that every populated field holds a value of its declared type.
///
/// Values can be replaced through `get_field_mut` and friends without any check, so the
/// message is walked once more right before encoding.
fn validate(message: &DynamicMessage) -> Result<(), CodecError> {
    for (field, value) in message.fields() {
        if !value.is_valid_for_field(&field) {
            return Err(type_mismatch(&field, value));
        }

        match value {
            Value::Message(nested) => validate(nested)?,
            Value::List(items) => {
                for item in items {
                    if let Value::Message(nested) = item {
                        validate(nested)?;
                    }
                }
            }
            Value::Map(entries) => {
                for entry in entries.values() {
                    if let Value::Message(nested) = entry {
                        validate(nested)?;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Type checked field access on top of `DynamicMessage`, addressed by field name.
pub trait MessageExt {
    /// Sets a field, failing if the value does not match the field declaration.
    ///
    /// Setting the default value of a field without presence clears it, so the message
    /// compares equal to its decoded encoding.
    fn set(&mut self, field: &str, value: Value) -> Result<(), CodecError>;

    /// Gets a field value, or its default when unset.
    fn get(&self, field: &str) -> Result<Cow<'_, Value>, CodecError>;

    fn get_str(&self, field: &str) -> Result<String, CodecError>;

    fn get_i64(&self, field: &str) -> Result<i64, CodecError>;

    fn get_bool(&self, field: &str) -> Result<bool, CodecError>;
}

impl MessageExt for DynamicMessage {
    fn set(&mut self, field: &str, value: Value) -> Result<(), CodecError> {
        // Fields without presence never carry their default on the wire.
        if let Some(descriptor) = self.descriptor().get_field_by_name(field)
            && !descriptor.supports_presence()
            && value.is_valid_for_field(&descriptor)
            && value.is_default_for_field(&descriptor)
        {
            self.clear_field(&descriptor);
            return Ok(());
        }

        self.try_set_field_by_name(field, value)
            .map_err(|err| match err {
                SetFieldError::InvalidType { field, value } => type_mismatch(&field, &value),
                _ => self.field_not_found(field),
            })
    }

    fn get(&self, field: &str) -> Result<Cow<'_, Value>, CodecError> {
        self.get_field_by_name(field)
            .ok_or_else(|| self.field_not_found(field))
    }

    fn get_str(&self, field: &str) -> Result<String, CodecError> {
        self.get(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.unexpected(field, "string"))
    }

    fn get_i64(&self, field: &str) -> Result<i64, CodecError> {
        self.get(field)?
            .as_i64()
            .ok_or_else(|| self.unexpected(field, "int64"))
    }

    fn get_bool(&self, field: &str) -> Result<bool, CodecError> {
        self.get(field)?
            .as_bool()
            .ok_or_else(|| self.unexpected(field, "bool"))
    }
}

trait FieldErrors {
    fn field_not_found(&self, field: &str) -> CodecError;
    fn unexpected(&self, field: &str, requested: &str) -> CodecError;
}

impl FieldErrors for DynamicMessage {
    fn field_not_found(&self, field: &str) -> CodecError {
        CodecError::FieldNotFound {
            message: self.descriptor().full_name().to_string(),
            field: field.to_string(),
        }
    }

    // The accessor asked for a different type than the one declared by the schema.
    fn unexpected(&self, field: &str, requested: &str) -> CodecError {
        match self.descriptor().get_field_by_name(field) {
            Some(descriptor) => CodecError::TypeMismatch {
                field: descriptor.full_name().to_string(),
                expected: requested.to_string(),
                found: describe_field(&descriptor),
            },
            None => self.field_not_found(field),
        }
    }
}

fn type_mismatch(field: &FieldDescriptor, value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        field: field.full_name().to_string(),
        expected: describe_field(field),
        found: describe_value(value),
    }
}

fn describe_field(field: &FieldDescriptor) -> String {
    let kind = describe_kind(&field.kind());

    if field.is_map() {
        format!("map entry {kind}")
    } else if field.is_list() {
        format!("repeated {kind}")
    } else {
        kind
    }
}

fn describe_kind(kind: &Kind) -> String {
    let name = match kind {
        Kind::Double => "double",
        Kind::Float => "float",
        Kind::Int32 => "int32",
        Kind::Int64 => "int64",
        Kind::Uint32 => "uint32",
        Kind::Uint64 => "uint64",
        Kind::Sint32 => "sint32",
        Kind::Sint64 => "sint64",
        Kind::Fixed32 => "fixed32",
        Kind::Fixed64 => "fixed64",
        Kind::Sfixed32 => "sfixed32",
        Kind::Sfixed64 => "sfixed64",
        Kind::Bool => "bool",
        Kind::String => "string",
        Kind::Bytes => "bytes",
        Kind::Message(message) => return message.full_name().to_string(),
        Kind::Enum(enum_type) => return enum_type.full_name().to_string(),
    };
    name.to_string()
}

fn describe_value(value: &Value) -> String {
    let name = match value {
        Value::Bool(_) => "bool",
        Value::I32(_) => "int32",
        Value::I64(_) => "int64",
        Value::U32(_) => "uint32",
        Value::U64(_) => "uint64",
        Value::F32(_) => "float",
        Value::F64(_) => "double",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::EnumNumber(_) => "enum",
        Value::Message(message) => return message.descriptor().full_name().to_string(),
        Value::List(_) => "list",
        Value::Map(_) => "map",
    };
    name.to_string()
}
