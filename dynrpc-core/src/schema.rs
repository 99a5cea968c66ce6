//! # Schema Loader
//!
//! Parses a binary `FileDescriptorSet` (as produced by `protoc --descriptor_set_out`) and
//! selects the *principal* file, the one whose services are going to be served.
//!
//! The loader is a pure transformation: nothing is resolved here. Type references are still
//! plain names until the set goes through the [`crate::registry`].
use prost::Message;
use prost::bytes::Buf;
use prost_types::{FileDescriptorProto, FileDescriptorSet};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to decode descriptor set: '{0}'")]
    Parse(#[from] prost::DecodeError),
    #[error("The descriptor set does not contain any file")]
    Empty,
    #[error("File '{0}' not found in the descriptor set")]
    PrincipalNotFound(String),
}

/// A decoded descriptor set with its principal file selected.
#[derive(Debug, Clone)]
pub struct Schema {
    files: Vec<FileDescriptorProto>,
    principal: usize,
}

impl Schema {
    /// Decodes a descriptor set, selecting the principal file automatically.
    ///
    /// The principal is the first file declaring at least one service. When no file declares
    /// services, the last file of the set is used, as `protoc` emits the requested file after
    /// its imports.
    pub fn decode(bytes: impl Buf) -> Result<Self, SchemaError> {
        Self::decode_with_principal(bytes, None)
    }

    /// Decodes a descriptor set, optionally forcing the principal file by name
    /// (e.g. `helloworld.proto`).
    pub fn decode_with_principal(
        bytes: impl Buf,
        principal: Option<&str>,
    ) -> Result<Self, SchemaError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::from_file_descriptor_set(set, principal)
    }

    /// Builds a schema from an already decoded descriptor set.
    pub fn from_file_descriptor_set(
        set: FileDescriptorSet,
        principal: Option<&str>,
    ) -> Result<Self, SchemaError> {
        let files = set.file;

        if files.is_empty() {
            return Err(SchemaError::Empty);
        }

        let principal = match principal {
            Some(name) => files
                .iter()
                .position(|f| f.name() == name)
                .ok_or_else(|| SchemaError::PrincipalNotFound(name.to_string()))?,
            None => files
                .iter()
                .position(|f| !f.service.is_empty())
                .unwrap_or(files.len() - 1),
        };

        Ok(Self { files, principal })
    }

    /// The file whose services are served.
    pub fn principal(&self) -> &FileDescriptorProto {
        &self.files[self.principal]
    }

    /// Every file of the set, in the order they were decoded.
    pub fn files(&self) -> &[FileDescriptorProto] {
        &self.files
    }

    /// Re-assembles the descriptor set, e.g. to feed a reflection service.
    pub fn to_file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.files.clone(),
        }
    }
}
