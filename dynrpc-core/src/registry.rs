//! # Descriptor Registry
//!
//! This module turns the files of a [`Schema`] into a resolved, immutable
//! [`DescriptorRegistry`]. It acts as the database of schema definitions for the rest of the
//! server: services, methods and message types are looked up here by fully qualified name.
//!
//! Resolution happens in two steps:
//!
//! 1. **Registration** ([`RegistryBuilder::register`]): every symbol a file defines is recorded.
//!    A name can only be defined once; re-registering the very same file is a no-op.
//! 2. **Build** ([`RegistryBuilder::build`]): imports and type references are checked, then the
//!    files are loaded into a `prost_reflect::DescriptorPool` in dependency order.
//!
//! Once built the registry is never mutated, so it can be shared between every in-flight call
//! without synchronization.
use crate::schema::Schema;
use prost_reflect::{
    DescriptorPool, FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
use prost_types::{
    DescriptorProto, FileDescriptorProto, FileDescriptorSet, field_descriptor_proto::Type,
};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("'{name}' is already defined in '{first}' (redefined in '{second}')")]
    DuplicateRegistration {
        name: String,
        first: String,
        second: String,
    },
    #[error("Message '{message}' uses field number {number} more than once")]
    DuplicateFieldTag { message: String, number: i32 },
    #[error("'{referenced_by}' references type '{type_name}' which is not defined")]
    UnresolvedType {
        referenced_by: String,
        type_name: String,
    },
    #[error("'{referenced_by}' references '{type_name}', a {found}, but a {expected} is required")]
    UnexpectedKind {
        referenced_by: String,
        type_name: String,
        expected: &'static str,
        found: SymbolKind,
    },
    #[error("File '{file}' imports '{dependency}' which is not part of the descriptor set")]
    UnresolvedDependency { file: String, dependency: String },
    #[error("File '{0}' is not registered")]
    PrincipalNotRegistered(String),
    #[error("Invalid descriptor set: '{0}'")]
    Invalid(#[from] prost_reflect::DescriptorError),
}

/// The kind of definition a fully qualified name points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Message,
    Enum,
    Field,
    Service,
    Method,
}

impl SymbolKind {
    fn is_type(self) -> bool {
        matches!(self, SymbolKind::Message | SymbolKind::Enum)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Message => "message",
            SymbolKind::Enum => "enum",
            SymbolKind::Field => "field",
            SymbolKind::Service => "service",
            SymbolKind::Method => "method",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Symbol {
    kind: SymbolKind,
    file: String,
}

/// Accumulates schema files before they are resolved into a [`DescriptorRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    files: Vec<FileDescriptorProto>,
    symbols: HashMap<String, Symbol>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every symbol defined by `file`.
    ///
    /// Registration is idempotent per file: registering a file whose name and content match an
    /// already registered file is a no-op. Two distinct files defining the same name conflict
    /// even when their definitions are identical.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The file was registered, or an identical file with the same name already was.
    /// * `Err(RegistryError::DuplicateRegistration)` - A name defined by `file` is already taken
    ///   by another file, or another file with the same name but different content was
    ///   registered.
    /// * `Err(RegistryError::DuplicateFieldTag)` - A message reuses a field number.
    pub fn register(&mut self, file: FileDescriptorProto) -> Result<(), RegistryError> {
        if let Some(existing) = self.files.iter().find(|f| f.name() == file.name()) {
            if *existing == file {
                return Ok(());
            }

            return Err(RegistryError::DuplicateRegistration {
                name: file.name().to_string(),
                first: existing.name().to_string(),
                second: file.name().to_string(),
            });
        }

        let mut defined = HashMap::new();

        for (name, kind) in collect_symbols(&file)? {
            if let Some(first) = self.symbols.get(&name).or_else(|| defined.get(&name)) {
                return Err(RegistryError::DuplicateRegistration {
                    name,
                    first: first.file.clone(),
                    second: file.name().to_string(),
                });
            }

            let symbol = Symbol {
                kind,
                file: file.name().to_string(),
            };
            defined.insert(name, symbol);
        }

        self.symbols.extend(defined);
        self.files.push(file);
        Ok(())
    }

    /// Checks every import and type reference, then loads the registered files into a
    /// descriptor pool.
    ///
    /// # Arguments
    ///
    /// * `principal` - Name of the file whose services are going to be served.
    pub fn build(self, principal: &str) -> Result<DescriptorRegistry, RegistryError> {
        if !self.files.iter().any(|f| f.name() == principal) {
            return Err(RegistryError::PrincipalNotRegistered(principal.to_string()));
        }

        let known: HashSet<&str> = self.files.iter().map(|f| f.name()).collect();

        for file in &self.files {
            if let Some(dependency) = file
                .dependency
                .iter()
                .find(|d| !known.contains(d.as_str()))
            {
                return Err(RegistryError::UnresolvedDependency {
                    file: file.name().to_string(),
                    dependency: dependency.clone(),
                });
            }
        }

        for file in &self.files {
            self.check_references(file)?;
        }

        let set = FileDescriptorSet {
            file: dependency_order(self.files),
        };
        let pool = DescriptorPool::from_file_descriptor_set(set)?;
        let file = pool
            .get_file_by_name(principal)
            .ok_or_else(|| RegistryError::PrincipalNotRegistered(principal.to_string()))?;

        Ok(DescriptorRegistry { pool, file })
    }

    fn check_references(&self, file: &FileDescriptorProto) -> Result<(), RegistryError> {
        let package = file.package();

        for message in &file.message_type {
            self.check_message(package, message)?;
        }

        for service in &file.service {
            let service_name = qualify(package, service.name());

            for method in &service.method {
                let referenced_by = qualify(&service_name, method.name());

                for type_name in [method.input_type(), method.output_type()] {
                    self.expect(
                        package,
                        &referenced_by,
                        type_name,
                        &[SymbolKind::Message],
                    )?;
                }
            }
        }

        Ok(())
    }

    fn check_message(&self, scope: &str, message: &DescriptorProto) -> Result<(), RegistryError> {
        let name = qualify(scope, message.name());

        for field in message.field.iter().filter(|f| f.type_name.is_some()) {
            let expected: &[SymbolKind] = match field.r#type.map(|_| field.r#type()) {
                Some(Type::Message | Type::Group) => &[SymbolKind::Message],
                Some(Type::Enum) => &[SymbolKind::Enum],
                _ => &[SymbolKind::Message, SymbolKind::Enum],
            };

            let referenced_by = qualify(&name, field.name());
            self.expect(&name, &referenced_by, field.type_name(), expected)?;
        }

        for nested in &message.nested_type {
            self.check_message(&name, nested)?;
        }

        Ok(())
    }

    fn expect(
        &self,
        scope: &str,
        referenced_by: &str,
        type_name: &str,
        expected: &[SymbolKind],
    ) -> Result<(), RegistryError> {
        let symbol = self
            .lookup(scope, type_name)
            .ok_or_else(|| RegistryError::UnresolvedType {
                referenced_by: referenced_by.to_string(),
                type_name: type_name.to_string(),
            })?;

        if expected.contains(&symbol.kind) {
            return Ok(());
        }

        Err(RegistryError::UnexpectedKind {
            referenced_by: referenced_by.to_string(),
            type_name: type_name.to_string(),
            expected: if expected.len() > 1 {
                "message or enum"
            } else if expected[0] == SymbolKind::Enum {
                "enum"
            } else {
                "message"
            },
            found: symbol.kind,
        })
    }

    /// Resolves `name` the way `protoc` does: a leading dot means fully qualified, otherwise
    /// the innermost enclosing scope defining a message or enum of that name wins. Fields,
    /// services and methods never shadow a type.
    fn lookup(&self, scope: &str, name: &str) -> Option<&Symbol> {
        if name.is_empty() {
            return None;
        }

        if let Some(full_name) = name.strip_prefix('.') {
            return self.symbols.get(full_name);
        }

        let mut scope = scope;
        loop {
            if let Some(symbol) = self
                .symbols
                .get(&qualify(scope, name))
                .filter(|symbol| symbol.kind.is_type())
            {
                return Some(symbol);
            }

            if scope.is_empty() {
                return None;
            }

            scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
        }
    }
}

/// Resolved descriptors of a schema, keyed by fully qualified name.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
    file: FileDescriptor,
}

impl DescriptorRegistry {
    /// Registers every file of the schema and resolves it.
    pub fn resolve(schema: &Schema) -> Result<Self, RegistryError> {
        let mut builder = RegistryBuilder::new();

        for file in schema.files() {
            builder.register(file.clone())?;
        }

        builder.build(schema.principal().name())
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// The principal file.
    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    /// Services declared by the principal file.
    pub fn services(&self) -> impl Iterator<Item = ServiceDescriptor> + '_ {
        self.file.services()
    }

    pub fn get_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }

    pub fn get_service(&self, full_name: &str) -> Option<ServiceDescriptor> {
        self.pool.get_service_by_name(full_name)
    }

    /// Looks up a method by service full name (`greeter.Greeter`) and method name (`SayHello`).
    pub fn get_method(&self, service: &str, method: &str) -> Option<MethodDescriptor> {
        self.get_service(service)?
            .methods()
            .find(|m| m.name() == method)
    }
}

fn collect_symbols(
    file: &FileDescriptorProto,
) -> Result<Vec<(String, SymbolKind)>, RegistryError> {
    let package = file.package();
    let mut symbols = Vec::new();

    for message in &file.message_type {
        collect_message(package, message, &mut symbols)?;
    }

    for enum_type in &file.enum_type {
        symbols.push((qualify(package, enum_type.name()), SymbolKind::Enum));
    }

    for service in &file.service {
        let service_name = qualify(package, service.name());

        for method in &service.method {
            symbols.push((qualify(&service_name, method.name()), SymbolKind::Method));
        }

        symbols.push((service_name, SymbolKind::Service));
    }

    Ok(symbols)
}

fn collect_message(
    scope: &str,
    message: &DescriptorProto,
    symbols: &mut Vec<(String, SymbolKind)>,
) -> Result<(), RegistryError> {
    let name = qualify(scope, message.name());
    let mut numbers = HashSet::new();

    for field in &message.field {
        if !numbers.insert(field.number()) {
            return Err(RegistryError::DuplicateFieldTag {
                message: name,
                number: field.number(),
            });
        }

        symbols.push((qualify(&name, field.name()), SymbolKind::Field));
    }

    for nested in &message.nested_type {
        collect_message(&name, nested, symbols)?;
    }

    for enum_type in &message.enum_type {
        symbols.push((qualify(&name, enum_type.name()), SymbolKind::Enum));
    }

    symbols.push((name, SymbolKind::Message));
    Ok(())
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// Orders files so that every import comes before the files importing it.
fn dependency_order(files: Vec<FileDescriptorProto>) -> Vec<FileDescriptorProto> {
    let names: Vec<String> = files.iter().map(|f| f.name().to_string()).collect();
    let mut pending: HashMap<String, FileDescriptorProto> =
        names.iter().cloned().zip(files).collect();
    let mut ordered = Vec::with_capacity(names.len());

    for name in &names {
        visit(name, &mut pending, &mut ordered);
    }

    ordered
}

fn visit(
    name: &str,
    pending: &mut HashMap<String, FileDescriptorProto>,
    ordered: &mut Vec<FileDescriptorProto>,
) {
    let Some(file) = pending.remove(name) else {
        return;
    };

    for dependency in &file.dependency {
        visit(dependency, pending, ordered);
    }

    ordered.push(file);
}
