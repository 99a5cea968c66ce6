//! # Service Builder
//!
//! Walks the services of a resolved schema and produces one [`MethodRecord`] per method,
//! binding the method's descriptors to a [`Dispatcher`].
//!
//! Application callbacks are looked up in a [`HandlerSet`] by the method's fully qualified
//! name. Methods without a callback are registered anyway: they stay routable and answer
//! `UNIMPLEMENTED`, so every method of the schema is discoverable.
use crate::dispatch::{Dispatcher, MethodHandler};
use crate::registry::DescriptorRegistry;
use prost_reflect::{MessageDescriptor, MethodDescriptor};
use std::collections::HashMap;
use std::sync::Arc;

/// Application callbacks keyed by fully qualified method name.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to a method.
    ///
    /// # Arguments
    ///
    /// * `method` - Either `package.Service.Method` or `package.Service/Method`.
    pub fn insert(&mut self, method: &str, handler: impl MethodHandler) -> &mut Self {
        self.insert_shared(method, Arc::new(handler))
    }

    /// Binds an already shared handler, e.g. one callback serving several methods.
    pub fn insert_shared(&mut self, method: &str, handler: Arc<dyn MethodHandler>) -> &mut Self {
        self.handlers.insert(method.replace('/', "."), handler);
        self
    }

    pub fn get(&self, full_name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(full_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Registration record of one method.
#[derive(Debug, Clone)]
pub struct MethodRecord {
    service_name: String,
    method_name: String,
    dispatcher: Dispatcher,
}

impl MethodRecord {
    /// Fully qualified service name, e.g. `greeter.Greeter`.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Method name, e.g. `SayHello`.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The HTTP/2 path the method is served on, e.g. `/greeter.Greeter/SayHello`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service_name, self.method_name)
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        self.dispatcher.method()
    }

    pub fn input(&self) -> MessageDescriptor {
        self.dispatcher.method().input()
    }

    pub fn output(&self) -> MessageDescriptor {
        self.dispatcher.method().output()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_implemented(&self) -> bool {
        self.dispatcher.is_implemented()
    }
}

/// Registration records of one service.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    name: String,
    methods: Vec<MethodRecord>,
}

impl ServiceRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodRecord] {
        &self.methods
    }
}

/// Builds the registration records of every service declared by the principal file.
pub fn build_services(registry: &DescriptorRegistry, handlers: &HandlerSet) -> Vec<ServiceRecord> {
    let services: Vec<ServiceRecord> = registry
        .services()
        .map(|service| {
            let methods = service
                .methods()
                .map(|method| MethodRecord {
                    service_name: service.full_name().to_string(),
                    method_name: method.name().to_string(),
                    dispatcher: Dispatcher::new(method.clone(), handlers.get(method.full_name())),
                })
                .collect();

            ServiceRecord {
                name: service.full_name().to_string(),
                methods,
            }
        })
        .collect();

    for name in handlers.names() {
        let known = services
            .iter()
            .flat_map(|s| s.methods())
            .any(|m| m.descriptor().full_name() == name);

        if !known {
            tracing::warn!(method = name, "handler bound to a method absent from the schema");
        }
    }

    services
}
