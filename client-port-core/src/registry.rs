//! The Schema Registry / Backend Interface: the build-time catalog of
//! endpoints, each carrying its kind-specific schemas.

use crate::error::{Error, ValidationIssue};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// An opaque schema validator. In a dynamically-typed source system this is
/// a compiled JSON-schema or similar; here it is modeled as a capability
/// object rather than committing to one concrete schema language.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), ValidationIssue>;
}

impl fmt::Debug for dyn Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<validator>")
    }
}

/// Adapts any closure into a [`Validator`].
pub struct SchemaFn<F>(pub F);

impl<F> Validator for SchemaFn<F>
where
    F: Fn(&Value) -> Result<(), ValidationIssue> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), ValidationIssue> {
        (self.0)(value)
    }
}

/// A permissive validator that accepts every value. Useful for endpoints
/// that intentionally skip validation, and in tests.
pub struct AnySchema;

impl Validator for AnySchema {
    fn validate(&self, _value: &Value) -> Result<(), ValidationIssue> {
        Ok(())
    }
}

pub type Schema = Box<dyn Validator>;

pub struct RpcSchemas {
    pub parameter: Schema,
    pub returns: Schema,
}

pub struct ChannelSchemas {
    pub creation_parameter: Schema,
    pub to_server_packet: Schema,
    pub to_client_packet: Schema,
}

pub struct SignalSchemas {
    pub creation_parameter: Schema,
    pub signal_data: Schema,
}

/// An endpoint descriptor: immutable once registered.
pub enum EndpointDescriptor {
    Rpc(RpcSchemas),
    Channel(ChannelSchemas),
    Signal(SignalSchemas),
    WritableSignal(SignalSchemas),
}

impl EndpointDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            EndpointDescriptor::Rpc(_) => "rpc",
            EndpointDescriptor::Channel(_) => "channel",
            EndpointDescriptor::Signal(_) => "signal",
            EndpointDescriptor::WritableSignal(_) => "writableSignal",
        }
    }

    pub fn as_rpc(&self) -> Option<&RpcSchemas> {
        match self {
            EndpointDescriptor::Rpc(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelSchemas> {
        match self {
            EndpointDescriptor::Channel(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&SignalSchemas> {
        match self {
            EndpointDescriptor::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_writable_signal(&self) -> Option<&SignalSchemas> {
        match self {
            EndpointDescriptor::WritableSignal(s) => Some(s),
            _ => None,
        }
    }
}

/// The build-time assembly of endpoints. Names are unique across all
/// kinds.
#[derive(Default)]
pub struct Registry {
    endpoints: HashMap<String, EndpointDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, descriptor: EndpointDescriptor) -> Result<(), Error> {
        if self.endpoints.contains_key(name) {
            return Err(Error::DuplicateEndpoint(name.to_owned()));
        }
        self.endpoints.insert(name.to_owned(), descriptor);
        Ok(())
    }

    pub fn add_rpc_endpoint(&mut self, name: &str, schemas: RpcSchemas) -> Result<(), Error> {
        self.insert(name, EndpointDescriptor::Rpc(schemas))
    }

    pub fn add_channel_endpoint(
        &mut self,
        name: &str,
        schemas: ChannelSchemas,
    ) -> Result<(), Error> {
        self.insert(name, EndpointDescriptor::Channel(schemas))
    }

    pub fn add_signal_endpoint(&mut self, name: &str, schemas: SignalSchemas) -> Result<(), Error> {
        self.insert(name, EndpointDescriptor::Signal(schemas))
    }

    pub fn add_writable_signal_endpoint(
        &mut self,
        name: &str,
        schemas: SignalSchemas,
    ) -> Result<(), Error> {
        self.insert(name, EndpointDescriptor::WritableSignal(schemas))
    }

    pub fn get(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.get(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_rpc() -> RpcSchemas {
        RpcSchemas {
            parameter: Box::new(AnySchema),
            returns: Box::new(AnySchema),
        }
    }

    #[test]
    fn duplicate_name_across_kinds_fails() {
        let mut registry = Registry::new();
        registry.add_rpc_endpoint("add", any_rpc()).unwrap();
        let err = registry.add_rpc_endpoint("add", any_rpc()).unwrap_err();
        assert!(matches!(err, Error::DuplicateEndpoint(name) if name == "add"));
    }

    #[test]
    fn lookup_returns_descriptor() {
        let mut registry = Registry::new();
        registry.add_rpc_endpoint("add", any_rpc()).unwrap();
        assert_eq!(registry.get("add").unwrap().kind(), "rpc");
        assert!(registry.get("missing").is_none());
    }
}
