//! Connector registry: service type → connector factory.
//!
//! The registry is built once at startup and handed to the pre-flight
//! checker and job runner by reference. After startup it is read-only, so
//! lookups need no locking.
//!
//! Registering a service type twice is rejected with
//! [`RegistryError::DuplicateRegistration`] rather than silently replacing
//! the earlier factory.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use sync_harness_core::models::ConnectorSettings;

use crate::connector_fs::FilesystemConnector;
use crate::connector_stub::{HelloWorldConnector, StubConnector};
use crate::errors::{RegistryError, SyncError};
use crate::traits::Connector;

/// Builds a connector instance from its settings.
pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectorSettings) -> Result<Box<dyn Connector>> + Send + Sync>;

#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the built-in connectors:
    /// `stub_connector`, `hello_world` and `filesystem`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(StubConnector::SERVICE_TYPE, |settings| {
            Ok(Box::new(StubConnector::from_settings(settings)?))
        });
        registry.insert(HelloWorldConnector::SERVICE_TYPE, |_| {
            Ok(Box::new(HelloWorldConnector))
        });
        registry.insert(FilesystemConnector::SERVICE_TYPE, |settings| {
            Ok(Box::new(FilesystemConnector::from_settings(settings)?))
        });
        registry
    }

    fn insert<F>(&mut self, service_type: &str, factory: F)
    where
        F: Fn(&ConnectorSettings) -> Result<Box<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories
            .insert(service_type.to_string(), Arc::new(factory));
    }

    /// Register a factory for `service_type`.
    pub fn register<F>(
        &mut self,
        service_type: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&ConnectorSettings) -> Result<Box<dyn Connector>> + Send + Sync + 'static,
    {
        let service_type = service_type.into();
        if self.factories.contains_key(&service_type) {
            return Err(RegistryError::DuplicateRegistration(service_type));
        }
        self.factories.insert(service_type, Arc::new(factory));
        Ok(())
    }

    pub fn is_registered(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    pub fn resolve(&self, service_type: &str) -> Result<&ConnectorFactory, RegistryError> {
        self.factories
            .get(service_type)
            .ok_or_else(|| RegistryError::UnknownServiceType(service_type.to_string()))
    }

    /// Resolve the factory for `settings.service_type()` and build a
    /// connector with it.
    pub fn build(&self, settings: &ConnectorSettings) -> Result<Box<dyn Connector>, SyncError> {
        let factory = self.resolve(settings.service_type())?;
        factory(settings).map_err(SyncError::Build)
    }

    /// Registered service types, sorted.
    pub fn service_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
