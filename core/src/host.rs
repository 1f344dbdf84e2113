//! Interfaces between the service and the host runtime that drives it.
//!
//! The host owns the reply channel, the cancellation context and the
//! persistence of suspended state. It serializes `handle` and `resume`
//! calls per instance; nothing here guards against overlapping calls on the
//! same instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::packet::{Code, Packet};

/// Bounded channel carrying reply packets back to the host.
pub type ReplySender = mpsc::Sender<Packet>;

/// Per-instance parameters chosen by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceConfig {
    pub code: Code,
}

/// A named service able to create instances.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Create an instance for a fresh execution.
    fn create_instance(&self, config: InstanceConfig) -> Box<dyn Instance>;

    /// Rebuild an instance from bytes previously returned by
    /// `Instance::extract_state`.
    fn recreate_instance(
        &self,
        config: InstanceConfig,
        state: Vec<u8>,
    ) -> Result<Box<dyn Instance>, ServiceError>;
}

/// One guest's view of a service.
#[async_trait]
pub trait Instance: Send {
    /// Process a packet freshly delivered by the guest.
    async fn handle(&mut self, ctx: &CancellationToken, replies: &ReplySender, packet: Packet);

    /// Continue whatever was in progress when the instance was suspended.
    async fn resume(&mut self, ctx: &CancellationToken, replies: &ReplySender);

    /// Bytes to persist while the instance is suspended. Empty when idle.
    fn extract_state(&self) -> &[u8];

    fn close(self: Box<Self>) -> Result<(), ServiceError>;
}

/// Where services are made available to the host.
pub trait Registry {
    fn register(&mut self, service: Arc<dyn Service>);
}

/// In-memory registry keyed by service name.
#[derive(Default)]
pub struct MapRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Registry for MapRegistry {
    fn register(&mut self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        if self.services.insert(name.clone(), service).is_some() {
            tracing::warn!(service = %name, "service registered twice, keeping the latest");
        }
    }
}
