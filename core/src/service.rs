//! Service configuration, construction and registration.
//!
//! # Design
//! `Config` is plain data filled in by the host before startup. Building a
//! `LocalhostService` validates it once and freezes the result behind an
//! `Arc<HttpBridge>` shared read-only by every instance, so nothing can
//! change the origin after registration.

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::bridge::HttpBridge;
use crate::error::ServiceError;
use crate::host::{Instance, InstanceConfig, Registry, Service};
use crate::instance::LocalhostInstance;

/// Name under which the service is registered.
pub const SERVICE_NAME: &str = "localhost";

/// Environment variable read by `Config::from_env`.
pub const URL_ENV: &str = "LOCALHOST_URL";

/// Startup configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Absolute origin URL all guest calls are sent to.
    pub url: Option<Url>,

    /// HTTP client override. A default client is built when absent.
    #[serde(skip)]
    pub client: Option<Client>,
}

impl Config {
    pub fn new(url: Url) -> Self {
        Self {
            url: Some(url),
            client: None,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Read the origin from `LOCALHOST_URL`. An unset variable yields a
    /// config without a URL, which fails validation later.
    pub fn from_env() -> Result<Self, ServiceError> {
        match std::env::var(URL_ENV) {
            Ok(raw) => Url::parse(&raw)
                .map(Self::new)
                .map_err(|e| ServiceError::Config(format!("{raw}: {e}"))),
            Err(_) => Ok(Self::default()),
        }
    }

    fn origin(&self) -> Result<Url, ServiceError> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| ServiceError::Config("no URL configured".to_string()))?;
        if url.cannot_be_a_base() || url.host_str().map_or(true, str::is_empty) {
            return Err(ServiceError::Config(url.to_string()));
        }
        Ok(url.clone())
    }
}

/// The localhost service: one origin, any number of instances.
#[derive(Debug, Clone)]
pub struct LocalhostService {
    bridge: Arc<HttpBridge>,
}

impl LocalhostService {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let origin = config.origin()?;
        let client = match config.client {
            Some(client) => client,
            None => Client::builder()
                .build()
                .map_err(|e| ServiceError::Config(e.to_string()))?,
        };
        Ok(Self {
            bridge: Arc::new(HttpBridge::new(origin, client)),
        })
    }

    pub fn origin(&self) -> &Url {
        self.bridge.origin()
    }

    pub fn instance(&self, config: InstanceConfig) -> LocalhostInstance {
        LocalhostInstance::new(Arc::clone(&self.bridge), config.code)
    }

    pub fn restore(
        &self,
        config: InstanceConfig,
        state: Vec<u8>,
    ) -> Result<LocalhostInstance, ServiceError> {
        LocalhostInstance::from_state(Arc::clone(&self.bridge), config.code, state)
    }
}

impl Service for LocalhostService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn create_instance(&self, config: InstanceConfig) -> Box<dyn Instance> {
        Box::new(self.instance(config))
    }

    fn recreate_instance(
        &self,
        config: InstanceConfig,
        state: Vec<u8>,
    ) -> Result<Box<dyn Instance>, ServiceError> {
        Ok(Box::new(self.restore(config, state)?))
    }
}

/// Validate `config` and register the service with `registry`.
pub fn init_services(config: Config, registry: &mut dyn Registry) -> Result<(), ServiceError> {
    let service = LocalhostService::new(config)?;
    tracing::info!(service = SERVICE_NAME, origin = %service.origin(), "registering service");
    registry.register(Arc::new(service));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MapRegistry;
    use crate::instance::InstanceState;
    use crate::packet::{Code, Domain, Packet, SuspendMarker};

    fn config(url: &str) -> Config {
        Config::new(Url::parse(url).unwrap())
    }

    #[test]
    fn valid_origin_is_accepted() {
        let service = LocalhostService::new(config("http://127.0.0.1:8080")).unwrap();
        assert_eq!(service.origin().as_str(), "http://127.0.0.1:8080/");
        assert_eq!(service.name(), SERVICE_NAME);
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = LocalhostService::new(Config::default()).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
        assert!(err.to_string().starts_with("localhost URL is invalid"));
    }

    #[test]
    fn url_without_host_is_rejected() {
        for url in ["mailto:ops@example.com", "file:///tmp/sock", "localhost:8080"] {
            let err = LocalhostService::new(config(url)).unwrap_err();
            assert!(matches!(err, ServiceError::Config(_)), "{url}");
        }
    }

    #[test]
    fn config_deserializes_url() {
        let config: Config = serde_json::from_str(r#"{"url":"http://127.0.0.1:8080/"}"#).unwrap();
        assert_eq!(config.url.unwrap().as_str(), "http://127.0.0.1:8080/");
        assert!(config.client.is_none());
    }

    #[test]
    fn config_rejects_relative_url() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"url":"/relative"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_url_is_optional() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.url.is_none());
    }

    #[test]
    fn init_registers_under_service_name() {
        let mut registry = MapRegistry::new();
        init_services(config("http://127.0.0.1:8080"), &mut registry).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(SERVICE_NAME).is_some());
    }

    #[test]
    fn init_with_bad_config_registers_nothing() {
        let mut registry = MapRegistry::new();
        assert!(init_services(Config::default(), &mut registry).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn created_instance_is_idle() {
        let service = LocalhostService::new(config("http://127.0.0.1:8080")).unwrap();
        let inst = service.create_instance(InstanceConfig { code: Code(1) });
        assert!(inst.extract_state().is_empty());
    }

    #[test]
    fn recreate_validates_state() {
        let service = LocalhostService::new(config("http://127.0.0.1:8080")).unwrap();
        let cfg = InstanceConfig { code: Code(1) };

        assert!(service.recreate_instance(cfg, Vec::new()).is_ok());
        assert!(matches!(
            service.recreate_instance(cfg, vec![1, 2]),
            Err(ServiceError::InvalidState { len: 2 })
        ));

        let mut packet = Packet::new(Code(1), Domain::Call, b"call");
        packet.mark_suspended(SuspendMarker::Incoming);
        let inst = service.restore(cfg, packet.into_bytes()).unwrap();
        assert_eq!(inst.state(), InstanceState::SuspendedIncoming);
        assert_eq!(inst.code(), Code(1));
    }
}
