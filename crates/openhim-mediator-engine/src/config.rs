//! Mediator configuration: the static builder-constructed settings, the
//! registration content sent to core, and the dynamic configuration snapshot
//! that heartbeat responses replace at runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use openhim_mediator_core::{MediatorError, Result};
use serde_json::{Map, Value};

use crate::routing::RoutingTable;

const DEFAULT_ROOT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(10);
const DEFAULT_CORE_API_PORT: u16 = 8080;
const DEFAULT_CORE_API_SCHEME: &str = "https";

/// TLS material for outbound HTTPS calls: an optional client identity and
/// extra trust roots, all PEM-encoded, or an explicit trust-all flag.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Client certificate and private key, concatenated PEM.
    pub identity_pem: Option<Vec<u8>>,
    /// Additional trusted root certificates, PEM.
    pub trust_roots: Vec<Vec<u8>>,
    /// Accept any server certificate. Never enable in production.
    pub trust_all: bool,
}

/// The JSON content describing this mediator, carried opaque to core at
/// registration. The engine itself only reads the `urn` and the `config`
/// defaults out of it.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    content: String,
    parsed: Value,
    path: String,
    method: String,
    content_type: String,
}

impl RegistrationConfig {
    pub fn new(content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let parsed: Value = serde_json::from_str(&content)?;
        if !parsed.is_object() {
            return Err(MediatorError::invalid_content(
                "registration content must be a JSON object",
            ));
        }
        Ok(Self {
            content,
            parsed,
            path: "/mediators".to_string(),
            method: "POST".to_string(),
            content_type: "application/json".to_string(),
        })
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The mediator URN from the registration content.
    pub fn urn(&self) -> Result<&str> {
        self.parsed
            .get("urn")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                MediatorError::invalid_content("registration content has no mediator urn")
            })
    }

    /// The `config` defaults used to seed the dynamic configuration.
    pub fn default_config(&self) -> Map<String, Value> {
        self.parsed
            .get("config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// Runtime settings replaceable wholesale by a heartbeat response from core.
/// Readers always observe a complete snapshot; updates are copy-on-write.
#[derive(Clone)]
pub struct DynamicConfig {
    inner: Arc<ArcSwap<Map<String, Value>>>,
}

impl DynamicConfig {
    pub fn new() -> Self {
        Self::seeded(Map::new())
    }

    pub fn seeded(initial: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<Map<String, Value>> {
        self.inner.load_full()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.load().get(key).cloned()
    }

    /// Merge an update payload into a fresh snapshot and swap it in.
    pub fn merge(&self, updates: &Map<String, Value>) {
        self.inner.rcu(|current| {
            let mut next = (**current).clone();
            for (key, value) in updates {
                next.insert(key.clone(), value.clone());
            }
            next
        });
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The full mediator configuration. Constructed through
/// [`MediatorConfig::builder`]; immutable afterwards apart from the dynamic
/// configuration snapshot.
pub struct MediatorConfig {
    name: String,
    server_host: String,
    server_port: u16,
    root_timeout: Duration,
    call_timeout: Duration,
    core_host: String,
    core_api_port: u16,
    core_api_scheme: String,
    core_api_username: String,
    core_api_password: String,
    routing_table: Option<RoutingTable>,
    registration_config: Option<RegistrationConfig>,
    tls: Option<TlsConfig>,
    heartbeats_enabled: bool,
    heartbeat_period: Duration,
    properties: HashMap<String, String>,
    dynamic_config: DynamicConfig,
}

impl MediatorConfig {
    pub fn builder(
        name: impl Into<String>,
        server_host: impl Into<String>,
        server_port: u16,
    ) -> MediatorConfigBuilder {
        MediatorConfigBuilder {
            name: name.into(),
            server_host: server_host.into(),
            server_port,
            root_timeout: DEFAULT_ROOT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            core_host: "localhost".to_string(),
            core_api_port: DEFAULT_CORE_API_PORT,
            core_api_scheme: DEFAULT_CORE_API_SCHEME.to_string(),
            core_api_username: String::new(),
            core_api_password: String::new(),
            routing_table: None,
            registration_config: None,
            tls: None,
            heartbeats_enabled: false,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
            properties: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// The overall per-request timeout enforced by the listener.
    pub fn root_timeout(&self) -> Duration {
        self.root_timeout
    }

    /// The per-call timeout applied to outbound connector I/O.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn core_host(&self) -> &str {
        &self.core_host
    }

    pub fn core_api_port(&self) -> u16 {
        self.core_api_port
    }

    pub fn core_api_scheme(&self) -> &str {
        &self.core_api_scheme
    }

    pub fn core_api_username(&self) -> &str {
        &self.core_api_username
    }

    pub fn core_api_password(&self) -> &str {
        &self.core_api_password
    }

    pub fn routing_table(&self) -> Option<&RoutingTable> {
        self.routing_table.as_ref()
    }

    pub fn registration_config(&self) -> Option<&RegistrationConfig> {
        self.registration_config.as_ref()
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    pub fn heartbeats_enabled(&self) -> bool {
        self.heartbeats_enabled
    }

    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_period
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn dynamic_config(&self) -> &DynamicConfig {
        &self.dynamic_config
    }
}

pub struct MediatorConfigBuilder {
    name: String,
    server_host: String,
    server_port: u16,
    root_timeout: Duration,
    call_timeout: Duration,
    core_host: String,
    core_api_port: u16,
    core_api_scheme: String,
    core_api_username: String,
    core_api_password: String,
    routing_table: Option<RoutingTable>,
    registration_config: Option<RegistrationConfig>,
    tls: Option<TlsConfig>,
    heartbeats_enabled: bool,
    heartbeat_period: Duration,
    properties: HashMap<String, String>,
}

impl MediatorConfigBuilder {
    pub fn root_timeout(mut self, timeout: Duration) -> Self {
        self.root_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn core_host(mut self, host: impl Into<String>) -> Self {
        self.core_host = host.into();
        self
    }

    pub fn core_api_port(mut self, port: u16) -> Self {
        self.core_api_port = port;
        self
    }

    pub fn core_api_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.core_api_scheme = scheme.into();
        self
    }

    pub fn core_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.core_api_username = username.into();
        self.core_api_password = password.into();
        self
    }

    pub fn routing_table(mut self, table: RoutingTable) -> Self {
        self.routing_table = Some(table);
        self
    }

    pub fn registration_config(mut self, registration: RegistrationConfig) -> Self {
        self.registration_config = Some(registration);
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn enable_heartbeats(mut self, enabled: bool) -> Self {
        self.heartbeats_enabled = enabled;
        self
    }

    pub fn heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> MediatorConfig {
        let seed = self
            .registration_config
            .as_ref()
            .map(RegistrationConfig::default_config)
            .unwrap_or_default();

        MediatorConfig {
            name: self.name,
            server_host: self.server_host,
            server_port: self.server_port,
            root_timeout: self.root_timeout,
            call_timeout: self.call_timeout,
            core_host: self.core_host,
            core_api_port: self.core_api_port,
            core_api_scheme: self.core_api_scheme,
            core_api_username: self.core_api_username,
            core_api_password: self.core_api_password,
            routing_table: self.routing_table,
            registration_config: self.registration_config,
            tls: self.tls,
            heartbeats_enabled: self.heartbeats_enabled,
            heartbeat_period: self.heartbeat_period,
            properties: self.properties,
            dynamic_config: DynamicConfig::seeded(seed),
        }
    }
}
