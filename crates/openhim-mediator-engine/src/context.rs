//! The engine context: the configuration plus one shared instance of every
//! outbound connector, handed to request handlers as an `Arc`.

use std::sync::Arc;

use openhim_mediator_core::{MediatorError, Result};

use crate::config::MediatorConfig;
use crate::connectors::{CoreApiConnector, HttpConnector, MllpConnector, UdpFireForgetConnector};
use crate::routing::RoutingTable;

pub struct EngineContext {
    config: Arc<MediatorConfig>,
    routing_table: RoutingTable,
    http: HttpConnector,
    core_api: CoreApiConnector,
    mllp: MllpConnector,
    udp: UdpFireForgetConnector,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext").finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Build the context from a finished configuration. Fails fast on an
    /// absent or empty routing table and on unusable TLS material, so a
    /// misconfigured mediator never starts serving.
    pub fn from_config(config: Arc<MediatorConfig>) -> Result<Arc<Self>> {
        let routing_table = config
            .routing_table()
            .cloned()
            .ok_or_else(|| MediatorError::configuration("a routing table is required"))?;
        if routing_table.is_empty() {
            return Err(MediatorError::configuration(
                "the routing table has no routes",
            ));
        }

        let http = HttpConnector::new(config.call_timeout())?;
        if let Some(tls) = config.tls() {
            http.install_tls(tls)?;
        }
        let core_api = CoreApiConnector::new(config.clone(), http.clone());
        let mllp = MllpConnector::new(config.call_timeout());
        let udp = UdpFireForgetConnector::new();

        Ok(Arc::new(Self {
            config,
            routing_table,
            http,
            core_api,
            mllp,
            udp,
        }))
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Plain HTTP calls to upstream services.
    pub fn http(&self) -> &HttpConnector {
        &self.http
    }

    /// Authenticated calls to the core API.
    pub fn core_api(&self) -> &CoreApiConnector {
        &self.core_api
    }

    pub fn mllp(&self) -> &MllpConnector {
        &self.mllp
    }

    pub fn udp(&self) -> &UdpFireForgetConnector {
        &self.udp
    }
}
