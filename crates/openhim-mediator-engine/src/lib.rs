//! An engine for writing OpenHIM mediators.
//!
//! A mediator registers itself with an OpenHIM core instance, receives
//! requests routed through core, orchestrates calls to upstream services
//! (HTTP, MLLP, UDP) and reports a standardized response envelope back,
//! either synchronously or as a later transaction update. Implement
//! [`MediatorRequestHandler`], register it on a [`RoutingTable`], and start a
//! [`MediatorServer`].

pub mod config;
pub mod connectors;
pub mod context;
pub mod heartbeat;
pub mod lifecycle;
pub mod messages;
pub mod routing;
pub mod server;

pub use config::{
    DynamicConfig, MediatorConfig, MediatorConfigBuilder, RegistrationConfig, TlsConfig,
};
pub use connectors::{
    CoreApiConnector, HeartbeatResult, HttpConnector, MllpConnector, RegisterResult,
    UdpFireForgetConnector,
};
pub use context::EngineContext;
pub use lifecycle::{EngineResponse, TRANSACTION_ID_HEADER};
pub use messages::{
    FinishRequest, HttpTarget, InboundRequest, LifecycleEvent, MediatorHttpRequest,
    MediatorHttpResponse, MediatorSocketRequest, MediatorSocketResponse, RequestHandle,
    Responder,
};
pub use routing::{MediatorRequestHandler, RoutingTable};
pub use server::{MediatorServer, MediatorServerHandle};

/// Media type marking a response body as a mediator envelope.
pub const OPENHIM_MIME_TYPE: &str = "application/json+openhim";
