//! Outbound transport connectors: plain HTTP, the authenticated core API
//! layer on top of it, MLLP over TCP, and fire-and-forget UDP.

pub mod core_api;
pub mod http;
pub mod mllp;
pub mod udp;

pub use core_api::{CoreApiConnector, HeartbeatResult, RegisterResult};
pub use http::HttpConnector;
pub use mllp::{is_mllp_wrapped, unwrap_mllp, wrap_mllp, MllpConnector};
pub use udp::UdpFireForgetConnector;
