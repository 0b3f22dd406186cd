//! The UDP fire-and-forget connector.
//!
//! Sends one datagram and completes without waiting for a reply. By design
//! it never emits an orchestration and never reports errors to the request
//! handler — there is no delivery guarantee and no response to correlate.

use tokio::net::UdpSocket;
use tracing::warn;

use crate::messages::MediatorSocketRequest;

#[derive(Clone, Default)]
pub struct UdpFireForgetConnector;

impl UdpFireForgetConnector {
    pub fn new() -> Self {
        Self
    }

    pub fn send(&self, request: MediatorSocketRequest) {
        tokio::spawn(async move {
            if let Err(err) = dispatch(&request).await {
                warn!(
                    host = %request.host,
                    port = request.port,
                    error = %err,
                    "udp send failed"
                );
            }
        });
    }
}

async fn dispatch(request: &MediatorSocketRequest) -> std::io::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .send_to(
            request.body.as_bytes(),
            (request.host.as_str(), request.port),
        )
        .await?;
    Ok(())
}
