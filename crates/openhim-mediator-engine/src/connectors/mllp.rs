//! The MLLP (healthcare TCP) connector.
//!
//! Frames the request body as `0x0B <payload> 0x1C 0x0D`, writes it over a
//! fresh socket and reads until the trailer sequence or end-of-stream. A
//! reply that is not correctly framed is logged and still returned with the
//! framing stripped only where present. Orchestration bodies record the
//! framed form on both sides.

use std::time::Duration;

use openhim_mediator_core::{
    MediatorError, Orchestration, RequestSnapshot, ResponseDetail,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;

use crate::messages::{MediatorSocketRequest, MediatorSocketResponse};

pub const MLLP_HEADER: u8 = 0x0B;
pub const MLLP_TRAILER: [u8; 2] = [0x1C, 0x0D];

/// Wrap a payload in MLLP start/end block bytes.
pub fn wrap_mllp(payload: &str) -> String {
    format!("\u{b}{payload}\u{1c}\r")
}

/// Whether a message carries the full MLLP framing.
pub fn is_mllp_wrapped(message: &str) -> bool {
    let bytes = message.as_bytes();
    bytes.len() >= 3
        && bytes[0] == MLLP_HEADER
        && bytes[bytes.len() - 2] == MLLP_TRAILER[0]
        && bytes[bytes.len() - 1] == MLLP_TRAILER[1]
}

/// Strip MLLP framing if present; otherwise return the message unchanged.
pub fn unwrap_mllp(message: &str) -> &str {
    if is_mllp_wrapped(message) {
        &message[1..message.len() - 2]
    } else {
        message
    }
}

#[derive(Clone)]
pub struct MllpConnector {
    call_timeout: Duration,
}

impl MllpConnector {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }

    /// Execute the exchange in the background: one socket per request,
    /// closed regardless of outcome. Failures and timeouts are reported to
    /// the request handler.
    pub fn send(&self, request: MediatorSocketRequest) {
        let call_timeout = self.call_timeout;
        tokio::spawn(async move {
            Self::dispatch(call_timeout, request).await;
        });
    }

    async fn dispatch(call_timeout: Duration, request: MediatorSocketRequest) {
        let outcome = timeout(call_timeout, exchange(&request)).await;
        match outcome {
            Err(_) => request.request_handler.error(MediatorError::transport(
                "mllp",
                format!("timed out talking to {}:{}", request.host, request.port),
            )),
            Ok(Err(err)) => request
                .request_handler
                .error(MediatorError::transport("mllp", err.to_string())),
            Ok(Ok(reply)) => {
                let response = MediatorSocketResponse { body: reply };
                let orchestration = build_orchestration(&request, &response);
                if let Some(respond_to) = request.respond_to {
                    respond_to.respond(response);
                }
                request.request_handler.add_orchestration(orchestration);
            }
        }
    }
}

async fn exchange(request: &MediatorSocketRequest) -> std::io::Result<String> {
    let mut stream = TcpStream::connect((request.host.as_str(), request.port)).await?;
    stream
        .write_all(wrap_mllp(&request.body).as_bytes())
        .await?;

    let raw = read_mllp_stream(&mut stream).await?;
    let raw = String::from_utf8_lossy(&raw).into_owned();
    if !is_mllp_wrapped(&raw) {
        warn!(
            host = %request.host,
            port = request.port,
            "response from server is not valid MLLP"
        );
    }
    Ok(unwrap_mllp(&raw).to_string())
}

/// Read until the trailer byte sequence is observed or the peer closes the
/// stream; the returned bytes include any framing.
async fn read_mllp_stream(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(2).position(|pair| pair == MLLP_TRAILER) {
            buffer.truncate(position + 2);
            break;
        }
    }
    Ok(buffer)
}

fn build_orchestration(
    request: &MediatorSocketRequest,
    response: &MediatorSocketResponse,
) -> Orchestration {
    Orchestration {
        name: request.orchestration.clone(),
        request: Some(RequestSnapshot {
            body: Some(wrap_mllp(&request.body)),
            ..Default::default()
        }),
        response: Some(ResponseDetail {
            body: Some(wrap_mllp(&response.body)),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_then_unwrap_is_identity() {
        for payload in ["", "MSH|^~\\&|TEST", "multi\rline\rmessage"] {
            let wrapped = wrap_mllp(payload);
            assert!(is_mllp_wrapped(&wrapped));
            assert_eq!(unwrap_mllp(&wrapped), payload);
        }
    }

    #[test]
    fn test_wrapped_framing_bytes() {
        let wrapped = wrap_mllp("ACK");
        let bytes = wrapped.as_bytes();
        assert_eq!(bytes[0], 0x0B);
        assert_eq!(&bytes[bytes.len() - 2..], &[0x1C, 0x0D]);
    }

    #[test]
    fn test_is_mllp_wrapped_negatives() {
        assert!(!is_mllp_wrapped(""));
        assert!(!is_mllp_wrapped("plain message"));
        assert!(!is_mllp_wrapped("\u{b}missing trailer"));
        assert!(!is_mllp_wrapped("missing header\u{1c}\r"));
        assert!(!is_mllp_wrapped("\u{b}\r")); // too short
    }

    #[test]
    fn test_unwrap_leaves_unframed_messages_untouched() {
        assert_eq!(unwrap_mllp("not framed"), "not framed");
        assert_eq!(unwrap_mllp("\u{b}half framed"), "\u{b}half framed");
    }

    #[test]
    fn test_orchestration_records_framed_bodies() {
        let (handle, _events) = crate::messages::RequestHandle::channel();
        let request = MediatorSocketRequest {
            host: "localhost".to_string(),
            port: 2575,
            body: "MSH|request".to_string(),
            orchestration: "hl7-forward".to_string(),
            request_handler: handle,
            respond_to: None,
        };
        let response = MediatorSocketResponse {
            body: "MSA|AA".to_string(),
        };

        let orchestration = build_orchestration(&request, &response);
        assert_eq!(orchestration.name, "hl7-forward");
        assert_eq!(
            orchestration.request.unwrap().body.as_deref(),
            Some("\u{b}MSH|request\u{1c}\r")
        );
        assert_eq!(
            orchestration.response.unwrap().body.as_deref(),
            Some("\u{b}MSA|AA\u{1c}\r")
        );
    }
}
