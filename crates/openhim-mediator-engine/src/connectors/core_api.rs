//! The core API connector.
//!
//! Sits in front of the HTTP connector for every call directed at core and
//! transparently injects a per-call challenge-response handshake: fetch
//! `{salt, ts}` from `GET /authenticate/{username}`, compute the SHA-512
//! token and re-issue the pending call with the four auth headers. The
//! handshake is strictly ordered per correlation id; the real call is never
//! pipelined ahead of its own challenge.
//!
//! Registration and heartbeat calls are interpreted here and yield typed
//! results; any other call is forwarded verbatim, with its reply routed
//! straight to the original caller.

use std::sync::Arc;

use dashmap::DashMap;
use openhim_mediator_core::{MediatorError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};
use tokio::time::timeout;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::MediatorConfig;
use crate::connectors::http::HttpConnector;
use crate::messages::{
    put_header, HttpTarget, LifecycleEvent, MediatorHttpRequest, MediatorHttpResponse,
    RequestHandle, Responder,
};

const REGISTER_MEDIATOR: &str = "register-mediator";
const HEARTBEAT: &str = "heartbeat";
const GET_AUTH_DETAILS: &str = "get-auth-details";

#[derive(Debug, Deserialize)]
struct AuthChallenge {
    salt: String,
    ts: String,
}

/// Outcome of a mediator registration attempt.
#[derive(Debug, Clone)]
pub struct RegisterResult {
    pub success: bool,
    pub status: Option<u16>,
    pub body: String,
}

/// Outcome of one heartbeat. A 200 with a JSON object body carries a config
/// update for the dynamic configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatResult {
    pub success: bool,
    pub raw_body: String,
    pub config: Option<Map<String, Value>>,
}

impl HeartbeatResult {
    fn failed(raw_body: impl Into<String>) -> Self {
        Self {
            success: false,
            raw_body: raw_body.into(),
            config: None,
        }
    }
}

struct InFlightCall {
    purpose: String,
}

#[derive(Clone)]
pub struct CoreApiConnector {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<MediatorConfig>,
    http: HttpConnector,
    /// In-flight authenticated calls, keyed by correlation id. The only
    /// shared mutable state in the engine; entries from unrelated requests
    /// interleave freely.
    in_flight: DashMap<String, InFlightCall>,
    /// Receives orchestrations and errors for the connector's own calls;
    /// they are logged, never recorded on any caller's audit trail.
    sink: RequestHandle,
}

impl CoreApiConnector {
    pub fn new(config: Arc<MediatorConfig>, http: HttpConnector) -> Self {
        let (sink, mut events) = RequestHandle::channel();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let LifecycleEvent::Error(err) = event {
                    error!(error = %err, "error while communicating with core");
                }
            }
        });
        Self {
            inner: Arc::new(Inner {
                config,
                http,
                in_flight: DashMap::new(),
                sink,
            }),
        }
    }

    /// Authenticate and forward an arbitrary call to core. The reply goes
    /// directly to the request's own reply slot; a handshake failure is
    /// delivered to the request's handler as a typed authentication error.
    pub fn send(&self, request: MediatorHttpRequest) {
        let connector = self.clone();
        tokio::spawn(async move {
            match connector.authenticate(request).await {
                Ok(authenticated) => connector.inner.http.send(authenticated),
                Err((request, err)) => request.request_handler.error(err),
            }
        });
    }

    /// Register this mediator with core. Success is HTTP 201.
    pub async fn register(&self) -> RegisterResult {
        let config = &self.inner.config;
        let Some(registration) = config.registration_config() else {
            return RegisterResult {
                success: false,
                status: None,
                body: "no registration config".to_string(),
            };
        };

        let (respond_to, reply) = Responder::channel();
        let request = MediatorHttpRequest::builder(
            registration.method(),
            HttpTarget::address(
                config.core_api_scheme(),
                config.core_host(),
                config.core_api_port(),
                registration.path(),
            ),
        )
        .header("Content-Type", registration.content_type())
        .body(registration.content())
        .orchestration(REGISTER_MEDIATOR)
        .build(self.inner.sink.clone(), respond_to);

        match self.authenticate(request).await {
            Err((_, err)) => RegisterResult {
                success: false,
                status: None,
                body: err.to_string(),
            },
            Ok(authenticated) => {
                let correlation_id = authenticated.correlation_id.clone();
                self.inner.http.send(authenticated);
                let outcome = reply.await;
                self.release(correlation_id.as_deref());
                match outcome {
                    Ok(response) => {
                        info!(status = response.status, "sent mediator registration to core");
                        RegisterResult {
                            success: response.status == 201,
                            status: Some(response.status),
                            body: response.body,
                        }
                    }
                    Err(_) => RegisterResult {
                        success: false,
                        status: None,
                        body: "registration request to core produced no response".to_string(),
                    },
                }
            }
        }
    }

    /// Send one heartbeat: `POST /mediators/{urn}/heartbeat` with the uptime
    /// body, requesting a full config refresh when `force_config` is set.
    pub async fn send_heartbeat(&self, uptime_seconds: u64, force_config: bool) -> HeartbeatResult {
        let config = &self.inner.config;
        let Some(registration) = config.registration_config() else {
            return HeartbeatResult::failed("no registration config");
        };
        let urn = match registration.urn() {
            Ok(urn) => urn.to_string(),
            Err(err) => return HeartbeatResult::failed(err.to_string()),
        };

        let mut body = format!("{{\"uptime\":{uptime_seconds}");
        if force_config {
            body.push_str(",\"config\":true");
        }
        body.push('}');

        let (respond_to, reply) = Responder::channel();
        let request = MediatorHttpRequest::builder(
            "POST",
            HttpTarget::address(
                config.core_api_scheme(),
                config.core_host(),
                config.core_api_port(),
                format!("/mediators/{urn}/heartbeat"),
            ),
        )
        .header("Content-Type", "application/json")
        .body(body)
        .orchestration(HEARTBEAT)
        .build(self.inner.sink.clone(), respond_to);

        match self.authenticate(request).await {
            Err((_, err)) => HeartbeatResult::failed(err.to_string()),
            Ok(authenticated) => {
                let correlation_id = authenticated.correlation_id.clone();
                self.inner.http.send(authenticated);
                let outcome = reply.await;
                self.release(correlation_id.as_deref());
                match outcome {
                    Ok(response) => interpret_heartbeat_response(response),
                    Err(_) => {
                        HeartbeatResult::failed("heartbeat request to core produced no response")
                    }
                }
            }
        }
    }

    /// Number of calls currently parked between challenge and reply.
    pub fn in_flight_calls(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Run the challenge handshake for a pending call. The call is parked in
    /// the in-flight table while its challenge is outstanding; on success it
    /// is handed back with the auth headers applied. Forwarded calls release
    /// their entry as soon as the handshake resolves; registration and
    /// heartbeat calls keep theirs until the second round-trip completes.
    async fn authenticate(
        &self,
        mut request: MediatorHttpRequest,
    ) -> std::result::Result<MediatorHttpRequest, (MediatorHttpRequest, MediatorError)> {
        let correlation_id = Uuid::new_v4().to_string();
        self.inner.in_flight.insert(
            correlation_id.clone(),
            InFlightCall {
                purpose: request.orchestration.clone(),
            },
        );

        let outcome = self.fetch_auth_details(&correlation_id).await;
        let keep_entry = matches!(request.orchestration.as_str(), REGISTER_MEDIATOR | HEARTBEAT);

        match outcome {
            Ok(challenge) => {
                let config = &self.inner.config;
                let token =
                    auth_token(config.core_api_password(), &challenge.salt, &challenge.ts);
                put_header(&mut request.headers, "auth-username", config.core_api_username());
                put_header(&mut request.headers, "auth-ts", challenge.ts);
                put_header(&mut request.headers, "auth-salt", challenge.salt);
                put_header(&mut request.headers, "auth-token", token);
                request.correlation_id = Some(correlation_id.clone());
                if !keep_entry {
                    self.release(Some(&correlation_id));
                }
                Ok(request)
            }
            Err(err) => {
                self.release(Some(&correlation_id));
                Err((request, err))
            }
        }
    }

    /// Issue the challenge call and parse `{salt, ts}` from its reply. The
    /// wait is bounded so an entry whose challenge reply never arrives is
    /// expired instead of leaking.
    async fn fetch_auth_details(&self, correlation_id: &str) -> Result<AuthChallenge> {
        let config = &self.inner.config;
        let (respond_to, reply) = Responder::channel();
        let challenge = MediatorHttpRequest::builder(
            "GET",
            HttpTarget::address(
                config.core_api_scheme(),
                config.core_host(),
                config.core_api_port(),
                format!("/authenticate/{}", config.core_api_username()),
            ),
        )
        .orchestration(GET_AUTH_DETAILS)
        .correlation_id(correlation_id)
        .build(self.inner.sink.clone(), respond_to);
        self.inner.http.send(challenge);

        let response = match timeout(config.call_timeout() * 2, reply).await {
            Err(_) => {
                return Err(MediatorError::authentication(
                    "timed out waiting for an authentication challenge from core",
                ));
            }
            Ok(Err(_)) => {
                return Err(MediatorError::authentication(
                    "the authentication challenge produced no response",
                ));
            }
            Ok(Ok(response)) => response,
        };

        if response.status != 200 {
            return Err(MediatorError::authentication(format!(
                "Core responded with {} ({})",
                response.status, response.body
            )));
        }
        serde_json::from_str(&response.body).map_err(|err| {
            MediatorError::authentication(format!("malformed authentication challenge: {err}"))
        })
    }

    fn release(&self, correlation_id: Option<&str>) {
        if let Some(id) = correlation_id {
            if let Some((_, call)) = self.inner.in_flight.remove(id) {
                debug!(correlation = %id, purpose = %call.purpose, "released in-flight call");
            }
        }
    }
}

fn interpret_heartbeat_response(response: MediatorHttpResponse) -> HeartbeatResult {
    if response.status != 200 {
        return HeartbeatResult::failed(response.body);
    }
    if response.body.trim().is_empty() {
        return HeartbeatResult {
            success: true,
            raw_body: response.body,
            config: None,
        };
    }
    match serde_json::from_str::<Map<String, Value>>(&response.body) {
        Ok(config) => HeartbeatResult {
            success: true,
            raw_body: response.body,
            config: Some(config),
        },
        Err(_) => {
            error!("invalid JSON config received from core");
            HeartbeatResult::failed(response.body)
        }
    }
}

fn sha512_hex(input: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// `SHA-512( SHA-512(salt + password) + salt + ts )`, hex-encoded lower-case
/// over UTF-8 bytes.
fn auth_token(password: &str, salt: &str, ts: &str) -> String {
    let pass_hash = sha512_hex(&format!("{salt}{password}"));
    sha512_hex(&format!("{pass_hash}{salt}{ts}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_token_known_vector() {
        let token = auth_token(
            "password",
            "theSaltUsedForTheTest",
            "2015-01-16T13:00:53.418Z",
        );
        assert_eq!(
            token,
            "1e0fce1cffcb8ba306675d44974b0fa2e34e38789dfec1664917b54fec996e1b\
             4f96091fbd4dbe557e1641d986f6ebae4b35ee1952b488034c0c14fe0da1e448"
        );
    }

    #[test]
    fn test_sha512_is_lower_case_hex() {
        let digest = sha512_hex("test");
        assert_eq!(digest.len(), 128);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, digest.to_lowercase());
    }

    #[test]
    fn test_heartbeat_response_interpretation() {
        let ack = interpret_heartbeat_response(MediatorHttpResponse {
            status: 200,
            headers: Default::default(),
            body: "".to_string(),
        });
        assert!(ack.success);
        assert!(ack.config.is_none());

        let update = interpret_heartbeat_response(MediatorHttpResponse {
            status: 200,
            headers: Default::default(),
            body: r#"{"setting":"new"}"#.to_string(),
        });
        assert!(update.success);
        assert_eq!(
            update.config.unwrap().get("setting"),
            Some(&serde_json::json!("new"))
        );

        let bad_json = interpret_heartbeat_response(MediatorHttpResponse {
            status: 200,
            headers: Default::default(),
            body: "not json".to_string(),
        });
        assert!(!bad_json.success);
        assert_eq!(bad_json.raw_body, "not json");

        let denied = interpret_heartbeat_response(MediatorHttpResponse {
            status: 500,
            headers: Default::default(),
            body: "server error".to_string(),
        });
        assert!(!denied.success);
    }
}
