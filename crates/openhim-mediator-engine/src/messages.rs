//! Message types and channel plumbing shared by the lifecycle and connectors.
//!
//! Every outbound call carries two channels: `request_handler`, the lifecycle's
//! side-channel for orchestrations, properties and errors, and `respond_to`,
//! a single-use reply slot for the call result. Connectors never return values
//! to their caller; completion is always signaled through these channels.

use std::collections::HashMap;

use openhim_mediator_core::{MediatorError, Orchestration};
use tokio::sync::{mpsc, oneshot};

/// Events delivered to the request lifecycle over its side-channel.
#[derive(Debug)]
pub enum LifecycleEvent {
    /// Append an audit record for one outbound call.
    Orchestration(Orchestration),
    /// Upsert a response property (last write wins).
    Property { name: String, value: String },
    /// A failure surfaced by a handler or connector.
    Error(MediatorError),
    /// The handler is done; finalize the response.
    Finish(FinishRequest),
    /// Switch to asynchronous processing (202 to the caller now,
    /// final result to core later).
    AcceptAsync,
}

/// A clonable handle to a request lifecycle. Sends are non-blocking; events
/// arriving after the lifecycle has finalized are dropped silently.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl RequestHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn add_orchestration(&self, orchestration: Orchestration) {
        self.send(LifecycleEvent::Orchestration(orchestration));
    }

    pub fn put_property(&self, name: impl Into<String>, value: impl Into<String>) {
        self.send(LifecycleEvent::Property {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn error(&self, error: MediatorError) {
        self.send(LifecycleEvent::Error(error));
    }

    pub fn finish(&self, finish: FinishRequest) {
        self.send(LifecycleEvent::Finish(finish));
    }

    pub fn accept_async(&self) {
        self.send(LifecycleEvent::AcceptAsync);
    }

    fn send(&self, event: LifecycleEvent) {
        // the lifecycle may already have terminated
        let _ = self.tx.send(event);
    }
}

/// A single-use reply slot. Dropping it without responding resolves the
/// receiving side with an error, so a caller awaiting a reply never hangs.
pub struct Responder<T>(oneshot::Sender<T>);

impl<T> Responder<T> {
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn respond(self, value: T) {
        let _ = self.0.send(value);
    }
}

/// The handler's completion signal. A missing status defaults to 200.
#[derive(Debug, Clone, Default)]
pub struct FinishRequest {
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub status: Option<u16>,
}

impl FinishRequest {
    pub fn new(
        body: impl Into<String>,
        content_type: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            body: Some(body.into()),
            content_type: Some(content_type.into()),
            status: Some(status),
        }
    }
}

/// Target of an outbound HTTP call: either a pre-built URI or its parts.
#[derive(Debug, Clone)]
pub enum HttpTarget {
    Uri(String),
    Address {
        scheme: String,
        host: String,
        port: u16,
        path: String,
    },
}

impl HttpTarget {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    pub fn address(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self::Address {
            scheme: scheme.into(),
            host: host.into(),
            port,
            path: path.into(),
        }
    }
}

/// An outbound HTTP call envelope. Immutable once built; the authentication
/// layer re-issues a pending request with added headers rather than mutating
/// one in flight.
pub struct MediatorHttpRequest {
    pub method: String,
    pub target: HttpTarget,
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
    /// Ordered key/value pairs; the same key may repeat.
    pub params: Vec<(String, String)>,
    /// Name recorded on the resulting orchestration.
    pub orchestration: String,
    pub correlation_id: Option<String>,
    pub request_handler: RequestHandle,
    pub respond_to: Responder<MediatorHttpResponse>,
}

impl MediatorHttpRequest {
    pub fn builder(method: impl Into<String>, target: HttpTarget) -> MediatorHttpRequestBuilder {
        MediatorHttpRequestBuilder {
            method: method.into(),
            target,
            body: None,
            headers: HashMap::new(),
            params: Vec::new(),
            orchestration: String::new(),
            correlation_id: None,
        }
    }
}

pub struct MediatorHttpRequestBuilder {
    method: String,
    target: HttpTarget,
    body: Option<String>,
    headers: HashMap<String, String>,
    params: Vec<(String, String)>,
    orchestration: String,
    correlation_id: Option<String>,
}

impl MediatorHttpRequestBuilder {
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn orchestration(mut self, name: impl Into<String>) -> Self {
        self.orchestration = name.into();
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn build(
        self,
        request_handler: RequestHandle,
        respond_to: Responder<MediatorHttpResponse>,
    ) -> MediatorHttpRequest {
        MediatorHttpRequest {
            method: self.method,
            target: self.target,
            body: self.body,
            headers: self.headers,
            params: self.params,
            orchestration: self.orchestration,
            correlation_id: self.correlation_id,
            request_handler,
            respond_to,
        }
    }
}

/// The normalized result of one HTTP connector invocation.
#[derive(Debug, Clone)]
pub struct MediatorHttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// An outbound socket call (MLLP or UDP). UDP callers pass no reply slot.
pub struct MediatorSocketRequest {
    pub host: String,
    pub port: u16,
    pub body: String,
    pub orchestration: String,
    pub request_handler: RequestHandle,
    pub respond_to: Option<Responder<MediatorSocketResponse>>,
}

#[derive(Debug, Clone)]
pub struct MediatorSocketResponse {
    pub body: String,
}

/// A fully-buffered inbound request as delivered by the listener.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub headers: HashMap<String, String>,
    /// Ordered query parameters; the same key may repeat.
    pub params: Vec<(String, String)>,
    pub body: String,
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Case-insensitive header upsert: an existing key that differs only in case
/// is replaced rather than duplicated.
pub fn put_header(
    headers: &mut HashMap<String, String>,
    name: impl Into<String>,
    value: impl Into<String>,
) {
    let name = name.into();
    if let Some(existing) = headers
        .keys()
        .find(|key| key.eq_ignore_ascii_case(&name))
        .cloned()
    {
        headers.remove(&existing);
    }
    headers.insert(name, value.into());
}
