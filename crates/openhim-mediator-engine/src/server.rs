//! The mediator HTTP listener.
//!
//! A single fallback route accepts every method and path, fully buffers the
//! request, and hands it to a fresh request lifecycle. The listener enforces
//! the root timeout: a lifecycle that produces nothing within it is answered
//! with a plain 500 and left to finish on its own.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use openhim_mediator_core::{MediatorError, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::MediatorConfig;
use crate::context::EngineContext;
use crate::heartbeat::HeartbeatService;
use crate::lifecycle::{self, EngineResponse};
use crate::messages::{InboundRequest, Responder};

pub struct MediatorServer {
    ctx: Arc<EngineContext>,
}

impl MediatorServer {
    /// Validate the configuration and build the engine context. Fails fast
    /// on configuration errors; no sockets are opened yet.
    pub fn new(config: MediatorConfig) -> Result<Self> {
        Ok(Self {
            ctx: EngineContext::from_config(Arc::new(config))?,
        })
    }

    pub fn context(&self) -> Arc<EngineContext> {
        self.ctx.clone()
    }

    /// Bind the listener and start serving. Registration and heartbeats run
    /// alongside; the returned handle stops everything.
    pub async fn start(self) -> Result<MediatorServerHandle> {
        let config = self.ctx.config();
        let bind_addr = format!("{}:{}", config.server_host(), config.server_port());
        let listener = TcpListener::bind(&bind_addr).await.map_err(|err| {
            MediatorError::configuration(format!("failed to bind {bind_addr}: {err}"))
        })?;
        let addr = listener.local_addr().map_err(|err| {
            MediatorError::configuration(format!("failed to read the bound address: {err}"))
        })?;
        info!(%addr, mediator = config.name(), "mediator listening");

        let app = build_app(self.ctx.clone());
        let heartbeat = HeartbeatService::spawn(self.ctx.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let serving = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = serving.await {
                error!(error = %err, "mediator listener terminated with an error");
            }
        });

        Ok(MediatorServerHandle {
            addr,
            shutdown_tx,
            heartbeat,
            server,
        })
    }

    /// Start and serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let handle = self.start().await?;
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        handle.shutdown().await;
        Ok(())
    }
}

pub struct MediatorServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    heartbeat: JoinHandle<()>,
    server: JoinHandle<()>,
}

impl MediatorServerHandle {
    /// The bound listener address (useful when started on port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop heartbeats and drain the listener gracefully.
    pub async fn shutdown(self) {
        self.heartbeat.abort();
        let _ = self.shutdown_tx.send(());
        let _ = self.server.await;
        info!("mediator stopped");
    }
}

fn build_app(ctx: Arc<EngineContext>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "mediator.request",
                    http.method = %req.method(),
                    http.path = %req.uri().path(),
                )
            }),
        )
        .with_state(ctx)
}

async fn handle_request(
    State(ctx): State<Arc<EngineContext>>,
    request: Request<Body>,
) -> Response {
    let inbound = match buffer_request(&ctx, request).await {
        Ok(inbound) => inbound,
        Err(err) => return plain_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let (respond_to, reply) = Responder::channel();
    lifecycle::spawn(ctx.clone(), inbound, respond_to);

    match timeout(ctx.config().root_timeout(), reply).await {
        Ok(Ok(engine_response)) => envelope_response(engine_response),
        Ok(Err(_)) => plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "the request ended without a response".to_string(),
        ),
        Err(_) => {
            error!(
                timeout_secs = ctx.config().root_timeout().as_secs(),
                "request exceeded the root timeout"
            );
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Request timed out".to_string())
        }
    }
}

/// Buffer an inbound request in full. Query parameters keep their wire order
/// and may repeat; header values are decoded lossily.
async fn buffer_request(ctx: &EngineContext, request: Request<Body>) -> Result<InboundRequest> {
    let (parts, body) = request.into_parts();

    let mut headers = HashMap::new();
    for (name, value) in &parts.headers {
        headers.insert(
            name.to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }

    let params = parts
        .uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|err| MediatorError::transport("http", err.to_string()))?;

    Ok(InboundRequest {
        method: parts.method.to_string(),
        scheme: "http".to_string(),
        host: ctx.config().server_host().to_string(),
        port: ctx.config().server_port(),
        path: parts.uri.path().to_string(),
        headers,
        params,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

fn envelope_response(engine_response: EngineResponse) -> Response {
    build_response(
        StatusCode::from_u16(engine_response.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        &engine_response.content_type,
        engine_response.body,
    )
}

fn plain_response(status: StatusCode, body: String) -> Response {
    build_response(status, "text/plain", body)
}

fn build_response(status: StatusCode, content_type: &str, body: String) -> Response {
    match Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
    {
        Ok(response) => response,
        Err(_) => {
            let mut fallback = Response::new(Body::empty());
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestHandle;
    use crate::routing::{MediatorRequestHandler, RoutingTable};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl MediatorRequestHandler for NoopHandler {
        async fn handle(
            &self,
            _request: InboundRequest,
            _handle: RequestHandle,
            _ctx: Arc<EngineContext>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn test_ctx() -> Arc<EngineContext> {
        let mut table = RoutingTable::new();
        table.add_route("/test", Arc::new(NoopHandler)).unwrap();
        let config = MediatorConfig::builder("test", "localhost", 0)
            .routing_table(table)
            .build();
        EngineContext::from_config(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn test_buffer_request_captures_everything() {
        let ctx = test_ctx();
        let request = Request::builder()
            .method("POST")
            .uri("/test/path?b=2&a=1&a=3")
            .header("Content-Type", "text/plain")
            .body(Body::from("the payload"))
            .unwrap();

        let inbound = buffer_request(&ctx, request).await.unwrap();

        assert_eq!(inbound.method, "POST");
        assert_eq!(inbound.path, "/test/path");
        assert_eq!(inbound.body, "the payload");
        assert_eq!(
            inbound.params,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(
            crate::messages::header_value(&inbound.headers, "content-type"),
            Some("text/plain")
        );
        assert_eq!(inbound.host, "localhost");
    }

    #[tokio::test]
    async fn test_buffer_request_without_query_or_body() {
        let ctx = test_ctx();
        let request = Request::builder()
            .method("GET")
            .uri("/test")
            .body(Body::empty())
            .unwrap();

        let inbound = buffer_request(&ctx, request).await.unwrap();
        assert!(inbound.params.is_empty());
        assert!(inbound.body.is_empty());
    }

    #[test]
    fn test_envelope_response_with_invalid_status_degrades_to_500() {
        let response = envelope_response(EngineResponse {
            status: 9999,
            content_type: "text/plain".to_string(),
            body: "x".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
