//! The per-request lifecycle.
//!
//! One task is spawned per inbound request. It resolves the handler, runs it,
//! and folds the handler's event stream into a single [`CoreResponse`]
//! envelope, which is finalized exactly once: either straight back to the
//! caller, or (after the handler switches to asynchronous processing) as a
//! transaction update pushed to core while the caller holds a 202.

use std::sync::Arc;

use openhim_mediator_core::{CoreResponse, MediatorError, ResponseDetail};
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::messages::{
    header_value, FinishRequest, HttpTarget, InboundRequest, LifecycleEvent, MediatorHttpRequest,
    RequestHandle, Responder,
};
use crate::OPENHIM_MIME_TYPE;

/// Header carrying the core transaction id on routed requests. Required for
/// asynchronous processing.
pub const TRANSACTION_ID_HEADER: &str = "X-OpenHIM-TransactionID";

const ASYNC_ACCEPTED_BODY: &str = "Accepted request";

/// The finalized wire response handed back to the listener.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// Start the lifecycle for one buffered inbound request. The reply slot
/// receives exactly one [`EngineResponse`]; if the lifecycle dies without
/// responding, the dropped slot surfaces at the listener.
pub fn spawn(
    ctx: Arc<EngineContext>,
    request: InboundRequest,
    respond_to: Responder<EngineResponse>,
) {
    tokio::spawn(run(ctx, request, respond_to));
}

async fn run(ctx: Arc<EngineContext>, request: InboundRequest, respond_to: Responder<EngineResponse>) {
    let mut lifecycle = RequestLifecycle::new(&ctx, &request);

    let Some(handler) = ctx.routing_table().resolve(&request.path) else {
        info!(path = %request.path, "no route matched");
        lifecycle.response.response = Some(not_found_detail(&request.path));
        respond_to.respond(lifecycle.caller_response());
        return;
    };

    debug!(method = %request.method, path = %request.path, "routing request");

    let (handle, mut events) = RequestHandle::channel();
    {
        let handle = handle.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = handler.handle(request, handle.clone(), ctx).await {
                handle.error(err);
            }
        });
    }
    // the lifecycle must not keep its own channel open
    drop(handle);

    let mut respond_to = Some(respond_to);
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Orchestration(orchestration) => {
                lifecycle.response.add_orchestration(orchestration);
            }
            LifecycleEvent::Property { name, value } => {
                lifecycle.response.put_property(name, value);
            }
            LifecycleEvent::Error(err) => {
                error!(category = %err.category(), error = %err, "request failed");
                lifecycle.response.response = Some(error_detail(&err));
                lifecycle.finalize(&ctx, respond_to.take()).await;
                return;
            }
            LifecycleEvent::Finish(finish) => {
                lifecycle.response.response = Some(finish_detail(finish));
                lifecycle.finalize(&ctx, respond_to.take()).await;
                return;
            }
            LifecycleEvent::AcceptAsync => {
                let Some(transaction_id) = lifecycle.transaction_id.clone() else {
                    let err = MediatorError::MissingTransactionId;
                    error!(error = %err, "cannot switch to asynchronous processing");
                    lifecycle.response.response = Some(error_detail(&err));
                    lifecycle.finalize(&ctx, respond_to.take()).await;
                    return;
                };
                info!(transaction = %transaction_id, "processing asynchronously");
                lifecycle.async_transaction_id = Some(transaction_id);
                if let Some(respond_to) = respond_to.take() {
                    respond_to.respond(lifecycle.accepted_response());
                }
            }
        }
    }

    // every handle was dropped without a completion signal
    warn!("request handler went away without finishing");
    lifecycle.response.response = Some(error_detail(&MediatorError::handler(
        "the request handler terminated without a response",
    )));
    lifecycle.finalize(&ctx, respond_to.take()).await;
}

struct RequestLifecycle {
    response: CoreResponse,
    transaction_id: Option<String>,
    async_transaction_id: Option<String>,
}

impl RequestLifecycle {
    fn new(ctx: &EngineContext, request: &InboundRequest) -> Self {
        let urn = ctx
            .config()
            .registration_config()
            .and_then(|registration| registration.urn().ok())
            .map(str::to_string);
        Self {
            response: CoreResponse {
                urn,
                ..Default::default()
            },
            transaction_id: header_value(&request.headers, TRANSACTION_ID_HEADER)
                .map(str::to_string),
            async_transaction_id: None,
        }
    }

    /// Deliver the final envelope: to the caller if it is still waiting, or
    /// to core as a transaction update if the caller already holds a 202.
    async fn finalize(&self, ctx: &EngineContext, respond_to: Option<Responder<EngineResponse>>) {
        match (&self.async_transaction_id, respond_to) {
            (Some(transaction_id), _) => {
                update_core_transaction(ctx, transaction_id, serialized_view(&self.response)).await;
            }
            (None, Some(respond_to)) => respond_to.respond(self.caller_response()),
            (None, None) => {}
        }
    }

    fn caller_response(&self) -> EngineResponse {
        let status = self
            .response
            .response
            .as_ref()
            .and_then(|detail| detail.status)
            .unwrap_or(200);
        EngineResponse {
            status,
            content_type: OPENHIM_MIME_TYPE.to_string(),
            body: serialized_view(&self.response),
        }
    }

    /// The interim 202 envelope sent while processing continues. Built on a
    /// copy so the accumulating response is untouched and the eventual
    /// transaction update carries the real outcome.
    fn accepted_response(&self) -> EngineResponse {
        let mut interim = self.response.clone();
        interim.response = Some(finish_detail(FinishRequest::new(
            ASYNC_ACCEPTED_BODY,
            "text/plain",
            202,
        )));
        EngineResponse {
            status: 202,
            content_type: OPENHIM_MIME_TYPE.to_string(),
            body: serialized_view(&interim),
        }
    }
}

/// Serialize the envelope, deriving the descriptive status into the copy so
/// the live aggregate never freezes an interim value.
fn serialized_view(response: &CoreResponse) -> String {
    let mut view = response.clone();
    if view.status.is_none() {
        view.status = Some(view.descriptive_status().as_str().to_string());
    }
    match view.to_json() {
        Ok(json) => json,
        Err(err) => {
            error!(error = %err, "failed to serialize response envelope");
            String::from("{}")
        }
    }
}

/// Push the final result to core: `PUT /transactions/{id}` through the
/// authenticated connector. The outcome is observed and logged here; by now
/// there is no caller left to report to.
async fn update_core_transaction(ctx: &EngineContext, transaction_id: &str, body: String) {
    let config = ctx.config();
    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    let request = MediatorHttpRequest::builder(
        "PUT",
        HttpTarget::address(
            config.core_api_scheme(),
            config.core_host(),
            config.core_api_port(),
            format!("/transactions/{transaction_id}"),
        ),
    )
    .header("Content-Type", "application/json")
    .body(body)
    .orchestration("update-transaction")
    .build(handle, respond_to);

    ctx.core_api().send(request);

    match reply.await {
        Ok(response) if (200..300).contains(&response.status) => {
            info!(transaction = %transaction_id, status = response.status, "updated core transaction");
        }
        Ok(response) => {
            warn!(
                transaction = %transaction_id,
                status = response.status,
                body = %response.body,
                "core rejected the transaction update"
            );
        }
        Err(_) => {
            // the connector reported the failure on the side-channel
            while let Ok(event) = events.try_recv() {
                if let LifecycleEvent::Error(err) = event {
                    error!(transaction = %transaction_id, error = %err, "failed to update core transaction");
                }
            }
        }
    }
}

fn finish_detail(finish: FinishRequest) -> ResponseDetail {
    let mut detail = ResponseDetail {
        status: Some(finish.status.unwrap_or(200)),
        body: finish.body,
        ..Default::default()
    };
    if let Some(content_type) = finish.content_type {
        detail.put_header("Content-Type", content_type);
    }
    detail
}

fn error_detail(err: &MediatorError) -> ResponseDetail {
    let mut detail = ResponseDetail {
        status: Some(500),
        body: Some(err.to_string()),
        ..Default::default()
    };
    detail.put_header("Content-Type", "text/plain");
    detail
}

fn not_found_detail(path: &str) -> ResponseDetail {
    let mut detail = ResponseDetail {
        status: Some(404),
        body: Some(format!("{path} not found")),
        ..Default::default()
    };
    detail.put_header("Content-Type", "text/plain");
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_view_derives_status_without_freezing_it() {
        let response = CoreResponse {
            urn: Some("urn:mediator:test".to_string()),
            response: Some(ResponseDetail {
                status: Some(500),
                ..Default::default()
            }),
            ..Default::default()
        };

        let value: serde_json::Value =
            serde_json::from_str(&serialized_view(&response)).unwrap();
        assert_eq!(value["status"], "Failed");
        // the live aggregate keeps deriving, it never stores the string
        assert!(response.status.is_none());
    }

    #[test]
    fn test_serialized_view_keeps_an_explicit_status() {
        let response = CoreResponse {
            status: Some("Processing".to_string()),
            ..Default::default()
        };
        let value: serde_json::Value =
            serde_json::from_str(&serialized_view(&response)).unwrap();
        assert_eq!(value["status"], "Processing");
    }

    #[test]
    fn test_finish_detail_defaults() {
        let detail = finish_detail(FinishRequest::default());
        assert_eq!(detail.status, Some(200));
        assert!(detail.body.is_none());
        assert!(detail.headers.is_empty());

        let detail = finish_detail(FinishRequest::new("done", "text/plain", 201));
        assert_eq!(detail.status, Some(201));
        assert_eq!(detail.body.as_deref(), Some("done"));
        assert_eq!(
            detail.headers.get("Content-Type"),
            Some(&"text/plain".to_string())
        );
    }

    #[test]
    fn test_not_found_detail() {
        let detail = not_found_detail("/missing");
        assert_eq!(detail.status, Some(404));
        assert_eq!(detail.body.as_deref(), Some("/missing not found"));
    }

    #[test]
    fn test_error_detail_uses_display_text() {
        let detail = error_detail(&MediatorError::handler("boom"));
        assert_eq!(detail.status, Some(500));
        assert_eq!(detail.body.as_deref(), Some("Handler error: boom"));
    }
}
