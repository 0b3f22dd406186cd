//! HTTP connector behavior against a live mock upstream.

use std::time::Duration;

use openhim_mediator_core::MediatorError;
use openhim_mediator_engine::{
    HttpConnector, HttpTarget, LifecycleEvent, MediatorHttpRequest, RequestHandle, Responder,
    OPENHIM_MIME_TYPE,
};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connector() -> HttpConnector {
    HttpConnector::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_forwards_request_and_records_one_orchestration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/target"))
        .and(query_param("k1", "v1"))
        .and(query_param("k2", "v2"))
        .and(header("X-Test", "yes"))
        .and(body_string("the request payload"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_string("created")
                .insert_header("X-Upstream", "1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    let request =
        MediatorHttpRequest::builder("POST", HttpTarget::uri(format!("{}/target", server.uri())))
            .body("the request payload")
            .header("X-Test", "yes")
            .param("k1", "v1")
            .param("k2", "v2")
            .orchestration("upstream-call")
            .build(handle, respond_to);
    connector().send(request);

    let response = reply.await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.body, "created");
    assert_eq!(response.headers.get("x-upstream").map(String::as_str), Some("1"));

    match events.recv().await {
        Some(LifecycleEvent::Orchestration(orch)) => {
            assert_eq!(orch.name, "upstream-call");
            let detail = orch.response.unwrap();
            assert_eq!(detail.status, Some(201));
            assert_eq!(detail.body.as_deref(), Some("created"));
        }
        other => panic!("expected an orchestration event, got {other:?}"),
    }
    // the connector is done with its handle; nothing else arrives
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_address_target_records_host_port_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let addr = server.address();
    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    let request = MediatorHttpRequest::builder(
        "GET",
        HttpTarget::address("http", addr.ip().to_string(), addr.port(), "/resource"),
    )
    .orchestration("resource-call")
    .build(handle, respond_to);
    connector().send(request);

    assert_eq!(reply.await.unwrap().status, 200);
    match events.recv().await {
        Some(LifecycleEvent::Orchestration(orch)) => {
            let snapshot = orch.request.unwrap();
            assert_eq!(snapshot.host.as_deref(), Some(addr.ip().to_string().as_str()));
            assert_eq!(snapshot.port.as_deref(), Some(addr.port().to_string().as_str()));
            assert_eq!(snapshot.path.as_deref(), Some("/resource"));
            assert_eq!(snapshot.method.as_deref(), Some("GET"));
        }
        other => panic!("expected an orchestration event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsupported_method_is_reported_not_sent() {
    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    let request =
        MediatorHttpRequest::builder("PATCH", HttpTarget::uri("http://localhost:1/never"))
            .orchestration("bad-call")
            .build(handle, respond_to);
    connector().send(request);

    match events.recv().await {
        Some(LifecycleEvent::Error(MediatorError::UnsupportedMethod(m))) => {
            assert_eq!(m, "PATCH");
        }
        other => panic!("expected an unsupported-method error, got {other:?}"),
    }
    // the reply slot was dropped without a response
    assert!(reply.await.is_err());
}

#[tokio::test]
async fn test_connection_failure_is_a_transport_error() {
    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    // bind-and-drop to get a port nothing listens on
    let port = {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap().port()
    };
    let request = MediatorHttpRequest::builder(
        "GET",
        HttpTarget::uri(format!("http://127.0.0.1:{port}/down")),
    )
    .orchestration("down-call")
    .build(handle, respond_to);
    connector().send(request);

    match events.recv().await {
        Some(LifecycleEvent::Error(MediatorError::Transport { transport, .. })) => {
            assert_eq!(transport, "http");
        }
        other => panic!("expected a transport error, got {other:?}"),
    }
    assert!(reply.await.is_err());
}

#[tokio::test]
async fn test_mediator_content_is_unwrapped_and_flattened() {
    let envelope = serde_json::json!({
        "x-mediator-urn": "urn:mediator:nested",
        "status": "Successful",
        "response": {
            "status": 200,
            "headers": { "Content-Type": "application/xml" },
            "body": "<nested/>",
            "timestamp": "2015-01-15T14:51:00Z"
        },
        "orchestrations": [
            { "name": "nested-orch-1" },
            { "name": "nested-orch-2" }
        ],
        "properties": { "p1": "v1", "p2": "v2" }
    });

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chained"))
        .respond_with(
            ResponseTemplate::new(201).set_body_raw(envelope.to_string(), OPENHIM_MIME_TYPE),
        )
        .mount(&server)
        .await;

    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    let request =
        MediatorHttpRequest::builder("GET", HttpTarget::uri(format!("{}/chained", server.uri())))
            .orchestration("chained-call")
            .build(handle, respond_to);
    connector().send(request);

    let response = reply.await.unwrap();
    // the nested status and body win over the transport's
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "<nested/>");
    // nested headers are merged over the transport headers
    assert_eq!(
        response.headers.get("Content-Type").map(String::as_str),
        Some("application/xml")
    );

    let mut orchestrations = Vec::new();
    let mut properties = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Orchestration(orch) => orchestrations.push(orch.name),
            LifecycleEvent::Property { name, value } => properties.push((name, value)),
            other => panic!("unexpected event {other:?}"),
        }
    }
    // only the nested orchestrations flow through; no synthetic outer record
    assert_eq!(orchestrations, vec!["nested-orch-1", "nested-orch-2"]);
    properties.sort();
    assert_eq!(
        properties,
        vec![
            ("p1".to_string(), "v1".to_string()),
            ("p2".to_string(), "v2".to_string())
        ]
    );
}

#[tokio::test]
async fn test_mediator_content_without_response_object_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"orchestrations": []}"#, OPENHIM_MIME_TYPE),
        )
        .mount(&server)
        .await;

    let (handle, mut events) = RequestHandle::channel();
    let (respond_to, reply) = Responder::channel();
    let request =
        MediatorHttpRequest::builder("GET", HttpTarget::uri(format!("{}/bad", server.uri())))
            .orchestration("bad-envelope")
            .build(handle, respond_to);
    connector().send(request);

    match events.recv().await {
        Some(LifecycleEvent::Error(MediatorError::InvalidContent(message))) => {
            assert_eq!(
                message,
                "no response object found in application/json+openhim content"
            );
        }
        other => panic!("expected an invalid-content error, got {other:?}"),
    }
    assert!(reply.await.is_err());
}
