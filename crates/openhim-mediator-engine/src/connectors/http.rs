//! The outbound HTTP connector.
//!
//! Executes one call per [`MediatorHttpRequest`] on a spawned task. On
//! completion exactly one [`MediatorHttpResponse`] goes to the reply slot and
//! exactly one orchestration event to the request handler — unless the
//! upstream server is itself a mediator (`application/json+openhim`), in
//! which case the nested envelope is unwrapped and its orchestrations and
//! properties are forwarded individually so that chained mediators produce a
//! single flattened audit trail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use openhim_mediator_core::{
    CoreResponse, MediatorError, Orchestration, RequestSnapshot, ResponseDetail, Result,
};
use reqwest::{Certificate, Client, Identity, Method};
use tracing::warn;
use url::Url;

use crate::config::TlsConfig;
use crate::messages::{
    header_value, put_header, HttpTarget, MediatorHttpRequest, MediatorHttpResponse,
    RequestHandle,
};
use crate::OPENHIM_MIME_TYPE;

#[derive(Clone)]
pub struct HttpConnector {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    tls_client: ArcSwapOption<Client>,
    call_timeout: Duration,
}

impl HttpConnector {
    pub fn new(call_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|err| {
                MediatorError::configuration(format!("failed to construct HTTP client: {err}"))
            })?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                tls_client: ArcSwapOption::from(None),
                call_timeout,
            }),
        })
    }

    /// Install the configured TLS context. The resulting client is used only
    /// for `https` calls; until this succeeds, system trust applies. Returns
    /// an error on invalid key or trust material so startup can gate on it.
    pub fn install_tls(&self, tls: &TlsConfig) -> Result<()> {
        let mut builder = Client::builder()
            .timeout(self.inner.call_timeout)
            .use_rustls_tls();

        if tls.trust_all {
            warn!("TLS: trusting all certificates; do not enable this in production");
            builder = builder.danger_accept_invalid_certs(true);
        }

        for pem in &tls.trust_roots {
            let certificate = Certificate::from_pem(pem).map_err(|err| {
                MediatorError::configuration(format!("invalid trust root: {err}"))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        if let Some(identity_pem) = &tls.identity_pem {
            let identity = Identity::from_pem(identity_pem).map_err(|err| {
                MediatorError::configuration(format!("invalid client identity: {err}"))
            })?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(|err| {
            MediatorError::configuration(format!("failed to construct TLS client: {err}"))
        })?;
        self.inner.tls_client.store(Some(Arc::new(client)));
        Ok(())
    }

    /// Execute the call in the background. All failures are reported to the
    /// request handler; the reply slot is dropped on failure.
    pub fn send(&self, request: MediatorHttpRequest) {
        let connector = self.clone();
        tokio::spawn(async move {
            connector.dispatch(request).await;
        });
    }

    async fn dispatch(&self, request: MediatorHttpRequest) {
        let MediatorHttpRequest {
            method,
            target,
            body,
            headers,
            params,
            orchestration,
            correlation_id: _,
            request_handler,
            respond_to,
        } = request;

        let parsed_method = match parse_method(&method) {
            Ok(parsed) => parsed,
            Err(err) => {
                request_handler.error(err);
                return;
            }
        };
        let url = match build_url(&target, &params) {
            Ok(url) => url,
            Err(err) => {
                request_handler.error(err);
                return;
            }
        };

        let client = self.client_for(url.scheme());
        let mut call = client.request(parsed_method, url);
        for (name, value) in &headers {
            call = call.header(name, value);
        }
        if let Some(body) = &body {
            call = call.body(body.clone());
        }

        let upstream = match call.send().await {
            Ok(upstream) => upstream,
            Err(err) => {
                request_handler.error(MediatorError::transport("http", err.to_string()));
                return;
            }
        };

        let status = upstream.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in upstream.headers() {
            response_headers.insert(
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        let response_body = match upstream.text().await {
            Ok(text) => text,
            Err(err) => {
                request_handler.error(MediatorError::transport("http", err.to_string()));
                return;
            }
        };

        let is_mediator_content = header_value(&response_headers, "Content-Type")
            .is_some_and(|content_type| content_type.contains(OPENHIM_MIME_TYPE));

        if is_mediator_content {
            match unwrap_mediator_content(
                &request_handler,
                status,
                response_headers,
                &response_body,
            ) {
                Ok(response) => respond_to.respond(response),
                Err(err) => request_handler.error(err),
            }
        } else {
            let response = MediatorHttpResponse {
                status,
                headers: response_headers,
                body: response_body,
            };
            request_handler.add_orchestration(build_http_orchestration(
                &orchestration,
                &method,
                &target,
                &body,
                &headers,
                &response,
            ));
            respond_to.respond(response);
        }
    }

    fn client_for(&self, scheme: &str) -> Client {
        if scheme.eq_ignore_ascii_case("https") {
            if let Some(client) = self.inner.tls_client.load_full() {
                return (*client).clone();
            }
        }
        self.inner.client.clone()
    }
}

fn parse_method(method: &str) -> Result<Method> {
    match method {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        other => Err(MediatorError::unsupported_method(other)),
    }
}

fn build_url(target: &HttpTarget, params: &[(String, String)]) -> Result<Url> {
    let mut url = match target {
        HttpTarget::Uri(uri) => Url::parse(uri)?,
        HttpTarget::Address {
            scheme,
            host,
            port,
            path,
        } => Url::parse(&format!("{scheme}://{host}:{port}{path}"))?,
    };
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
    }
    Ok(url)
}

/// Unwrap a nested mediator envelope: the nested response becomes this call's
/// response (headers merged over the transport headers), and every nested
/// orchestration and property is forwarded individually. No synthetic
/// orchestration is produced for the outer call.
fn unwrap_mediator_content(
    request_handler: &RequestHandle,
    transport_status: u16,
    transport_headers: HashMap<String, String>,
    body: &str,
) -> Result<MediatorHttpResponse> {
    let parsed = CoreResponse::parse(body)?;
    let nested = parsed.response.ok_or_else(|| {
        MediatorError::invalid_content(
            "no response object found in application/json+openhim content",
        )
    })?;

    let status = nested.status.unwrap_or(transport_status);
    let mut headers = transport_headers;
    for (name, value) in nested.headers {
        put_header(&mut headers, name, value);
    }

    for orchestration in parsed.orchestrations {
        request_handler.add_orchestration(orchestration);
    }
    for (name, value) in parsed.properties {
        request_handler.put_property(name, value);
    }

    Ok(MediatorHttpResponse {
        status,
        headers,
        body: nested.body.unwrap_or_default(),
    })
}

fn build_http_orchestration(
    name: &str,
    method: &str,
    target: &HttpTarget,
    body: &Option<String>,
    headers: &HashMap<String, String>,
    response: &MediatorHttpResponse,
) -> Orchestration {
    let mut request_snapshot = RequestSnapshot {
        method: Some(method.to_string()),
        body: body.clone(),
        headers: headers.clone(),
        ..Default::default()
    };
    // host/port/path are only known when the target was given in parts
    if let HttpTarget::Address {
        host, port, path, ..
    } = target
    {
        request_snapshot.host = Some(host.clone());
        request_snapshot.port = Some(port.to_string());
        request_snapshot.path = Some(path.clone());
    }

    Orchestration {
        name: name.to_string(),
        request: Some(request_snapshot),
        response: Some(ResponseDetail {
            status: Some(response.status),
            headers: response.headers.clone(),
            body: Some(response.body.clone()),
            ..Default::default()
        }),
    }
}
