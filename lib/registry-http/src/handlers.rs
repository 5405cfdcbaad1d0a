//! Control-plane request handlers

use crate::metrics::RegistryMetrics;
use http_body_util::Full;
use hyper::{body::Bytes, header, Method, Request, Response, StatusCode};
use registry_core::protocol::{
    code, Envelope, DEREGISTER_PATH, PING_PATH, REGISTER_PATH, UPDATE_PATH,
};
use registry_core::{Registry, RegistryError};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

pub const METRICS_PATH: &str = "/metrics";

/// Shared state behind every connection
pub struct ApiState {
    pub registry: Arc<Registry>,
    pub metrics: RegistryMetrics,
}

impl ApiState {
    pub fn new(registry: Arc<Registry>, metrics: RegistryMetrics) -> Self {
        Self { registry, metrics }
    }

    /// Route a request by method and path
    pub async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        peer: SocketAddr,
    ) -> Response<Full<Bytes>> {
        debug!("{} {} from {}", method, path, peer);

        if *method != Method::GET {
            return json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &Envelope::error(code::INVALID_PARAMS, format!("method {} not allowed", method)),
            );
        }

        if path == METRICS_PATH {
            return self.metrics_response().await;
        }

        let params = parse_query(query);
        let (endpoint, envelope) = match path {
            PING_PATH => ("ping", Envelope::ok("pong")),
            REGISTER_PATH => ("register", self.register(&params, peer).await),
            UPDATE_PATH => ("update", self.update(&params).await),
            DEREGISTER_PATH => ("deregister", self.deregister(&params).await),
            _ => {
                self.metrics.record_request("unknown", code::INVALID_PARAMS);
                return json_response(
                    StatusCode::NOT_FOUND,
                    &Envelope::error(code::INVALID_PARAMS, format!("unknown endpoint {}", path)),
                );
            }
        };

        self.metrics.record_request(endpoint, envelope.code);
        json_response(StatusCode::OK, &envelope)
    }

    async fn register(&self, params: &HashMap<String, String>, peer: SocketAddr) -> Envelope {
        let service_id = match required(params, "service_id") {
            Ok(service_id) => service_id,
            Err(envelope) => return envelope,
        };

        let port = match required(params, "port").map(str::parse::<u16>) {
            Ok(Ok(port)) => port,
            Ok(Err(_)) => {
                return Envelope::error(code::INVALID_PARAMS, "port must be a valid port number")
            }
            Err(envelope) => return envelope,
        };

        let host = params
            .get("host")
            .filter(|host| !host.is_empty())
            .cloned()
            .unwrap_or_else(|| peer.ip().to_string());

        into_envelope(self.registry.register(service_id, &host, port).await)
    }

    async fn update(&self, params: &HashMap<String, String>) -> Envelope {
        match required(params, "service_id") {
            Ok(service_id) => into_envelope(self.registry.update(service_id).await),
            Err(envelope) => envelope,
        }
    }

    async fn deregister(&self, params: &HashMap<String, String>) -> Envelope {
        match required(params, "service_id") {
            Ok(service_id) => into_envelope(self.registry.deregister(service_id).await),
            Err(envelope) => envelope,
        }
    }

    async fn metrics_response(&self) -> Response<Full<Bytes>> {
        match self.metrics.gather(&self.registry).await {
            Ok(text) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(text)))
                .unwrap_or_else(|_| internal_error()),
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                internal_error()
            }
        }
    }
}

/// hyper service entry point
pub async fn handle_request<B>(
    req: Request<B>,
    peer: SocketAddr,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(state
        .dispatch(req.method(), req.uri().path(), req.uri().query(), peer)
        .await)
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, Envelope> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Envelope::error(code::INVALID_PARAMS, format!("{} is required", name)))
}

fn into_envelope(result: registry_core::Result<()>) -> Envelope {
    match result {
        Ok(()) => Envelope::ok("success"),
        Err(RegistryError::NotFound(_)) => Envelope::error(code::NOT_FOUND, "service not found"),
        Err(RegistryError::InvalidArgument(msg)) => Envelope::error(code::INVALID_PARAMS, msg),
        Err(e) => Envelope::error(code::INTERNAL, e.to_string()),
    }
}

fn json_response(status: StatusCode, envelope: &Envelope) -> Response<Full<Bytes>> {
    let body = match serde_json::to_vec(envelope) {
        Ok(body) => body,
        Err(_) => return internal_error(),
    };

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error\n")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn state() -> ApiState {
        ApiState::new(Arc::new(Registry::default()), RegistryMetrics::new().unwrap())
    }

    fn peer() -> SocketAddr {
        "192.168.1.7:51234".parse().unwrap()
    }

    async fn call(state: &ApiState, path: &str, query: Option<&str>) -> (StatusCode, Envelope) {
        let response = state.dispatch(&Method::GET, path, query, peer()).await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_ping() {
        let (status, envelope) = call(&state(), "/api/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope, Envelope::ok("pong"));
    }

    #[tokio::test]
    async fn test_register_update_deregister() {
        let state = state();

        let (_, envelope) = call(
            &state,
            "/api/registry/register",
            Some("service_id=svc-1&host=10.0.0.1&port=9000"),
        )
        .await;
        assert!(envelope.is_ok());

        let entry = state.registry.get_service_by_id("svc-1").await.unwrap();
        assert_eq!(entry.address(), "10.0.0.1:9000");

        let (_, envelope) = call(&state, "/api/registry/update", Some("service_id=svc-1")).await;
        assert!(envelope.is_ok());

        let deregister = Some("service_id=svc-1");
        let (_, envelope) = call(&state, "/api/registry/deregister", deregister).await;
        assert!(envelope.is_ok());

        let (_, envelope) = call(&state, "/api/registry/deregister", deregister).await;
        assert_eq!(envelope.code, code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_defaults_host_to_peer() {
        let state = state();
        call(&state, "/api/registry/register", Some("service_id=svc-1&port=9000")).await;

        let entry = state.registry.get_service_by_id("svc-1").await.unwrap();
        assert_eq!(entry.host, "192.168.1.7");
    }

    #[tokio::test]
    async fn test_register_validates_params() {
        let state = state();

        let (_, envelope) = call(&state, "/api/registry/register", Some("port=9000")).await;
        assert_eq!(envelope.code, code::INVALID_PARAMS);

        let (_, envelope) = call(&state, "/api/registry/register", Some("service_id=svc-1")).await;
        assert_eq!(envelope.code, code::INVALID_PARAMS);

        let (_, envelope) =
            call(&state, "/api/registry/register", Some("service_id=svc-1&port=99999")).await;
        assert_eq!(envelope.code, code::INVALID_PARAMS);

        assert_eq!(state.registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_update_unknown_service() {
        let (_, envelope) = call(&state(), "/api/registry/update", Some("service_id=ghost")).await;
        assert_eq!(envelope, Envelope::error(code::NOT_FOUND, "service not found"));
    }

    #[tokio::test]
    async fn test_query_values_are_decoded() {
        let state = state();
        call(&state, "/api/registry/register", Some("service_id=agent%2F1&port=9000")).await;
        assert!(state.registry.service_exists("agent/1").await);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let (status, envelope) = call(&state(), "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(envelope.code, code::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_rejects_non_get() {
        let response = state()
            .dispatch(&Method::POST, "/api/ping", None, peer())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state();
        call(&state, "/api/ping", None).await;

        let response = state.dispatch(&Method::GET, "/metrics", None, peer()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"registry_requests_total{code="0",endpoint="ping"} 1"#));
    }
}
