//! HTTP calls against the registry's control plane

use crate::{ClientError, Result};
use registry_core::protocol::{
    Envelope, DEREGISTER_PATH, PING_PATH, REGISTER_PATH, UPDATE_PATH,
};
use std::time::Duration;
use tracing::debug;

/// Thin wrapper issuing control-plane requests and decoding their envelope.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct RegistryApi {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryApi {
    /// Build an API client for `addr` (`host:port` or a full `http://` URL)
    pub fn new(addr: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: Self::normalize(addr),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn ping(&self) -> Result<()> {
        self.call(PING_PATH, &[]).await
    }

    pub async fn register(&self, service_id: &str, host: &str, port: u16) -> Result<()> {
        self.call(
            REGISTER_PATH,
            &[
                ("service_id", service_id.to_string()),
                ("host", host.to_string()),
                ("port", port.to_string()),
            ],
        )
        .await
    }

    pub async fn update(&self, service_id: &str) -> Result<()> {
        self.call(UPDATE_PATH, &[("service_id", service_id.to_string())])
            .await
    }

    pub async fn deregister(&self, service_id: &str) -> Result<()> {
        self.call(DEREGISTER_PATH, &[("service_id", service_id.to_string())])
            .await
    }

    async fn call(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::UnexpectedStatus(status.as_u16()))
            }
            Err(e) => return Err(ClientError::Decode(e)),
        };

        if envelope.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Application {
                code: envelope.code,
                msg: envelope.msg,
            })
        }
    }

    fn normalize(addr: &str) -> String {
        let addr = addr.trim_end_matches('/');
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        }
    }
}
