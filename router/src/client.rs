use crate::errors::RouterError;
use bytes::Bytes;
use hashring::Endpoint;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::header::CONTENT_TYPE;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use shared::wire::{HOPS_HEADER, REPLICA_HEADER, TENANT_HEADER};
use std::time::Duration;
use tokio::time::timeout;

pub use shared::http::RECEIVE_PATH;

/// Egress client for forwarding wire-encoded write requests.
///
/// One client per router process; the underlying pool is safe for
/// concurrent use, so no per-request locking is needed.
#[derive(Clone)]
pub struct ForwardClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Default for ForwardClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardClient {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    /// Sends one replica of a write to one endpoint, bounded by the
    /// inherited deadline. Timeouts and transport failures are separate
    /// error kinds so the coordinator can count them distinctly.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        tenant: &str,
        replica: usize,
        hops: u32,
        body: Bytes,
        deadline: Duration,
    ) -> Result<(), RouterError> {
        let mut url = endpoint.url.clone();
        url.set_path(RECEIVE_PATH);
        url.set_query(None);

        let request = Request::builder()
            .method(hyper::Method::POST)
            .uri(url.to_string())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(TENANT_HEADER, tenant)
            .header(REPLICA_HEADER, replica.to_string())
            .header(HOPS_HEADER, hops.to_string())
            .body(Full::new(body))
            .map_err(|e| RouterError::Internal(format!("failed to build request: {e}")))?;

        let response = timeout(deadline, self.client.request(request))
            .await
            .map_err(|_| RouterError::UpstreamTimeout(endpoint.name.clone()))?
            .map_err(|e| RouterError::Forward {
                endpoint: endpoint.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        // drain the body so the connection returns to the pool
        let _ = response.into_body().collect().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(RouterError::Forward {
                endpoint: endpoint.name.clone(),
                reason: format!("status {status}"),
            })
        }
    }
}
