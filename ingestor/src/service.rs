use crate::ingestor::{IngestError, Ingestor};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::full_body;
use shared::wire::{REPLICA_HEADER, TENANT_HEADER, WireCodec, WireError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
enum ServiceError {
    #[error("request body error: {0}")]
    RequestBody(String),

    #[error("missing tenant header")]
    MissingTenant,

    #[error("{0}")]
    Decode(#[from] WireError),

    #[error("{0}")]
    Ingest(#[from] IngestError),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::RequestBody(_) | ServiceError::Decode(_) => StatusCode::BAD_REQUEST,
            ServiceError::MissingTenant => StatusCode::UNAUTHORIZED,
            ServiceError::Ingest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Write endpoint for a terminal destination. Accepts the same wire
/// format as the router ingress; the replica header set at fan-out
/// becomes a stored label.
pub struct IngestService {
    ingestor: Arc<Ingestor>,
    default_tenant: Option<String>,
}

impl IngestService {
    pub fn new(ingestor: Arc<Ingestor>, default_tenant: Option<String>) -> Self {
        Self {
            ingestor,
            default_tenant,
        }
    }

    async fn handle_write(
        ingestor: Arc<Ingestor>,
        default_tenant: Option<String>,
        req: Request<Incoming>,
    ) -> Result<(), ServiceError> {
        let tenant = match req.headers().get(TENANT_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| ServiceError::RequestBody("invalid tenant header".to_string()))?
                .to_string(),
            None => default_tenant.ok_or(ServiceError::MissingTenant)?,
        };

        let replica = match req.headers().get(REPLICA_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .ok_or_else(|| ServiceError::RequestBody("invalid replica header".to_string()))?,
            None => 0,
        };

        let body = req
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| ServiceError::RequestBody(e.to_string()))?;
        let request = WireCodec::default().decode(&body)?;

        ingestor.write(&tenant, replica, request).await?;
        Ok(())
    }
}

impl Service<Request<Incoming>> for IngestService {
    type Response = Response<BoxBody<Bytes, IngestError>>;
    type Error = IngestError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let ingestor = self.ingestor.clone();
        let default_tenant = self.default_tenant.clone();

        Box::pin(async move {
            let response = match (req.method(), req.uri().path()) {
                (&Method::POST, shared::http::RECEIVE_PATH) => {
                    match Self::handle_write(ingestor, default_tenant, req).await {
                        Ok(()) => Response::new(full_body("ok\n")),
                        Err(error) => {
                            tracing::debug!(%error, "write rejected");
                            let mut res = Response::new(full_body(format!("{error}\n")));
                            *res.status_mut() = error.status();
                            res
                        }
                    }
                }
                _ => {
                    let mut res = Response::new(full_body("not found\n"));
                    *res.status_mut() = StatusCode::NOT_FOUND;
                    res
                }
            };
            Ok(response)
        })
    }
}
