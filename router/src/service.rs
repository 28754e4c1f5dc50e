use crate::errors::RouterError;
use crate::router::Router;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::full_body;
use shared::wire::{HOPS_HEADER, TENANT_HEADER, WireCodec};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Ingress service: accepts wire-encoded write requests and runs them
/// through the router. The tenant arrives as a header injected by the
/// external proxy, never parsed from the payload.
pub struct ReceiveService {
    router: Arc<Router>,
    default_tenant: Option<String>,
}

impl ReceiveService {
    pub fn new(router: Arc<Router>, default_tenant: Option<String>) -> Self {
        Self {
            router,
            default_tenant,
        }
    }

    async fn handle_receive(
        router: Arc<Router>,
        default_tenant: Option<String>,
        req: Request<Incoming>,
    ) -> Result<(), RouterError> {
        let tenant = match req.headers().get(TENANT_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| RouterError::RequestBody("invalid tenant header".to_string()))?
                .to_string(),
            None => default_tenant.ok_or(RouterError::MissingTenant)?,
        };

        let hops = match req.headers().get(HOPS_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .ok_or_else(|| RouterError::RequestBody("invalid hops header".to_string()))?,
            None => 0,
        };

        let body = req
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| RouterError::RequestBody(e.to_string()))?;
        let request = WireCodec::default().decode(&body)?;

        router.forward(&tenant, request, hops).await
    }
}

impl Service<Request<Incoming>> for ReceiveService {
    type Response = Response<BoxBody<Bytes, RouterError>>;
    type Error = RouterError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        let default_tenant = self.default_tenant.clone();

        Box::pin(async move {
            let response = match (req.method(), req.uri().path()) {
                (&Method::POST, crate::client::RECEIVE_PATH) => {
                    match Self::handle_receive(router, default_tenant, req).await {
                        Ok(()) => Response::new(full_body("ok\n")),
                        Err(error) => {
                            tracing::debug!(%error, "write request rejected");
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
