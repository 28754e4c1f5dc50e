use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Path every write endpoint (router or ingestor) accepts writes on.
pub const RECEIVE_PATH: &str = "/api/v1/receive";

/// Accept loop for a hyper service bound to `host:port`.
///
/// Each accepted connection is handed to hyper on its own task with
/// h1/h2 auto-detection. Runs until the listener errors.
pub async fn run_http_service<S, E>(host: &str, port: u16, service: S) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "listening");
    serve_on(listener, service).await
}

/// Accept loop over an already-bound listener.
///
/// Split out from [`run_http_service`] so tests can bind to port 0 and
/// read back the assigned address before serving.
pub async fn serve_on<S, E>(listener: TcpListener, service: S) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let service_arc = Arc::new(service);

    loop {
        let (stream, _peer_addr) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        tokio::spawn(async move {
            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
            {
                tracing::debug!(error = %err, "connection closed with error");
            }
        });
    }
}

/// Plain-text error response with the status's canonical reason as body.
pub fn make_error_response(status: StatusCode) -> Response<Bytes> {
    let body = Bytes::from(format!(
        "{}\n",
        status.canonical_reason().unwrap_or("error")
    ));
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// Boxed-body variant of [`make_error_response`] for hyper `Service` impls.
pub fn make_boxed_error_response<E>(status: StatusCode) -> Response<BoxBody<Bytes, E>> {
    let (parts, body) = make_error_response(status).into_parts();
    Response::from_parts(parts, full_body(body))
}

/// Wraps a byte body into the boxed-body shape services return.
pub fn full_body<E>(bytes: impl Into<Bytes>) -> BoxBody<Bytes, E> {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}
