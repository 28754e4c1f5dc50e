//! Concurrent replication fan-out with quorum resolution.
//!
//! Every candidate gets its own detached task; results flow back over a
//! channel into a counting gate. The gate resolves success as soon as
//! the quorum count is reached and failure as soon as quorum becomes
//! unreachable. Outstanding sends keep running in the background bounded
//! by their own deadline, so a healthy ring still lands every replica
//! even though the caller was answered at quorum.

use crate::client::ForwardClient;
use crate::errors::RouterError;
use crate::health::DownstreamHealth;
use bytes::Bytes;
use hashring::{Candidate, CandidateSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct ReplicationCoordinator {
    client: ForwardClient,
    health: Arc<DownstreamHealth>,
    deadline: Duration,
}

impl ReplicationCoordinator {
    pub fn new(client: ForwardClient, health: Arc<DownstreamHealth>, deadline: Duration) -> Self {
        Self {
            client,
            health,
            deadline,
        }
    }

    /// Replicates one payload to every candidate in the set and resolves
    /// the outcome by the set's quorum.
    pub async fn replicate(
        &self,
        tenant: &str,
        set: CandidateSet,
        body: Bytes,
        hops: u32,
    ) -> Result<(), RouterError> {
        replicate_candidates(
            self.client.clone(),
            self.health.clone(),
            tenant.to_string(),
            set.candidates,
            set.quorum,
            body,
            hops,
            self.deadline,
        )
        .await
    }
}

/// Recursive step shared by top-level sets and expanded sub-rings. A
/// sub-ring group acks toward its parent only once its own quorum is
/// met, giving the same forward contract at every tree depth.
#[allow(clippy::too_many_arguments)]
fn replicate_candidates(
    client: ForwardClient,
    health: Arc<DownstreamHealth>,
    tenant: String,
    candidates: Vec<Candidate>,
    quorum: usize,
    body: Bytes,
    hops: u32,
    deadline: Duration,
) -> Pin<Box<dyn Future<Output = Result<(), RouterError>> + Send>> {
    Box::pin(async move {
        let total = candidates.len();
        let (tx, mut rx) = mpsc::channel(total.max(1));

        for (replica, candidate) in candidates.into_iter().enumerate() {
            let tx = tx.clone();
            let client = client.clone();
            let health = health.clone();
            let tenant = tenant.clone();
            let body = body.clone();

            tokio::spawn(async move {
                let result = match candidate {
                    Candidate::Endpoint(endpoint) => {
                        let result = client
                            .send(&endpoint, &tenant, replica, hops, body, deadline)
                            .await;
                        health.record(&endpoint.name, result.is_ok());
                        result
                    }
                    Candidate::Group {
                        quorum, members, ..
                    } => {
                        replicate_candidates(
                            client, health, tenant, members, quorum, body, hops, deadline,
                        )
                        .await
                    }
                };
                // the gate may already be resolved; stragglers are fine
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut acked = 0;
        let mut failed = 0;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(()) => {
                    acked += 1;
                    metrics::counter!("conflux_replicate_acks_total").increment(1);
                    if acked >= quorum {
                        return Ok(());
                    }
                }
                Err(error) => {
                    failed += 1;
                    metrics::counter!("conflux_forward_failures_total").increment(1);
                    // below-quorum failures are absorbed here, not surfaced
                    tracing::warn!(%error, "destination write failed");
                    if total - failed < quorum {
                        metrics::counter!("conflux_quorum_failures_total").increment(1);
                        return Err(RouterError::QuorumFailed {
                            acked,
                            required: quorum,
                        });
                    }
                }
            }
        }

        // all results in without reaching quorum: the candidate list was
        // shorter than the quorum (degraded ring)
        metrics::counter!("conflux_quorum_failures_total").increment(1);
        Err(RouterError::QuorumFailed {
            acked,
            required: quorum,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashring::Endpoint;
    use http_body_util::Full;
    use hyper::body::Bytes as HyperBytes;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use url::Url;

    async fn spawn_server(status: StatusCode) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_server = hits.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = hyper_util::rt::TokioIo::new(stream);
                let hits = hits_server.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                        let hits = hits.clone();
                        async move {
                            hits.fetch_add(1, Ordering::SeqCst);
                            let mut res = Response::new(Full::new(HyperBytes::from("ok\n")));
                            *res.status_mut() = status;
                            Ok::<_, Infallible>(res)
                        }
                    });
                    let _ = hyper_util::server::conn::auto::Builder::new(
                        hyper_util::rt::TokioExecutor::new(),
                    )
                    .serve_connection(io, service)
                    .await;
                });
            }
        });

        (port, hits)
    }

    fn endpoint(port: u16) -> Candidate {
        Candidate::Endpoint(Endpoint {
            name: format!("127.0.0.1:{port}"),
            url: Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
        })
    }

    // a freshly bound then dropped listener gives a refused port
    async fn dead_endpoint() -> Candidate {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        endpoint(port)
    }

    fn coordinator() -> ReplicationCoordinator {
        ReplicationCoordinator::new(
            ForwardClient::new(),
            Arc::new(DownstreamHealth::new()),
            Duration::from_secs(2),
        )
    }

    fn set(candidates: Vec<Candidate>, rf: usize, quorum: usize) -> CandidateSet {
        CandidateSet {
            candidates,
            replication_factor: rf,
            quorum,
        }
    }

    #[tokio::test]
    async fn all_healthy_reaches_quorum() {
        let (p1, h1) = spawn_server(StatusCode::OK).await;
        let (p2, h2) = spawn_server(StatusCode::OK).await;

        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![endpoint(p1), endpoint(p2)], 2, 2),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(h1.load(Ordering::SeqCst), 1);
        assert_eq!(h2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tolerates_one_dead_destination_with_majority_quorum() {
        let (p1, _) = spawn_server(StatusCode::OK).await;
        let (p2, _) = spawn_server(StatusCode::OK).await;
        let dead = dead_endpoint().await;

        // RF=3, Q=2: one unreachable destination is absorbed
        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![endpoint(p1), dead, endpoint(p2)], 3, 2),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fails_when_quorum_unreachable() {
        let (p1, _) = spawn_server(StatusCode::OK).await;

        let result = coordinator()
            .replicate(
                "tenant",
                set(
                    vec![endpoint(p1), dead_endpoint().await, dead_endpoint().await],
                    3,
                    2,
                ),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        match result {
            Err(RouterError::QuorumFailed { required: 2, .. }) => {}
            other => panic!("expected quorum failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_counts_as_failure() {
        let (ok_port, _) = spawn_server(StatusCode::OK).await;
        let (err_port, _) = spawn_server(StatusCode::INTERNAL_SERVER_ERROR).await;

        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![endpoint(err_port), endpoint(ok_port)], 2, 2),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        assert!(matches!(result, Err(RouterError::QuorumFailed { .. })));
    }

    #[tokio::test]
    async fn rf_one_needs_a_single_ack() {
        let (port, hits) = spawn_server(StatusCode::OK).await;
        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![endpoint(port)], 1, 1),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn degraded_set_below_quorum_fails() {
        let (port, _) = spawn_server(StatusCode::OK).await;

        // RF=3 but only one distinct destination resolved; Q=2 can
        // never be met
        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![endpoint(port)], 3, 2),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        match result {
            Err(RouterError::QuorumFailed { acked: 1, required: 2 }) => {}
            other => panic!("expected quorum failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subring_group_acks_only_on_its_own_quorum() {
        let (leaf_a, _) = spawn_server(StatusCode::OK).await;
        let dead = dead_endpoint().await;

        // group quorum 2 with one dead member: the group fails as a
        // whole even though the parent quorum is 1
        let group = Candidate::Group {
            name: "leaf".to_string(),
            quorum: 2,
            members: vec![endpoint(leaf_a), dead],
        };
        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![group], 1, 1),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        assert!(matches!(result, Err(RouterError::QuorumFailed { .. })));
    }

    #[tokio::test]
    async fn subring_group_success_counts_as_one_parent_ack() {
        let (leaf_a, ha) = spawn_server(StatusCode::OK).await;
        let (leaf_b, hb) = spawn_server(StatusCode::OK).await;
        let (root, hr) = spawn_server(StatusCode::OK).await;

        let group = Candidate::Group {
            name: "leaf".to_string(),
            quorum: 2,
            members: vec![endpoint(leaf_a), endpoint(leaf_b)],
        };
        let result = coordinator()
            .replicate(
                "tenant",
                set(vec![endpoint(root), group], 2, 2),
                Bytes::from_static(b"payload"),
                0,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(ha.load(Ordering::SeqCst), 1);
        assert_eq!(hb.load(Ordering::SeqCst), 1);
        assert_eq!(hr.load(Ordering::SeqCst), 1);
    }
}
