//! End-to-end write-path tests: a real router forwarding over HTTP to
//! in-process ingest nodes backed by shared in-memory stores.

use hashring::{Hashring, RingFile, RingProvider};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use ingestor::{IngestService, Ingestor, MemStore, REPLICA_LABEL, Relabeler, SeriesStore};
use router::{
    DownstreamHealth, ForwardClient, ReceiveService, ReplicationCoordinator, Router, RouterError,
};
use shared::http::{RECEIVE_PATH, serve_on};
use shared::wire::{Label, Sample, Series, TENANT_HEADER, WireCodec, WriteRequest};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_ingestor() -> (u16, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let ingestor = Arc::new(Ingestor::new(store.clone(), Relabeler::no_op()));
    let service = IngestService::new(ingestor, None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = serve_on(listener, service).await;
    });

    (port, store)
}

// a freshly bound then dropped listener gives a refused port
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn build_router(yaml: &str) -> Arc<Router> {
    let file = RingFile::from_yaml(yaml).unwrap();
    let ring = Hashring::from_config(&file).unwrap();
    let provider = Arc::new(RingProvider::new(ring));
    let coordinator = ReplicationCoordinator::new(
        ForwardClient::new(),
        Arc::new(DownstreamHealth::new()),
        Duration::from_secs(2),
    );
    Arc::new(Router::new(provider, coordinator, 3))
}

fn request(samples: &[(i64, f64)]) -> WriteRequest {
    WriteRequest {
        series: vec![Series {
            labels: vec![Label::new("__name__", "up"), Label::new("job", "api")],
            samples: samples
                .iter()
                .map(|(t, v)| Sample {
                    timestamp_ms: *t,
                    value: *v,
                })
                .collect(),
        }],
    }
}

/// Polls until the check passes; replication past quorum finishes in
/// the background, so assertions on straggler copies have to wait.
async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn healthy_ring_lands_one_copy_per_replica() {
    let (p1, s1) = spawn_ingestor().await;
    let (p2, s2) = spawn_ingestor().await;
    let (p3, s3) = spawn_ingestor().await;

    let yaml = format!(
        r#"
rings:
    - replication_factor: 3
      endpoints:
          - address: "http://127.0.0.1:{p1}"
          - address: "http://127.0.0.1:{p2}"
          - address: "http://127.0.0.1:{p3}"
"#
    );
    let router = build_router(&yaml);
    router.forward("tenant", request(&[(1, 1.0)]), 0).await.unwrap();

    let stores = [&s1, &s2, &s3];
    eventually(
        || stores.iter().all(|s| s.series_count("tenant") == 1),
        "all three replicas to land",
    )
    .await;

    // each copy carries a distinct replica index
    let mut replicas = BTreeSet::new();
    for store in stores {
        let series = store.query("tenant", &[], i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(series.len(), 1);
        replicas.insert(series[0].label(REPLICA_LABEL).unwrap().to_string());
    }
    assert_eq!(replicas.len(), 3);
}

#[tokio::test]
async fn quorum_survives_one_node_outage() {
    let (p1, s1) = spawn_ingestor().await;
    let (p2, s2) = spawn_ingestor().await;
    let dead = dead_port().await;

    let yaml = format!(
        r#"
rings:
    - replication_factor: 3
      endpoints:
          - address: "http://127.0.0.1:{p1}"
          - address: "http://127.0.0.1:{dead}"
          - address: "http://127.0.0.1:{p2}"
"#
    );
    let router = build_router(&yaml);
    router.forward("tenant", request(&[(1, 1.0)]), 0).await.unwrap();

    eventually(
        || s1.series_count("tenant") == 1 && s2.series_count("tenant") == 1,
        "both live replicas to land",
    )
    .await;

    let series = s1.query("tenant", &[], i64::MIN, i64::MAX).await.unwrap();
    assert_eq!(series[0].samples, vec![Sample { timestamp_ms: 1, value: 1.0 }]);
}

#[tokio::test]
async fn quorum_override_demands_every_replica() {
    let (p1, _) = spawn_ingestor().await;
    let (p2, _) = spawn_ingestor().await;
    let dead = dead_port().await;

    // quorum: 3 overrides the majority default of 2, so the outage the
    // default tolerates now fails the write
    let yaml = format!(
        r#"
rings:
    - replication_factor: 3
      quorum: 3
      endpoints:
          - address: "http://127.0.0.1:{p1}"
          - address: "http://127.0.0.1:{dead}"
          - address: "http://127.0.0.1:{p2}"
"#
    );
    let router = build_router(&yaml);
    let result = router.forward("tenant", request(&[(1, 1.0)]), 0).await;
    assert!(matches!(
        result,
        Err(RouterError::QuorumFailed { required: 3, .. })
    ));
}

#[tokio::test]
async fn write_fails_when_two_of_three_are_down() {
    let (p1, _s1) = spawn_ingestor().await;
    let (d1, d2) = (dead_port().await, dead_port().await);

    let yaml = format!(
        r#"
rings:
    - replication_factor: 3
      endpoints:
          - address: "http://127.0.0.1:{p1}"
          - address: "http://127.0.0.1:{d1}"
          - address: "http://127.0.0.1:{d2}"
"#
    );
    let router = build_router(&yaml);
    let result = router.forward("tenant", request(&[(1, 1.0)]), 0).await;
    assert!(matches!(result, Err(RouterError::QuorumFailed { .. })));
}

#[tokio::test]
async fn two_level_tree_reaches_exactly_three_leaves() {
    let (root_port, root_store) = spawn_ingestor().await;
    let (leaf_b, store_b) = spawn_ingestor().await;
    let (leaf_c, store_c) = spawn_ingestor().await;

    let yaml = format!(
        r#"
rings:
    - replication_factor: 2
      endpoints:
          - address: "http://127.0.0.1:{root_port}"
          - subring: leaf
subrings:
    leaf:
        replication_factor: 2
        endpoints:
            - address: "http://127.0.0.1:{leaf_b}"
            - address: "http://127.0.0.1:{leaf_c}"
"#
    );
    let router = build_router(&yaml);
    router.forward("tenant", request(&[(1, 1.0)]), 0).await.unwrap();

    let stores = [&root_store, &store_b, &store_c];
    eventually(
        || stores.iter().all(|s| s.series_count("tenant") == 1),
        "all leaves of the tree to land",
    )
    .await;
    for store in stores {
        assert_eq!(store.series_count("tenant"), 1);
    }
}

#[tokio::test]
async fn tenants_route_to_their_own_rings() {
    let (pa, store_a) = spawn_ingestor().await;
    let (pb, store_b) = spawn_ingestor().await;

    let yaml = format!(
        r#"
rings:
    - tenants: ["team-a"]
      replication_factor: 1
      endpoints:
          - address: "http://127.0.0.1:{pa}"
    - replication_factor: 1
      endpoints:
          - address: "http://127.0.0.1:{pb}"
"#
    );
    let router = build_router(&yaml);
    router.forward("team-a", request(&[(1, 1.0)]), 0).await.unwrap();
    router.forward("team-b", request(&[(1, 2.0)]), 0).await.unwrap();

    // each store only holds its own tenant's data
    assert_eq!(store_a.series_count("team-a"), 1);
    assert_eq!(store_a.series_count("team-b"), 0);
    assert_eq!(store_b.series_count("team-b"), 1);
    assert_eq!(store_b.series_count("team-a"), 0);
}

#[tokio::test]
async fn one_tenants_outage_does_not_affect_another() {
    let dead = dead_port().await;
    let (pb, store_b) = spawn_ingestor().await;

    let yaml = format!(
        r#"
rings:
    - tenants: ["team-a"]
      replication_factor: 1
      endpoints:
          - address: "http://127.0.0.1:{dead}"
    - replication_factor: 1
      endpoints:
          - address: "http://127.0.0.1:{pb}"
"#
    );
    let router = build_router(&yaml);

    let failed = router.forward("team-a", request(&[(1, 1.0)]), 0).await;
    assert!(matches!(failed, Err(RouterError::QuorumFailed { .. })));

    router.forward("team-b", request(&[(1, 2.0)]), 0).await.unwrap();
    assert_eq!(store_b.series_count("team-b"), 1);
}

#[tokio::test]
async fn placement_does_not_depend_on_ingress_router() {
    let mut ports = Vec::new();
    let mut stores = Vec::new();
    for _ in 0..4 {
        let (port, store) = spawn_ingestor().await;
        ports.push(port);
        stores.push(store);
    }

    let endpoints: String = ports
        .iter()
        .map(|p| format!("          - address: \"http://127.0.0.1:{p}\"\n"))
        .collect();
    let yaml = format!(
        r#"
rings:
    - replication_factor: 1
      endpoints:
{endpoints}"#
    );

    // two independent routers built from the same topology
    let first = build_router(&yaml);
    let second = build_router(&yaml);

    first.forward("tenant", request(&[(1, 1.0)]), 0).await.unwrap();
    second.forward("tenant", request(&[(2, 2.0)]), 0).await.unwrap();

    // both writes landed on the same node, every other node stayed empty
    let occupied: Vec<_> = stores
        .iter()
        .filter(|s| s.series_count("tenant") > 0)
        .collect();
    assert_eq!(occupied.len(), 1);
    let series = occupied[0]
        .query("tenant", &[], i64::MIN, i64::MAX)
        .await
        .unwrap();
    assert_eq!(series[0].samples.len(), 2);
}

#[tokio::test]
async fn http_ingress_accepts_and_replicates_writes() {
    let (ingest_port, store) = spawn_ingestor().await;

    let yaml = format!(
        r#"
rings:
    - replication_factor: 1
      endpoints:
          - address: "http://127.0.0.1:{ingest_port}"
"#
    );
    let service = ReceiveService::new(build_router(&yaml), None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let router_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = serve_on(listener, service).await;
    });

    let body = WireCodec::default().encode(&request(&[(1, 1.0)])).unwrap();
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(HttpConnector::new());

    let accepted = client
        .request(
            hyper::Request::builder()
                .method(hyper::Method::POST)
                .uri(format!("http://127.0.0.1:{router_port}{RECEIVE_PATH}"))
                .header(TENANT_HEADER, "tenant")
                .body(Full::new(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), hyper::StatusCode::OK);
    let _ = accepted.into_body().collect().await;

    eventually(|| store.series_count("tenant") == 1, "write to persist").await;

    // no tenant header and no default tenant configured
    let rejected = client
        .request(
            hyper::Request::builder()
                .method(hyper::Method::POST)
                .uri(format!("http://127.0.0.1:{router_port}{RECEIVE_PATH}"))
                .body(Full::new(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), hyper::StatusCode::UNAUTHORIZED);
}
