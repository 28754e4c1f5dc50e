//! Write-path router: resolves destinations for every incoming series,
//! fans writes out with replication, and answers by quorum.

pub mod client;
pub mod coordinator;
pub mod errors;
pub mod health;
pub mod router;
pub mod service;

pub use client::ForwardClient;
pub use coordinator::ReplicationCoordinator;
pub use errors::RouterError;
pub use health::DownstreamHealth;
pub use router::Router;
pub use service::ReceiveService;
