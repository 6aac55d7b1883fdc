//! Peer runtime for the Meshchat mesh.
//!
//! The [`Runtime`](runtime::Runtime) owns every piece of long-lived
//! peer state — identity, directory, block list, caches, metrics, the
//! reliability layer — and drives the loops that join the mesh,
//! route records, and fan events out to UI sinks.

pub mod ack;
pub mod cache;
pub mod commands;
pub mod history;
pub mod identity;
pub mod incoming;
pub mod loops;
pub mod metrics;
pub mod outgoing;
pub mod peers;
pub mod runtime;
pub mod sink;

#[cfg(test)]
pub(crate) mod testutil;

pub use ack::AckTracker;
pub use cache::MsgCache;
pub use history::HistoryBuffer;
pub use identity::Identity;
pub use metrics::Metrics;
pub use peers::{BlockList, PeerDirectory};
pub use runtime::{Runtime, RuntimeOptions};
pub use sink::{MultiSink, Sink};
