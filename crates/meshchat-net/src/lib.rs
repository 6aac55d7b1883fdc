//! Mesh transport: TCP connection management and peer dialing.
//!
//! [`ConnManager`](conn::ConnManager) owns every socket — it listens,
//! dials, runs one reader task per connection, and fans outbound
//! records to all live peers. [`DialScheduler`](dialer::DialScheduler)
//! sits above it and keeps re-asserting the set of peers this node
//! wants to stay connected to, with jittered retry backoff.

pub mod conn;
pub mod dialer;

pub use conn::{Broadcaster, ConnManager};
pub use dialer::{Connector, DialScheduler};
