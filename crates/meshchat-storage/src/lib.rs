//! Durable storage for the Meshchat peer.
//!
//! Two sled-backed stores: [`history::HistoryStore`] appends every
//! accepted record under a time-ordered key so recent conversation can
//! be reloaded after restart, and [`files::FileStore`] keeps uploaded
//! bytes on disk with their metadata in a sled tree.
//!
//! Both stores are optional at runtime: a peer whose database fails to
//! open keeps running on in-memory history alone.

pub mod files;
pub mod history;

pub use files::{FileEntry, FileStore};
pub use history::HistoryStore;
