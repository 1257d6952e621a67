//! # EsMirror Engine
//!
//! Bulk synchronization and scroll paging against a search engine index.
//!
//! This crate provides:
//! - Bulk sessions batching encoded row mutations with overlapped I/O
//! - A recyclable buffer pool feeding the transport
//! - Scroll sessions for paged query results
//! - A per-index client bundling configuration and transport
//! - REST transport abstraction with a mock for testing
//!
//! ## Architecture
//!
//! The engine mirrors a relational table's visible rows into a search index.
//! All consistency decisions are pushed to the server as compare-and-act
//! scripts (encoded by `esmirror_protocol`), so the engine itself holds no
//! locks and performs no client-side retries: up to `bulk_concurrency`
//! requests overlap in flight, and a failed session is simply re-run.
//!
//! ## Key Invariants
//!
//! - Sessions are driven serially by one logical owner
//! - Completed requests are polled, never blocked on, except at `finish`
//! - A conditional delete latches full-shard acknowledgment for the session
//! - Buffer accounting: idle + in flight + active = concurrency + 1

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod cancel;
mod client;
mod config;
mod error;
mod pool;
mod scroll;
mod transport;

pub use bulk::{BulkSession, BulkStats};
pub use cancel::CancelToken;
pub use client::IndexClient;
pub use config::MirrorConfig;
pub use error::{MirrorError, MirrorResult};
pub use pool::{BufferPool, BufferSlot};
pub use scroll::{ScrollHit, ScrollOptions, ScrollSession};
pub use transport::{
    CompletedRequest, Method, MockMulti, MockRestClient, MultiDispatch, MultiRestClient,
    RecordedCall, RestClient,
};
