//! # esmirror Protocol
//!
//! Wire model and consistency encoder for esmirror.
//!
//! This crate provides:
//! - `RowLocator` / `VisibilityStamp` for transactional row identity
//! - `BulkCommand` for encoding row mutations into NDJSON bulk fragments
//! - Compare-and-act update scripts (no client-side read-modify-write)
//! - Search and scroll request/response types
//!
//! This is a pure protocol crate with no I/O operations. The engine crate
//! (`esmirror_engine`) owns batching, flushing, and paging on top of it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod search;
mod types;

pub use bulk::{
    commit_transaction_body, normalize_line_breaks, remove_aborted_body, BulkCommand,
};
pub use search::{
    scroll_body, Hit, HitsPage, HighlightSpec, SearchRequest, SearchResponse, ShardInfo,
    SortDirection, BULK_RESPONSE_FILTER, MAX_DOCS_PER_REQUEST, SCROLL_TTL,
    SEARCH_RESPONSE_FILTER,
};
pub use types::{
    DocKey, RowLocator, VisibilityStamp, ABORTED_XIDS_DOC, CMAX_FIELD, CMIN_FIELD, CTID_FIELD,
    XMAX_FIELD, XMIN_FIELD,
};
