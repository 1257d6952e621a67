//! Bulk mutation commands and their NDJSON encoding.
//!
//! The bulk wire protocol is newline-delimited JSON: an action-and-metadata
//! line followed by a payload line, both `\n`-terminated. Mutations that may
//! race with concurrent writers are expressed as server-executed
//! compare-and-act scripts rather than client-side read-modify-write, so a
//! replayed command is a no-op once its precondition no longer holds.

use crate::types::{DocKey, RowLocator, VisibilityStamp, ABORTED_XIDS_DOC};
use std::fmt::Write as _;

/// Retry bound for plain keyed updates racing a concurrent writer.
const UPDATE_RETRIES: u32 = 1;
/// Retry bound for the shared aborted-xids document. Contention on this
/// single document is expected and must not fail the caller.
const XID_SET_RETRIES: u32 = 128;

/// A single row-change intent, encodable as one bulk request fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkCommand {
    /// Index a new document, merging visibility metadata into the body.
    Insert {
        /// Physical locator, doubling as the document id. `None` lets the
        /// engine auto-assign an id (externally keyed mirrors).
        key: Option<RowLocator>,
        /// The caller-serialized row, a single JSON object.
        body: String,
        /// Visibility metadata to merge into the document.
        stamp: VisibilityStamp,
    },
    /// Mark an existing document superseded by setting `cmax`/`xmax`.
    Update {
        /// Document identity.
        key: DocKey,
        /// Superseding command id.
        cmax: u32,
        /// Superseding transaction id.
        xmax: u64,
    },
    /// Clear a stale `xmax` left by a transaction that aborted, but only if
    /// the stored value still matches.
    VacuumXmax {
        /// Document id.
        id: String,
        /// The `xmax` value expected to be stored.
        expected_xmax: u64,
    },
    /// Delete the document only if its `xmin` matches.
    DeleteByXmin {
        /// Document id.
        id: String,
        /// The `xmin` value expected to be stored.
        xmin: u64,
    },
    /// Delete the document only if its `xmax` matches.
    DeleteByXmax {
        /// Document id.
        id: String,
        /// The `xmax` value expected to be stored.
        xmax: u64,
    },
    /// Add a transaction id to the in-progress/aborted set, creating the set
    /// document if it does not exist yet.
    MarkInProgress {
        /// Transaction id to record.
        xid: u64,
    },
    /// Remove a transaction id from the in-progress/aborted set.
    MarkCommitted {
        /// Transaction id to remove.
        xid: u64,
    },
}

impl BulkCommand {
    /// Appends this command's NDJSON fragment to `out`.
    pub fn encode_into(&self, out: &mut String) {
        match self {
            BulkCommand::Insert { key, body, stamp } => encode_insert(out, *key, body, *stamp),
            BulkCommand::Update { key, cmax, xmax } => encode_update(out, key, *cmax, *xmax),
            BulkCommand::VacuumXmax { id, expected_xmax } => {
                let _ = write!(
                    out,
                    "{{\"update\":{{\"_id\":{},\"_retry_on_conflict\":0}}}}\n",
                    json_str(id)
                );
                let _ = write!(
                    out,
                    "{{\"script\":{{\"source\":\"\
                     if (ctx._source.esm_xmax != params.EXPECTED_XMAX) {{\
                        ctx.op='none';\
                     }} else {{\
                        ctx._source.esm_xmax=null;\
                     }}\",\"lang\":\"painless\",\"params\":{{\"EXPECTED_XMAX\":{expected_xmax}}}}}}}\n"
                );
            }
            BulkCommand::DeleteByXmin { id, xmin } => {
                encode_conditional_delete(out, id, "esm_xmin", "EXPECTED_XMIN", *xmin);
            }
            BulkCommand::DeleteByXmax { id, xmax } => {
                encode_conditional_delete(out, id, "esm_xmax", "EXPECTED_XMAX", *xmax);
            }
            BulkCommand::MarkInProgress { xid } => {
                let _ = write!(
                    out,
                    "{{\"update\":{{\"_id\":\"{ABORTED_XIDS_DOC}\",\"_retry_on_conflict\":{XID_SET_RETRIES}}}}}\n"
                );
                let _ = write!(
                    out,
                    "{{\"upsert\":{{\"{ABORTED_XIDS_DOC}\":[{xid}]}},\
                     \"script\":{{\"source\":\"ctx._source.esm_aborted_xids.add(params.XID);\",\
                     \"lang\":\"painless\",\"params\":{{\"XID\":{xid}}}}}}}\n"
                );
            }
            BulkCommand::MarkCommitted { xid } => {
                let _ = write!(
                    out,
                    "{{\"update\":{{\"_id\":\"{ABORTED_XIDS_DOC}\",\"_retry_on_conflict\":{XID_SET_RETRIES}}}}}\n"
                );
                out.push_str(&commit_transaction_body(*xid));
                out.push('\n');
            }
        }
    }
}

fn encode_insert(out: &mut String, key: Option<RowLocator>, body: &str, stamp: VisibilityStamp) {
    // The action line: no _index/_type (they are in the request URL); the
    // _id is the packed locator when the mirror is locator-keyed, otherwise
    // the engine auto-assigns one we never read back.
    match key {
        Some(locator) => {
            let _ = write!(out, "{{\"index\":{{\"_id\":\"{}\"}}}}\n", locator.to_packed());
        }
        None => out.push_str("{\"index\":{}}\n"),
    }

    // The payload line: the caller's row with the closing brace stripped and
    // our visibility fields merged in.
    let interior = body.trim_end().strip_suffix('}').unwrap_or(body);
    out.push_str(interior);

    // an empty object body means the first merged field skips its comma
    let mut first = interior.trim_end().ends_with('{');
    let mut sep = |out: &mut String| {
        if first {
            first = false;
        } else {
            out.push(',');
        }
    };
    if let Some(locator) = key {
        sep(out);
        let _ = write!(out, "\"esm_ctid\":{}", locator.to_packed());
    }
    sep(out);
    let _ = write!(out, "\"esm_cmin\":{}", stamp.cmin);
    if let Some(cmax) = stamp.cmax {
        let _ = write!(out, ",\"esm_cmax\":{cmax}");
    }
    let _ = write!(out, ",\"esm_xmin\":{}", stamp.xmin);
    if let Some(xmax) = stamp.xmax {
        let _ = write!(out, ",\"esm_xmax\":{xmax}");
    }
    out.push_str("}\n");
}

fn encode_update(out: &mut String, key: &DocKey, cmax: u32, xmax: u64) {
    let id = match key {
        DocKey::Ctid(locator) => json_str(&locator.to_packed().to_string()),
        DocKey::External(id) => json_str(id),
    };
    let _ = write!(
        out,
        "{{\"update\":{{\"_id\":{id},\"_retry_on_conflict\":{UPDATE_RETRIES}}}}}\n"
    );
    let _ = write!(
        out,
        "{{\"script\":{{\"source\":\"\
         ctx._source.esm_cmax=params.CMAX;\
         ctx._source.esm_xmax=params.XMAX;\",\
         \"lang\":\"painless\",\"params\":{{\"CMAX\":{cmax},\"XMAX\":{xmax}}}}}}}\n"
    );
}

fn encode_conditional_delete(out: &mut String, id: &str, field: &str, param: &str, expected: u64) {
    let _ = write!(out, "{{\"update\":{{\"_id\":{}}}}}\n", json_str(id));
    let _ = write!(
        out,
        "{{\"script\":{{\"source\":\"\
         if (ctx._source.{field} == params.{param}) {{\
            ctx.op='delete';\
         }} else {{\
            ctx.op='none';\
         }}\",\"lang\":\"painless\",\"params\":{{\"{param}\":{expected}}}}}}}\n"
    );
}

/// Body of the direct (non-bulk) `_update` call removing a committed
/// transaction id from the aborted-xids set.
#[must_use]
pub fn commit_transaction_body(xid: u64) -> String {
    format!(
        "{{\"script\":{{\
         \"source\":\"ctx._source.esm_aborted_xids.remove(ctx._source.esm_aborted_xids.indexOf(params.XID));\",\
         \"params\":{{\"XID\":{xid}}},\
         \"lang\":\"painless\"}}}}"
    )
}

/// Body of the direct `_update` call removing a batch of aborted transaction
/// ids from the set in one script execution.
#[must_use]
pub fn remove_aborted_body(xids: &[u64]) -> String {
    let mut array = String::new();
    for xid in xids {
        if !array.is_empty() {
            array.push(',');
        }
        let _ = write!(array, "{xid}");
    }
    format!(
        "{{\"script\":{{\
         \"source\":\"ctx._source.esm_aborted_xids.removeAll(params.XIDS);\",\
         \"params\":{{\"XIDS\":[{array}]}},\
         \"lang\":\"painless\"}}}}"
    )
}

/// Replaces line breaks in a serialized document with spaces.
///
/// The bulk endpoint requires each logical record on its own line. Row
/// serialization usually flattens the document already, but embedded
/// free-form JSON fields are encoded as-is and may carry line breaks.
pub fn normalize_line_breaks(body: &mut String) {
    if !body.as_bytes().iter().any(|b| matches!(b, b'\n' | b'\r')) {
        return;
    }
    *body = body
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
}

/// JSON string literal for an arbitrary id.
fn json_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}
