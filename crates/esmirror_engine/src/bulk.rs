//! Bulk synchronization sessions.
//!
//! A [`BulkSession`] accumulates encoded row mutations into a pooled buffer
//! and hands full buffers to the transport's multi-request facility,
//! overlapping local buffer-fill work with in-flight I/O. Completed requests
//! are polled (never blocked on) at the start of every mutating call;
//! [`finish`](BulkSession::finish) is the only blocking wait point.

use crate::cancel::CancelToken;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::pool::{BufferPool, BufferSlot};
use crate::transport::{Method, MultiDispatch, MultiRestClient, RestClient};
use esmirror_protocol::{
    normalize_line_breaks, remove_aborted_body, BulkCommand, DocKey, RowLocator, VisibilityStamp,
    ABORTED_XIDS_DOC, BULK_RESPONSE_FILTER,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Running counters for one bulk session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Total rows appended (inserts, updates, deletes, vacuums, and
    /// in-progress marks; a committed mark is not counted as a row).
    pub total_rows: u64,
    /// Requests handed to the transport.
    pub requests: u32,
    /// Insert operations.
    pub inserts: u64,
    /// Update operations.
    pub updates: u64,
    /// Conditional delete operations.
    pub deletes: u64,
    /// Vacuum operations.
    pub vacuums: u64,
    /// Transaction-state operations.
    pub xid_ops: u64,
}

/// A per-batch bulk synchronization session.
///
/// Created per synchronization batch (one per statement or maintenance
/// sweep) and destroyed by [`finish`](Self::finish). The session owns a
/// buffer pool of `concurrency + 1` slots and is driven serially by one
/// logical owner; concurrency exists only at the transport layer.
pub struct BulkSession<C: MultiRestClient> {
    config: MirrorConfig,
    client: Arc<C>,
    multi: C::Multi,
    pool: BufferPool,
    current: Option<BufferSlot>,
    rows_in_buffer: u32,
    wait_for_active_shards: bool,
    cancel: CancelToken,
    stats: BulkStats,
}

impl<C: MultiRestClient> BulkSession<C> {
    /// Starts a new session.
    pub fn new(config: MirrorConfig, client: Arc<C>, cancel: CancelToken) -> MirrorResult<Self> {
        let multi = client.multi(config.bulk_concurrency);
        let mut pool = BufferPool::new(config.bulk_concurrency + 1);
        let current = pool.checkout()?;
        Ok(Self {
            config,
            client,
            multi,
            pool,
            current: Some(current),
            rows_in_buffer: 0,
            wait_for_active_shards: false,
            cancel,
            stats: BulkStats::default(),
        })
    }

    /// Returns the session's running counters.
    #[must_use]
    pub fn stats(&self) -> &BulkStats {
        &self.stats
    }

    /// Whether a queued conditional delete has latched full-shard
    /// acknowledgment for the rest of the session.
    #[must_use]
    pub fn wait_for_active_shards(&self) -> bool {
        self.wait_for_active_shards
    }

    /// Queues an insert: an unconditional create with the visibility stamp
    /// merged into the document body.
    pub fn insert(
        &mut self,
        key: Option<RowLocator>,
        mut body: String,
        stamp: VisibilityStamp,
    ) -> MirrorResult<()> {
        self.prologue()?;

        // Each logical record must sit on its own line; embedded free-form
        // JSON fields may still carry line breaks.
        normalize_line_breaks(&mut body);
        self.append(&BulkCommand::Insert { key, body, stamp });

        self.stats.inserts += 1;
        self.epilogue();
        Ok(())
    }

    /// Queues a keyed conditional update marking the document superseded.
    pub fn update(&mut self, key: DocKey, cmax: u32, xmax: u64) -> MirrorResult<()> {
        self.prologue()?;
        self.append(&BulkCommand::Update { key, cmax, xmax });
        self.stats.updates += 1;
        self.epilogue();
        Ok(())
    }

    /// Queues a compare-and-clear of a stale `xmax` left by an aborted
    /// transaction.
    pub fn vacuum_xmax(&mut self, id: impl Into<String>, expected_xmax: u64) -> MirrorResult<()> {
        self.prologue()?;
        self.append(&BulkCommand::VacuumXmax {
            id: id.into(),
            expected_xmax,
        });
        self.stats.vacuums += 1;
        self.epilogue();
        Ok(())
    }

    /// Queues a compare-and-delete keyed on `xmin`.
    ///
    /// Deletions are irreversible; queuing one latches full-shard
    /// acknowledgment for every subsequent flush in this session.
    pub fn delete_by_xmin(&mut self, id: impl Into<String>, xmin: u64) -> MirrorResult<()> {
        // latch before the prologue so an immediate flush already waits
        self.wait_for_active_shards = true;

        self.prologue()?;
        self.append(&BulkCommand::DeleteByXmin { id: id.into(), xmin });
        self.stats.deletes += 1;
        self.epilogue();
        Ok(())
    }

    /// Queues a compare-and-delete keyed on `xmax`.
    ///
    /// Deletions are irreversible; queuing one latches full-shard
    /// acknowledgment for every subsequent flush in this session.
    pub fn delete_by_xmax(&mut self, id: impl Into<String>, xmax: u64) -> MirrorResult<()> {
        // latch before the prologue so an immediate flush already waits
        self.wait_for_active_shards = true;

        self.prologue()?;
        self.append(&BulkCommand::DeleteByXmax { id: id.into(), xmax });
        self.stats.deletes += 1;
        self.epilogue();
        Ok(())
    }

    /// Queues an upsert-and-append of `xid` into the aborted-xids set.
    pub fn mark_transaction_in_progress(&mut self, xid: u64) -> MirrorResult<()> {
        self.prologue()?;
        self.append(&BulkCommand::MarkInProgress { xid });
        self.stats.xid_ops += 1;
        self.epilogue();
        Ok(())
    }

    /// Queues a removal of `xid` from the aborted-xids set.
    ///
    /// Expected to be the last record appended before [`finish`](Self::finish);
    /// it deliberately skips the flush threshold check so the removal rides
    /// in the final request.
    pub fn mark_transaction_committed(&mut self, xid: u64) -> MirrorResult<()> {
        self.append(&BulkCommand::MarkCommitted { xid });
        self.stats.xid_ops += 1;
        Ok(())
    }

    /// Removes a batch of aborted transaction ids from the set in one script
    /// call, issued immediately with an index refresh rather than batched
    /// with other traffic. Used by periodic cleanup.
    pub fn remove_aborted_transactions(&mut self, xids: &[u64]) -> MirrorResult<()> {
        if xids.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/{}/_update?retry_on_conflict=128&refresh=true",
            self.config.typed_url(),
            ABORTED_XIDS_DOC
        );
        self.client
            .call(Method::Post, &url, Some(&remove_aborted_body(xids)))
            .map_err(MirrorError::Transport)?;
        Ok(())
    }

    /// Finalizes the session: flushes any buffered rows, waits for all
    /// in-flight requests to complete, and refreshes the index when more
    /// than one request was sent and background refresh is disabled.
    pub fn finish(mut self) -> MirrorResult<BulkStats> {
        if self.current.as_ref().is_some_and(|slot| !slot.buf.is_empty()) {
            self.drain_completed()?;
            self.flush(true)?;

            if self.stats.requests > 1 {
                info!(
                    total_rows = self.stats.total_rows,
                    requests = self.stats.requests,
                    index = %self.config.index,
                    inserts = self.stats.inserts,
                    updates = self.stats.updates,
                    deletes = self.stats.deletes,
                    vacuums = self.stats.vacuums,
                    xid_ops = self.stats.xid_ops,
                    "bulk session complete"
                );
            }
        }

        // the only blocking wait point; yields for cancellation on each turn
        while self.multi.in_flight() > 0 {
            self.drain_completed()?;
            self.cancel.check()?;
            std::thread::yield_now();
        }

        if self.config.should_refresh() && self.stats.requests > 1 {
            // more than one request went out, so the inline refresh on the
            // final request did not happen; refresh the whole index
            let url = format!("{}/_refresh", self.config.index_url());
            self.client
                .call(Method::Get, &url, None)
                .map_err(MirrorError::Transport)?;
        }

        Ok(self.stats)
    }

    /// Drains completed requests then flushes if a threshold was crossed.
    fn prologue(&mut self) -> MirrorResult<()> {
        self.drain_completed()?;

        let crossed = match &self.current {
            Some(slot) => {
                self.rows_in_buffer > 0
                    && (slot.buf.len() >= self.config.batch_size
                        || self.rows_in_buffer == self.config.max_docs_per_request)
            }
            None => false,
        };
        if crossed {
            self.flush(false)?;
        }
        Ok(())
    }

    fn epilogue(&mut self) {
        self.rows_in_buffer += 1;
        self.stats.total_rows += 1;
    }

    fn append(&mut self, command: &BulkCommand) {
        if let Some(slot) = self.current.as_mut() {
            command.encode_into(&mut slot.buf);
        }
    }

    /// Hands the active buffer to the transport and checks out a fresh one
    /// unless this is the final flush.
    fn flush(&mut self, is_final: bool) -> MirrorResult<()> {
        let Some(slot) = self.current.take() else {
            return Ok(());
        };

        if !is_final {
            debug!(
                total_rows = self.stats.total_rows,
                index = %self.config.index,
                nbytes = slot.buf.len(),
                batch_rows = self.rows_in_buffer,
                in_flight = self.multi.in_flight(),
                "flushing bulk batch"
            );
        }

        let mut url = format!(
            "{}/_bulk?filter_path={}",
            self.config.typed_url(),
            BULK_RESPONSE_FILTER
        );
        if self.wait_for_active_shards {
            url.push_str("&wait_for_active_shards=all");
        }
        if is_final && self.config.should_refresh() && self.stats.requests == 0 {
            // single-request session: ask for the refresh inline and save a
            // round trip
            url.push_str("&refresh=true");
        }

        // wait for a transport handle if the facility is saturated
        while self.multi.in_flight() >= self.config.bulk_concurrency {
            self.drain_completed()?;
            self.cancel.check()?;
            std::thread::yield_now();
        }

        self.multi
            .submit(Method::Post, &url, slot.buf, slot.index)
            .map_err(MirrorError::Transport)?;

        self.rows_in_buffer = 0;
        self.stats.requests += 1;

        if !is_final {
            self.current = Some(self.pool.checkout()?);
        }
        Ok(())
    }

    /// Non-blocking poll of the transport; returns completed buffers to the
    /// pool. A transport-level failure is fatal to the whole session;
    /// item-level failures inside a well-formed response are a higher
    /// layer's concern.
    fn drain_completed(&mut self) -> MirrorResult<()> {
        let mut failure = None;
        for completed in self.multi.poll_completed() {
            self.pool.release(completed.slot, completed.body);
            if let Err(message) = completed.outcome {
                failure.get_or_insert(message);
            }
        }
        match failure {
            Some(message) => Err(MirrorError::Transport(message)),
            None => Ok(()),
        }
    }
}
