//! Per-index entry points.

use crate::bulk::BulkSession;
use crate::cancel::CancelToken;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::scroll::{ScrollOptions, ScrollSession};
use crate::transport::{Method, MultiRestClient, RestClient};
use esmirror_protocol::{commit_transaction_body, ABORTED_XIDS_DOC};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

/// A handle to one mirrored index: bundles the configuration with a shared
/// transport and opens bulk and scroll sessions against it.
pub struct IndexClient<C: MultiRestClient> {
    config: MirrorConfig,
    client: Arc<C>,
}

impl<C: MultiRestClient> IndexClient<C> {
    /// Creates a handle over a shared transport.
    pub fn new(config: MirrorConfig, client: Arc<C>) -> Self {
        Self { config, client }
    }

    /// The index configuration.
    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Starts a bulk synchronization session.
    pub fn start_bulk(&self, cancel: CancelToken) -> MirrorResult<BulkSession<C>> {
        BulkSession::new(self.config.clone(), Arc::clone(&self.client), cancel)
    }

    /// Opens a scroll cursor for an already-translated query.
    pub fn open_scroll(
        &self,
        query: Value,
        options: ScrollOptions,
    ) -> MirrorResult<ScrollSession<C>> {
        ScrollSession::open(&self.config, Arc::clone(&self.client), query, options)
    }

    /// Counts the documents matching a query, addressed at the stable alias
    /// when one is configured.
    pub fn count(&self, query: &Value) -> MirrorResult<u64> {
        let target = self.config.alias.as_deref().unwrap_or(&self.config.index);
        let url = format!("{}{}/_count?filter_path=count", self.config.url, target);
        let body = format!("{{\"query\":{query}}}");
        let raw = self
            .client
            .call(Method::Post, &url, Some(&body))
            .map_err(MirrorError::Transport)?;
        let response: CountResponse =
            serde_json::from_str(&raw).map_err(MirrorError::malformed)?;
        Ok(response.count)
    }

    /// Removes a committed transaction id from the aborted-xids set with a
    /// direct scripted update, refreshing inline when background refresh is
    /// disabled.
    pub fn commit_transaction(&self, xid: u64) -> MirrorResult<()> {
        let mut url = format!(
            "{}/{}/_update?retry_on_conflict=128",
            self.config.typed_url(),
            ABORTED_XIDS_DOC
        );
        if self.config.should_refresh() {
            url.push_str("&refresh=true");
        }
        self.client
            .call(Method::Post, &url, Some(&commit_transaction_body(xid)))
            .map_err(MirrorError::Transport)?;
        Ok(())
    }

    /// Forces an index refresh so all applied mutations become searchable.
    pub fn refresh(&self) -> MirrorResult<()> {
        let url = format!("{}/_refresh", self.config.index_url());
        self.client
            .call(Method::Get, &url, None)
            .map_err(MirrorError::Transport)?;
        Ok(())
    }
}
