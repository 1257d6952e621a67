//! Configuration for the mirror engine.

use esmirror_protocol::{MAX_DOCS_PER_REQUEST, SCROLL_TTL};

/// Configuration for one mirrored index.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Base URL of the search cluster, ending with `/`.
    pub url: String,
    /// Physical index name.
    pub index: String,
    /// Document type name.
    pub doc_type: String,
    /// Stable alias bound to the physical index, if one exists.
    pub alias: Option<String>,
    /// Byte-size flush threshold for bulk buffers.
    pub batch_size: usize,
    /// Hard per-request row ceiling.
    pub max_docs_per_request: u32,
    /// Maximum number of bulk requests in flight.
    pub bulk_concurrency: usize,
    /// The index's background refresh interval; `"-1"` means disabled, in
    /// which case the engine issues explicit refreshes.
    pub refresh_interval: String,
    /// Validity window requested for scroll cursors.
    pub scroll_ttl: String,
}

impl MirrorConfig {
    /// Creates a configuration with the stock defaults: 8 MiB batches,
    /// 12-way bulk concurrency, background refresh disabled.
    pub fn new(
        url: impl Into<String>,
        index: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        let mut url = url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        Self {
            url,
            index: index.into(),
            doc_type: doc_type.into(),
            alias: None,
            batch_size: 8 * 1024 * 1024,
            max_docs_per_request: MAX_DOCS_PER_REQUEST as u32,
            bulk_concurrency: 12,
            refresh_interval: "-1".into(),
            scroll_ttl: SCROLL_TTL.into(),
        }
    }

    /// Sets the stable alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Sets the byte-size flush threshold.
    #[must_use]
    pub fn with_batch_size(mut self, bytes: usize) -> Self {
        self.batch_size = bytes;
        self
    }

    /// Sets the hard per-request row ceiling.
    #[must_use]
    pub fn with_max_docs_per_request(mut self, rows: u32) -> Self {
        self.max_docs_per_request = rows;
        self
    }

    /// Sets the bulk concurrency limit.
    #[must_use]
    pub fn with_bulk_concurrency(mut self, concurrency: usize) -> Self {
        self.bulk_concurrency = concurrency;
        self
    }

    /// Sets the index's background refresh interval.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: impl Into<String>) -> Self {
        self.refresh_interval = interval.into();
        self
    }

    /// Sets the scroll cursor validity window.
    #[must_use]
    pub fn with_scroll_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.scroll_ttl = ttl.into();
        self
    }

    /// Whether the engine must issue explicit refreshes because the index's
    /// background refresh is disabled.
    #[must_use]
    pub fn should_refresh(&self) -> bool {
        self.refresh_interval == "-1"
    }

    /// `{url}{index}` — the index root endpoint.
    #[must_use]
    pub fn index_url(&self) -> String {
        format!("{}{}", self.url, self.index)
    }

    /// `{url}{index}/{doc_type}` — the typed document endpoint.
    #[must_use]
    pub fn typed_url(&self) -> String {
        format!("{}{}/{}", self.url, self.index, self.doc_type)
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self::new("http://localhost:9200/", "", "doc")
    }
}
