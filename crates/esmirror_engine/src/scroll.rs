//! Scroll sessions for paged query results.
//!
//! A [`ScrollSession`] opens a server-held cursor for a translated query,
//! decodes one page of hits at a time, and refills synchronously from the
//! scroll endpoint when the current page is consumed. One session per query
//! execution; no page prefetch.

use crate::config::MirrorConfig;
use crate::error::{MirrorError, MirrorResult};
use crate::transport::{Method, RestClient};
use esmirror_protocol::{
    scroll_body, Hit, HighlightSpec, RowLocator, SearchRequest, SearchResponse, SortDirection,
    CTID_FIELD, MAX_DOCS_PER_REQUEST, SEARCH_RESPONSE_FILTER,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Per-query extraction options for a scroll session.
#[derive(Debug, Clone, Default)]
pub struct ScrollOptions {
    /// Decode the engine-assigned document id instead of the row locator.
    pub use_external_id: bool,
    /// Request sorted results.
    pub need_sort: bool,
    /// Request relevance scores.
    pub need_score: bool,
    /// Result limit; `0` means unlimited. A nonzero limit forces scoring on
    /// so the limited window holds the top-scoring matches.
    pub limit: u64,
    /// Explicit sort field; implies sorting.
    pub sort_field: Option<String>,
    /// Direction for the explicit sort field.
    pub direction: SortDirection,
    /// Per-field highlight specs.
    pub highlights: Vec<HighlightSpec>,
    /// Extra docvalue fields to fetch alongside the locator.
    pub extra_fields: Vec<String>,
}

impl ScrollOptions {
    /// Creates default options: locator mode, unsorted, unscored, unlimited.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the engine-assigned id instead of the row locator.
    #[must_use]
    pub fn with_external_id(mut self) -> Self {
        self.use_external_id = true;
        self
    }

    /// Requests sorted results.
    #[must_use]
    pub fn with_sort(mut self) -> Self {
        self.need_sort = true;
        self
    }

    /// Requests relevance scores.
    #[must_use]
    pub fn with_scores(mut self) -> Self {
        self.need_score = true;
        self
    }

    /// Caps the result window.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Sorts by an explicit field.
    #[must_use]
    pub fn with_sort_field(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_field = Some(field.into());
        self.direction = direction;
        self
    }

    /// Adds per-field highlight specs.
    #[must_use]
    pub fn with_highlights(mut self, highlights: Vec<HighlightSpec>) -> Self {
        self.highlights = highlights;
        self
    }

    /// Fetches extra docvalue fields alongside the locator.
    #[must_use]
    pub fn with_extra_fields(mut self, fields: Vec<String>) -> Self {
        self.extra_fields = fields;
        self
    }
}

/// One decoded hit from a scroll session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollHit {
    /// The row locator, decoded from its packed docvalue. `None` in
    /// external-id mode.
    pub locator: Option<RowLocator>,
    /// The engine-assigned id, in external-id mode.
    pub id: Option<String>,
    /// Relevance score, when scoring was requested.
    pub score: Option<f64>,
    /// Highlight fragments per field, when the session was opened with
    /// highlight specs.
    pub highlight: Option<Value>,
}

/// A paged result cursor over one query.
pub struct ScrollSession<C: RestClient> {
    client: Arc<C>,
    base_url: String,
    scroll_ttl: String,
    using_id: bool,
    has_highlights: bool,
    scroll_id: String,
    hits: Vec<Hit>,
    currpos: usize,
    cnt: u64,
    total: u64,
}

impl<C: RestClient> ScrollSession<C> {
    /// Opens a cursor for an already-translated query and reads the first
    /// page.
    pub fn open(
        config: &MirrorConfig,
        client: Arc<C>,
        query: Value,
        options: ScrollOptions,
    ) -> MirrorResult<Self> {
        // a limited result must favor the top-scoring matches
        let need_score = options.need_score || options.limit > 0;

        let mut request = SearchRequest::new(query).with_scores(need_score);
        if options.need_sort || options.sort_field.is_some() {
            request = request.with_sort(options.sort_field.clone(), options.direction);
        }
        let has_highlights = !options.highlights.is_empty();
        if has_highlights {
            request = request.with_highlights(options.highlights.clone());
        }

        let size = if options.limit == 0 {
            MAX_DOCS_PER_REQUEST
        } else {
            options.limit
        };
        let stored_fields = if has_highlights {
            "type"
        } else if options.use_external_id {
            "_id"
        } else {
            "_none_"
        };
        let mut docvalue_fields = String::from(CTID_FIELD);
        for field in &options.extra_fields {
            docvalue_fields.push(',');
            docvalue_fields.push_str(field);
        }

        let url = format!(
            "{}/_search?_source=false&size={size}&scroll={}&filter_path={}\
             &stored_fields={stored_fields}&docvalue_fields={docvalue_fields}",
            config.typed_url(),
            config.scroll_ttl,
            SEARCH_RESPONSE_FILTER
        );

        let raw = client
            .call(Method::Post, &url, Some(&request.body()))
            .map_err(MirrorError::Transport)?;
        let response = decode_page(&raw)?;

        let scroll_id = response
            .scroll_id
            .ok_or_else(|| MirrorError::Protocol("response carries no scroll token".into()))?;
        let page = response
            .hits
            .ok_or_else(|| MirrorError::Protocol("response carries no hits object".into()))?;

        debug!(
            total = page.total,
            index = %config.index,
            limit = options.limit,
            "opened scroll cursor"
        );

        Ok(Self {
            client,
            base_url: config.url.clone(),
            scroll_ttl: config.scroll_ttl.clone(),
            using_id: options.use_external_id,
            has_highlights,
            scroll_id,
            hits: page.hits,
            currpos: 0,
            cnt: 0,
            total: page.total,
        })
    }

    /// The declared total number of matches across all pages.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Hits consumed so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.cnt
    }

    /// Decodes the next hit, refilling the page from the scroll endpoint if
    /// the current one is consumed.
    pub fn next_hit(&mut self) -> MirrorResult<ScrollHit> {
        if self.cnt >= self.total {
            return Err(MirrorError::Exhausted { total: self.total });
        }

        if self.currpos == self.hits.len() {
            self.refill()?;
        }

        let Some(hit) = self.hits.get(self.currpos) else {
            return Err(MirrorError::Protocol(
                "no results found when loading next scroll page".into(),
            ));
        };

        let (locator, id) = if self.using_id {
            let id = hit
                .id
                .clone()
                .ok_or_else(|| MirrorError::Protocol("hit carries no document id".into()))?;
            (None, Some(id))
        } else {
            let packed = hit.field_u64(CTID_FIELD).ok_or_else(|| {
                MirrorError::Protocol(format!("hit carries no {CTID_FIELD} docvalue"))
            })?;
            (Some(RowLocator::from_packed(packed)), None)
        };

        let decoded = ScrollHit {
            locator,
            id,
            score: hit.score,
            highlight: if self.has_highlights {
                hit.highlight.clone()
            } else {
                None
            },
        };

        self.currpos += 1;
        self.cnt += 1;
        Ok(decoded)
    }

    /// Closes the session. The cursor token is allowed to lapse server-side
    /// rather than being explicitly cancelled.
    pub fn close(self) {}

    fn refill(&mut self) -> MirrorResult<()> {
        let url = format!(
            "{}_search/scroll?filter_path={}",
            self.base_url, SEARCH_RESPONSE_FILTER
        );
        let body = scroll_body(&self.scroll_id, &self.scroll_ttl);
        let raw = self
            .client
            .call(Method::Post, &url, Some(&body))
            .map_err(MirrorError::Transport)?;
        let response = decode_page(&raw)?;

        let scroll_id = response
            .scroll_id
            .ok_or_else(|| MirrorError::Protocol("refill carries no scroll token".into()))?;
        let page = response
            .hits
            .ok_or_else(|| MirrorError::Protocol("refill carries no hits object".into()))?;

        self.scroll_id = scroll_id;
        self.hits = page.hits;
        self.currpos = 0;
        Ok(())
    }
}

/// Decodes a search or refill response, surfacing engine-reported errors and
/// shard failures with the raw body attached.
fn decode_page(raw: &str) -> MirrorResult<SearchResponse> {
    let response: SearchResponse =
        serde_json::from_str(raw).map_err(MirrorError::malformed)?;
    if response.error.is_some() {
        return Err(MirrorError::Engine { body: raw.into() });
    }
    if response.shards.as_ref().is_some_and(|shards| shards.failed > 0) {
        return Err(MirrorError::Engine { body: raw.into() });
    }
    Ok(response)
}
