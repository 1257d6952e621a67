//! Integration tests driving the engine against an in-memory search engine.
//!
//! The in-memory engine interprets the encoded bulk fragments (index actions,
//! scripted updates, conditional deletes, xid set maintenance) the way the
//! real one executes them server-side, so these tests exercise the full
//! encode-flush-apply-scroll path.

use esmirror_engine::{
    BulkSession, CancelToken, CompletedRequest, IndexClient, Method, MirrorConfig, MirrorError,
    MultiDispatch, MultiRestClient, RestClient, ScrollOptions,
};
use esmirror_protocol::{DocKey, RowLocator, VisibilityStamp, ABORTED_XIDS_DOC};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Page size served by the in-memory scroll endpoint, small enough that
/// multi-page tests exercise refills.
const PAGE_SIZE: usize = 2;

#[derive(Default)]
struct EngineState {
    docs: BTreeMap<u64, Map<String, Value>>,
    aborted_xids: Option<Vec<u64>>,
    next_auto_id: u64,
    scroll_pending: Vec<u64>,
}

/// An in-memory search engine behind the REST transport traits.
#[derive(Clone, Default)]
struct InMemoryEngine {
    state: Arc<Mutex<EngineState>>,
}

impl InMemoryEngine {
    fn new() -> Self {
        Self::default()
    }

    fn doc(&self, id: u64) -> Option<Map<String, Value>> {
        self.state.lock().docs.get(&id).cloned()
    }

    fn doc_count(&self) -> usize {
        self.state.lock().docs.len()
    }

    fn aborted_xids(&self) -> Vec<u64> {
        self.state.lock().aborted_xids.clone().unwrap_or_default()
    }

    fn apply_bulk(&self, body: &str) {
        let mut state = self.state.lock();
        let mut lines = body.lines();
        while let Some(action_line) = lines.next() {
            let action: Value = serde_json::from_str(action_line).unwrap();
            let payload: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
            if let Some(meta) = action.get("index") {
                let id = match meta.get("_id").and_then(Value::as_str) {
                    Some(id) => id.parse().unwrap(),
                    None => {
                        state.next_auto_id += 1;
                        u64::MAX - state.next_auto_id
                    }
                };
                let source = payload.as_object().cloned().unwrap();
                state.docs.insert(id, source);
            } else if let Some(meta) = action.get("update") {
                let id = meta.get("_id").and_then(Value::as_str).unwrap();
                apply_update(&mut state, id, &payload);
            } else {
                panic!("unknown bulk action: {action_line}");
            }
        }
    }

    fn open_scroll_response(&self) -> String {
        let mut state = self.state.lock();
        let mut ids: Vec<u64> = state.docs.keys().copied().collect();
        ids.sort_unstable();
        let total = ids.len() as u64;
        let page: Vec<u64> = ids.iter().copied().take(PAGE_SIZE).collect();
        state.scroll_pending = ids.into_iter().skip(PAGE_SIZE).collect();
        page_response(&state, &page, total)
    }

    fn next_scroll_response(&self) -> String {
        let mut state = self.state.lock();
        let total = state.docs.len() as u64;
        let take = PAGE_SIZE.min(state.scroll_pending.len());
        let page: Vec<u64> = state.scroll_pending.drain(..take).collect();
        page_response(&state, &page, total)
    }
}

fn page_response(state: &EngineState, page: &[u64], total: u64) -> String {
    let hits: Vec<Value> = page
        .iter()
        .map(|id| {
            let source = &state.docs[id];
            json!({
                "_id": id.to_string(),
                "fields": {"esm_ctid": [source.get("esm_ctid").cloned().unwrap_or(json!(id))]}
            })
        })
        .collect();
    json!({
        "_scroll_id": "mem-cursor",
        "_shards": {"failed": 0},
        "hits": {"total": total, "hits": hits}
    })
    .to_string()
}

fn apply_update(state: &mut EngineState, id: &str, payload: &Value) {
    let source = payload["script"]["source"].as_str().unwrap_or_default();
    let params = &payload["script"]["params"];

    if id == ABORTED_XIDS_DOC {
        if payload.get("upsert").is_some() {
            let xid = params["XID"].as_u64().unwrap();
            state.aborted_xids.get_or_insert_with(Vec::new).push(xid);
        } else if source.contains("removeAll") {
            let mut xids: Vec<u64> = params["XIDS"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_u64().unwrap())
                .collect();
            xids.sort_unstable();
            if let Some(set) = state.aborted_xids.as_mut() {
                set.retain(|xid| xids.binary_search(xid).is_err());
            }
        } else {
            let xid = params["XID"].as_u64().unwrap();
            if let Some(set) = state.aborted_xids.as_mut() {
                if let Some(pos) = set.iter().position(|v| *v == xid) {
                    set.remove(pos);
                }
            }
        }
        return;
    }

    let id: u64 = id.parse().unwrap();
    if source.contains("ctx.op='delete'") {
        let (field, param) = if params.get("EXPECTED_XMIN").is_some() {
            ("esm_xmin", "EXPECTED_XMIN")
        } else {
            ("esm_xmax", "EXPECTED_XMAX")
        };
        let matches = state
            .docs
            .get(&id)
            .and_then(|doc| doc.get(field))
            .is_some_and(|stored| *stored == params[param]);
        if matches {
            state.docs.remove(&id);
        }
    } else if source.contains("esm_xmax=null") {
        if let Some(doc) = state.docs.get_mut(&id) {
            if doc.get("esm_xmax") == Some(&params["EXPECTED_XMAX"]) {
                doc.insert("esm_xmax".into(), Value::Null);
            }
        }
    } else {
        // unconditional superseding-stamp update
        if let Some(doc) = state.docs.get_mut(&id) {
            doc.insert("esm_cmax".into(), params["CMAX"].clone());
            doc.insert("esm_xmax".into(), params["XMAX"].clone());
        }
    }
}

impl RestClient for InMemoryEngine {
    fn call(&self, _method: Method, url: &str, body: Option<&str>) -> Result<String, String> {
        if url.contains("/_bulk") {
            self.apply_bulk(body.unwrap_or_default());
            Ok(r#"{"errors":false}"#.into())
        } else if url.contains("_search/scroll") {
            Ok(self.next_scroll_response())
        } else if url.contains("/_search?") {
            Ok(self.open_scroll_response())
        } else if url.contains(&format!("{ABORTED_XIDS_DOC}/_update")) {
            let payload: Value = serde_json::from_str(body.unwrap_or_default())
                .map_err(|e| e.to_string())?;
            apply_update(&mut self.state.lock(), ABORTED_XIDS_DOC, &payload);
            Ok("{}".into())
        } else if url.contains("/_count") {
            Ok(format!("{{\"count\":{}}}", self.doc_count()))
        } else if url.ends_with("/_refresh") {
            Ok("{}".into())
        } else {
            Err(format!("unhandled url: {url}"))
        }
    }
}

/// Immediate dispatcher: requests execute on submit, completions are
/// reported on the next poll.
struct InMemoryMulti {
    engine: InMemoryEngine,
    completed: Vec<CompletedRequest>,
}

impl MultiDispatch for InMemoryMulti {
    fn submit(
        &mut self,
        method: Method,
        url: &str,
        body: String,
        slot: usize,
    ) -> Result<(), String> {
        let outcome = self.engine.call(method, url, Some(&body));
        self.completed.push(CompletedRequest {
            slot,
            body,
            outcome,
        });
        Ok(())
    }

    fn poll_completed(&mut self) -> Vec<CompletedRequest> {
        std::mem::take(&mut self.completed)
    }

    fn in_flight(&self) -> usize {
        self.completed.len()
    }
}

impl MultiRestClient for InMemoryEngine {
    type Multi = InMemoryMulti;

    fn multi(&self, _concurrency: usize) -> InMemoryMulti {
        InMemoryMulti {
            engine: self.clone(),
            completed: Vec::new(),
        }
    }
}

fn make_index(engine: &InMemoryEngine, config: MirrorConfig) -> IndexClient<InMemoryEngine> {
    IndexClient::new(config, Arc::new(engine.clone()))
}

fn config() -> MirrorConfig {
    MirrorConfig::new("http://mem/", "books", "doc")
}

fn start(index: &IndexClient<InMemoryEngine>) -> BulkSession<InMemoryEngine> {
    index.start_bulk(CancelToken::new()).unwrap()
}

fn stamp(xmin: u64) -> VisibilityStamp {
    VisibilityStamp::new(xmin, 0)
}

#[test]
fn insert_then_scroll_round_trip() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());

    let mut bulk = start(&index);
    for (block, offset) in [(7, 3), (7, 4), (8, 1)] {
        bulk.insert(
            Some(RowLocator::new(block, offset)),
            format!("{{\"title\":\"b{block}-{offset}\"}}"),
            stamp(100),
        )
        .unwrap();
    }
    let stats = bulk.finish().unwrap();
    assert_eq!(stats.total_rows, 3);
    assert_eq!(stats.inserts, 3);

    let mut scroll = index
        .open_scroll(json!({"match_all": {}}), ScrollOptions::new())
        .unwrap();
    assert_eq!(scroll.total(), 3);

    // pages of 2 force one refill mid-iteration
    let mut locators = Vec::new();
    for _ in 0..3 {
        locators.push(scroll.next_hit().unwrap().locator.unwrap());
    }
    assert!(locators.contains(&RowLocator::new(7, 3)));
    assert!(locators.contains(&RowLocator::new(7, 4)));
    assert!(locators.contains(&RowLocator::new(8, 1)));

    assert!(matches!(
        scroll.next_hit(),
        Err(MirrorError::Exhausted { total: 3 })
    ));
    scroll.close();
}

#[test]
fn row_ceiling_bounds_each_request() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config().with_max_docs_per_request(2));

    let mut bulk = start(&index);
    for offset in 1..=3u16 {
        bulk.insert(
            Some(RowLocator::new(1, offset)),
            "{\"n\":1}".into(),
            stamp(100),
        )
        .unwrap();
    }
    let stats = bulk.finish().unwrap();

    // three rows under a two-row ceiling split into a full request and a
    // remainder
    assert_eq!(stats.total_rows, 3);
    assert_eq!(stats.requests, 2);
    assert_eq!(engine.doc_count(), 3);
}

#[test]
fn update_sets_the_superseding_stamp() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());
    let locator = RowLocator::new(2, 5);

    let mut bulk = start(&index);
    bulk.insert(Some(locator), "{\"title\":\"x\"}".into(), stamp(100))
        .unwrap();
    bulk.finish().unwrap();

    let mut bulk = start(&index);
    bulk.update(DocKey::Ctid(locator), 1, 205).unwrap();
    bulk.finish().unwrap();

    let doc = engine.doc(locator.to_packed()).unwrap();
    assert_eq!(doc["esm_cmax"], json!(1));
    assert_eq!(doc["esm_xmax"], json!(205));
    assert_eq!(doc["esm_xmin"], json!(100));
}

#[test]
fn vacuum_clears_only_a_matching_xmax() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());
    let stale = RowLocator::new(3, 1);
    let live = RowLocator::new(3, 2);

    let mut bulk = start(&index);
    bulk.insert(
        Some(stale),
        "{}".into(),
        VisibilityStamp::new(100, 0).superseded_by(200, 1),
    )
    .unwrap();
    bulk.insert(
        Some(live),
        "{}".into(),
        VisibilityStamp::new(100, 0).superseded_by(300, 1),
    )
    .unwrap();
    bulk.finish().unwrap();

    // expect xmax 200: clears the stale doc, leaves the live one alone
    let mut bulk = start(&index);
    bulk.vacuum_xmax(stale.to_packed().to_string(), 200).unwrap();
    bulk.vacuum_xmax(live.to_packed().to_string(), 200).unwrap();
    bulk.finish().unwrap();

    assert_eq!(engine.doc(stale.to_packed()).unwrap()["esm_xmax"], Value::Null);
    assert_eq!(engine.doc(live.to_packed()).unwrap()["esm_xmax"], json!(300));
}

#[test]
fn conditional_deletes_respect_their_precondition() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());
    let a = RowLocator::new(4, 1);
    let b = RowLocator::new(4, 2);

    let mut bulk = start(&index);
    bulk.insert(Some(a), "{}".into(), stamp(100)).unwrap();
    bulk.insert(Some(b), "{}".into(), stamp(150)).unwrap();
    bulk.finish().unwrap();

    let mut bulk = start(&index);
    // matches a's xmin, misses b's
    bulk.delete_by_xmin(a.to_packed().to_string(), 100).unwrap();
    bulk.delete_by_xmin(b.to_packed().to_string(), 999).unwrap();
    let stats = bulk.finish().unwrap();
    assert_eq!(stats.deletes, 2);

    assert!(engine.doc(a.to_packed()).is_none());
    assert!(engine.doc(b.to_packed()).is_some());
    assert_eq!(engine.doc_count(), 1);
}

#[test]
fn delete_by_xmax_removes_a_superseded_doc() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());
    let locator = RowLocator::new(5, 1);

    let mut bulk = start(&index);
    bulk.insert(
        Some(locator),
        "{}".into(),
        VisibilityStamp::new(100, 0).superseded_by(200, 2),
    )
    .unwrap();
    bulk.finish().unwrap();

    let mut bulk = start(&index);
    bulk.delete_by_xmax(locator.to_packed().to_string(), 200)
        .unwrap();
    bulk.finish().unwrap();

    assert!(engine.doc(locator.to_packed()).is_none());
}

#[test]
fn aborted_xid_set_tracks_transaction_outcomes() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());

    // a transaction marks itself in progress up front
    let mut bulk = start(&index);
    bulk.mark_transaction_in_progress(700).unwrap();
    bulk.insert(Some(RowLocator::new(6, 1)), "{}".into(), stamp(700))
        .unwrap();
    bulk.finish().unwrap();
    assert_eq!(engine.aborted_xids(), vec![700]);

    // commit removes it through the direct update path
    index.commit_transaction(700).unwrap();
    assert!(engine.aborted_xids().is_empty());

    // an in-batch commit removes it within the same session
    let mut bulk = start(&index);
    bulk.mark_transaction_in_progress(701).unwrap();
    bulk.insert(Some(RowLocator::new(6, 2)), "{}".into(), stamp(701))
        .unwrap();
    bulk.mark_transaction_committed(701).unwrap();
    bulk.finish().unwrap();
    assert!(engine.aborted_xids().is_empty());
}

#[test]
fn aborted_xids_are_removed_in_batches() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());

    let mut bulk = start(&index);
    for xid in [801, 802, 803] {
        bulk.mark_transaction_in_progress(xid).unwrap();
    }
    bulk.finish().unwrap();
    assert_eq!(engine.aborted_xids(), vec![801, 802, 803]);

    let mut bulk = start(&index);
    bulk.remove_aborted_transactions(&[801, 803]).unwrap();
    bulk.finish().unwrap();
    assert_eq!(engine.aborted_xids(), vec![802]);
}

#[test]
fn count_reflects_applied_mutations() {
    let engine = InMemoryEngine::new();
    let index = make_index(&engine, config());

    let mut bulk = start(&index);
    for offset in 1..=4u16 {
        bulk.insert(Some(RowLocator::new(9, offset)), "{}".into(), stamp(100))
            .unwrap();
    }
    bulk.finish().unwrap();
    assert_eq!(index.count(&json!({"match_all": {}})).unwrap(), 4);

    let mut bulk = start(&index);
    bulk.delete_by_xmin(RowLocator::new(9, 1).to_packed().to_string(), 100)
        .unwrap();
    bulk.finish().unwrap();
    assert_eq!(index.count(&json!({"match_all": {}})).unwrap(), 3);
}
