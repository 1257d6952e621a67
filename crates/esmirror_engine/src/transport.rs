//! Transport layer abstraction.
//!
//! The engine never issues HTTP itself. A [`RestClient`] performs one
//! synchronous request/response call; its [`MultiDispatch`] facility holds up
//! to the configured concurrency of requests in flight and reports which
//! have completed. Request bodies travel as owned `String` buffers so the
//! bulk session's buffer pool can recycle them when a request completes.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// HTTP method for a REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
}

impl Method {
    /// Returns the method's wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A synchronous REST client.
///
/// Implement this to provide the actual HTTP transport (reqwest, ureq,
/// hyper, ...). Payload compression, if any, is the implementation's
/// business. A returned `Err` represents a transport-level failure
/// (connection failure, non-success status) and is fatal to the session
/// that issued the call.
pub trait RestClient: Send + Sync {
    /// Performs one request and returns the response body.
    fn call(&self, method: Method, url: &str, body: Option<&str>) -> Result<String, String>;
}

/// A client whose requests can also be dispatched concurrently.
pub trait MultiRestClient: RestClient {
    /// The multi-request facility type.
    type Multi: MultiDispatch;

    /// Creates a multi-request facility holding at most `concurrency`
    /// requests in flight.
    fn multi(&self, concurrency: usize) -> Self::Multi;
}

/// A completed multi-dispatch request.
#[derive(Debug)]
pub struct CompletedRequest {
    /// Pool slot index the request body was checked out from.
    pub slot: usize,
    /// The request body buffer, handed back for reuse.
    pub body: String,
    /// Response body, or a transport-level failure.
    pub outcome: Result<String, String>,
}

/// A facility for running several requests concurrently.
///
/// Ownership of a request body transfers on [`submit`](Self::submit) and
/// returns through [`poll_completed`](Self::poll_completed) together with the
/// slot index it was checked out from.
pub trait MultiDispatch {
    /// Starts a request. Callers keep the number of in-flight requests under
    /// the facility's concurrency limit by polling before submitting.
    fn submit(
        &mut self,
        method: Method,
        url: &str,
        body: String,
        slot: usize,
    ) -> Result<(), String>;

    /// Non-blocking poll: drains and returns every request that has
    /// completed since the last call.
    fn poll_completed(&mut self) -> Vec<CompletedRequest>;

    /// Number of requests currently in flight.
    fn in_flight(&self) -> usize;
}

/// One call recorded by [`MockRestClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// HTTP method.
    pub method: Method,
    /// Full request URL.
    pub url: String,
    /// Request body, if any.
    pub body: Option<String>,
}

#[derive(Debug)]
struct HeldRequest {
    method: Method,
    url: String,
    body: String,
    slot: usize,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RecordedCall>,
    responses: VecDeque<Result<String, String>>,
    hold: bool,
    held: VecDeque<HeldRequest>,
    completed: Vec<CompletedRequest>,
}

impl MockState {
    fn record(&mut self, method: Method, url: &str, body: Option<&str>) -> Result<String, String> {
        self.calls.push(RecordedCall {
            method,
            url: url.to_string(),
            body: body.map(str::to_string),
        });
        self.responses.pop_front().unwrap_or_else(|| Ok("{}".into()))
    }

    fn execute(&mut self, request: HeldRequest) {
        let outcome = self.record(request.method, &request.url, Some(request.body.as_str()));
        self.completed.push(CompletedRequest {
            slot: request.slot,
            body: request.body,
            outcome,
        });
    }
}

/// A mock REST client for testing.
///
/// Records every call and replays canned responses in order, falling back to
/// an empty JSON object once the queue is drained. Multi-dispatched requests
/// complete immediately unless [`hold_multi_requests`](Self::hold_multi_requests)
/// is enabled, in which case they stay in flight until
/// [`complete_next`](Self::complete_next).
#[derive(Debug, Clone, Default)]
pub struct MockRestClient {
    state: Arc<Mutex<MockState>>,
}

impl MockRestClient {
    /// Creates a new mock client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response body.
    pub fn push_response(&self, body: impl Into<String>) {
        self.state.lock().responses.push_back(Ok(body.into()));
    }

    /// Queues a transport-level failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.state.lock().responses.push_back(Err(message.into()));
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Keeps multi-dispatched requests in flight until explicitly completed.
    pub fn hold_multi_requests(&self) {
        self.state.lock().hold = true;
    }

    /// Completes the oldest held multi request. Returns false if none are
    /// held.
    pub fn complete_next(&self) -> bool {
        let mut state = self.state.lock();
        match state.held.pop_front() {
            Some(request) => {
                state.execute(request);
                true
            }
            None => false,
        }
    }
}

impl RestClient for MockRestClient {
    fn call(&self, method: Method, url: &str, body: Option<&str>) -> Result<String, String> {
        self.state.lock().record(method, url, body)
    }
}

impl MultiRestClient for MockRestClient {
    type Multi = MockMulti;

    fn multi(&self, concurrency: usize) -> MockMulti {
        MockMulti {
            client: self.clone(),
            concurrency,
        }
    }
}

/// Mock multi-request facility, sharing its queues with the owning
/// [`MockRestClient`] so tests can drive completion from outside the
/// session that owns the dispatcher.
pub struct MockMulti {
    client: MockRestClient,
    concurrency: usize,
}

impl MultiDispatch for MockMulti {
    fn submit(
        &mut self,
        method: Method,
        url: &str,
        body: String,
        slot: usize,
    ) -> Result<(), String> {
        let mut state = self.client.state.lock();
        if state.held.len() + state.completed.len() >= self.concurrency {
            return Err(format!(
                "multi dispatch over concurrency limit of {}",
                self.concurrency
            ));
        }
        let request = HeldRequest {
            method,
            url: url.to_string(),
            body,
            slot,
        };
        if state.hold {
            state.held.push_back(request);
        } else {
            state.execute(request);
        }
        Ok(())
    }

    fn poll_completed(&mut self) -> Vec<CompletedRequest> {
        std::mem::take(&mut self.client.state.lock().completed)
    }

    fn in_flight(&self) -> usize {
        let state = self.client.state.lock();
        state.held.len() + state.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_and_replays_responses() {
        let client = MockRestClient::new();
        client.push_response("{\"count\":3}");
        client.push_error("connection refused");

        let first = client.call(Method::Post, "http://x/_count", Some("{}"));
        assert_eq!(first.unwrap(), "{\"count\":3}");

        let second = client.call(Method::Get, "http://x/_refresh", None);
        assert_eq!(second.unwrap_err(), "connection refused");

        // queue drained: default empty object
        let third = client.call(Method::Get, "http://x/", None);
        assert_eq!(third.unwrap(), "{}");

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].method, Method::Post);
        assert_eq!(calls[1].url, "http://x/_refresh");
        assert_eq!(calls[1].body, None);
    }

    #[test]
    fn multi_completes_immediately_by_default() {
        let client = MockRestClient::new();
        let mut multi = client.multi(2);

        multi
            .submit(Method::Post, "http://x/_bulk", "body".into(), 0)
            .unwrap();
        assert_eq!(multi.in_flight(), 1);

        let completed = multi.poll_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].slot, 0);
        assert_eq!(completed[0].body, "body");
        assert!(completed[0].outcome.is_ok());
        assert_eq!(multi.in_flight(), 0);
    }

    #[test]
    fn multi_hold_keeps_requests_in_flight() {
        let client = MockRestClient::new();
        client.hold_multi_requests();
        let mut multi = client.multi(2);

        multi
            .submit(Method::Post, "http://x/_bulk", "a".into(), 0)
            .unwrap();
        multi
            .submit(Method::Post, "http://x/_bulk", "b".into(), 1)
            .unwrap();
        assert_eq!(multi.in_flight(), 2);
        assert!(multi.poll_completed().is_empty());

        // at the limit
        let over = multi.submit(Method::Post, "http://x/_bulk", "c".into(), 2);
        assert!(over.is_err());

        assert!(client.complete_next());
        let completed = multi.poll_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].slot, 0);
        assert_eq!(multi.in_flight(), 1);
    }

    #[test]
    fn method_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }
}
