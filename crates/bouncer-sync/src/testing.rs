//! Scriptable in-memory decision source for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bouncer_core::{Decision, StreamUpdate};
use parking_lot::Mutex;

use crate::error::{Result, SyncError};
use crate::source::DecisionSource;

/// Builds a decision for `value` with the given type and duration.
pub fn decision(value: &str, kind: &str, duration: &str) -> Decision {
    Decision {
        id: 0,
        origin: "test".to_string(),
        kind: kind.to_string(),
        scope: "Ip".to_string(),
        value: value.to_string(),
        duration: duration.to_string(),
        scenario: "test/scenario".to_string(),
        simulated: false,
    }
}

/// One scripted answer to a stream call.
#[derive(Debug, Clone)]
pub enum StreamReply {
    Update(StreamUpdate),
    /// Fails with a 503 status error.
    Unavailable,
}

/// Decision source answering from canned data and counting calls.
#[derive(Debug, Default)]
pub struct FakeDecisionSource {
    decisions: Mutex<HashMap<String, Vec<Decision>>>,
    replies: Mutex<VecDeque<StreamReply>>,
    startup_hints: Mutex<Vec<bool>>,
    query_failure: AtomicBool,
    login_failure: AtomicBool,
    requires_login: bool,
    stream_delay: Option<Duration>,
    queries: AtomicUsize,
    streams: AtomicUsize,
    logins: AtomicUsize,
}

impl FakeDecisionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that must be logged into, like the central API.
    pub fn central() -> Self {
        Self {
            requires_login: true,
            ..Self::default()
        }
    }

    /// Delays every stream answer.
    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = Some(delay);
        self
    }

    /// Sets the decisions returned for `ip`.
    pub fn set_decisions(&self, ip: &str, decisions: Vec<Decision>) {
        self.decisions.lock().insert(ip.to_string(), decisions);
    }

    /// Queues a stream answer. An empty queue answers with an empty update.
    pub fn push_stream(&self, reply: StreamReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.query_failure.store(fail, Ordering::SeqCst);
    }

    pub fn fail_logins(&self, fail: bool) {
        self.login_failure.store(fail, Ordering::SeqCst);
    }

    pub fn query_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Startup hints passed to every stream call so far.
    pub fn startup_hints(&self) -> Vec<bool> {
        self.startup_hints.lock().clone()
    }

    fn unavailable(what: &str) -> SyncError {
        SyncError::Status {
            url: format!("fake://{}", what),
            status: 503,
        }
    }
}

#[async_trait]
impl DecisionSource for FakeDecisionSource {
    async fn decisions_for_ip(&self, ip: &str) -> Result<Vec<Decision>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.query_failure.load(Ordering::SeqCst) {
            return Err(Self::unavailable("decisions"));
        }
        Ok(self.decisions.lock().get(ip).cloned().unwrap_or_default())
    }

    async fn stream(&self, startup: bool) -> Result<StreamUpdate> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        self.startup_hints.lock().push(startup);
        if let Some(delay) = self.stream_delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(StreamReply::Update(update)) => Ok(update),
            Some(StreamReply::Unavailable) => Err(Self::unavailable("stream")),
            None => Ok(StreamUpdate::default()),
        }
    }

    async fn login(&self) -> Result<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.login_failure.load(Ordering::SeqCst) {
            return Err(SyncError::Auth("login rejected with code 403".to_string()));
        }
        Ok(())
    }

    fn requires_login(&self) -> bool {
        self.requires_login
    }
}
