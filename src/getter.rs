//! HTTPS fetching seam used by attestation clients, and a queued double for it.
//!
//! [MockGetter] answers each URL from an ordered queue of canned responses.
//! Every call consumes one use of the front response; a response whose uses
//! run out is dropped, and the next one takes its place.

use log::{debug, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GetError {
    #[error("404: {0}")]
    NotFound(String),
    /// The canned response carried an error. Its body is still delivered.
    #[error("{url}: {message}")]
    Response {
        url: String,
        message: String,
        body: Vec<u8>,
    },
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

pub trait HttpsGetter {
    fn get(&mut self, url: &str) -> Result<Vec<u8>, GetError>;
}

/// An [HttpsGetter] that honors a caller-supplied [FetchContext].
pub trait ContextHttpsGetter: HttpsGetter {
    fn get_context(&mut self, ctx: &FetchContext, url: &str) -> Result<Vec<u8>, GetError>;
}

/// Cancellation signal and optional deadline for a fetch.
#[derive(Clone, Debug)]
pub struct FetchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for FetchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchContext {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, if it is. Never waits.
    pub fn err(&self) -> Option<GetError> {
        if self.token.is_cancelled() {
            return Some(GetError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(GetError::DeadlineExceeded),
            _ => None,
        }
    }
}

/// How many times a canned response is served before it leaves the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uses {
    /// Served `n` times. Zero uses never run out, like [Uses::Forever].
    Times(u64),
    Forever,
}

impl Uses {
    /// Consumes one use and tells whether the response is now exhausted.
    fn consume(&mut self) -> bool {
        match self {
            Uses::Forever | Uses::Times(0) => false,
            Uses::Times(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetResponse {
    pub uses: Uses,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl GetResponse {
    /// A body served once, without error.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            uses: Uses::Times(1),
            body: body.into(),
            error: None,
        }
    }

    pub fn times(mut self, n: u64) -> Self {
        self.uses = Uses::Times(n);
        self
    }

    pub fn forever(mut self) -> Self {
        self.uses = Uses::Forever;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

/// Where [MockGetter::done] reports unconsumed responses.
pub trait FailureSink {
    fn report_failure(&mut self, message: String);
}

impl FailureSink for Vec<String> {
    fn report_failure(&mut self, message: String) {
        self.push(message);
    }
}

/// Serves canned responses per URL, front of the queue first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockGetter {
    pub responses: BTreeMap<String, VecDeque<GetResponse>>,
}

impl MockGetter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A getter answering every URL with its body, forever and without error.
    pub fn simple<K, V>(responses: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let responses = responses
            .into_iter()
            .map(|(url, body)| {
                let queue = VecDeque::from([GetResponse::new(body).forever()]);
                (url.into(), queue)
            })
            .collect();
        Self { responses }
    }

    /// Queues `response` behind any already configured for `url`.
    pub fn with_response(mut self, url: impl Into<String>, response: GetResponse) -> Self {
        self.responses
            .entry(url.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Number of responses still queued for `url`.
    pub fn remaining(&self, url: &str) -> usize {
        self.responses.get(url).map_or(0, VecDeque::len)
    }

    /// Reports one failure per URL whose queue was not drained, returning how
    /// many were reported.
    pub fn done(&self, sink: &mut dyn FailureSink) -> usize {
        let mut failures = 0;
        for (url, queue) in &self.responses {
            if !queue.is_empty() {
                warn!("{} prepared response(s) for {url} not retrieved", queue.len());
                sink.report_failure(format!("Prepared response for '{url}' not retrieved."));
                failures += 1;
            }
        }
        failures
    }

    /// Panics unless every prepared response was retrieved.
    pub fn assert_done(&self) {
        let mut failures = Vec::new();
        if self.done(&mut failures) > 0 {
            panic!("{}", failures.join("\n"));
        }
    }
}

impl HttpsGetter for MockGetter {
    fn get(&mut self, url: &str) -> Result<Vec<u8>, GetError> {
        let Some(queue) = self.responses.get_mut(url) else {
            debug!("GET {url}: no responses configured");
            return Err(GetError::NotFound(url.to_string()));
        };
        let Some(front) = queue.front_mut() else {
            debug!("GET {url}: responses exhausted");
            return Err(GetError::NotFound(url.to_string()));
        };

        let body = front.body.clone();
        let error = front.error.clone();
        if front.uses.consume() {
            queue.pop_front();
            trace!("GET {url}: response exhausted, {} left", queue.len());
        }
        debug!("GET {url}: {} bytes", body.len());

        match error {
            Some(message) => Err(GetError::Response {
                url: url.to_string(),
                message,
                body,
            }),
            None => Ok(body),
        }
    }
}

impl ContextHttpsGetter for MockGetter {
    fn get_context(&mut self, ctx: &FetchContext, url: &str) -> Result<Vec<u8>, GetError> {
        if let Some(err) = ctx.err() {
            debug!("GET {url}: {err}");
            return Err(err);
        }
        self.get(url)
    }
}
