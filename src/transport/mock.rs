//! Scripted in-memory transport used by the unit tests.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ApiRequest, Transport};
use crate::error::Result;

type Handler = dyn Fn(&ApiRequest) -> Result<Value> + Send + Sync;

pub(crate) struct MockTransport {
    handler: Box<Handler>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ApiRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&ApiRequest) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of calls whose path or URL starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route().starts_with(prefix))
            .count()
    }

    /// Highest number of calls observed in flight at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = self.delay;

        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let reply = (self.handler)(&request);

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            reply
        })
    }
}
