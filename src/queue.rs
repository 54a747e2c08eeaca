//! # Request queue
//! Serializes batch requests to the serving collaborator.
//!
//! Producers enqueue without waiting. A single drain task pops the head,
//! issues it (timeout + bounded retry), applies the result, runs the item's
//! callback, and only then pops the next head. When the queue runs dry the
//! task ends; the next `enqueue` starts a new one.
//!
//! The dedup snapshot is taken when a batch is *issued*, so it always
//! reflects the previous batch's response.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::sync::Notify;

use crate::config::ServingConfig;
use crate::metrics::ensure_metrics_described;
use crate::slot::SlotId;
use crate::transport::{Transport, TransportError};
use crate::wire::{TeaserRequest, TeaserResponse};

/// Requested count per slot; always 1 in practice.
pub type Widgets = BTreeMap<SlotId, u32>;

/// How a queued batch settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No slots; settled on enqueue without a request.
    Empty,
    /// Response applied.
    Delivered,
    /// Attempts exhausted or response unusable; slots rendered empty.
    Failed,
    /// Every slot belonged to a discarded layout; no request made.
    Skipped,
}

pub type OnComplete = Box<dyn FnOnce(BatchOutcome) + Send + 'static>;

pub struct QueueItem {
    pub widgets: Widgets,
    /// Layout generation of the feed slots in `widgets`, if any.
    pub feed_generation: Option<u32>,
    pub on_complete: Option<OnComplete>,
}

impl QueueItem {
    pub fn new(slots: impl IntoIterator<Item = SlotId>) -> Self {
        Self {
            widgets: slots.into_iter().map(|s| (s, 1)).collect(),
            feed_generation: None,
            on_complete: None,
        }
    }

    pub fn feed_generation(mut self, generation: u32) -> Self {
        self.feed_generation = Some(generation);
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(BatchOutcome) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("widgets", &self.widgets)
            .field("feed_generation", &self.feed_generation)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Where issued batches come from and where their results go.
pub trait BatchSink: Send + Sync {
    /// Drop slots whose layout is gone. An empty result skips the request.
    fn prune_stale(&self, widgets: Widgets, feed_generation: Option<u32>) -> Widgets;
    /// Full request for `widgets`, carrying the current dedup snapshot.
    fn build_request(&self, widgets: &Widgets) -> TeaserRequest;
    fn apply(&self, widgets: &Widgets, feed_generation: Option<u32>, response: TeaserResponse);
    /// Render every slot of a failed batch as absent.
    fn fail(&self, widgets: &Widgets, feed_generation: Option<u32>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &ServingConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            max_attempts: cfg.max_attempts.max(1),
            backoff: cfg.retry_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ServingConfig::default())
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    draining: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn BatchSink>,
    policy: RetryPolicy,
    idle: Notify,
}

#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn BatchSink>, policy: RetryPolicy) -> Self {
        ensure_metrics_described();
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                transport,
                sink,
                policy,
                idle: Notify::new(),
            }),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Append to the tail. Never waits. An empty batch settles immediately
    /// with [`BatchOutcome::Empty`] and is not queued.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, item: QueueItem) {
        if item.is_empty() {
            if let Some(cb) = item.on_complete {
                cb(BatchOutcome::Empty);
            }
            return;
        }
        let start = {
            let mut st = self.inner.state.lock().expect("queue mutex poisoned");
            st.pending.push_back(item);
            !std::mem::replace(&mut st.draining, true)
        };
        if start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.drain().await });
        }
    }

    /// Items waiting behind the one in flight.
    pub fn pending(&self) -> usize {
        let st = self.inner.state.lock().expect("queue mutex poisoned");
        st.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        let st = self.inner.state.lock().expect("queue mutex poisoned");
        !st.draining && st.pending.is_empty()
    }

    /// Resolves once nothing is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

impl QueueInner {
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut st = self.state.lock().expect("queue mutex poisoned");
                match st.pending.pop_front() {
                    Some(item) => item,
                    None => {
                        st.draining = false;
                        break;
                    }
                }
            };
            self.process(next).await;
        }
        self.idle.notify_waiters();
    }

    async fn process(&self, item: QueueItem) {
        let QueueItem {
            widgets,
            feed_generation,
            on_complete,
        } = item;

        let widgets = self.sink.prune_stale(widgets, feed_generation);
        let outcome = if widgets.is_empty() {
            tracing::debug!(target: "queue", ?feed_generation, "batch belongs to a discarded layout; skipping");
            BatchOutcome::Skipped
        } else {
            let request = self.sink.build_request(&widgets);
            match self.send_with_retry(&request).await {
                Ok(response) => {
                    self.sink.apply(&widgets, feed_generation, response);
                    BatchOutcome::Delivered
                }
                Err(e) => {
                    tracing::warn!(target: "queue", slots = widgets.len(), error = %e, "batch abandoned");
                    counter!("slot_batches_failed_total").increment(1);
                    self.sink.fail(&widgets, feed_generation);
                    BatchOutcome::Failed
                }
            }
        };

        if let Some(cb) = on_complete {
            cb(outcome);
        }
    }

    async fn send_with_retry(&self, request: &TeaserRequest) -> Result<TeaserResponse, TransportError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("slot_requests_total").increment(1);
            let result = match tokio::time::timeout(self.policy.timeout, self.transport.fetch(request)).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout(self.policy.timeout)),
            };
            match result {
                Ok(resp) => {
                    if attempt > 1 {
                        tracing::info!(target: "queue", attempt, "batch delivered after retry");
                    }
                    return Ok(resp);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    tracing::warn!(
                        target: "queue",
                        attempt, max = self.policy.max_attempts, transport = self.transport.name(),
                        error = %e, "attempt failed; retrying"
                    );
                    counter!("slot_request_retries_total").increment(1);
                    if !self.policy.backoff.is_zero() {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
