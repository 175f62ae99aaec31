#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use broker::{Broker, BrokerError, BrokerFuture, JobHandler, QueueHandle, QueueRef};
use jobflow_core::{DoneCallback, Job, Message, NodeEvent, QueueEndpoint};
use serde_json::json;
use tokio::sync::{broadcast, oneshot};

pub fn endpoint(name: &str) -> QueueEndpoint {
    QueueEndpoint::new(format!("cfg-{}", name), name, "localhost", 6379)
}

/// `{payload: 7, _msgid: "abc"}`
pub fn payload_message() -> Message {
    Message::from_value(json!({"payload": 7, "_msgid": "abc"})).unwrap_or_default()
}

/// A queue that records added jobs and lets tests deliver jobs by hand.
#[derive(Default)]
pub struct FakeQueue {
    name: String,
    added: Mutex<Vec<Job>>,
    handler: Mutex<Option<JobHandler>>,
    closed: Arc<AtomicBool>,
    close_delay: Duration,
}

impl FakeQueue {
    pub fn added(&self) -> Vec<Job> {
        self.added.lock().unwrap().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hand `job` to the registered handler and return its completion.
    pub fn deliver(&self, job: Job) -> Option<oneshot::Receiver<Result<(), String>>> {
        let handler = self.handler.lock().unwrap().clone()?;
        let (tx, rx) = oneshot::channel();
        let done = DoneCallback::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        handler(job, done);
        Some(rx)
    }
}

impl std::fmt::Debug for FakeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeQueue").field("name", &self.name).finish()
    }
}

impl QueueHandle for FakeQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, job: Job) -> BrokerFuture<()> {
        let result = if self.is_closed() {
            Err(BrokerError::Closed(self.name.clone()))
        } else {
            self.added.lock().unwrap().push(job);
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn process(&self, handler: JobHandler) -> BrokerFuture<()> {
        *self.handler.lock().unwrap() = Some(handler);
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BrokerFuture<()> {
        *self.handler.lock().unwrap() = None;
        let closed = self.closed.clone();
        let delay = self.close_delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
struct FakeBrokerInner {
    connects: AtomicUsize,
    failures: AtomicUsize,
    delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    queues: Mutex<HashMap<String, Arc<FakeQueue>>>,
}

/// A broker that counts connections and can be told to fail.
#[derive(Clone, Default)]
pub struct FakeBroker {
    inner: Arc<FakeBrokerInner>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection takes `delay` before resolving.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = delay;
        self
    }

    /// Closing any queue takes `delay` before it resolves.
    pub fn with_close_delay(self, delay: Duration) -> Self {
        *self.inner.close_delay.lock().unwrap() = delay;
        self
    }

    /// The next `count` connections fail.
    pub fn fail_next(&self, count: usize) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// The queue most recently opened under `name`.
    pub fn queue(&self, name: &str) -> Option<Arc<FakeQueue>> {
        self.inner.queues.lock().unwrap().get(name).cloned()
    }

    pub fn shared(&self) -> Arc<dyn Broker> {
        Arc::new(self.clone())
    }
}

impl Broker for FakeBroker {
    fn connect(&self, endpoint: &QueueEndpoint) -> BrokerFuture<QueueRef> {
        let inner = self.inner.clone();
        let name = endpoint.name.clone();
        Box::pin(async move {
            inner.connects.fetch_add(1, Ordering::SeqCst);
            let delay = *inner.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let failing = inner
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BrokerError::Connection("connection refused".to_string()));
            }

            let queue = Arc::new(FakeQueue {
                name: name.clone(),
                close_delay: *inner.close_delay.lock().unwrap(),
                ..FakeQueue::default()
            });
            inner.queues.lock().unwrap().insert(name, queue.clone());
            Ok(queue as QueueRef)
        })
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Receive events until one matches `pred` or `timeout` elapses.
pub async fn next_event<F>(
    rx: &mut broadcast::Receiver<NodeEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<NodeEvent>
where
    F: FnMut(&NodeEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Drain every event already sent to `rx`.
pub fn drain(rx: &mut broadcast::Receiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
