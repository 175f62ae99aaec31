use std::future::Future;
use std::time::Duration;

use broker::{SurrealBroker, SurrealConfig};
use jobflow_core::QueueEndpoint;

/// A broker on a private in-memory database with a short poll interval.
pub fn memory_broker() -> SurrealBroker {
    SurrealBroker::new(SurrealConfig::default().with_poll_interval(Duration::from_millis(10)))
}

pub fn memory_endpoint(name: &str) -> QueueEndpoint {
    QueueEndpoint::new(format!("cfg-{}", name), name, "", 0)
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
