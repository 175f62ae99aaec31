//! `jobflow`: run a flow document against a SurrealDB broker.
//!
//! ```text
//! jobflow <flow.json | saved-flow-name> [producer-id]
//! ```
//!
//! The flow may also be named by `JOBFLOW_FLOWS`. Every stdin line that
//! parses as a JSON object is sent to the producer (the flow's first
//! producer when none is given). Node events are logged until Ctrl-C.

mod init;

use std::error::Error;

use actors::FlowClient;
use jobflow_core::Message;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "jobflow=info,actors=info,broker=info,sandbox=info,library=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let source = args
        .next()
        .or_else(|| std::env::var("JOBFLOW_FLOWS").ok())
        .ok_or("usage: jobflow <flow.json | saved-flow-name> [producer-id]")?;

    let flow = init::load_flow(&source).await?;
    let producer = args
        .next()
        .or_else(|| flow.producers.first().map(|p| p.id.clone()));

    let flows = init::init_runtime(flow).await?;

    let mut events = flows.subscribe().await?;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!("{}", event.description()),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, skipped {} event(s)", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let input = tokio::spawn(forward_stdin(flows.clone(), producer));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    input.abort();
    flows.shutdown().await?;

    Ok(())
}

/// Send each JSON object read from stdin to `producer`.
async fn forward_stdin(flows: FlowClient, producer: Option<String>) {
    let Some(producer) = producer else {
        tracing::info!("Flow has no producer; ignoring stdin");
        return;
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(message) = serde_json::from_str(line).ok().and_then(Message::from_value) else {
            tracing::warn!("Ignoring input that is not a JSON object: {}", line);
            continue;
        };

        match flows.input(&producer, message).await {
            Ok(id) => tracing::info!("Enqueued job {} via {}", id, producer),
            Err(e) => tracing::warn!("Input to {} failed: {}", producer, e),
        }
    }
}
