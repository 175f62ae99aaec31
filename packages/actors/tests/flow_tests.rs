#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{FlowClient, SupervisorArgs, start_supervisor};
use broker::{SurrealBroker, SurrealConfig};
use common::{FakeBroker, payload_message};
use jobflow_core::{
    EndpointEvent, FlowConfig, Job, JobStatus, LogLevel, Message, NodeEvent, QueueEndpoint,
    ReleasePolicy, RuntimeSettings, StatusFill,
};
use library::{LibraryConfig, LibraryEntry, ScriptLibrary};
use serde_json::{Value, json};

const WAIT: Duration = Duration::from_secs(5);

fn flow(value: Value) -> Result<FlowConfig, Box<dyn Error>> {
    Ok(serde_json::from_value(value)?)
}

fn consumer_flow(func: &str) -> Result<FlowConfig, Box<dyn Error>> {
    flow(json!({
        "endpoints": [{"id": "cfg-q1", "name": "q1", "address": "localhost", "port": 6379}],
        "consumers": [{"id": "out", "name": "worker", "queue": "cfg-q1", "func": func}]
    }))
}

async fn start(args: SupervisorArgs) -> Result<FlowClient, Box<dyn Error>> {
    let (supervisor, _handle) = start_supervisor(args).await?;
    Ok(FlowClient::new(supervisor))
}

async fn wait_for_processing(broker: &FakeBroker, name: &str) -> bool {
    common::wait_until(WAIT, || {
        let broker = broker.clone();
        let name = name.to_string();
        async move { broker.queue(&name).is_some_and(|q| q.is_processing()) }
    })
    .await
}

#[tokio::test]
async fn test_producer_adds_job_with_name_and_topic() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    flows
        .deploy(flow(json!({
            "endpoints": [{"id": "cfg-q1", "name": "q1", "address": "localhost", "port": 6379}],
            "producers": [{"id": "in", "name": "enqueue", "queue": "cfg-q1", "topic": "work"}]
        }))?)
        .await?;

    let message = Message::from_value(json!({"payload": 7})).unwrap_or_default();
    let id = flows.input("in", message).await?;

    let added = broker.queue("q1").map(|q| q.added()).unwrap_or_default();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].id, id);
    assert_eq!(added[0].data.get("payload"), Some(&json!(7)));
    assert_eq!(added[0].name, "enqueue");
    assert_eq!(added[0].topic, "work");

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_producer_reports_disconnected_and_retries_on_next_input()
-> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    broker.fail_next(2);
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(flow(json!({
            "endpoints": [{"id": "cfg-q1", "name": "q1", "port": 6379}],
            "producers": [{"id": "in", "queue": "cfg-q1"}]
        }))?)
        .await?;

    let status = common::next_event(&mut events, WAIT, |e| {
        matches!(e, NodeEvent::Status { node, .. } if node == "in")
    })
    .await;
    assert!(matches!(
        status,
        Some(NodeEvent::Status { status, .. }) if status.fill == StatusFill::Red
    ));

    // Second failure on the first input, then success.
    assert!(flows.input("in", payload_message()).await.is_err());
    flows.input("in", payload_message()).await?;
    assert_eq!(broker.connects(), 3);

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_consumer_emits_script_result() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    let mut events = flows.subscribe().await?;
    flows.deploy(consumer_flow("return msg")?).await?;

    assert!(wait_for_processing(&broker, "q1").await);
    let queue = broker.queue("q1").ok_or("queue not opened")?;
    let done = queue
        .deliver(Job::new(payload_message(), "enqueue", "work"))
        .ok_or("no handler")?;
    assert_eq!(tokio::time::timeout(WAIT, done).await??, Ok(()));

    let output = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Output { .. }))
        .await;
    let Some(NodeEvent::Output { node, batch, .. }) = output else {
        panic!("expected output, got {:?}", output);
    };
    assert_eq!(node, "out");
    assert_eq!(batch.message_count(), 1);
    assert_eq!(batch.messages().next(), Some(&payload_message()));

    let metric = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Metric { .. }))
        .await;
    assert!(matches!(metric, Some(NodeEvent::Metric { metric, .. }) if metric.label == "worker"));

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_consumer_reports_reference_error() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    let mut events = flows.subscribe().await?;
    flows.deploy(consumer_flow("return x")?).await?;

    assert!(wait_for_processing(&broker, "q1").await);
    let queue = broker.queue("q1").ok_or("queue not opened")?;
    let done = queue
        .deliver(Job::new(payload_message(), "enqueue", "work"))
        .ok_or("no handler")?;
    let outcome = tokio::time::timeout(WAIT, done).await??;
    assert!(outcome.is_err());

    let error = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Error { .. }))
        .await;
    let Some(NodeEvent::Error {
        message, context, ..
    }) = error
    else {
        panic!("expected error, got {:?}", error);
    };
    assert!(message.starts_with("ReferenceError: x is not defined"));
    assert_eq!(context, "worker");

    let remaining = common::drain(&mut events);
    assert!(!remaining.iter().any(|e| matches!(e, NodeEvent::Output { .. })));

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_producer_and_consumer_share_one_connection() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    flows
        .deploy(flow(json!({
            "endpoints": [{"id": "cfg-q1", "name": "q1", "port": 6379}],
            "producers": [{"id": "in", "queue": "cfg-q1"}],
            "consumers": [{"id": "out", "queue": "cfg-q1", "func": "return msg"}]
        }))?)
        .await?;

    assert!(wait_for_processing(&broker, "q1").await);
    flows.input("in", payload_message()).await?;
    assert_eq!(broker.connects(), 1);
    assert_eq!(flows.nodes().await?, vec!["in", "out"]);

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_dangling_queue_reference_leaves_node_inert() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(flow(json!({
            "consumers": [{"id": "out", "name": "worker", "queue": "missing", "func": "return msg"}]
        }))?)
        .await?;

    let error = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Error { .. }))
        .await;
    assert!(matches!(
        error,
        Some(NodeEvent::Error { message, .. }) if message == "No queue endpoint configured"
    ));
    assert_eq!(flows.nodes().await?, vec!["out"]);
    assert_eq!(broker.connects(), 0);

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_compile_error_is_reported_once() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    let mut events = flows.subscribe().await?;
    flows.deploy(consumer_flow("return (")?).await?;

    let error = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Error { .. }))
        .await;
    assert!(matches!(
        error,
        Some(NodeEvent::Error { message, context, .. })
            if message.contains("Failed to compile") && context == "worker"
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.connects(), 0);

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_consumer_loads_script_from_library() -> Result<(), Box<dyn Error>> {
    let library = ScriptLibrary::new(LibraryConfig::memory()).await?;
    library
        .save(&LibraryEntry::new(
            "double",
            "msg.payload = msg.payload * 2\nreturn msg",
        ))
        .await?;

    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared()).with_library(library)).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(flow(json!({
            "endpoints": [{"id": "cfg-q1", "name": "q1", "port": 6379}],
            "consumers": [{"id": "out", "queue": "cfg-q1", "library": "double"}]
        }))?)
        .await?;

    assert!(wait_for_processing(&broker, "q1").await);
    let queue = broker.queue("q1").ok_or("queue not opened")?;
    let done = queue
        .deliver(Job::new(payload_message(), "enqueue", "work"))
        .ok_or("no handler")?;
    tokio::time::timeout(WAIT, done).await??;

    let output = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Output { .. }))
        .await;
    let Some(NodeEvent::Output { batch, .. }) = output else {
        panic!("expected output, got {:?}", output);
    };
    let sent: Vec<_> = batch.messages().collect();
    assert_eq!(sent[0].get("payload"), Some(&json!(14)));

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_global_context_and_function_time() -> Result<(), Box<dyn Error>> {
    let mut settings = RuntimeSettings::default().with_function_time(true);
    settings.global_context.insert("factor".into(), json!(3));

    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared()).with_settings(settings)).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(consumer_flow(
            "msg.payload = msg.payload * context.global.factor\nreturn msg",
        )?)
        .await?;

    assert!(wait_for_processing(&broker, "q1").await);
    let queue = broker.queue("q1").ok_or("queue not opened")?;
    let done = queue
        .deliver(Job::new(payload_message(), "enqueue", "work"))
        .ok_or("no handler")?;
    tokio::time::timeout(WAIT, done).await??;

    let output = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Output { .. }))
        .await;
    let Some(NodeEvent::Output { batch, .. }) = output else {
        panic!("expected output, got {:?}", output);
    };
    assert_eq!(
        batch.messages().next().and_then(|m| m.get("payload")),
        Some(&json!(21))
    );

    let status = common::next_event(&mut events, WAIT, |e| {
        matches!(e, NodeEvent::Status { status, .. } if status.fill == StatusFill::Yellow)
    })
    .await;
    assert!(status.is_some(), "duration status expected");

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_nodes_before_endpoints() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(consumer_flow(
            "node.on('close', function() node.log('bye') end)\nreturn nil",
        )?)
        .await?;

    assert!(wait_for_processing(&broker, "q1").await);
    let queue = broker.queue("q1").ok_or("queue not opened")?;
    let done = queue
        .deliver(Job::new(payload_message(), "enqueue", "work"))
        .ok_or("no handler")?;
    tokio::time::timeout(WAIT, done).await??;
    common::drain(&mut events);

    flows.shutdown().await?;
    assert!(queue.is_closed());

    let events = common::drain(&mut events);
    let bye = events.iter().position(|e| {
        matches!(e, NodeEvent::Log { level: LogLevel::Info, text, .. } if text == "bye")
    });
    let disconnected = events.iter().position(|e| {
        matches!(e, NodeEvent::Endpoint { change: EndpointEvent::Disconnected { .. }, .. })
    });
    assert!(bye.is_some(), "close handler should run");
    assert!(disconnected.is_some(), "endpoint should disconnect");
    assert!(bye < disconnected);
    Ok(())
}

#[tokio::test]
async fn test_deploy_rejects_duplicate_ids() -> Result<(), Box<dyn Error>> {
    let broker = FakeBroker::new();
    let flows = start(SupervisorArgs::new(broker.shared())).await?;
    flows.deploy(consumer_flow("return msg")?).await?;

    assert!(flows.deploy(consumer_flow("return msg")?).await.is_err());
    assert!(flows.input("nope", payload_message()).await.is_err());

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_on_surreal_broker() -> Result<(), Box<dyn Error>> {
    let broker = Arc::new(SurrealBroker::new(
        SurrealConfig::default().with_poll_interval(Duration::from_millis(10)),
    ));
    let flows = start(SupervisorArgs::new(broker)).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(flow(json!({
            "endpoints": [{"id": "cfg-jobs", "name": "jobs", "address": "", "port": 0}],
            "producers": [{"id": "in", "name": "enqueue", "queue": "cfg-jobs", "topic": "work"}],
            "consumers": [{
                "id": "out",
                "name": "worker",
                "queue": "cfg-jobs",
                "func": "msg.topic = job.topic\nreturn msg"
            }]
        }))?)
        .await?;

    flows.input("in", payload_message()).await?;

    let output = common::next_event(&mut events, WAIT, |e| matches!(e, NodeEvent::Output { .. }))
        .await;
    let Some(NodeEvent::Output { node, batch, .. }) = output else {
        panic!("expected output, got {:?}", output);
    };
    assert_eq!(node, "out");
    assert_eq!(batch.correlation_id, "abc");
    let sent = batch.messages().next().ok_or("empty batch")?;
    assert_eq!(sent.get("payload"), Some(&json!(7)));
    assert_eq!(sent.get("topic"), Some(&json!("work")));

    flows.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_with_release_at_zero_returns_pending_jobs() -> Result<(), Box<dyn Error>> {
    let broker = Arc::new(SurrealBroker::new(
        SurrealConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_concurrency(2),
    ));
    let settings =
        RuntimeSettings::default().with_release_policy(ReleasePolicy::DisconnectWhenUnused);
    let flows = start(SupervisorArgs::new(broker.clone()).with_settings(settings)).await?;
    let mut events = flows.subscribe().await?;
    flows
        .deploy(flow(json!({
            "endpoints": [{"id": "cfg-slow", "name": "slow", "address": "", "port": 0}],
            "producers": [{"id": "in", "queue": "cfg-slow"}],
            "consumers": [{
                "id": "out",
                "name": "worker",
                "queue": "cfg-slow",
                "func": "local x = 0\nfor i = 1, 3000000 do x = x + i end\nreturn msg"
            }]
        }))?)
        .await?;

    for _ in 0..5 {
        flows.input("in", payload_message()).await?;
    }

    let started = common::next_event(&mut events, WAIT, |e| {
        matches!(e, NodeEvent::Log { node, text, .. } if node == "out" && text.starts_with("queue.run()"))
    })
    .await;
    assert!(started.is_some(), "consumer never started a job");

    tokio::time::timeout(Duration::from_secs(15), flows.shutdown()).await??;

    // Jobs handed to the stopped consumer go back to waiting.
    let queue = broker
        .open(&QueueEndpoint::new("cfg-slow", "slow", "", 0))
        .await?;
    let settled = common::wait_until(WAIT, || {
        let queue = &queue;
        async move { queue.count(JobStatus::Active).await.unwrap_or(1) == 0 }
    })
    .await;
    assert!(settled, "a job was left active after shutdown");
    Ok(())
}
