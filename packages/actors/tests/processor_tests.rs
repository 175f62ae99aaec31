#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use actors::{EventHost, JobOutcome, JobProcessor, NodeHost};
use common::payload_message;
use jobflow_core::{
    DURATION_METRIC, DoneCallback, Job, LogLevel, Message, Metric, NodeEvent, NodeStatus,
    OutboundBatch, OutputSlot, StatusFill,
};
use sandbox::SandboxExecutor;
use serde_json::{Map, json};
use tokio::sync::broadcast;

const PAUSE_MILLIS: u64 = 80;

/// Blocks the calling script for `pause` whenever it logs `pause`.
struct PausingHost {
    inner: EventHost,
    pause: Duration,
}

impl NodeHost for PausingHost {
    fn status(&self, node: &str, status: NodeStatus) {
        self.inner.status(node, status);
    }

    fn send(&self, node: &str, batch: OutboundBatch) {
        self.inner.send(node, batch);
    }

    fn metric(&self, node: &str, metric: Metric) {
        self.inner.metric(node, metric);
    }

    fn error(&self, node: &str, message: &str, context: &str) {
        self.inner.error(node, message, context);
    }

    fn log(&self, node: &str, level: LogLevel, text: &str) {
        if text == "pause" {
            std::thread::sleep(self.pause);
        }
        self.inner.log(node, level, text);
    }
}

struct Harness {
    processor: JobProcessor,
    events: broadcast::Receiver<NodeEvent>,
}

fn harness(body: &str, function_time: bool) -> Result<Harness, Box<dyn Error>> {
    let (tx, events) = broadcast::channel(64);
    let host: Arc<dyn NodeHost> = Arc::new(EventHost::new(tx));
    let executor = Arc::new(SandboxExecutor::compile("worker", body, &Map::new())?);
    let processor =
        JobProcessor::new("out", "worker", executor, host).with_function_time(function_time);
    Ok(Harness { processor, events })
}

fn recording_done() -> (DoneCallback, mpsc::Receiver<Result<(), String>>) {
    let (tx, rx) = mpsc::channel();
    let done = DoneCallback::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (done, rx)
}

fn job(message: Message) -> Job {
    Job::new(message, "enqueue", "work")
}

fn outputs(events: &[NodeEvent]) -> Vec<&OutboundBatch> {
    events
        .iter()
        .filter_map(|event| match event {
            NodeEvent::Output { batch, .. } => Some(batch),
            _ => None,
        })
        .collect()
}

fn errors(events: &[NodeEvent]) -> Vec<(&str, &str)> {
    events
        .iter()
        .filter_map(|event| match event {
            NodeEvent::Error {
                message, context, ..
            } => Some((message.as_str(), context.as_str())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_return_msg_emits_tagged_message() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return msg", false)?;
    let (done, outcome) = recording_done();

    let result = h.processor.process(job(payload_message()), done);
    assert!(matches!(result, JobOutcome::Completed { messages: 1, .. }));
    assert_eq!(outcome.try_recv()?, Ok(()));

    let events = common::drain(&mut h.events);
    let sent = outputs(&events);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].correlation_id, "abc");
    assert_eq!(
        sent[0].slots,
        vec![OutputSlot::Single(payload_message())]
    );
    assert!(errors(&events).is_empty());
    Ok(())
}

#[test]
fn test_reference_error_is_reported_with_consumer_name() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return x", false)?;
    let (done, outcome) = recording_done();

    let result = h.processor.process(job(payload_message()), done);
    let JobOutcome::Failed { diagnostic } = result else {
        panic!("expected failure, got {:?}", result);
    };
    assert!(diagnostic.starts_with("ReferenceError: x is not defined"));

    let events = common::drain(&mut h.events);
    assert!(outputs(&events).is_empty());
    let reported = errors(&events);
    assert_eq!(reported.len(), 1);
    assert!(reported[0].0.starts_with("ReferenceError: x is not defined"));
    assert_eq!(reported[0].1, "worker");

    assert!(matches!(outcome.try_recv()?, Err(e) if e == diagnostic));
    Ok(())
}

#[test]
fn test_duration_metric_after_success() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return nil", false)?;

    let result = h.processor.process(job(payload_message()), DoneCallback::noop());
    let JobOutcome::Completed { messages, millis } = result else {
        panic!("expected completion, got {:?}", result);
    };
    assert_eq!(messages, 0);

    let events = common::drain(&mut h.events);
    let metric = events
        .iter()
        .find_map(|event| match event {
            NodeEvent::Metric { metric, .. } => Some(metric.clone()),
            _ => None,
        })
        .expect("duration metric");
    assert_eq!(metric.name, DURATION_METRIC);
    assert_eq!(metric.label, "worker");
    assert_eq!(metric.value, millis);
    assert!(metric.value >= 0.0 && metric.value < 1000.0);

    // No duration status unless enabled.
    assert!(!events.iter().any(|e| matches!(e, NodeEvent::Status { .. })));
    Ok(())
}

#[test]
fn test_function_time_sets_duration_status() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return msg", true)?;

    h.processor.process(job(payload_message()), DoneCallback::noop());

    let events = common::drain(&mut h.events);
    let status = events
        .iter()
        .find_map(|event| match event {
            NodeEvent::Status { status, .. } => Some(status.clone()),
            _ => None,
        })
        .expect("duration status");
    assert_eq!(status.fill, StatusFill::Yellow);
    assert!(status.text.parse::<f64>().is_ok());
    Ok(())
}

#[test]
fn test_positional_results_keep_empty_slots() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return { {a = 1}, null, {b = 2} }", false)?;

    let result = h.processor.process(job(payload_message()), DoneCallback::noop());
    assert!(matches!(result, JobOutcome::Completed { messages: 2, .. }));

    let events = common::drain(&mut h.events);
    let sent = outputs(&events);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].slots.len(), 3);
    assert_eq!(sent[0].slots[1], OutputSlot::Empty);
    assert!(sent[0].messages().all(|m| m.correlation_id() == Some("abc")));
    Ok(())
}

#[test]
fn test_missing_correlation_id_is_minted() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return msg", false)?;
    let message = Message::from_value(json!({"payload": 1})).unwrap_or_default();

    h.processor.process(job(message), DoneCallback::noop());

    let events = common::drain(&mut h.events);
    let sent = outputs(&events);
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].correlation_id.is_empty());
    assert!(sent[0].messages().all(|m| m.correlation_id() == Some(&*sent[0].correlation_id)));
    Ok(())
}

#[test]
fn test_explicit_sends_survive_later_failure() -> Result<(), Box<dyn Error>> {
    let mut h = harness("node.send({early = true})\nerror('boom')", false)?;

    let result = h.processor.process(job(payload_message()), DoneCallback::noop());
    assert!(matches!(result, JobOutcome::Failed { .. }));

    let events = common::drain(&mut h.events);
    let sent = outputs(&events);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].slots[0].messages()[0].get("early"), Some(&json!(true)));
    assert_eq!(errors(&events).len(), 1);
    Ok(())
}

#[test]
fn test_script_done_wins_over_auto_completion() -> Result<(), Box<dyn Error>> {
    let h = harness("done('bad input')\nreturn msg", false)?;
    let (done, outcome) = recording_done();

    let result = h.processor.process(job(payload_message()), done);
    assert!(matches!(result, JobOutcome::Completed { .. }));
    assert_eq!(outcome.try_recv()?, Err("bad input".to_string()));
    assert!(outcome.try_recv().is_err());
    Ok(())
}

#[test]
fn test_non_message_result_sends_nothing_and_completes() -> Result<(), Box<dyn Error>> {
    for body in ["return 'hello'", "return 5", "return {msg, 'text'}"] {
        let mut h = harness(body, false)?;
        let (done, outcome) = recording_done();

        let result = h.processor.process(job(payload_message()), done);
        assert!(
            matches!(result, JobOutcome::Completed { .. }),
            "{}: {:?}",
            body,
            result
        );
        assert_eq!(outcome.try_recv()?, Ok(()));

        let events = common::drain(&mut h.events);
        assert!(errors(&events).is_empty(), "{}", body);
        assert!(events.iter().any(|e| matches!(e, NodeEvent::Metric { .. })));
    }
    Ok(())
}

#[test]
fn test_non_message_slot_is_left_empty() -> Result<(), Box<dyn Error>> {
    let mut h = harness("return {msg, 'text'}", false)?;

    let result = h.processor.process(job(payload_message()), DoneCallback::noop());
    assert!(matches!(result, JobOutcome::Completed { messages: 1, .. }));

    let events = common::drain(&mut h.events);
    let sent = outputs(&events);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].slots.len(), 2);
    assert_eq!(sent[0].slots[1], OutputSlot::Empty);
    Ok(())
}

#[test]
fn test_duration_metric_tracks_blocking_time() -> Result<(), Box<dyn Error>> {
    let (tx, mut events) = broadcast::channel(64);
    let host: Arc<dyn NodeHost> = Arc::new(PausingHost {
        inner: EventHost::new(tx),
        pause: Duration::from_millis(PAUSE_MILLIS),
    });
    let executor = Arc::new(SandboxExecutor::compile(
        "worker",
        "node.log('pause')\nreturn msg",
        &Map::new(),
    )?);
    let processor = JobProcessor::new("out", "worker", executor, host);

    let result = processor.process(job(payload_message()), DoneCallback::noop());
    let JobOutcome::Completed { millis, .. } = result else {
        panic!("expected completion, got {:?}", result);
    };

    let metric = common::drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            NodeEvent::Metric { metric, .. } => Some(metric),
            _ => None,
        })
        .expect("duration metric");
    assert_eq!(metric.value, millis);
    let expected = PAUSE_MILLIS as f64;
    assert!(
        metric.value >= expected && metric.value < expected + 250.0,
        "duration {} outside [{}, {})",
        metric.value,
        expected,
        expected + 250.0
    );
    Ok(())
}
