mod common;

use common::{order_names, Harness};
use pincore::{
    ErrorKind, ExecutionEvent, FlowError, NodeEvent, NodeId, NodeRunState, RunStatus, StreamEvent,
    Value,
};
use pinruntime::{Request, RuntimeConfig};
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test]
async fn test_failure_branch_skips_success_side() {
    let h = Harness::new();
    let flow = h.flow("branching").await;

    let start = h.node(flow, "test.start", "Start").await;
    let branch = h.node(flow, "test.branch", "branch").await;
    let ok_first = h.node(flow, "test.pass", "ok_first").await;
    let ok_second = h.node(flow, "test.pass", "ok_second").await;
    let handler = h.node(flow, "test.pass", "handler").await;
    h.set(branch, "fail", true).await;
    h.control(start, "exec_out", branch).await;
    h.control(branch, "success", ok_first).await;
    h.control(ok_first, "exec_out", ok_second).await;
    h.control(branch, "failure", handler).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.state_of(ok_first), NodeRunState::Skipped);
    assert_eq!(report.state_of(ok_second), NodeRunState::Skipped);
    assert_eq!(report.state_of(handler), NodeRunState::Succeeded);
    assert_eq!(h.log.count("ok_first"), 0);
    assert_eq!(h.log.count("ok_second"), 0);
    assert_eq!(
        report.node(branch).and_then(|n| n.fired_port.as_deref()),
        Some("failure")
    );
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_node_reachable_from_both_branches_still_runs() {
    let h = Harness::new();
    let flow = h.flow("rejoin").await;

    let start = h.node(flow, "test.start", "Start").await;
    let branch = h.node(flow, "test.branch", "branch").await;
    let ok = h.node(flow, "test.pass", "ok").await;
    let recover = h.node(flow, "test.pass", "recover").await;
    let merge = h.node(flow, "test.pass", "merge").await;
    h.control(start, "exec_out", branch).await;
    h.control(branch, "success", ok).await;
    h.control(branch, "failure", recover).await;
    h.control(ok, "exec_out", merge).await;
    h.control(recover, "exec_out", merge).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.state_of(ok), NodeRunState::Succeeded);
    assert_eq!(report.state_of(recover), NodeRunState::Skipped);
    assert_eq!(report.state_of(merge), NodeRunState::Succeeded);
    assert_eq!(h.log.count("merge"), 1);
}

#[tokio::test]
async fn test_first_arrival_runs_node_once() {
    let h = Harness::new();
    let flow = h.flow("first-arrival").await;

    let start = h.node(flow, "test.start", "Start").await;
    let left = h.node(flow, "test.pass", "left").await;
    let right = h.node(flow, "test.pass", "right").await;
    let target = h.node(flow, "test.pass", "target").await;
    h.control(start, "exec_out", left).await;
    h.control(start, "exec_out", right).await;
    h.control(left, "exec_out", target).await;
    h.control(right, "exec_out", target).await;

    let report = h.run_flow(flow).await.unwrap();
    assert_eq!(order_names(&report), vec!["Start", "left", "right", "target"]);
    assert_eq!(h.log.count("target"), 1);
}

#[tokio::test]
async fn test_unhandled_failure_reports_partial_completion() {
    let h = Harness::new();
    let flow = h.flow("unhandled").await;

    let start = h.node(flow, "test.start", "Start").await;
    let fail = h.node(flow, "test.fail", "fail").await;
    let after = h.node(flow, "test.pass", "after").await;
    h.control(start, "exec_out", fail).await;
    h.control(fail, "exec_out", after).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    assert_eq!(report.state_of(fail), NodeRunState::Failed);
    assert_eq!(report.state_of(after), NodeRunState::Skipped);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].node_id, fail);
    assert_eq!(report.failures[0].kind, ErrorKind::ComputationFailed);
    assert_eq!(h.log.count("after"), 0);
}

#[tokio::test]
async fn test_failure_port_absorbs_failure() {
    let h = Harness::new();
    let flow = h.flow("guarded").await;

    let start = h.node(flow, "test.start", "Start").await;
    let guarded = h.node(flow, "test.guarded", "guarded").await;
    let happy = h.node(flow, "test.pass", "happy").await;
    let cleanup = h.node(flow, "test.pass", "cleanup").await;
    h.control(start, "exec_out", guarded).await;
    h.control(guarded, "exec_out", happy).await;
    h.control(guarded, "failure", cleanup).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.failures.is_empty());
    assert_eq!(report.state_of(guarded), NodeRunState::Failed);
    assert_eq!(report.state_of(happy), NodeRunState::Skipped);
    assert_eq!(report.state_of(cleanup), NodeRunState::Succeeded);
    let failure = report.node(guarded).and_then(|n| n.failure.clone()).unwrap();
    assert_eq!(failure.kind, ErrorKind::ComputationFailed);
}

#[tokio::test]
async fn test_panicking_node_fails_without_ending_request() {
    let h = Harness::new();
    let flow = h.flow("panic").await;

    let start = h.node(flow, "test.start", "Start").await;
    let faulty = h.node(flow, "test.panic", "faulty").await;
    let sibling = h.node(flow, "test.sleep", "sibling").await;
    let after = h.node(flow, "test.pass", "after").await;
    h.control(start, "exec_out", faulty).await;
    h.control(start, "exec_out", sibling).await;
    h.control(faulty, "exec_out", after).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    assert_eq!(report.state_of(faulty), NodeRunState::Failed);
    assert_eq!(report.state_of(sibling), NodeRunState::Succeeded);
    assert_eq!(report.state_of(after), NodeRunState::Skipped);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::ComputationFailed);
    assert!(report.failures[0].message.contains("node blew up"));
}

#[tokio::test]
async fn test_panic_fires_failure_port() {
    let h = Harness::new();
    let flow = h.flow("guarded-panic").await;

    let start = h.node(flow, "test.start", "Start").await;
    let faulty = h.node(flow, "test.guarded_panic", "faulty").await;
    let cleanup = h.node(flow, "test.pass", "cleanup").await;
    h.control(start, "exec_out", faulty).await;
    h.control(faulty, "failure", cleanup).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.state_of(faulty), NodeRunState::Failed);
    assert_eq!(report.state_of(cleanup), NodeRunState::Succeeded);
    let failure = report.node(faulty).and_then(|n| n.failure.clone()).unwrap();
    assert!(failure.message.contains("panicked"));
}

#[tokio::test]
async fn test_validation_hook_failure_skips_computation() {
    let h = Harness::new();
    let flow = h.flow("reject").await;

    let start = h.node(flow, "test.start", "Start").await;
    let reject = h.node(flow, "test.reject", "reject").await;
    h.control(start, "exec_out", reject).await;

    let mut events = h.runtime.subscribe_events();
    let report = h.run_flow(flow).await.unwrap();
    let node = report.node(reject).unwrap();
    let failure = node.failure.clone().unwrap();

    assert_eq!(failure.kind, ErrorKind::ValidationFailed);
    assert_eq!(node.state, NodeRunState::Failed);
    assert_eq!(node.runs, 0);
    assert!(!report.order.contains(&reject));
    assert_eq!(h.log.count("reject"), 0);
    assert_eq!(report.status, RunStatus::PartiallyCompleted);

    let started = lifecycle(drain(&mut events))
        .into_iter()
        .any(|(id, started)| id == reject && started);
    assert!(!started);
}

#[tokio::test]
async fn test_undeclared_branch_is_computation_failure() {
    let h = Harness::new();
    let flow = h.flow("bad-branch").await;

    let start = h.node(flow, "test.start", "Start").await;
    let bad = h.node(flow, "test.bad_branch", "bad").await;
    h.control(start, "exec_out", bad).await;

    let report = h.run_flow(flow).await.unwrap();
    assert_eq!(report.state_of(bad), NodeRunState::Failed);
    assert_eq!(report.failures[0].kind, ErrorKind::ComputationFailed);
}

#[tokio::test]
async fn test_failed_injected_dependency_skips_dependent() {
    let h = Harness::new();
    let flow = h.flow("injected-failure").await;

    let start = h.node(flow, "test.start", "Start").await;
    let slow = h
        .node_with_timeout(flow, "test.sleep", "slow", Some(20))
        .await;
    let consumer = h.node(flow, "test.echo", "consumer").await;
    h.set(slow, "ms", 500.0).await;
    h.set(slow, "in", "payload").await;
    h.control(start, "exec_out", consumer).await;
    h.data(slow, "out", consumer, "in").await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.state_of(slow), NodeRunState::Failed);
    assert_eq!(report.state_of(consumer), NodeRunState::Skipped);
    assert_eq!(h.log.count("consumer"), 0);
    assert_eq!(report.failures[0].kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_run_node_failure_names_failing_node() {
    let h = Harness::new();
    let flow = h.flow("run-node-failure").await;

    let slow = h
        .node_with_timeout(flow, "test.sleep", "slow", Some(20))
        .await;
    let consumer = h.node(flow, "test.echo", "consumer").await;
    h.set(slow, "ms", 500.0).await;
    h.data(slow, "out", consumer, "in").await;

    let err = h.run_node(consumer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    match err {
        FlowError::NodeFailed { node_id, node, .. } => {
            assert_eq!(node_id, slow);
            assert_eq!(node, "slow");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.log.count("consumer"), 0);
}

#[tokio::test]
async fn test_timeout_fires_failure_port() {
    let h = Harness::new();
    let flow = h.flow("timeout").await;

    let start = h.node(flow, "test.start", "Start").await;
    let slow = h
        .node_with_timeout(flow, "test.guarded_sleep", "slow", Some(20))
        .await;
    let fallback = h.node(flow, "test.pass", "fallback").await;
    h.set(slow, "ms", 500.0).await;
    h.control(start, "exec_out", slow).await;
    h.control(slow, "timed_out", fallback).await;

    let report = h.run_flow(flow).await.unwrap();

    let failure = report.node(slow).and_then(|n| n.failure.clone()).unwrap();
    assert_eq!(failure.kind, ErrorKind::Timeout);
    assert_eq!(report.state_of(fallback), NodeRunState::Succeeded);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_default_timeout_from_config() {
    let h = Harness::with_config(RuntimeConfig {
        default_node_timeout_ms: Some(20),
        ..RuntimeConfig::default()
    });
    let flow = h.flow("default-timeout").await;

    let slow = h.node(flow, "test.sleep", "slow").await;
    let quick = h
        .node_with_timeout(flow, "test.sleep", "quick", Some(2000))
        .await;
    h.set(slow, "ms", 500.0).await;
    h.set(quick, "ms", 50.0).await;

    let err = h.run_node(slow).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let report = h.run_node(quick).await.unwrap();
    assert_eq!(report.output(quick, "done"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_loop_runs_body_until_loop_end_falls_through() {
    let h = Harness::new();
    let flow = h.flow("loop").await;

    let start = h.node(flow, "test.start", "Start").await;
    let head = h.node(flow, "test.loop_start", "head").await;
    let body = h.node(flow, "test.pass", "body").await;
    let tail = h.node(flow, "test.loop_end", "tail").await;
    let after = h.node(flow, "test.pass", "after").await;
    h.set(tail, "count", 3.0).await;
    h.send(Request::PairLoop { start: head, end: tail })
        .await
        .unwrap();
    h.control(start, "exec_out", head).await;
    h.control(head, "exec_out", body).await;
    h.control(body, "exec_out", tail).await;
    h.control(tail, "continue", head).await;
    h.control(tail, "exec_out", after).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(h.log.count("head"), 3);
    assert_eq!(h.log.count("body"), 3);
    assert_eq!(h.log.count("tail"), 3);
    assert_eq!(h.log.count("after"), 1);
    assert_eq!(report.node(body).map(|n| n.runs), Some(3));
    assert_eq!(report.output(head, "index"), Some(&Value::Number(2.0)));
    assert_eq!(report.state_of(after), NodeRunState::Succeeded);
    assert_eq!(report.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_loop_reruns_injected_dependencies_each_pass() {
    let h = Harness::new();
    let flow = h.flow("loop-data").await;

    let start = h.node(flow, "test.start", "Start").await;
    let head = h.node(flow, "test.loop_start", "head").await;
    let producer = h.node(flow, "test.emit", "producer").await;
    let body = h.node(flow, "test.join", "body").await;
    let tail = h.node(flow, "test.loop_end", "tail").await;
    h.set(tail, "count", 2.0).await;
    h.send(Request::PairLoop { start: head, end: tail })
        .await
        .unwrap();
    h.control(start, "exec_out", head).await;
    h.control(head, "exec_out", body).await;
    h.control(body, "exec_out", tail).await;
    h.control(tail, "continue", head).await;
    h.data(producer, "out", body, "a").await;
    h.data(head, "index", body, "b").await;

    h.run_flow(flow).await.unwrap();

    assert_eq!(h.log.count("producer"), 2);
    assert_eq!(h.log.count("body"), 2);
}

#[tokio::test]
async fn test_loop_iteration_cap_fails_loop_end() {
    let h = Harness::with_config(RuntimeConfig {
        max_loop_iterations: 5,
        ..RuntimeConfig::default()
    });
    let flow = h.flow("runaway").await;

    let start = h.node(flow, "test.start", "Start").await;
    let head = h.node(flow, "test.loop_start", "head").await;
    let body = h.node(flow, "test.pass", "body").await;
    let tail = h.node(flow, "test.loop_end", "tail").await;
    let after = h.node(flow, "test.pass", "after").await;
    h.set(tail, "count", 100.0).await;
    h.send(Request::PairLoop { start: head, end: tail })
        .await
        .unwrap();
    h.control(start, "exec_out", head).await;
    h.control(head, "exec_out", body).await;
    h.control(body, "exec_out", tail).await;
    h.control(tail, "continue", head).await;
    h.control(tail, "exec_out", after).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(h.log.count("body"), 5);
    assert_eq!(report.state_of(tail), NodeRunState::Failed);
    assert_eq!(report.state_of(after), NodeRunState::Skipped);
    assert_eq!(report.status, RunStatus::PartiallyCompleted);
    assert_eq!(report.failures[0].kind, ErrorKind::ComputationFailed);
}

#[tokio::test]
async fn test_loop_end_waits_for_every_body_chain() {
    let h = Harness::new();
    let flow = h.flow("loop-chains").await;

    let start = h.node(flow, "test.start", "Start").await;
    let head = h.node(flow, "test.loop_start", "head").await;
    let short = h.node(flow, "test.pass", "short").await;
    let first = h.node(flow, "test.pass", "first").await;
    let second = h.node(flow, "test.pass", "second").await;
    let tail = h.node(flow, "test.loop_end", "tail").await;
    h.set(tail, "count", 2.0).await;
    h.send(Request::PairLoop { start: head, end: tail })
        .await
        .unwrap();
    h.control(start, "exec_out", head).await;
    h.control(head, "exec_out", short).await;
    h.control(head, "exec_out", first).await;
    h.control(short, "exec_out", tail).await;
    h.control(first, "exec_out", second).await;
    h.control(tail, "continue", head).await;

    let report = h.run_flow(flow).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(h.log.count("second"), 2);
    assert_eq!(h.log.count("tail"), 2);
    assert_eq!(report.node(second).map(|n| n.runs), Some(2));

    let passes: Vec<String> = order_names(&report)
        .into_iter()
        .filter(|name| name == "second" || name == "tail" || name == "head")
        .collect();
    assert_eq!(
        passes,
        vec!["head", "second", "tail", "head", "second", "tail"]
    );
}

#[tokio::test]
async fn test_streamed_partials_end_with_done() {
    let h = Harness::new();
    let flow = h.flow("stream").await;

    let stream = h.node(flow, "test.stream", "stream").await;
    h.set(stream, "text", "alpha beta gamma").await;

    let mut events = h.runtime.subscribe_events();
    let report = h.run_node(stream).await.unwrap();

    let partials = &report.node(stream).unwrap().partials;
    let words: Vec<Value> = partials
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Partial { port, value } if port == "word" => Some(value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        words,
        vec![Value::from("alpha"), Value::from("beta"), Value::from("gamma")]
    );
    assert_eq!(partials.last(), Some(&StreamEvent::Done));
    assert_eq!(report.output(stream, "text"), Some(&Value::from("alpha beta gamma")));

    let streamed: Vec<NodeEvent> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeEvent { event, .. } => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(streamed.len(), 4);
    assert!(matches!(streamed.last(), Some(NodeEvent::StreamDone)));
}

#[tokio::test]
async fn test_independent_producers_run_concurrently() {
    let h = Harness::new();
    let flow = h.flow("parallel").await;

    let left = h.node(flow, "test.sleep", "left").await;
    let right = h.node(flow, "test.sleep", "right").await;
    let join = h.node(flow, "test.join", "join").await;
    h.set(left, "in", "l").await;
    h.set(right, "in", "r").await;
    h.data(left, "out", join, "a").await;
    h.data(right, "out", join, "b").await;

    let mut events = h.runtime.subscribe_events();
    let report = h.run_node(join).await.unwrap();
    assert_eq!(report.output(join, "out"), Some(&Value::from("l+r")));

    let timeline = lifecycle(drain(&mut events));
    let first_completion = timeline.iter().position(|(_, started)| !started).unwrap();
    let started_before: Vec<NodeId> = timeline[..first_completion]
        .iter()
        .map(|(id, _)| *id)
        .collect();
    assert!(started_before.contains(&left));
    assert!(started_before.contains(&right));
}

#[tokio::test]
async fn test_parallelism_bound_serializes_nodes() {
    let h = Harness::with_config(RuntimeConfig {
        max_parallel_nodes: 1,
        ..RuntimeConfig::default()
    });
    let flow = h.flow("serial").await;

    let left = h.node(flow, "test.sleep", "left").await;
    let right = h.node(flow, "test.sleep", "right").await;
    let join = h.node(flow, "test.join", "join").await;
    h.data(left, "done", join, "a").await;
    h.data(right, "done", join, "b").await;

    let mut events = h.runtime.subscribe_events();
    h.run_node(join).await.unwrap();

    // every start is followed by its own completion before the next start
    let timeline = lifecycle(drain(&mut events));
    assert_eq!(timeline.len(), 6);
    for pair in timeline.chunks(2) {
        assert_eq!(pair[0].0, pair[1].0);
        assert!(pair[0].1);
        assert!(!pair[1].1);
    }
}

/// (node, true for started / false for completed) in emission order
fn lifecycle(events: Vec<ExecutionEvent>) -> Vec<(NodeId, bool)> {
    events
        .into_iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeStarted { node_id, .. } => Some((node_id, true)),
            ExecutionEvent::NodeCompleted { node_id, .. } => Some((node_id, false)),
            _ => None,
        })
        .collect()
}
