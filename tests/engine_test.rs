use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::oneshot;

use spindle::config::global::GlobalConfig;
use spindle::config::KeyPath;
use spindle::dsl::builder::WorkflowDefBuilder;
use spindle::dsl::WorkflowDef;
use spindle::runtime::command::{
    Command, TaskSelector, TriggerOutcome, TriggerRequest, parse_setting,
};
use spindle::runtime::engine::{GraphEvent, RunState, Scheduler};
use spindle::runtime::flow::FlowDirective;
use spindle::runtime::job::LocalJobRunner;
use spindle::runtime::state::TaskState;
use spindle::runtime::task::TaskKey;

fn sample_def() -> WorkflowDef {
    WorkflowDefBuilder::new("engine-test")
        .graph("foo => bar")
        .task("foo")
            .cfg("script", "echo foo")
            .build()
        .task("bar")
            .cfg("script", "echo bar")
            .build()
        .build()
}

fn new_scheduler(def: WorkflowDef) -> Scheduler {
    Scheduler::new(
        PathBuf::from("engine-test.yaml"),
        def,
        GlobalConfig::defaults(),
        Box::new(LocalJobRunner::new()),
    )
}

fn state_of(scheduler: &Scheduler, key: &TaskKey) -> TaskState {
    scheduler
        .pool()
        .get(key)
        .map(|task| task.state())
        .expect("task not in pool")
}

fn ready(point: i64, name: &str) -> GraphEvent {
    GraphEvent::Ready {
        point,
        name: name.to_string(),
    }
}

#[tokio::test]
async fn test_task_runs_to_success() {
    let mut scheduler = new_scheduler(sample_def());
    let graph = scheduler.graph_events();
    let mut events = scheduler.events();
    let foo = TaskKey::new(1, "foo");

    // 1. Prerequisites satisfied, then tick until the job finishes.
    graph.send(ready(1, "foo")).expect("graph channel closed");
    for _ in 0..6 {
        scheduler.tick().await;
    }

    // 2. The instance was pruned; its final state survives in the summary.
    assert!(scheduler.pool().get(&foo).is_none(), "foo should be pruned");
    let summary = scheduler
        .summaries()
        .get("1/foo")
        .map(|s| s.value().clone())
        .expect("no summary for 1/foo");
    assert_eq!(summary.state, TaskState::Succeeded);
    assert_eq!(summary.submit_num, 1);

    // 3. The event bus saw every hop of the lifecycle, in order.
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.to);
    }
    assert_eq!(
        seen,
        vec![
            TaskState::Queued,
            TaskState::Preparing,
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Succeeded,
        ]
    );
}

#[tokio::test]
async fn test_trigger_command_creates_future_task() {
    let mut scheduler = new_scheduler(sample_def());
    let commands = scheduler.commands();
    assert_eq!(scheduler.flows().counter(), 1, "original flow only");

    // 1. Trigger a task ahead of the active window, in a new flow.
    let selector = TaskSelector::parse("3/foo").expect("selector parses");
    let req = TriggerRequest::new(vec![selector], FlowDirective::New);
    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::Trigger { req, reply: tx })
        .await
        .expect("command channel closed");
    scheduler.tick().await;

    let outcomes = rx.await.expect("trigger not answered");
    assert_eq!(
        outcomes,
        vec![("3/foo".to_string(), TriggerOutcome::Triggered)]
    );

    // 2. The task exists, already admitted, in the freshly minted flow.
    let key = TaskKey::new(3, "foo");
    assert_eq!(state_of(&scheduler, &key), TaskState::Preparing);
    let task = scheduler.pool().get(&key).expect("task in pool");
    assert_eq!(task.flows.iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(scheduler.flows().counter(), 2);
    assert_eq!(scheduler.flows().description(2), Some("manual trigger"));
}

#[tokio::test]
async fn test_broadcast_command_replies_with_report() {
    let mut scheduler = new_scheduler(sample_def());
    let commands = scheduler.commands();

    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::BroadcastSet {
            points: vec!["1".to_string()],
            namespaces: vec!["foo".to_string()],
            settings: vec![parse_setting("[env]X=1").expect("setting parses")],
            reply: tx,
        })
        .await
        .expect("command channel closed");
    scheduler.tick().await;

    let reply = rx.await.expect("broadcast not answered");
    assert!(reply.success);
    assert_eq!(reply.report, "Broadcast set:\n+ [1/foo] [env]X=1");

    // The override resolves into the task's effective config.
    let cfg = scheduler
        .broadcasts()
        .resolve(scheduler.def(), &TaskKey::new(1, "foo"))
        .expect("resolves");
    let x = cfg.lookup(&KeyPath::of(&["env", "X"])).map(|v| v.to_string());
    assert_eq!(x.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_broadcast_rejection_replies_with_failure() {
    let mut scheduler = new_scheduler(sample_def());
    let commands = scheduler.commands();

    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::BroadcastSet {
            points: vec!["1".to_string()],
            namespaces: vec!["foo".to_string()],
            settings: vec![parse_setting("nonsense=1").expect("setting parses")],
            reply: tx,
        })
        .await
        .expect("command channel closed");
    scheduler.tick().await;

    let reply = rx.await.expect("broadcast not answered");
    assert!(!reply.success);
    assert!(
        reply
            .report
            .starts_with("Rejected broadcast: settings are not compatible with the workflow"),
        "unexpected report: {}",
        reply.report
    );
    assert!(scheduler.broadcasts().is_empty());
}

#[tokio::test]
async fn test_pause_blocks_admission_until_resume() {
    let mut scheduler = new_scheduler(sample_def());
    let commands = scheduler.commands();
    let graph = scheduler.graph_events();
    let foo = TaskKey::new(1, "foo");

    // 1. Pause, then satisfy prerequisites: the task queues but stays put.
    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::Pause { reply: tx })
        .await
        .expect("command channel closed");
    scheduler.tick().await;
    rx.await.expect("pause not answered");

    graph.send(ready(1, "foo")).expect("graph channel closed");
    scheduler.tick().await;
    assert_eq!(state_of(&scheduler, &foo), TaskState::Queued);
    assert_eq!(
        scheduler.run_state(),
        &RunState::Paused {
            reason: String::new()
        }
    );

    // 2. Resume releases the queue on the same tick.
    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::Resume { reply: tx })
        .await
        .expect("command channel closed");
    scheduler.tick().await;
    rx.await.expect("resume not answered");
    assert_eq!(state_of(&scheduler, &foo), TaskState::Preparing);
    assert_eq!(scheduler.run_state(), &RunState::Running);
}

#[tokio::test]
async fn test_trigger_while_paused_submits_unless_on_resume() {
    let mut scheduler = new_scheduler(sample_def());
    let commands = scheduler.commands();
    let graph = scheduler.graph_events();
    let foo = TaskKey::new(1, "foo");
    let bar = TaskKey::new(1, "bar");

    // 1. Pause with both tasks queued.
    let (tx, _rx) = oneshot::channel();
    commands
        .send(Command::Pause { reply: tx })
        .await
        .expect("command channel closed");
    graph.send(ready(1, "foo")).expect("graph channel closed");
    graph.send(ready(1, "bar")).expect("graph channel closed");
    scheduler.tick().await;
    assert_eq!(state_of(&scheduler, &foo), TaskState::Queued);
    assert_eq!(state_of(&scheduler, &bar), TaskState::Queued);

    // 2. Triggering foo with on_resume parks it; bar without goes out now.
    let mut req = TriggerRequest::new(
        vec![TaskSelector::parse("1/foo").expect("selector parses")],
        FlowDirective::Default,
    );
    req.on_resume = true;
    let (tx, rx_foo) = oneshot::channel();
    commands
        .send(Command::Trigger { req, reply: tx })
        .await
        .expect("command channel closed");
    let req = TriggerRequest::new(
        vec![TaskSelector::parse("1/bar").expect("selector parses")],
        FlowDirective::Default,
    );
    let (tx, rx_bar) = oneshot::channel();
    commands
        .send(Command::Trigger { req, reply: tx })
        .await
        .expect("command channel closed");
    scheduler.tick().await;

    let foo_outcomes = rx_foo.await.expect("trigger not answered");
    let bar_outcomes = rx_bar.await.expect("trigger not answered");
    assert_eq!(foo_outcomes[0].1, TriggerOutcome::Triggered);
    assert_eq!(bar_outcomes[0].1, TriggerOutcome::Triggered);
    assert_eq!(
        state_of(&scheduler, &foo),
        TaskState::Queued,
        "on_resume trigger must wait for the resume"
    );
    assert_eq!(
        state_of(&scheduler, &bar),
        TaskState::Submitted,
        "a plain trigger while paused submits immediately"
    );

    // 3. Resume lets the parked task through the queue.
    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::Resume { reply: tx })
        .await
        .expect("command channel closed");
    scheduler.tick().await;
    rx.await.expect("resume not answered");
    assert_eq!(state_of(&scheduler, &foo), TaskState::Preparing);
}

#[tokio::test]
async fn test_expire_event_retires_waiting_task() {
    let mut scheduler = new_scheduler(sample_def());
    let graph = scheduler.graph_events();
    let foo = TaskKey::new(1, "foo");

    graph
        .send(GraphEvent::Expire {
            point: 1,
            name: "foo".to_string(),
        })
        .expect("graph channel closed");
    scheduler.tick().await;
    assert_eq!(state_of(&scheduler, &foo), TaskState::Expired);

    // Expired is terminal: the next tick prunes it.
    scheduler.tick().await;
    assert!(scheduler.pool().get(&foo).is_none());
    let summary = scheduler
        .summaries()
        .get("1/foo")
        .map(|s| s.value().clone())
        .expect("no summary for 1/foo");
    assert_eq!(summary.state, TaskState::Expired);
}

#[tokio::test]
async fn test_spawn_event_adds_task_at_future_point() {
    let mut scheduler = new_scheduler(sample_def());
    let graph = scheduler.graph_events();

    graph
        .send(GraphEvent::Spawn {
            point: 2,
            name: "foo".to_string(),
            flows: vec![1],
        })
        .expect("graph channel closed");
    // Unknown names are dropped, not materialized.
    graph
        .send(GraphEvent::Spawn {
            point: 2,
            name: "ghost".to_string(),
            flows: vec![1],
        })
        .expect("graph channel closed");
    scheduler.tick().await;

    let key = TaskKey::new(2, "foo");
    assert_eq!(state_of(&scheduler, &key), TaskState::Waiting);
    assert!(scheduler.pool().get(&TaskKey::new(2, "ghost")).is_none());
}

#[tokio::test]
async fn test_stop_command_ends_run_loop() {
    let def = sample_def();
    let mut scheduler = new_scheduler(def);
    let commands = scheduler.commands();

    let (tx, rx) = oneshot::channel();
    commands
        .send(Command::Stop { reply: tx })
        .await
        .expect("command channel closed");

    tokio::time::timeout(Duration::from_secs(5), scheduler.run())
        .await
        .expect("scheduler did not stop");
    rx.await.expect("stop not answered");
    assert_eq!(scheduler.run_state(), &RunState::Stopping);
}
