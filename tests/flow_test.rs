use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use spindle::dsl::builder::WorkflowDefBuilder;
use spindle::dsl::WorkflowDef;
use spindle::runtime::command::{TaskSelector, TriggerOutcome, TriggerRequest};
use spindle::runtime::events::EventBus;
use spindle::runtime::flow::{FlowDirective, FlowRegistry};
use spindle::runtime::pool::TaskPool;
use spindle::runtime::task::TaskKey;

fn sample_def() -> WorkflowDef {
    WorkflowDefBuilder::new("flow-test")
        .graph("foo")
        .task("foo").cfg("script", "true").build()
        .build()
}

fn new_pool() -> TaskPool {
    TaskPool::new(EventBus::new(16), Arc::new(DashMap::new()))
}

fn trigger_one(selector: &str, flow: FlowDirective) -> TriggerRequest {
    let sel = TaskSelector::parse(selector).expect("selector should parse");
    TriggerRequest::new(vec![sel], flow)
}

#[test]
fn test_flow_ids_increment() {
    let mut flows = FlowRegistry::new();
    assert_eq!(flows.counter(), 0);
    assert_eq!(flows.new_flow("first"), 1);
    assert_eq!(flows.new_flow("second"), 2);
    assert_eq!(flows.counter(), 2);
    assert_eq!(flows.description(1), Some("first"));
    assert_eq!(flows.description(2), Some("second"));
}

#[test]
fn test_flow_new_twice_mints_two_distinct_flows() {
    let def = sample_def();
    let mut pool = new_pool();
    let mut flows = FlowRegistry::new();

    // 1. First trigger with a new flow.
    let req = trigger_one("1/foo", FlowDirective::New);
    let outcomes = pool.force_trigger(&def, &mut flows, &req, false);
    assert_eq!(outcomes[0].1, TriggerOutcome::Triggered);
    assert_eq!(flows.counter(), 1);

    // 2. A separate call mints a different id.
    let req = trigger_one("2/foo", FlowDirective::New);
    let outcomes = pool.force_trigger(&def, &mut flows, &req, false);
    assert_eq!(outcomes[0].1, TriggerOutcome::Triggered);
    assert_eq!(flows.counter(), 2);

    let first = pool.get(&TaskKey::new(1, "foo")).expect("created");
    let second = pool.get(&TaskKey::new(2, "foo")).expect("created");
    assert_eq!(first.flows, BTreeSet::from([1]));
    assert_eq!(second.flows, BTreeSet::from([2]));
}

#[test]
fn test_one_new_flow_per_trigger_batch() {
    let def = sample_def();
    let mut pool = new_pool();
    let mut flows = FlowRegistry::new();

    // Two selectors in one call share the one minted flow.
    let req = TriggerRequest::new(
        vec![
            TaskSelector::parse("1/foo").expect("parses"),
            TaskSelector::parse("2/foo").expect("parses"),
        ],
        FlowDirective::New,
    );
    pool.force_trigger(&def, &mut flows, &req, false);
    assert_eq!(flows.counter(), 1);
    assert_eq!(
        pool.get(&TaskKey::new(1, "foo")).unwrap().flows,
        pool.get(&TaskKey::new(2, "foo")).unwrap().flows
    );
}

#[test]
fn test_directive_parsing() {
    let to_vec = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };

    assert_eq!(FlowDirective::parse(&[]).expect("empty"), FlowDirective::Default);
    assert_eq!(
        FlowDirective::parse(&to_vec(&["all"])).expect("all"),
        FlowDirective::All
    );
    assert_eq!(
        FlowDirective::parse(&to_vec(&["new"])).expect("new"),
        FlowDirective::New
    );
    assert_eq!(
        FlowDirective::parse(&to_vec(&["none"])).expect("none"),
        FlowDirective::None
    );
    assert_eq!(
        FlowDirective::parse(&to_vec(&["2", "5"])).expect("ids"),
        FlowDirective::Ids(vec![2, 5])
    );

    // Keywords cannot be mixed with ids, ids start at 1.
    assert!(FlowDirective::parse(&to_vec(&["all", "2"])).is_err());
    assert!(FlowDirective::parse(&to_vec(&["0"])).is_err());
    assert!(FlowDirective::parse(&to_vec(&["eleven"])).is_err());
}

#[test]
fn test_flow_all_assigns_every_active_flow() {
    let def = sample_def();
    let mut pool = new_pool();
    let mut flows = FlowRegistry::new();
    flows.new_flow("one");
    flows.new_flow("two");

    pool.insert_waiting(TaskKey::new(1, "foo"), "default".to_string(), BTreeSet::from([1]));
    pool.insert_waiting(TaskKey::new(2, "foo"), "default".to_string(), BTreeSet::from([2]));

    let req = trigger_one("1/foo", FlowDirective::All);
    pool.force_trigger(&def, &mut flows, &req, false);
    assert_eq!(
        pool.get(&TaskKey::new(1, "foo")).unwrap().flows,
        BTreeSet::from([1, 2]),
        "all merges every active flow in"
    );
}

#[test]
fn test_ensure_registers_explicit_id_and_moves_counter() {
    let mut flows = FlowRegistry::new();
    flows.ensure(7, "reused from an earlier run");
    assert_eq!(flows.counter(), 7);
    assert_eq!(flows.description(7), Some("reused from an earlier run"));

    // The next new flow continues past the ensured id.
    assert_eq!(flows.new_flow("next"), 8);
}

#[test]
fn test_prune_drops_unreferenced_metadata_only() {
    let mut flows = FlowRegistry::new();
    flows.new_flow("one");
    flows.new_flow("two");
    flows.new_flow("three");

    flows.prune(&BTreeSet::from([2]));
    assert_eq!(flows.ids(), vec![2]);
    assert_eq!(flows.description(1), None);

    // The counter never rolls back, so ids are not reused.
    assert_eq!(flows.counter(), 3);
    assert_eq!(flows.new_flow("four"), 4);
}
