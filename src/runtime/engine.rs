use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::global::GlobalConfig;
use crate::config::{ConfigValue, KeyPath};
use crate::dsl::WorkflowDef;

use super::broadcast::BroadcastStore;
use super::command::{BroadcastReply, Command};
use super::events::{EventBus, TaskEvent};
use super::flow::{FlowId, FlowRegistry};
use super::job::{JobEvent, JobEventKind, JobRequest, JobRunner};
use super::pool::{RetryPolicy, TaskPool, TaskSummary};
use super::queue::Queues;
use super::reload::{ReloadCoordinator, ReloadResult, RELOAD_PAUSE_REASON};
use super::report;
use super::task::TaskKey;

const COMMAND_QUEUE_DEPTH: usize = 100;

/// Workflow-level run state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused { reason: String },
    Stopping,
}

/// Signals from the graph layer: spawn a task instance, report its
/// prerequisites satisfied, or expire a point it never ran at.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    Spawn {
        point: i64,
        name: String,
        /// Flow membership carried over from the spawning task. Empty
        /// means "whatever is active right now".
        flows: Vec<FlowId>,
    },
    Ready {
        point: i64,
        name: String,
    },
    Expire {
        point: i64,
        name: String,
    },
}

/// The scheduling loop. All runtime mutation happens inside `tick`, one
/// event source at a time, so the pool, store and registry need no locks.
/// External interfaces talk to the loop through the command and graph
/// channels and observe it through the event bus and the summary map.
pub struct Scheduler {
    pub id: Uuid,
    source: PathBuf,
    def: WorkflowDef,
    global: GlobalConfig,
    state: RunState,
    pool: TaskPool,
    flows: FlowRegistry,
    broadcasts: BroadcastStore,
    queues: Queues,
    reload: ReloadCoordinator,
    runner: Box<dyn JobRunner>,
    bus: EventBus,
    summaries: Arc<DashMap<String, TaskSummary>>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
    graph_tx: mpsc::UnboundedSender<GraphEvent>,
    graph_rx: mpsc::UnboundedReceiver<GraphEvent>,
}

impl Scheduler {
    /// Build a scheduler around a loaded definition. Every leaf namespace
    /// is materialized as a waiting task at the initial point, all of them
    /// in the original flow.
    pub fn new(
        source: PathBuf,
        def: WorkflowDef,
        global: GlobalConfig,
        runner: Box<dyn JobRunner>,
    ) -> Self {
        let bus = EventBus::new(global.event_bus_capacity());
        let summaries: Arc<DashMap<String, TaskSummary>> = Arc::new(DashMap::new());
        let mut pool = TaskPool::new(bus.clone(), summaries.clone());
        let mut flows = FlowRegistry::new();

        let first = flows.new_flow(&format!("original flow from {}", def.initial_point));
        for name in def.task_names() {
            pool.insert_waiting(
                TaskKey::new(def.initial_point, &name),
                def.queue_for(&name),
                BTreeSet::from([first]),
            );
        }

        let queues = Queues::from_def(&def);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (graph_tx, graph_rx) = mpsc::unbounded_channel();

        Scheduler {
            id: Uuid::new_v4(),
            source,
            def,
            global,
            state: RunState::Running,
            pool,
            flows,
            broadcasts: BroadcastStore::new(),
            queues,
            reload: ReloadCoordinator::new(),
            runner,
            bus,
            summaries,
            cmd_tx,
            cmd_rx,
            graph_tx,
            graph_rx,
        }
    }

    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.cmd_tx.clone()
    }

    pub fn graph_events(&self) -> mpsc::UnboundedSender<GraphEvent> {
        self.graph_tx.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<TaskEvent> {
        self.bus.subscribe()
    }

    pub fn summaries(&self) -> Arc<DashMap<String, TaskSummary>> {
        self.summaries.clone()
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    pub fn broadcasts(&self) -> &BroadcastStore {
        &self.broadcasts
    }

    pub fn def(&self) -> &WorkflowDef {
        &self.def
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn run_state(&self) -> &RunState {
        &self.state
    }

    /// Tick until stopped.
    pub async fn run(&mut self) {
        info!(workflow = %self.def.name, id = %self.id, "scheduler started");
        let mut ticker = interval(self.global.tick_interval());
        loop {
            ticker.tick().await;
            self.tick().await;
            if self.state == RunState::Stopping {
                break;
            }
        }
        info!(workflow = %self.def.name, "scheduler stopped");
    }

    /// One pass of the loop, in fixed order: housekeeping, graph events,
    /// operator commands, job advancement, queue admission, reload drain.
    pub async fn tick(&mut self) {
        let removed = self.pool.prune_terminal();
        if !removed.is_empty() && !self.pool.is_empty() {
            self.flows.prune(&self.pool.active_flows());
        }
        self.drain_graph_events();
        self.drain_commands();
        self.advance_jobs().await;
        if self.state == RunState::Running {
            self.pool.admit(&self.queues);
        }
        self.poll_reload();
    }

    fn drain_graph_events(&mut self) {
        while let Ok(event) = self.graph_rx.try_recv() {
            match event {
                GraphEvent::Spawn { point, name, flows } => self.spawn_task(point, &name, &flows),
                GraphEvent::Ready { point, name } => {
                    self.pool.set_runnable(&TaskKey::new(point, &name));
                }
                GraphEvent::Expire { point, name } => {
                    let key = TaskKey::new(point, &name);
                    if let Err(e) = self.pool.expire_task(&key) {
                        warn!(task = %key, error = %e, "expiry not applied");
                    }
                }
            }
        }
    }

    fn spawn_task(&mut self, point: i64, name: &str, flows: &[FlowId]) {
        if !self.def.has_namespace(name) || self.def.is_family(name) {
            warn!(point, name, "spawn for unknown task ignored");
            return;
        }
        let mut set: BTreeSet<FlowId> = flows.iter().copied().collect();
        if set.is_empty() {
            set = self.pool.active_flows();
        }
        if set.is_empty() {
            // Nothing live to inherit from: join the most recent flow.
            set.insert(self.flows.counter().max(1));
        }
        self.pool
            .insert_waiting(TaskKey::new(point, name), self.def.queue_for(name), set);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.cmd_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Trigger { req, reply } => {
                let paused = matches!(self.state, RunState::Paused { .. });
                let outcomes = self
                    .pool
                    .force_trigger(&self.def, &mut self.flows, &req, paused);
                let _ = reply.send(outcomes);
            }
            Command::BroadcastSet {
                points,
                namespaces,
                settings,
                reply,
            } => {
                let (changes, bad) = self
                    .broadcasts
                    .put(&self.def, &points, &namespaces, &settings);
                let _ = reply.send(Self::report_broadcast(&changes, &bad, false));
            }
            Command::BroadcastCancel {
                points,
                namespaces,
                settings,
                reply,
            } => {
                let (changes, bad) = self.broadcasts.cancel(&points, &namespaces, &settings);
                let _ = reply.send(Self::report_broadcast(&changes, &bad, true));
            }
            Command::BroadcastClear {
                points,
                namespaces,
                reply,
            } => {
                let (changes, bad) = self.broadcasts.clear(&points, &namespaces);
                let _ = reply.send(Self::report_broadcast(&changes, &bad, true));
            }
            Command::BroadcastExpire { cutoff, reply } => {
                let changes = self.broadcasts.expire(cutoff);
                let _ = reply.send(Self::report_broadcast(&changes, &[], true));
            }
            Command::Reload {
                reload_global,
                reply,
            } => {
                self.reload.request(reload_global);
                self.pause(Some(RELOAD_PAUSE_REASON));
                let _ = reply.send(());
            }
            Command::Pause { reply } => {
                self.pause(None);
                let _ = reply.send(());
            }
            Command::Resume { reply } => {
                if self.reload.cancel() {
                    info!("Reload cancelled, the workflow was resumed");
                }
                self.resume();
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                info!("Stopping the workflow");
                self.state = RunState::Stopping;
                let _ = reply.send(());
            }
        }
    }

    fn report_broadcast(
        changes: &[report::BroadcastChange],
        bad: &[report::BadOption],
        is_cancel: bool,
    ) -> BroadcastReply {
        let change_report = report::get_broadcast_change_report(changes, is_cancel);
        if !change_report.is_empty() {
            info!("{}", change_report);
        }
        let bad_report = report::get_broadcast_bad_options_report(bad, !is_cancel);
        if !bad_report.is_empty() {
            warn!("{}", bad_report);
        }
        let report = match (change_report.is_empty(), bad_report.is_empty()) {
            (false, false) => format!("{}\n{}", change_report, bad_report),
            (false, true) => change_report,
            (true, _) => bad_report,
        };
        BroadcastReply {
            success: bad.is_empty(),
            report,
        }
    }

    /// Hand undispatched preparing tasks to the runner, then apply its
    /// progress events. This keeps running while paused so that a reload
    /// drain can complete.
    async fn advance_jobs(&mut self) {
        for key in self.pool.undispatched_preparing() {
            let Some(submit_num) = self.pool.begin_dispatch(&key) else {
                continue;
            };
            let rtconfig = match self.broadcasts.resolve(&self.def, &key) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(task = %key, error = %e, "cannot resolve runtime config");
                    self.fail_submission(&key, &e.to_string());
                    continue;
                }
            };
            let policy = Self::retry_policy(&rtconfig);
            let platform_name = rtconfig
                .lookup(&KeyPath::of(&["platform"]))
                .and_then(ConfigValue::as_str)
                .unwrap_or("localhost")
                .to_string();
            let request = JobRequest {
                key: key.clone(),
                submit_num,
                rtconfig,
                platform: self.global.platform(&platform_name).cloned(),
            };
            if let Err(e) = self.runner.submit(request).await {
                warn!(task = %key, error = %e, "job runner rejected submission");
                let event = JobEvent {
                    key: key.clone(),
                    kind: JobEventKind::SubmitFailed(e.to_string()),
                };
                self.pool.apply_job_event(&event, policy);
            }
        }

        match self.runner.poll().await {
            Ok(events) => {
                for event in events {
                    let policy = self.retry_policy_for(&event.key);
                    self.pool.apply_job_event(&event, policy);
                }
            }
            Err(e) => warn!(error = %e, "job runner poll failed"),
        }
    }

    fn fail_submission(&mut self, key: &TaskKey, reason: &str) {
        let event = JobEvent {
            key: key.clone(),
            kind: JobEventKind::SubmitFailed(reason.to_string()),
        };
        self.pool.apply_job_event(&event, RetryPolicy::default());
    }

    fn retry_policy_for(&self, key: &TaskKey) -> RetryPolicy {
        match self.broadcasts.resolve(&self.def, key) {
            Ok(cfg) => Self::retry_policy(&cfg),
            Err(_) => RetryPolicy::default(),
        }
    }

    fn retry_policy(cfg: &ConfigValue) -> RetryPolicy {
        let delays = |key: &str| {
            cfg.lookup(&KeyPath::of(&[key]))
                .and_then(ConfigValue::as_list)
                .map(|list| list.len())
                .unwrap_or(0)
        };
        RetryPolicy {
            submission: delays("submission_retry_delays"),
            execution: delays("execution_retry_delays"),
        }
    }

    fn pause(&mut self, reason: Option<&str>) {
        if self.state != RunState::Running {
            return;
        }
        match reason {
            Some(r) => info!("Pausing the workflow: {}", r),
            None => info!("Pausing the workflow"),
        }
        self.state = RunState::Paused {
            reason: reason.unwrap_or_default().to_string(),
        };
    }

    fn resume(&mut self) {
        if !matches!(self.state, RunState::Paused { .. }) {
            return;
        }
        self.state = RunState::Running;
        self.pool.clear_on_resume();
        info!("RESUMING the workflow now");
    }

    fn poll_reload(&mut self) {
        if !self.reload.is_pending() {
            return;
        }
        let draining = self.pool.has_preparing();
        match self.reload.poll(draining, &self.source, &self.global) {
            Some(ReloadResult::Swapped { def, global }) => {
                self.def = *def;
                if let Some(fresh) = global {
                    self.global = fresh;
                }
                self.queues = Queues::from_def(&self.def);
                self.pool.reassign_queues(&self.def);
                self.resume();
            }
            Some(ReloadResult::Aborted) => self.resume(),
            None => {}
        }
    }
}
