use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::dsl::WorkflowDef;
use crate::error::EngineError;

use super::command::{TriggerOutcome, TriggerRequest};
use super::events::{EventBus, TaskEvent};
use super::flow::{FlowDirective, FlowId, FlowRegistry};
use super::job::{JobEvent, JobEventKind};
use super::queue::Queues;
use super::state::TaskState;
use super::task::{TaskInstance, TaskKey};

/// Retries allowed for one task, read off its effective runtime config.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    pub submission: usize,
    pub execution: usize,
}

/// Read-only snapshot kept up to date for observers outside the loop.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub state: TaskState,
    pub submit_num: u32,
    pub flows: Vec<FlowId>,
}

/// The authoritative set of live task instances. Keys order by (point,
/// name), which fixes the admission order. Only the scheduling loop touches
/// the pool; observers read the summary map.
pub struct TaskPool {
    tasks: BTreeMap<TaskKey, TaskInstance>,
    bus: EventBus,
    summaries: Arc<DashMap<String, TaskSummary>>,
}

impl TaskPool {
    pub fn new(bus: EventBus, summaries: Arc<DashMap<String, TaskSummary>>) -> Self {
        TaskPool {
            tasks: BTreeMap::new(),
            bus,
            summaries,
        }
    }

    pub fn get(&self, key: &TaskKey) -> Option<&TaskInstance> {
        self.tasks.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskInstance> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn snapshot(&self, inst: &TaskInstance) {
        self.summaries.insert(
            inst.key.to_string(),
            TaskSummary {
                state: inst.state(),
                submit_num: inst.submit_num,
                flows: inst.flows.iter().copied().collect(),
            },
        );
    }

    /// Materialize a waiting task. An existing non-terminal instance is
    /// left alone; a finished leftover is replaced.
    pub fn insert_waiting(
        &mut self,
        key: TaskKey,
        queue: String,
        flows: BTreeSet<FlowId>,
    ) -> bool {
        if let Some(existing) = self.tasks.get(&key) {
            if !existing.state().is_terminal() {
                warn!(task = %key, state = %existing.state(), "task already in pool");
                return false;
            }
        }
        let inst = TaskInstance::new(key.clone(), queue, flows);
        info!(task = %key, "added to pool");
        self.bus
            .publish(TaskEvent::new(key.to_string(), 0, None, TaskState::Waiting));
        self.snapshot(&inst);
        self.tasks.insert(key, inst);
        true
    }

    fn transition(&mut self, key: &TaskKey, to: TaskState) -> Result<(), EngineError> {
        let inst = self
            .tasks
            .get_mut(key)
            .ok_or_else(|| EngineError::UnsafeState(format!("no such task: {}", key)))?;
        let from = inst.state();
        if !from.can_transition_to(to) {
            return Err(EngineError::UnsafeState(format!(
                "illegal transition {}: {} => {}",
                key, from, to
            )));
        }
        inst.set_state(to);
        info!("[{}:{}] => {}", inst.id_string(), from, to);
        let event = TaskEvent::new(key.to_string(), inst.submit_num, Some(from), to);
        let snap = inst.clone();
        self.bus.publish(event);
        self.snapshot(&snap);
        Ok(())
    }

    /// Forced reset back to waiting, used when an operator reruns a
    /// finished or submit-failed task.
    fn reset_for_rerun(&mut self, key: &TaskKey) {
        let Some(inst) = self.tasks.get_mut(key) else {
            return;
        };
        let from = inst.state();
        inst.set_state(TaskState::Waiting);
        inst.try_num = 0;
        inst.dispatched = false;
        inst.prereqs_satisfied = true;
        inst.on_resume = false;
        info!("[{}:{}] => waiting (forced)", inst.id_string(), from);
        let event = TaskEvent::new(
            key.to_string(),
            inst.submit_num,
            Some(from),
            TaskState::Waiting,
        );
        let snap = inst.clone();
        self.bus.publish(event);
        self.snapshot(&snap);
    }

    /// Prerequisites reported satisfied by the graph layer: waiting tasks
    /// move straight to queued.
    pub fn set_runnable(&mut self, key: &TaskKey) {
        let Some(inst) = self.tasks.get_mut(key) else {
            debug!(task = %key, "runnable signal for unknown task");
            return;
        };
        inst.prereqs_satisfied = true;
        if inst.state() == TaskState::Waiting {
            if let Err(e) = self.transition(key, TaskState::Queued) {
                warn!(task = %key, error = %e, "could not queue task");
            }
        }
    }

    /// The point passed without the task ever running.
    pub fn expire_task(&mut self, key: &TaskKey) -> Result<(), EngineError> {
        match self.tasks.get(key).map(|t| t.state()) {
            Some(TaskState::Waiting) | Some(TaskState::Queued) => {
                self.transition(key, TaskState::Expired)
            }
            Some(state) => Err(EngineError::UnsafeState(format!(
                "cannot expire {} in state {}",
                key, state
            ))),
            None => Err(EngineError::UnsafeState(format!("no such task: {}", key))),
        }
    }

    /// Tasks per queue currently holding a slot.
    pub fn occupancy(&self) -> BTreeMap<String, usize> {
        let mut occ = BTreeMap::new();
        for inst in self.tasks.values() {
            if inst.state().is_active() {
                *occ.entry(inst.queue.clone()).or_insert(0) += 1;
            }
        }
        occ
    }

    /// Move queued tasks to preparing while their queues have capacity, in
    /// (point, name) order.
    pub fn admit(&mut self, queues: &Queues) -> Vec<TaskKey> {
        let mut occupancy = self.occupancy();
        let queued: Vec<TaskKey> = self
            .tasks
            .values()
            .filter(|t| t.state() == TaskState::Queued)
            .map(|t| t.key.clone())
            .collect();
        let mut admitted = Vec::new();
        for key in queued {
            let queue = match self.tasks.get(&key) {
                Some(t) => t.queue.clone(),
                None => continue,
            };
            let occupied = occupancy.get(&queue).copied().unwrap_or(0);
            if !queues.admits(&queue, occupied) {
                continue;
            }
            if self.transition(&key, TaskState::Preparing).is_ok() {
                *occupancy.entry(queue).or_insert(0) += 1;
                admitted.push(key);
            }
        }
        admitted
    }

    /// Preparing tasks not yet handed to the job runner.
    pub fn undispatched_preparing(&self) -> Vec<TaskKey> {
        self.tasks
            .values()
            .filter(|t| t.state() == TaskState::Preparing && !t.dispatched)
            .map(|t| t.key.clone())
            .collect()
    }

    /// Mark one attempt as handed over and return its submit number.
    pub fn begin_dispatch(&mut self, key: &TaskKey) -> Option<u32> {
        let inst = self.tasks.get_mut(key)?;
        if inst.state() != TaskState::Preparing || inst.dispatched {
            return None;
        }
        inst.dispatched = true;
        inst.submit_num += 1;
        let snap = inst.clone();
        self.snapshot(&snap);
        Some(snap.submit_num)
    }

    pub fn apply_job_event(&mut self, ev: &JobEvent, retries: RetryPolicy) {
        let Some(state) = self.tasks.get(&ev.key).map(|t| t.state()) else {
            debug!(task = %ev.key, "job event for unknown task");
            return;
        };
        let result = match (&ev.kind, state) {
            (JobEventKind::Submitted, TaskState::Preparing) => {
                self.transition(&ev.key, TaskState::Submitted)
            }
            (JobEventKind::Started, TaskState::Submitted) => {
                if let Some(inst) = self.tasks.get_mut(&ev.key) {
                    inst.try_num += 1;
                }
                self.transition(&ev.key, TaskState::Running)
            }
            (JobEventKind::Succeeded, TaskState::Running) => {
                self.transition(&ev.key, TaskState::Succeeded)
            }
            (JobEventKind::SubmitFailed(msg), TaskState::Preparing) => {
                warn!(task = %ev.key, reason = %msg, "job submission failed");
                self.transition(&ev.key, TaskState::SubmitFailed)
                    .and_then(|()| self.maybe_retry_submission(&ev.key, retries))
            }
            (JobEventKind::Failed(msg), TaskState::Running) => {
                warn!(task = %ev.key, reason = %msg, "job failed");
                self.transition(&ev.key, TaskState::Failed)
                    .and_then(|()| self.maybe_retry_execution(&ev.key, retries))
            }
            (kind, state) => {
                warn!(task = %ev.key, state = %state, event = ?kind, "stale job event ignored");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(task = %ev.key, error = %e, "job event not applied");
        }
    }

    fn maybe_retry_submission(
        &mut self,
        key: &TaskKey,
        retries: RetryPolicy,
    ) -> Result<(), EngineError> {
        let Some(inst) = self.tasks.get_mut(key) else {
            return Ok(());
        };
        if (inst.submit_num as usize) > retries.submission {
            return Ok(());
        }
        inst.dispatched = false;
        self.transition(key, TaskState::SubmitRetrying)?;
        self.transition(key, TaskState::Queued)
    }

    fn maybe_retry_execution(
        &mut self,
        key: &TaskKey,
        retries: RetryPolicy,
    ) -> Result<(), EngineError> {
        let Some(inst) = self.tasks.get_mut(key) else {
            return Ok(());
        };
        if (inst.try_num as usize) > retries.execution {
            return Ok(());
        }
        inst.dispatched = false;
        self.transition(key, TaskState::Retrying)?;
        self.transition(key, TaskState::Queued)
    }

    pub fn has_preparing(&self) -> bool {
        self.tasks
            .values()
            .any(|t| t.state() == TaskState::Preparing)
    }

    /// Union of flow memberships across live tasks.
    pub fn active_flows(&self) -> BTreeSet<FlowId> {
        self.tasks
            .values()
            .filter(|t| !t.state().is_terminal())
            .flat_map(|t| t.flows.iter().copied())
            .collect()
    }

    /// Re-point live tasks at the queues of a freshly loaded definition.
    pub fn reassign_queues(&mut self, def: &WorkflowDef) {
        for inst in self.tasks.values_mut() {
            let queue = def.queue_for(&inst.key.name);
            if queue != inst.queue {
                debug!(task = %inst.key, from = %inst.queue, to = %queue, "queue reassigned");
                inst.queue = queue;
            }
        }
    }

    pub fn clear_on_resume(&mut self) {
        for inst in self.tasks.values_mut() {
            inst.on_resume = false;
        }
    }

    /// Drop finished instances. Their final state stays in the summaries.
    pub fn prune_terminal(&mut self) -> Vec<TaskKey> {
        let done: Vec<TaskKey> = self
            .tasks
            .values()
            .filter(|t| t.state().is_terminal())
            .map(|t| t.key.clone())
            .collect();
        for key in &done {
            self.tasks.remove(key);
            debug!(task = %key, "removed from pool (finished)");
        }
        done
    }

    /// Apply a trigger batch. Outcomes are per task, keyed by the task id,
    /// or by the selector itself when it matched nothing.
    pub fn force_trigger(
        &mut self,
        def: &WorkflowDef,
        flows: &mut FlowRegistry,
        req: &TriggerRequest,
        paused: bool,
    ) -> Vec<(String, TriggerOutcome)> {
        let mut outcomes = Vec::new();
        let descr = req.flow_descr.as_deref().unwrap_or("manual trigger");

        // Flows named by the directive, minted or registered once per batch.
        let directed: BTreeSet<FlowId> = match &req.flow {
            FlowDirective::All => self.active_flows_or_new(flows, descr),
            FlowDirective::New => BTreeSet::from([flows.new_flow(descr)]),
            FlowDirective::Ids(ids) => {
                let mut set = BTreeSet::new();
                for id in ids {
                    flows.ensure(*id, descr);
                    set.insert(*id);
                }
                set
            }
            FlowDirective::Default | FlowDirective::None => BTreeSet::new(),
        };

        for sel in &req.selectors {
            let matches: Vec<TaskKey> = self
                .tasks
                .values()
                .filter(|t| sel.matches(t.key.point, &def.ancestry(&t.key.name), t.state()))
                .map(|t| t.key.clone())
                .collect();

            if matches.is_empty() {
                outcomes.push(self.trigger_inactive(def, flows, req, &directed, sel, paused));
                continue;
            }

            for key in matches {
                outcomes.push(self.trigger_pool_task(req, &directed, &key, paused));
            }
        }
        outcomes
    }

    fn active_flows_or_new(&self, flows: &mut FlowRegistry, descr: &str) -> BTreeSet<FlowId> {
        let active = self.active_flows();
        if active.is_empty() {
            BTreeSet::from([flows.new_flow(descr)])
        } else {
            active
        }
    }

    fn trigger_inactive(
        &mut self,
        def: &WorkflowDef,
        flows: &mut FlowRegistry,
        req: &TriggerRequest,
        directed: &BTreeSet<FlowId>,
        sel: &super::command::TaskSelector,
        paused: bool,
    ) -> (String, TriggerOutcome) {
        if !(sel.is_concrete() && def.has_namespace(&sel.name) && !def.is_family(&sel.name)) {
            return (
                sel.raw.clone(),
                TriggerOutcome::Error(format!("No matching tasks found: {}", sel.raw)),
            );
        }
        if req.flow == FlowDirective::None {
            return (
                sel.raw.clone(),
                TriggerOutcome::Error(
                    "--flow=none is not valid for a task outside the active window".to_string(),
                ),
            );
        }
        let Some(point) = sel.concrete_point() else {
            return (
                sel.raw.clone(),
                TriggerOutcome::Error(format!("invalid cycle point in: {}", sel.raw)),
            );
        };
        let flow_set = match &req.flow {
            FlowDirective::Default => self.active_flows_or_new(flows, "manual trigger"),
            _ => directed.clone(),
        };
        let key = TaskKey::new(point, &sel.name);
        self.insert_waiting(key.clone(), def.queue_for(&sel.name), flow_set);
        if let Some(inst) = self.tasks.get_mut(&key) {
            inst.prereqs_satisfied = true;
            inst.flow_wait = req.flow_wait;
            inst.on_resume = paused && req.on_resume;
        }
        if let Err(e) = self.transition(&key, TaskState::Queued) {
            return (key.to_string(), TriggerOutcome::Error(e.to_string()));
        }
        (key.to_string(), TriggerOutcome::Triggered)
    }

    fn trigger_pool_task(
        &mut self,
        req: &TriggerRequest,
        directed: &BTreeSet<FlowId>,
        key: &TaskKey,
        paused: bool,
    ) -> (String, TriggerOutcome) {
        let state = {
            let Some(inst) = self.tasks.get_mut(key) else {
                return (
                    key.to_string(),
                    TriggerOutcome::Error(format!("no such task: {}", key)),
                );
            };
            if inst.state().is_active() {
                info!(task = %key, state = %inst.state(), "ignoring trigger, task is already active");
                return (
                    key.to_string(),
                    TriggerOutcome::Ignored("already active".to_string()),
                );
            }
            // Flow merges are additive; an active-window task never loses
            // membership through a trigger, and `none` changes nothing.
            match &req.flow {
                FlowDirective::Default | FlowDirective::None => {}
                _ => inst.flows.extend(directed.iter().copied()),
            }
            inst.flow_wait |= req.flow_wait;
            inst.state()
        };

        let result = if state.is_terminal() || state == TaskState::SubmitFailed {
            self.reset_for_rerun(key);
            if let Some(inst) = self.tasks.get_mut(key) {
                inst.on_resume = paused && req.on_resume;
            }
            self.transition(key, TaskState::Queued)
        } else {
            match state {
                TaskState::Waiting | TaskState::SubmitRetrying | TaskState::Retrying => {
                    if let Some(inst) = self.tasks.get_mut(key) {
                        inst.prereqs_satisfied = true;
                        inst.on_resume = paused && req.on_resume;
                    }
                    self.transition(key, TaskState::Queued)
                }
                TaskState::Queued => {
                    if paused && req.on_resume {
                        if let Some(inst) = self.tasks.get_mut(key) {
                            inst.on_resume = true;
                        }
                        Ok(())
                    } else {
                        // A queued trigger runs right away, limits or not.
                        self.transition(key, TaskState::Preparing)
                    }
                }
                other => Err(EngineError::UnsafeState(format!(
                    "cannot trigger {} in state {}",
                    key, other
                ))),
            }
        };

        match result {
            Ok(()) => (key.to_string(), TriggerOutcome::Triggered),
            Err(e) => (key.to_string(), TriggerOutcome::Error(e.to_string())),
        }
    }
}
