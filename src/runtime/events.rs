use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use super::state::TaskState;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A task state transition as published on the engine bus.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub seq: u64,
    pub task: String,
    pub submit_num: u32,
    pub from: Option<TaskState>,
    pub to: TaskState,
}

impl TaskEvent {
    pub fn new(task: String, submit_num: u32, from: Option<TaskState>, to: TaskState) -> Self {
        TaskEvent {
            seq: EVENT_SEQ.fetch_add(1, Ordering::SeqCst),
            task,
            submit_num,
            from,
            to,
        }
    }
}

/// Non-blocking fanout for state changes. Publishing never waits; with no
/// subscribers an event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    pub fn publish(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}
