use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::flow::FlowId;
use super::state::TaskState;

/// Integer cycle point. Numeric ordering keeps pool iteration in point
/// order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CyclePoint(pub i64);

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CyclePoint {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CyclePoint(s.parse()?))
    }
}

impl From<i64> for CyclePoint {
    fn from(p: i64) -> Self {
        CyclePoint(p)
    }
}

/// Pool identity of a live task: one non-terminal instance per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub point: CyclePoint,
    pub name: String,
}

impl TaskKey {
    pub fn new(point: impl Into<CyclePoint>, name: &str) -> Self {
        TaskKey {
            point: point.into(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.point, self.name)
    }
}

/// A live task instance in the active window.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub key: TaskKey,
    state: TaskState,
    /// Total job submissions for this instance, counted at dispatch.
    pub submit_num: u32,
    /// Execution attempts, counted when a job starts.
    pub try_num: u32,
    pub flows: BTreeSet<FlowId>,
    pub flow_wait: bool,
    pub queue: String,
    pub prereqs_satisfied: bool,
    /// Triggered while paused, submission deferred to resume.
    pub on_resume: bool,
    /// The current attempt has been handed to the job runner.
    pub dispatched: bool,
}

impl TaskInstance {
    pub fn new(key: TaskKey, queue: String, flows: BTreeSet<FlowId>) -> Self {
        TaskInstance {
            key,
            state: TaskState::Waiting,
            submit_num: 0,
            try_num: 0,
            flows,
            flow_wait: false,
            queue,
            prereqs_satisfied: false,
            on_resume: false,
            dispatched: false,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    /// `1/foo` until the first submission, `1/foo/02` afterwards.
    pub fn id_string(&self) -> String {
        if self.submit_num == 0 {
            self.key.to_string()
        } else {
            format!("{}/{:02}", self.key, self.submit_num)
        }
    }
}
