use std::str::FromStr;

use regex::Regex;
use tokio::sync::oneshot;

use crate::config::{ConfigValue, KeyPath};
use crate::error::EngineError;

use super::flow::FlowDirective;
use super::state::TaskState;
use super::task::CyclePoint;

/// Glob match with `*` and `?`, anchored to the whole string.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') && !pattern.contains('?') {
        return pattern == text;
    }
    let rx = format!(
        "^{}$",
        regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".")
    );
    Regex::new(&rx).map(|re| re.is_match(text)).unwrap_or(false)
}

/// A task selector: `point/name` with optional `:state` qualifier, both
/// parts accepting globs. A bare name selects it at every point.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSelector {
    pub point: String,
    pub name: String,
    pub state: Option<TaskState>,
    pub raw: String,
}

impl TaskSelector {
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let (id, state) = match s.rsplit_once(':') {
            Some((id, qualifier)) => {
                let state = TaskState::from_str(qualifier).map_err(EngineError::Selector)?;
                (id, Some(state))
            }
            None => (s, None),
        };
        let (point, name) = match id.split_once('/') {
            Some((point, name)) => (point.to_string(), name.to_string()),
            None => ("*".to_string(), id.to_string()),
        };
        if point.is_empty() || name.is_empty() {
            return Err(EngineError::Selector(format!("invalid task id: {}", s)));
        }
        Ok(TaskSelector {
            point,
            name,
            state,
            raw: s.to_string(),
        })
    }

    /// True when this selector names exactly one task, so a miss against
    /// the pool can fall back to creating it.
    pub fn is_concrete(&self) -> bool {
        self.state.is_none()
            && self.point.parse::<i64>().is_ok()
            && !self.name.contains('*')
            && !self.name.contains('?')
    }

    pub fn concrete_point(&self) -> Option<CyclePoint> {
        self.point.parse().ok().map(CyclePoint)
    }

    /// Match against a pool task. The name glob is also tried against each
    /// ancestor, so selecting a family selects its members.
    pub fn matches(
        &self,
        point: CyclePoint,
        ancestry: &[String],
        state: TaskState,
    ) -> bool {
        if !glob_match(&self.point, &point.to_string()) {
            return false;
        }
        if !ancestry.iter().any(|name| glob_match(&self.name, name)) {
            return false;
        }
        match self.state {
            Some(wanted) => state == wanted,
            None => true,
        }
    }
}

/// Parse a `key=value` setting: the key in compact bracket form, the value
/// as a YAML scalar with a fallback to a plain string.
pub fn parse_setting(s: &str) -> Result<(KeyPath, ConfigValue), EngineError> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| EngineError::Selector(format!("invalid setting, no `=` in: {}", s)))?;
    let path = KeyPath::parse(key.trim()).map_err(EngineError::Config)?;
    let value = serde_yaml::from_str::<ConfigValue>(value.trim())
        .unwrap_or_else(|_| ConfigValue::Str(value.trim().to_string()));
    Ok((path, value))
}

/// A validated force-trigger request.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub selectors: Vec<TaskSelector>,
    pub flow: FlowDirective,
    pub flow_wait: bool,
    pub flow_descr: Option<String>,
    pub on_resume: bool,
}

impl TriggerRequest {
    pub fn new(selectors: Vec<TaskSelector>, flow: FlowDirective) -> Self {
        TriggerRequest {
            selectors,
            flow,
            flow_wait: false,
            flow_descr: None,
            on_resume: false,
        }
    }
}

/// Per-task result of a trigger batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Triggered,
    Ignored(String),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct BroadcastReply {
    pub success: bool,
    pub report: String,
}

/// Operator commands, queued into the scheduling loop and answered over
/// oneshot channels.
#[derive(Debug)]
pub enum Command {
    Trigger {
        req: TriggerRequest,
        reply: oneshot::Sender<Vec<(String, TriggerOutcome)>>,
    },
    BroadcastSet {
        points: Vec<String>,
        namespaces: Vec<String>,
        settings: Vec<(KeyPath, ConfigValue)>,
        reply: oneshot::Sender<BroadcastReply>,
    },
    BroadcastCancel {
        points: Vec<String>,
        namespaces: Vec<String>,
        settings: Vec<KeyPath>,
        reply: oneshot::Sender<BroadcastReply>,
    },
    BroadcastClear {
        points: Vec<String>,
        namespaces: Vec<String>,
        reply: oneshot::Sender<BroadcastReply>,
    },
    BroadcastExpire {
        cutoff: CyclePoint,
        reply: oneshot::Sender<BroadcastReply>,
    },
    Reload {
        reload_global: bool,
        reply: oneshot::Sender<()>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}
