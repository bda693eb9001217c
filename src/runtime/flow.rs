use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::error::EngineError;

pub type FlowId = u64;

/// How a trigger names the flows its tasks should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDirective {
    /// No directive given: keep existing flows, or all active ones for a
    /// task that has to be created first.
    Default,
    /// Every currently active flow.
    All,
    /// Mint a fresh flow id.
    New,
    /// No flow at all. Only meaningful for tasks already in the pool.
    None,
    /// Explicit ids, registered on first use.
    Ids(Vec<FlowId>),
}

impl FlowDirective {
    /// Parse the values of repeated `--flow` options. The keywords must
    /// appear alone; ids must be positive integers.
    pub fn parse(values: &[String]) -> Result<Self, EngineError> {
        if values.is_empty() {
            return Ok(FlowDirective::Default);
        }
        if values.len() == 1 {
            match values[0].as_str() {
                "all" => return Ok(FlowDirective::All),
                "new" => return Ok(FlowDirective::New),
                "none" => return Ok(FlowDirective::None),
                _ => {}
            }
        }
        let mut ids = Vec::with_capacity(values.len());
        for v in values {
            match v.as_str() {
                "all" | "new" | "none" => {
                    return Err(EngineError::Selector(format!(
                        "--flow={} must not be combined with other flow values",
                        v
                    )));
                }
                _ => {
                    let id: FlowId = v.parse().map_err(|_| {
                        EngineError::Selector(format!("invalid flow value: {}", v))
                    })?;
                    if id == 0 {
                        return Err(EngineError::Selector("flow ids start at 1".to_string()));
                    }
                    ids.push(id);
                }
            }
        }
        Ok(FlowDirective::Ids(ids))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowMeta {
    pub description: String,
}

/// Issues flow ids and remembers what each one was started for. The counter
/// only ever moves forward, so a pruned id is never reused.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    counter: FlowId,
    flows: BTreeMap<FlowId, FlowMeta>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_flow(&mut self, description: &str) -> FlowId {
        self.counter += 1;
        self.flows.insert(
            self.counter,
            FlowMeta {
                description: description.to_string(),
            },
        );
        info!(flow = self.counter, description, "new flow started");
        self.counter
    }

    /// Register an explicitly requested id, e.g. one reused from the log.
    pub fn ensure(&mut self, id: FlowId, description: &str) {
        self.flows.entry(id).or_insert_with(|| FlowMeta {
            description: description.to_string(),
        });
        if id > self.counter {
            self.counter = id;
        }
    }

    /// The most recently issued id.
    pub fn counter(&self) -> FlowId {
        self.counter
    }

    pub fn description(&self, id: FlowId) -> Option<&str> {
        self.flows.get(&id).map(|m| m.description.as_str())
    }

    pub fn ids(&self) -> Vec<FlowId> {
        self.flows.keys().copied().collect()
    }

    /// Drop metadata for flows no live task references.
    pub fn prune(&mut self, referenced: &BTreeSet<FlowId>) {
        self.flows.retain(|id, _| referenced.contains(id));
    }
}
