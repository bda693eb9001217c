use std::collections::BTreeMap;

use crate::config::ConfigValue;
use crate::dsl::{NamespaceDef, QueueDef, SchedulingDef, WorkflowDef};

pub struct WorkflowDefBuilder {
    name: String,
    initial_point: i64,
    graph: String,
    queues: BTreeMap<String, QueueDef>,
    runtime: BTreeMap<String, NamespaceDef>,
}

impl WorkflowDefBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initial_point: 1,
            graph: String::new(),
            queues: BTreeMap::new(),
            runtime: BTreeMap::new(),
        }
    }

    pub fn initial_point(mut self, point: i64) -> Self {
        self.initial_point = point;
        self
    }

    pub fn graph(mut self, graph: &str) -> Self {
        self.graph = graph.to_string();
        self
    }

    pub fn queue(mut self, name: &str, limit: usize, members: &[&str]) -> Self {
        self.queues.insert(
            name.to_string(),
            QueueDef {
                limit,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        self
    }

    pub fn task(self, name: &str) -> NamespaceBuilder {
        NamespaceBuilder {
            workflow_builder: self,
            name: name.to_string(),
            inherit: None,
            config: BTreeMap::new(),
        }
    }

    /// Same shape as a task; families only exist through being inherited.
    pub fn family(self, name: &str) -> NamespaceBuilder {
        self.task(name)
    }

    pub fn build(self) -> WorkflowDef {
        WorkflowDef {
            name: self.name,
            initial_point: self.initial_point,
            scheduling: SchedulingDef { graph: self.graph },
            queues: self.queues,
            runtime: self.runtime,
        }
    }
}

pub struct NamespaceBuilder {
    workflow_builder: WorkflowDefBuilder,
    name: String,
    inherit: Option<String>,
    config: BTreeMap<String, ConfigValue>,
}

impl NamespaceBuilder {
    pub fn inherit(mut self, parent: &str) -> Self {
        self.inherit = Some(parent.to_string());
        self
    }

    pub fn cfg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config
            .insert(key.to_string(), ConfigValue::from(value.into()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        let slot = self
            .config
            .entry("env".to_string())
            .or_insert_with(ConfigValue::section);
        if let Some(map) = slot.as_section_mut() {
            map.insert(key.to_string(), ConfigValue::Str(value.to_string()));
        }
        self
    }

    pub fn build(mut self) -> WorkflowDefBuilder {
        self.workflow_builder.runtime.insert(
            self.name,
            NamespaceDef {
                inherit: self.inherit,
                config: self.config,
            },
        );
        self.workflow_builder
    }
}
