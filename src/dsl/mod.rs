pub mod builder;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::schema::Schema;
use crate::config::ConfigValue;
use crate::error::ConfigError;

/// A workflow definition as loaded from YAML. The dependency graph itself is
/// evaluated by an external layer; the text is carried so validation can at
/// least insist it is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default = "default_initial_point")]
    pub initial_point: i64,
    #[serde(default)]
    pub scheduling: SchedulingDef,
    #[serde(default)]
    pub queues: BTreeMap<String, QueueDef>,
    #[serde(default)]
    pub runtime: BTreeMap<String, NamespaceDef>,
}

fn default_initial_point() -> i64 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingDef {
    #[serde(default)]
    pub graph: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueDef {
    /// 0 means unlimited.
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub members: Vec<String>,
}

/// One `runtime` section: a task or a family other tasks inherit from.
/// All keys besides `inherit` are the namespace's runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceDef {
    #[serde(default)]
    pub inherit: Option<String>,
    #[serde(flatten)]
    pub config: BTreeMap<String, ConfigValue>,
}

pub const ROOT_NAMESPACE: &str = "root";
pub const DEFAULT_QUEUE: &str = "default";

impl WorkflowDef {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduling.graph.trim().is_empty() {
            return Err(ConfigError::MissingGraph);
        }
        let schema = Schema::runtime();
        for (name, ns) in &self.runtime {
            schema.validate_tree(&ConfigValue::Section(ns.config.clone()))?;
            if let Some(parent) = &ns.inherit {
                if parent != ROOT_NAMESPACE && !self.runtime.contains_key(parent) {
                    return Err(ConfigError::UnknownNamespace(parent.clone()));
                }
            }
            self.check_inherit_chain(name)?;
        }
        for queue in self.queues.values() {
            for member in &queue.members {
                if !self.runtime.contains_key(member) {
                    return Err(ConfigError::UnknownNamespace(member.clone()));
                }
            }
        }
        Ok(())
    }

    fn check_inherit_chain(&self, start: &str) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        let mut cur = start.to_string();
        while let Some(ns) = self.runtime.get(&cur) {
            if !seen.insert(cur.clone()) {
                return Err(ConfigError::InheritCycle(start.to_string()));
            }
            match &ns.inherit {
                Some(parent) if parent != ROOT_NAMESPACE => cur = parent.clone(),
                _ => break,
            }
        }
        Ok(())
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        name == ROOT_NAMESPACE || self.runtime.contains_key(name)
    }

    /// Self first, then parents, ending at the implicit root.
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut cur = name.to_string();
        while let Some(ns) = self.runtime.get(&cur) {
            match &ns.inherit {
                Some(parent) if parent != ROOT_NAMESPACE && !chain.contains(parent) => {
                    chain.push(parent.clone());
                    cur = parent.clone();
                }
                _ => break,
            }
        }
        if chain.last().map(String::as_str) != Some(ROOT_NAMESPACE) {
            chain.push(ROOT_NAMESPACE.to_string());
        }
        chain
    }

    /// A family is any namespace another one inherits from.
    pub fn is_family(&self, name: &str) -> bool {
        self.runtime
            .values()
            .any(|ns| ns.inherit.as_deref() == Some(name))
    }

    /// Namespaces that are actual tasks, in definition order.
    pub fn task_names(&self) -> Vec<String> {
        self.runtime
            .keys()
            .filter(|name| !self.is_family(name))
            .cloned()
            .collect()
    }

    /// Effective runtime section for a namespace: schema defaults overlaid
    /// with each ancestor's config, most specific last.
    pub fn runtime_config(&self, name: &str) -> Result<ConfigValue, ConfigError> {
        let mut cfg = Schema::runtime().defaults().clone();
        let mut chain = self.ancestry(name);
        chain.reverse();
        for ns_name in &chain {
            if let Some(ns) = self.runtime.get(ns_name) {
                cfg.merge_from(&ConfigValue::Section(ns.config.clone()))?;
            }
        }
        Ok(cfg)
    }

    /// The queue a namespace belongs to. Queue members may name families;
    /// the first queue (by name) claiming any ancestor wins.
    pub fn queue_for(&self, name: &str) -> String {
        let ancestry = self.ancestry(name);
        for (queue_name, queue) in &self.queues {
            if queue.members.iter().any(|m| ancestry.contains(m)) {
                return queue_name.clone();
            }
        }
        DEFAULT_QUEUE.to_string()
    }
}
