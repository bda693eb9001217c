use std::collections::BTreeMap;

use crate::dsl::WorkflowDef;

/// Admission limits per queue. A limit of 0 means unlimited; queues a task
/// names but the definition does not are treated as unlimited too.
#[derive(Debug, Clone, Default)]
pub struct Queues {
    limits: BTreeMap<String, usize>,
}

impl Queues {
    pub fn from_def(def: &WorkflowDef) -> Self {
        let limits = def
            .queues
            .iter()
            .map(|(name, q)| (name.clone(), q.limit))
            .collect();
        Queues { limits }
    }

    pub fn limit(&self, queue: &str) -> usize {
        self.limits.get(queue).copied().unwrap_or(0)
    }

    pub fn admits(&self, queue: &str, occupied: usize) -> bool {
        let limit = self.limit(queue);
        limit == 0 || occupied < limit
    }
}
