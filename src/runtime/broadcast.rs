use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::schema::Schema;
use crate::config::{ConfigValue, KeyPath};
use crate::dsl::WorkflowDef;
use crate::error::{ConfigError, EngineError};

use super::report::{BadOption, BroadcastChange};
use super::task::{CyclePoint, TaskKey};

/// One accepted override, kept exactly as validated.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEntry {
    pub path: KeyPath,
    pub value: ConfigValue,
}

/// Runtime override settings keyed by (cycle point, namespace), both parts
/// accepting the literal `*`. Entries coexist; precedence is decided at
/// read time by merging buckets in (point, namespace) order, insertion
/// order within a bucket, so the later and more point-specific ones win.
#[derive(Debug)]
pub struct BroadcastStore {
    entries: BTreeMap<(String, String), Vec<BroadcastEntry>>,
    schema: Schema,
}

impl Default for BroadcastStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastStore {
    pub fn new() -> Self {
        BroadcastStore {
            entries: BTreeMap::new(),
            schema: Schema::runtime(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn points(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.entries.keys().map(|(p, _)| p.clone()).collect();
        set.into_iter().collect()
    }

    fn namespaces(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.entries.keys().map(|(_, ns)| ns.clone()).collect();
        set.into_iter().collect()
    }

    /// A setting must land on a known runtime config slot.
    pub fn check_setting(&self, path: &KeyPath, value: &ConfigValue) -> Result<(), EngineError> {
        self.schema
            .validate_path(path, value)
            .map_err(|e| EngineError::SchemaRejection(e.to_string()))
    }

    /// Validate and store settings for every (point, namespace) pair. Bad
    /// points, namespaces and settings are collected and skipped; the rest
    /// of the call still applies. Empty point or namespace lists mean `*`.
    pub fn put(
        &mut self,
        def: &WorkflowDef,
        points: &[String],
        namespaces: &[String],
        settings: &[(KeyPath, ConfigValue)],
    ) -> (Vec<BroadcastChange>, Vec<BadOption>) {
        let mut changes = Vec::new();
        let mut bad_options = Vec::new();

        let mut good_points = Vec::new();
        for point in points {
            if point == "*" || point.parse::<i64>().is_ok() {
                good_points.push(point.clone());
            } else {
                bad_options.push(BadOption {
                    opt: "point_strings",
                    value: point.clone(),
                });
            }
        }
        if points.is_empty() {
            good_points.push("*".to_string());
        }

        let mut good_namespaces = Vec::new();
        for ns in namespaces {
            if ns == "*" || def.has_namespace(ns) {
                good_namespaces.push(ns.clone());
            } else {
                bad_options.push(BadOption {
                    opt: "namespaces",
                    value: ns.clone(),
                });
            }
        }
        if namespaces.is_empty() {
            good_namespaces.push("*".to_string());
        }

        let mut good_settings = Vec::new();
        for (path, value) in settings {
            match self.check_setting(path, value) {
                Ok(()) => good_settings.push((path, value)),
                Err(e) => {
                    debug!(setting = %path, error = %e, "rejected broadcast setting");
                    bad_options.push(BadOption {
                        opt: "settings",
                        value: format!("{}={}", path, value),
                    });
                }
            }
        }
        if good_settings.is_empty() {
            return (changes, bad_options);
        }

        for point in &good_points {
            for ns in &good_namespaces {
                let bucket = self
                    .entries
                    .entry((point.clone(), ns.clone()))
                    .or_default();
                for (path, value) in &good_settings {
                    bucket.push(BroadcastEntry {
                        path: (*path).clone(),
                        value: (*value).clone(),
                    });
                    changes.push(BroadcastChange {
                        point: point.clone(),
                        namespace: ns.clone(),
                        key: path.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        (changes, bad_options)
    }

    /// Remove settings matching exact (point, namespace, key path) triples.
    /// Empty point or namespace lists address every stored coordinate.
    pub fn cancel(
        &mut self,
        points: &[String],
        namespaces: &[String],
        settings: &[KeyPath],
    ) -> (Vec<BroadcastChange>, Vec<BadOption>) {
        let target_points = if points.is_empty() {
            self.points()
        } else {
            points.to_vec()
        };
        let target_namespaces = if namespaces.is_empty() {
            self.namespaces()
        } else {
            namespaces.to_vec()
        };

        let mut changes = Vec::new();
        let mut matched_points = BTreeSet::new();
        let mut matched_namespaces = BTreeSet::new();
        let mut matched_settings = BTreeSet::new();

        for point in &target_points {
            for ns in &target_namespaces {
                let coord = (point.clone(), ns.clone());
                let Some(bucket) = self.entries.get_mut(&coord) else {
                    continue;
                };
                bucket.retain(|entry| {
                    if settings.contains(&entry.path) {
                        matched_points.insert(point.clone());
                        matched_namespaces.insert(ns.clone());
                        matched_settings.insert(entry.path.clone());
                        changes.push(BroadcastChange {
                            point: point.clone(),
                            namespace: ns.clone(),
                            key: entry.path.to_string(),
                            value: entry.value.to_string(),
                        });
                        false
                    } else {
                        true
                    }
                });
                if bucket.is_empty() {
                    self.entries.remove(&coord);
                }
            }
        }

        let mut bad_options = Vec::new();
        for point in points {
            if !matched_points.contains(point) {
                bad_options.push(BadOption {
                    opt: "point_strings",
                    value: point.clone(),
                });
            }
        }
        for ns in namespaces {
            if !matched_namespaces.contains(ns) {
                bad_options.push(BadOption {
                    opt: "namespaces",
                    value: ns.clone(),
                });
            }
        }
        for path in settings {
            if !matched_settings.contains(path) {
                bad_options.push(BadOption {
                    opt: "settings",
                    value: path.to_string(),
                });
            }
        }
        (changes, bad_options)
    }

    /// Remove everything stored under the matching coordinates.
    pub fn clear(
        &mut self,
        points: &[String],
        namespaces: &[String],
    ) -> (Vec<BroadcastChange>, Vec<BadOption>) {
        let target_points = if points.is_empty() {
            self.points()
        } else {
            points.to_vec()
        };
        let target_namespaces = if namespaces.is_empty() {
            self.namespaces()
        } else {
            namespaces.to_vec()
        };

        let mut changes = Vec::new();
        let mut matched_points = BTreeSet::new();
        let mut matched_namespaces = BTreeSet::new();

        for point in &target_points {
            for ns in &target_namespaces {
                let coord = (point.clone(), ns.clone());
                let Some(bucket) = self.entries.remove(&coord) else {
                    continue;
                };
                matched_points.insert(point.clone());
                matched_namespaces.insert(ns.clone());
                for entry in bucket {
                    changes.push(BroadcastChange {
                        point: point.clone(),
                        namespace: ns.clone(),
                        key: entry.path.to_string(),
                        value: entry.value.to_string(),
                    });
                }
            }
        }

        let mut bad_options = Vec::new();
        for point in points {
            if !matched_points.contains(point) {
                bad_options.push(BadOption {
                    opt: "point_strings",
                    value: point.clone(),
                });
            }
        }
        for ns in namespaces {
            if !matched_namespaces.contains(ns) {
                bad_options.push(BadOption {
                    opt: "namespaces",
                    value: ns.clone(),
                });
            }
        }
        (changes, bad_options)
    }

    /// Drop settings for exact points that have fallen behind the window.
    /// `*` entries are kept.
    pub fn expire(&mut self, cutoff: CyclePoint) -> Vec<BroadcastChange> {
        let stale: Vec<String> = self
            .points()
            .into_iter()
            .filter(|p| {
                p.parse::<i64>()
                    .map(|point| point < cutoff.0)
                    .unwrap_or(false)
            })
            .collect();
        if stale.is_empty() {
            return Vec::new();
        }
        let (changes, _) = self.clear(&stale, &[]);
        changes
    }

    /// Layer every matching entry onto the task's base runtime config. The
    /// result is a read-time view; the base is never written back.
    pub fn resolve(&self, def: &WorkflowDef, key: &TaskKey) -> Result<ConfigValue, ConfigError> {
        let mut cfg = def.runtime_config(&key.name)?;
        let ancestry = def.ancestry(&key.name);
        let point_str = key.point.to_string();
        for ((point, ns), bucket) in &self.entries {
            let point_ok = point == "*" || *point == point_str;
            let ns_ok = ns == "*" || ancestry.contains(ns);
            if !point_ok || !ns_ok {
                continue;
            }
            for entry in bucket {
                cfg.merge_at(&entry.path, &entry.value)?;
            }
        }
        Ok(cfg)
    }
}
