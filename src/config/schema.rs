use std::collections::BTreeMap;

use super::{ConfigValue, KeyPath};
use crate::error::ConfigError;

/// A default config tree plus the section paths whose children are
/// user-defined rather than fixed. Anything beneath an open prefix is
/// accepted as-is; everything else must exist in the defaults with a
/// matching kind.
#[derive(Debug, Clone)]
pub struct Schema {
    defaults: ConfigValue,
    open: Vec<KeyPath>,
}

impl Schema {
    /// Per-namespace runtime section: what a broadcast may override.
    pub fn runtime() -> Self {
        let mut root = BTreeMap::new();
        root.insert("script".to_string(), ConfigValue::Str(String::new()));
        root.insert("platform".to_string(), ConfigValue::Str("localhost".to_string()));
        root.insert("execution_time_limit".to_string(), ConfigValue::Num(0.0));
        root.insert("execution_retry_delays".to_string(), ConfigValue::List(Vec::new()));
        root.insert("submission_retry_delays".to_string(), ConfigValue::List(Vec::new()));
        root.insert("env".to_string(), ConfigValue::section());
        root.insert("directives".to_string(), ConfigValue::section());
        Schema {
            defaults: ConfigValue::Section(root),
            open: vec![KeyPath::of(&["env"]), KeyPath::of(&["directives"])],
        }
    }

    /// Site/user configuration: scheduler tuning and platform sections.
    pub fn global() -> Self {
        let mut scheduler = BTreeMap::new();
        scheduler.insert("tick_interval_ms".to_string(), ConfigValue::Num(100.0));
        scheduler.insert("event_bus_capacity".to_string(), ConfigValue::Num(256.0));

        let mut platforms = BTreeMap::new();
        platforms.insert("localhost".to_string(), ConfigValue::section());

        let mut root = BTreeMap::new();
        root.insert("scheduler".to_string(), ConfigValue::Section(scheduler));
        root.insert("platforms".to_string(), ConfigValue::Section(platforms));
        Schema {
            defaults: ConfigValue::Section(root),
            open: vec![KeyPath::of(&["platforms"])],
        }
    }

    pub fn defaults(&self) -> &ConfigValue {
        &self.defaults
    }

    fn is_open(&self, prefix: &[String]) -> bool {
        self.open.iter().any(|p| {
            let segs = p.segments();
            prefix.len() >= segs.len() && &prefix[..segs.len()] == segs
        })
    }

    /// Check that a single setting lands on a known slot with an agreeable
    /// kind. Open subtrees accept anything.
    pub fn validate_path(&self, path: &KeyPath, value: &ConfigValue) -> Result<(), ConfigError> {
        let mut node = &self.defaults;
        let segs = path.segments();
        for (i, seg) in segs.iter().enumerate() {
            if self.is_open(&segs[..i]) {
                return Ok(());
            }
            let map = match node.as_section() {
                Some(map) => map,
                None => {
                    return Err(ConfigError::UnknownKey(
                        KeyPath::from_segments(segs[..=i].to_vec()).to_string(),
                    ));
                }
            };
            node = map.get(seg).ok_or_else(|| {
                ConfigError::UnknownKey(KeyPath::from_segments(segs[..=i].to_vec()).to_string())
            })?;
        }
        if self.is_open(segs) {
            return Ok(());
        }
        if node.kind() != value.kind() {
            return Err(ConfigError::KindMismatch {
                path: path.to_string(),
                expected: node.kind().to_string(),
                found: value.kind().to_string(),
            });
        }
        Ok(())
    }

    /// Walk every leaf of a whole tree through `validate_path`.
    pub fn validate_tree(&self, cfg: &ConfigValue) -> Result<(), ConfigError> {
        let map = cfg.as_section().ok_or_else(|| ConfigError::KindMismatch {
            path: String::new(),
            expected: "section".to_string(),
            found: cfg.kind().to_string(),
        })?;
        let mut prefix = Vec::new();
        self.validate_section(map, &mut prefix)
    }

    fn validate_section(
        &self,
        map: &BTreeMap<String, ConfigValue>,
        prefix: &mut Vec<String>,
    ) -> Result<(), ConfigError> {
        for (key, val) in map {
            prefix.push(key.clone());
            match val {
                ConfigValue::Section(inner) if !self.is_open(prefix) => {
                    // Descend only where the schema itself has a section,
                    // otherwise validate_path reports the mismatch.
                    let known = self
                        .defaults
                        .lookup(&KeyPath::from_segments(prefix.clone()))
                        .map(|n| n.is_section())
                        .unwrap_or(false);
                    if known {
                        self.validate_section(inner, prefix)?;
                    } else {
                        self.validate_path(&KeyPath::from_segments(prefix.clone()), val)?;
                    }
                }
                _ => {
                    self.validate_path(&KeyPath::from_segments(prefix.clone()), val)?;
                }
            }
            prefix.pop();
        }
        Ok(())
    }
}
