pub mod global;
pub mod loader;
pub mod schema;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A typed configuration tree. YAML mappings become sections, sequences
/// become lists, scalars keep their parsed kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<ConfigValue>),
    Section(BTreeMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn section() -> Self {
        ConfigValue::Section(BTreeMap::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Num(_) => "number",
            ConfigValue::Str(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Section(_) => "section",
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self, ConfigValue::Section(_))
    }

    pub fn as_section(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Section(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_section_mut(&mut self) -> Option<&mut BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Section(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            ConfigValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Follow a key path through nested sections.
    pub fn lookup(&self, path: &KeyPath) -> Option<&ConfigValue> {
        let mut node = self;
        for seg in path.segments() {
            node = node.as_section()?.get(seg)?;
        }
        Some(node)
    }

    /// Recursive merge: sections merge key by key, leaves overwrite leaves
    /// of the same kind. A kind conflict at any path is an error and leaves
    /// the subtree only partially merged, so callers merge into a clone
    /// when they need rollback.
    pub fn merge_from(&mut self, other: &ConfigValue) -> Result<(), ConfigError> {
        self.merge_inner(other, &mut Vec::new())
    }

    fn merge_inner(&mut self, other: &ConfigValue, at: &mut Vec<String>) -> Result<(), ConfigError> {
        match (self, other) {
            (ConfigValue::Section(mine), ConfigValue::Section(theirs)) => {
                for (key, val) in theirs {
                    at.push(key.clone());
                    match mine.get_mut(key) {
                        Some(slot) => slot.merge_inner(val, at)?,
                        None => {
                            mine.insert(key.clone(), val.clone());
                        }
                    }
                    at.pop();
                }
                Ok(())
            }
            (mine, theirs) if mine.kind() == theirs.kind() => {
                *mine = theirs.clone();
                Ok(())
            }
            (mine, theirs) => Err(ConfigError::KindMismatch {
                path: KeyPath::from_segments(at.clone()).to_string(),
                expected: mine.kind().to_string(),
                found: theirs.kind().to_string(),
            }),
        }
    }

    /// Write `value` at `path`, creating intermediate sections. If both the
    /// existing slot and the value are sections they merge instead of the
    /// subtree being replaced.
    pub fn merge_at(&mut self, path: &KeyPath, value: &ConfigValue) -> Result<(), ConfigError> {
        if path.is_empty() {
            return self.merge_from(value);
        }
        let mut node = self;
        let segs = path.segments();
        for (i, seg) in segs.iter().enumerate() {
            let map = match node {
                ConfigValue::Section(map) => map,
                other => {
                    return Err(ConfigError::KindMismatch {
                        path: KeyPath::from_segments(segs[..i].to_vec()).to_string(),
                        expected: "section".to_string(),
                        found: other.kind().to_string(),
                    });
                }
            };
            if i + 1 == segs.len() {
                match map.get_mut(seg) {
                    Some(slot) if slot.is_section() && value.is_section() => {
                        return slot.merge_from(value);
                    }
                    _ => {
                        map.insert(seg.clone(), value.clone());
                        return Ok(());
                    }
                }
            }
            node = map.entry(seg.clone()).or_insert_with(ConfigValue::section);
        }
        Ok(())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Num(n) => write!(f, "{}", n),
            ConfigValue::Str(s) => write!(f, "{}", s),
            ConfigValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(", "))
            }
            ConfigValue::Section(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => ConfigValue::Str(String::new()),
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::Number(n) => ConfigValue::Num(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => ConfigValue::Str(s),
            serde_json::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(map) => ConfigValue::Section(
                map.into_iter().map(|(k, v)| (k, ConfigValue::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Str(s.to_string())
    }
}

/// A setting key carried as explicit path segments from parse time onward.
/// The display form brackets every segment but the last: `[env]PATH`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn from_segments(segments: Vec<String>) -> Self {
        KeyPath(segments)
    }

    pub fn of(segments: &[&str]) -> Self {
        KeyPath(segments.iter().map(|s| s.to_string()).collect())
    }

    /// Parse the compact bracket form: `script`, `[env]PATH`, `[a][b]c`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut rest = s;
        while let Some(r) = rest.strip_prefix('[') {
            let end = r.find(']').ok_or_else(|| ConfigError::BadKeyPath(s.to_string()))?;
            let seg = r[..end].trim();
            if seg.is_empty() {
                return Err(ConfigError::BadKeyPath(s.to_string()));
            }
            segments.push(seg.to_string());
            rest = &r[end + 1..];
        }
        let tail = rest.trim();
        if !tail.is_empty() {
            if tail.contains('[') || tail.contains(']') {
                return Err(ConfigError::BadKeyPath(s.to_string()));
            }
            segments.push(tail.to_string());
        }
        if segments.is_empty() {
            return Err(ConfigError::BadKeyPath(s.to_string()));
        }
        Ok(KeyPath(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.len();
        for (i, seg) in self.0.iter().enumerate() {
            if i + 1 == n {
                write!(f, "{}", seg)?;
            } else {
                write!(f, "[{}]", seg)?;
            }
        }
        Ok(())
    }
}
