use std::fs;
use std::path::Path;

use crate::dsl::WorkflowDef;
use crate::error::ConfigError;

use super::ConfigValue;

/// Read, parse and validate a workflow definition file.
pub fn load_workflow(path: &Path) -> Result<WorkflowDef, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_workflow(&text)
}

pub fn parse_workflow(text: &str) -> Result<WorkflowDef, ConfigError> {
    let def: WorkflowDef = serde_yaml::from_str(text)?;
    def.validate()?;
    Ok(def)
}

/// Read a bare config tree, e.g. one global configuration layer.
pub fn load_config_tree(path: &Path) -> Result<ConfigValue, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let tree: ConfigValue = serde_yaml::from_str(&text)?;
    Ok(tree)
}
