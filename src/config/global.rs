use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;

use super::schema::Schema;
use super::{loader, ConfigValue, KeyPath};

/// Site and user configuration merged into a single context object. The
/// scheduler keeps the current instance behind an `Arc` and swaps the whole
/// object on reload, so a failed reload leaves readers on the old one.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    cfg: ConfigValue,
    site_file: Option<PathBuf>,
    user_file: Option<PathBuf>,
}

impl GlobalConfig {
    pub fn defaults() -> Self {
        GlobalConfig {
            cfg: Schema::global().defaults().clone(),
            site_file: None,
            user_file: None,
        }
    }

    /// Layer the site file then the user file over the defaults. Missing
    /// files are skipped; present files must validate.
    pub fn load(site_file: Option<&Path>, user_file: Option<&Path>) -> Result<Self, ConfigError> {
        let schema = Schema::global();
        let mut cfg = schema.defaults().clone();
        for file in [site_file, user_file].into_iter().flatten() {
            if !file.is_file() {
                debug!(file = %file.display(), "skipping absent global config file");
                continue;
            }
            let layer = loader::load_config_tree(file)?;
            schema.validate_tree(&layer)?;
            cfg.merge_from(&layer)?;
        }
        Ok(GlobalConfig {
            cfg,
            site_file: site_file.map(Path::to_path_buf),
            user_file: user_file.map(Path::to_path_buf),
        })
    }

    /// Re-read the same files into a fresh instance.
    pub fn reload(&self) -> Result<Self, ConfigError> {
        Self::load(self.site_file.as_deref(), self.user_file.as_deref())
    }

    pub fn cfg(&self) -> &ConfigValue {
        &self.cfg
    }

    pub fn get(&self, path: &KeyPath) -> Option<&ConfigValue> {
        self.cfg.lookup(path)
    }

    /// The section configured for a job platform, if any.
    pub fn platform(&self, name: &str) -> Option<&ConfigValue> {
        self.cfg.lookup(&KeyPath::of(&["platforms", name]))
    }

    pub fn tick_interval(&self) -> Duration {
        let ms = self
            .get(&KeyPath::of(&["scheduler", "tick_interval_ms"]))
            .and_then(ConfigValue::as_num)
            .unwrap_or(100.0);
        Duration::from_millis(ms.max(1.0) as u64)
    }

    pub fn event_bus_capacity(&self) -> usize {
        self.get(&KeyPath::of(&["scheduler", "event_bus_capacity"]))
            .and_then(ConfigValue::as_num)
            .unwrap_or(256.0)
            .max(1.0) as usize
    }
}
