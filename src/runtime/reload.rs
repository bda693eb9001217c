use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::config::global::GlobalConfig;
use crate::config::loader;
use crate::dsl::WorkflowDef;

/// Pause reason used while a reload waits for submissions to drain.
pub const RELOAD_PAUSE_REASON: &str = "Reloading workflow";

/// Ticks a drain may pend before the wait is logged as suspicious.
const DRAIN_WARN_TICKS: u32 = 100;

#[derive(Debug, Clone, Copy)]
struct PendingReload {
    reload_global: bool,
    ticks_waited: u32,
}

/// What a completed reload attempt produced.
pub enum ReloadResult {
    /// New definition (and optionally a new global context) ready to swap in.
    Swapped {
        def: Box<WorkflowDef>,
        global: Option<GlobalConfig>,
    },
    /// The new configuration was rejected; everything stays as it was.
    Aborted,
}

/// Defers a requested reload until no task is mid-submission, then loads
/// and validates the new configuration. The coordinator never swaps state
/// itself; it hands the loaded result back to the scheduling loop.
#[derive(Debug, Default)]
pub struct ReloadCoordinator {
    pending: Option<PendingReload>,
}

impl ReloadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, reload_global: bool) {
        self.pending = Some(PendingReload {
            reload_global,
            ticks_waited: 0,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop a deferred reload, e.g. when the operator resumes instead.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Re-check the drain condition and run the reload once it clears.
    /// Returns None while nothing is pending or tasks are still preparing.
    pub fn poll(
        &mut self,
        draining: bool,
        source: &Path,
        global: &GlobalConfig,
    ) -> Option<ReloadResult> {
        if draining {
            let pending = self.pending.as_mut()?;
            pending.ticks_waited += 1;
            if pending.ticks_waited == DRAIN_WARN_TICKS {
                warn!(
                    ticks = pending.ticks_waited,
                    "reload still waiting for preparing tasks"
                );
            } else {
                debug!("reload deferred, tasks still preparing");
            }
            return None;
        }
        let pending = self.pending.take()?;

        let mut new_global = None;
        if pending.reload_global {
            info!("Reloading the global configuration.");
            match global.reload() {
                Ok(fresh) => new_global = Some(fresh),
                Err(e) => {
                    debug!(error = ?e, "global configuration reload failed");
                    error!(
                        "Reload failed - {}: {}\nThis is probably due to an issue with the new configuration.",
                        e.kind_str(),
                        e
                    );
                    return Some(ReloadResult::Aborted);
                }
            }
        }

        match loader::load_workflow(source) {
            Ok(def) => {
                info!("Reloading the workflow definition.");
                Some(ReloadResult::Swapped {
                    def: Box::new(def),
                    global: new_global,
                })
            }
            Err(e) => {
                error!(
                    "Reload failed - {}: {}\nThis is probably due to an issue with the new configuration.",
                    e.kind_str(),
                    e
                );
                Some(ReloadResult::Aborted)
            }
        }
    }
}
