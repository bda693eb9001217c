use anyhow::Result;
use async_trait::async_trait;

use crate::config::ConfigValue;

use super::task::TaskKey;

/// Everything the platform layer needs to run one job attempt. The runtime
/// config has broadcasts already resolved into it.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub key: TaskKey,
    pub submit_num: u32,
    pub rtconfig: ConfigValue,
    /// Platform section from the global configuration, if one is defined.
    pub platform: Option<ConfigValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEventKind {
    Submitted,
    SubmitFailed(String),
    Started,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobEvent {
    pub key: TaskKey,
    pub kind: JobEventKind,
}

/// Platform-side job handling. The scheduler hands over preparing tasks and
/// drains progress events once per tick.
#[async_trait]
pub trait JobRunner: Send {
    async fn submit(&mut self, job: JobRequest) -> Result<()>;
    async fn poll(&mut self) -> Result<Vec<JobEvent>>;
}

enum Phase {
    AwaitSubmit(u32),
    AwaitStart,
    AwaitFinish,
}

/// Deterministic in-process runner: every poll moves each job one lifecycle
/// step forward. `with_submit_delay` keeps jobs in flight for extra polls
/// before the submission completes.
pub struct LocalJobRunner {
    submit_delay: u32,
    jobs: Vec<(TaskKey, Phase)>,
}

impl LocalJobRunner {
    pub fn new() -> Self {
        Self::with_submit_delay(1)
    }

    pub fn with_submit_delay(polls: u32) -> Self {
        LocalJobRunner {
            submit_delay: polls.max(1),
            jobs: Vec::new(),
        }
    }
}

impl Default for LocalJobRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRunner for LocalJobRunner {
    async fn submit(&mut self, job: JobRequest) -> Result<()> {
        self.jobs
            .push((job.key, Phase::AwaitSubmit(self.submit_delay)));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<JobEvent>> {
        let mut events = Vec::new();
        let mut done = Vec::new();
        for (i, (key, phase)) in self.jobs.iter_mut().enumerate() {
            match phase {
                Phase::AwaitSubmit(polls_left) => {
                    *polls_left -= 1;
                    if *polls_left == 0 {
                        events.push(JobEvent {
                            key: key.clone(),
                            kind: JobEventKind::Submitted,
                        });
                        *phase = Phase::AwaitStart;
                    }
                }
                Phase::AwaitStart => {
                    events.push(JobEvent {
                        key: key.clone(),
                        kind: JobEventKind::Started,
                    });
                    *phase = Phase::AwaitFinish;
                }
                Phase::AwaitFinish => {
                    events.push(JobEvent {
                        key: key.clone(),
                        kind: JobEventKind::Succeeded,
                    });
                    done.push(i);
                }
            }
        }
        for i in done.into_iter().rev() {
            self.jobs.remove(i);
        }
        Ok(events)
    }
}
