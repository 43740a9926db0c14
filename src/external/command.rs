//! Local process backend.
//!
//! [`CommandExternalService`] runs one child process per slot. Arguments may
//! contain `${workflow}` and the time tokens understood by
//! [`ScheduledTime::substitute`], and the child sees the slot through these
//! environment variables:
//!
//! - `HOURGLASS_WORKFLOW`
//! - `HOURGLASS_SCHEDULED_TIME`
//! - `HOURGLASS_NOMINAL_TIME`
//!
//! ```rust
//! use hourglass::external::CommandExternalService;
//! use std::time::Duration;
//!
//! let service = CommandExternalService::builder("python")
//!     .args(["-m", "etl.hourly", "--hour", "${year}-${month}-${day}T${hour}"])
//!     .env("LOG_LEVEL", "info")
//!     .timeout(Duration::from_secs(3600))
//!     .build();
//! ```
//!
//! Jobs live in memory, and only until their final status has been reported
//! once or they are killed. After that, and after a restart, the id is
//! unknown and reports [`ExternalStatus::Failure`], which sends the slot down
//! the retry path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

use super::{ExternalService, ExternalServiceError, ExternalStatus};
use crate::core::time::ScheduledTime;
use crate::core::types::{ExternalId, SlotId};

enum Job {
    Submitted,
    Started { child: Child, started_at: Instant },
}

/// Runs each slot as a local child process.
pub struct CommandExternalService {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    jobs: Mutex<HashMap<ExternalId, (SlotId, Job)>>,
}

impl std::fmt::Debug for CommandExternalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExternalService")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CommandExternalService {
    /// Create a new builder for the given program.
    pub fn builder(program: impl Into<String>) -> CommandExternalServiceBuilder {
        CommandExternalServiceBuilder::new(program)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of jobs submitted or running whose outcome has not been
    /// reported yet.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    /// Arguments with the slot's workflow and time tokens filled in.
    pub fn resolved_args(&self, slot_id: &SlotId) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| substitute(arg, slot_id))
            .collect()
    }

    fn command(&self, slot_id: &SlotId) -> Command {
        let time: ScheduledTime = slot_id.scheduled_time();
        let mut cmd = Command::new(&self.program);
        cmd.args(self.resolved_args(slot_id));
        for (key, value) in &self.env {
            cmd.env(key, substitute(value, slot_id));
        }
        cmd.env("HOURGLASS_WORKFLOW", slot_id.workflow_id().as_str())
            .env("HOURGLASS_SCHEDULED_TIME", time.to_string())
            .env("HOURGLASS_NOMINAL_TIME", time.nominal_time());
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

fn substitute(template: &str, slot_id: &SlotId) -> String {
    slot_id
        .scheduled_time()
        .substitute(&template.replace("${workflow}", slot_id.workflow_id().as_str()))
}

#[async_trait]
impl ExternalService for CommandExternalService {
    async fn submit(&self, slot_id: &SlotId) -> Result<ExternalId, ExternalServiceError> {
        let external_id = ExternalId::generate();
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?;
        jobs.insert(external_id.clone(), (slot_id.clone(), Job::Submitted));
        Ok(external_id)
    }

    async fn start(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?;
        let (_, job) = jobs
            .get_mut(external_id)
            .ok_or_else(|| ExternalServiceError::UnknownJob(external_id.clone()))?;

        if !matches!(job, Job::Submitted) {
            return Err(ExternalServiceError::Start {
                external_id: external_id.clone(),
                message: "job was already started".to_string(),
            });
        }

        let child = match self.command(slot_id).spawn() {
            Ok(child) => child,
            Err(e) => {
                jobs.remove(external_id);
                return Err(ExternalServiceError::Start {
                    external_id: external_id.clone(),
                    message: e.to_string(),
                });
            }
        };
        tracing::info!(
            slot = %slot_id,
            external_id = %external_id,
            pid = ?child.id(),
            "Started command"
        );
        *job = Job::Started {
            child,
            started_at: Instant::now(),
        };
        Ok(())
    }

    async fn status(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<ExternalStatus, ExternalServiceError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?;
        let Some((_, job)) = jobs.get_mut(external_id) else {
            tracing::warn!(
                slot = %slot_id,
                external_id = %external_id,
                "Unknown job, reporting failure"
            );
            return Ok(ExternalStatus::Failure);
        };

        let status = match job {
            Job::Submitted => ExternalStatus::Failure,
            Job::Started { child, started_at } => {
                let exit = child.try_wait().map_err(|e| ExternalServiceError::Status {
                    external_id: external_id.clone(),
                    message: e.to_string(),
                })?;
                match exit {
                    Some(exit) if exit.success() => ExternalStatus::Success,
                    Some(exit) => {
                        tracing::debug!(external_id = %external_id, code = ?exit.code(), "Command failed");
                        ExternalStatus::Failure
                    }
                    None => match self.timeout {
                        Some(limit) if started_at.elapsed() > limit => {
                            tracing::warn!(
                                slot = %slot_id,
                                external_id = %external_id,
                                timeout = ?limit,
                                "Command timed out, killing"
                            );
                            // Reaped by kill_on_drop once the entry is removed
                            let _ = child.start_kill();
                            ExternalStatus::Failure
                        }
                        _ => ExternalStatus::Running,
                    },
                }
            }
        };

        if !status.is_running() {
            jobs.remove(external_id);
        }
        Ok(status)
    }

    async fn kill(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| ExternalServiceError::LockPoisoned)?;
        let (_, job) = jobs
            .get_mut(external_id)
            .ok_or_else(|| ExternalServiceError::UnknownJob(external_id.clone()))?;

        if let Job::Started { child, .. } = job {
            child.start_kill().map_err(|e| ExternalServiceError::Kill {
                external_id: external_id.clone(),
                message: e.to_string(),
            })?;
        }
        jobs.remove(external_id);
        tracing::info!(slot = %slot_id, external_id = %external_id, "Killed command");
        Ok(())
    }
}

/// Builder for [`CommandExternalService`].
#[derive(Debug, Clone)]
pub struct CommandExternalServiceBuilder {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandExternalServiceBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Kill jobs that run longer than this.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> CommandExternalService {
        CommandExternalService {
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
            timeout: self.timeout,
            jobs: Mutex::new(HashMap::new()),
        }
    }
}
