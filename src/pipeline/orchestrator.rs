//! Run lifecycle orchestration.
//!
//! Owns start/resume/abort across process boundaries. The in-progress
//! marker's atomic check-and-set is the single-flight gate; the checkpoint
//! written after every step makes the loop safe to interrupt between steps.

use crate::error::{BackupError, Result};
use crate::notice::{NoticeSink, Severity};
use crate::pipeline::run::{Run, RunStatus, StepStatus};
use crate::pipeline::step::{StepContext, StepSet};
use crate::progress::InProgressTracker;
use crate::settings::SettingsStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Time budget exhausted; the run stays `running` and the next
    /// invocation's `resume()` continues it.
    Suspended,
}

pub struct Orchestrator {
    steps: StepSet,
    store: Arc<dyn SettingsStore>,
    tracker: Arc<InProgressTracker>,
    notices: Arc<dyn NoticeSink>,
    state_path: PathBuf,
    max_attempts: u32,
    time_budget: Option<Duration>,
}

impl Orchestrator {
    pub fn new(
        steps: StepSet,
        store: Arc<dyn SettingsStore>,
        tracker: Arc<InProgressTracker>,
        notices: Arc<dyn NoticeSink>,
        state_path: PathBuf,
    ) -> Self {
        Self {
            steps,
            store,
            tracker,
            notices,
            state_path,
            max_attempts: 3,
            time_budget: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Begin a new run in `dir`. Fails with `Conflict` when another run
    /// holds the in-progress marker.
    pub async fn start(&self, dir: PathBuf) -> Result<RunOutcome> {
        let started_at = chrono::Utc::now().timestamp();

        if !self.store.try_set_in_progress(started_at)? {
            let held_since = self.store.get()?.in_progress.unwrap_or(started_at);
            return Err(BackupError::Conflict(held_since));
        }

        // Past this point the marker is ours; it must not outlive a start
        // that failed to launch, or every later start conflicts forever.
        match self.launch(dir, started_at).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Ok(Some(mut run)) = Run::load(&self.state_path) {
                    if run.status == RunStatus::Running {
                        run.status = RunStatus::Failed;
                        let _ = run.save(&self.state_path);
                    }
                }
                self.tracker.end()?;
                Err(e)
            }
        }
    }

    async fn launch(&self, dir: PathBuf, started_at: i64) -> Result<RunOutcome> {
        std::fs::create_dir_all(&dir)?;
        let mut run = Run::new(&self.steps.names(), dir, started_at);
        run.status = RunStatus::Running;
        run.save(&self.state_path)?;

        tracing::info!(run_id = %run.id, dir = %run.dir.display(), "Starting backup run");
        self.execute(&mut run, Instant::now()).await
    }

    /// Continue a previously persisted run; no-op when none exists or the
    /// last run already finished.
    pub async fn resume(&self) -> Result<Option<RunOutcome>> {
        let Some(mut run) = Run::load(&self.state_path)? else {
            return Ok(None);
        };
        if run.status != RunStatus::Running {
            return Ok(None);
        }

        tracing::info!(
            run_id = %run.id,
            next_step = run.next_step,
            "Resuming backup run"
        );
        let outcome = self.execute(&mut run, Instant::now()).await?;
        Ok(Some(outcome))
    }

    /// Explicit cancellation. Idempotent; always releases the single-flight
    /// marker.
    pub async fn abort(&self) -> Result<()> {
        if let Some(mut run) = Run::load(&self.state_path)? {
            if run.status == RunStatus::Running {
                if let Some(record) = run.steps.get_mut(run.next_step) {
                    record.status = StepStatus::Failed;
                    record.last_error = Some("aborted".into());
                }
                run.status = RunStatus::Failed;
                run.save(&self.state_path)?;
                tracing::info!(run_id = %run.id, "Backup run aborted");
            }
        }
        self.tracker.end()
    }

    async fn execute(&self, run: &mut Run, invocation_start: Instant) -> Result<RunOutcome> {
        while run.next_step < run.steps.len() {
            if let Some(budget) = self.time_budget {
                if invocation_start.elapsed() >= budget {
                    run.save(&self.state_path)?;
                    tracing::info!(
                        run_id = %run.id,
                        next_step = run.next_step,
                        "Time budget exhausted, suspending until next invocation"
                    );
                    return Ok(RunOutcome::Suspended);
                }
            }

            let index = run.next_step;
            let name = run.steps[index].name.clone();
            let mut step = self
                .steps
                .build(&name)
                .ok_or_else(|| anyhow::anyhow!("no registered step named {name}"))?;

            {
                let record = &mut run.steps[index];
                record.status = StepStatus::Running;
                record.attempts += 1;
            }
            run.save(&self.state_path)?;
            let attempts = run.steps[index].attempts;
            tracing::info!(run_id = %run.id, step = %name, attempts, "Running step");

            let result = {
                let mut ctx = StepContext::new(run, index);
                match step.pre(&mut ctx).await {
                    Ok(()) => {
                        let run_result = step.run(&mut ctx).await;
                        // post always fires so hooks can undo what pre did.
                        let post_result = step.post(&mut ctx).await;
                        match (run_result, post_result) {
                            (Err(e), _) => Err(e),
                            (Ok(()), post) => post,
                        }
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(()) => {
                    let record = &mut run.steps[index];
                    record.status = StepStatus::Complete;
                    record.last_error = None;
                    run.next_step += 1;
                    run.save(&self.state_path)?;
                    tracing::info!(run_id = %run.id, step = %name, "Step complete");
                }
                Err(e) if e.is_retryable() && attempts < self.max_attempts => {
                    let record = &mut run.steps[index];
                    record.status = StepStatus::NotStarted;
                    record.last_error = Some(e.to_string());
                    run.save(&self.state_path)?;
                    tracing::warn!(
                        run_id = %run.id,
                        step = %name,
                        attempts,
                        error = %e,
                        "Step failed, will retry"
                    );
                }
                Err(e) => {
                    let record = &mut run.steps[index];
                    record.status = StepStatus::Failed;
                    record.last_error = Some(e.to_string());
                    run.status = RunStatus::Failed;
                    run.save(&self.state_path)?;
                    self.tracker.end()?;
                    self.notices
                        .notify(&format!("Backup failed at step {name}: {e}"), Severity::Error);
                    return Err(e);
                }
            }
        }

        run.status = RunStatus::Completed;
        run.save(&self.state_path)?;
        self.tracker.end()?;
        self.notices.notify("Backup completed.", Severity::Info);
        tracing::info!(run_id = %run.id, "Backup run completed");
        Ok(RunOutcome::Completed)
    }
}
