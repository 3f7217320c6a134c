//! The step contract and the registered step set.
//!
//! Steps are wired up as an explicit ordered list of named factories; the
//! orchestrator builds a fresh step instance per attempt. There is no
//! dynamic dispatch beyond this registration.

use crate::error::Result;
use crate::pipeline::run::Run;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// What a step sees while executing: its own record (for published info)
/// and read access to earlier steps' records.
pub struct StepContext<'a> {
    run: &'a mut Run,
    index: usize,
}

impl<'a> StepContext<'a> {
    pub fn new(run: &'a mut Run, index: usize) -> Self {
        Self { run, index }
    }

    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    pub fn dir(&self) -> &Path {
        &self.run.dir
    }

    /// Private working path for intermediate files.
    pub fn path_to(&self, file_name: &str) -> PathBuf {
        self.run.dir.join(file_name)
    }

    pub fn attempts(&self) -> u32 {
        self.run.steps[self.index].attempts
    }

    /// Publish a key/value pair on this step's record.
    pub fn set_info(&mut self, key: &str, value: Value) {
        self.run.steps[self.index].data.insert(key.to_string(), value);
    }

    /// Read this step's own published data.
    pub fn info(&self, key: &str) -> Option<&Value> {
        self.run.steps[self.index].data.get(key)
    }

    /// Read data published by another step (e.g. discovery output).
    pub fn step_info(&self, step_name: &str, key: &str) -> Option<&Value> {
        self.run.record(step_name).and_then(|record| record.data.get(key))
    }
}

/// One unit of pipeline work.
///
/// The orchestrator owns attempt counting and completion marking; a step
/// only does its work. `post` runs after `run` whether it succeeded or not,
/// so cleanup hooks (like restoring the in-progress marker) always fire.
/// A step may be re-invoked with partial artifacts on disk after a crash
/// and must tolerate that.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn pre(&mut self, _ctx: &mut StepContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()>;

    async fn post(&mut self, _ctx: &mut StepContext<'_>) -> Result<()> {
        Ok(())
    }
}

pub type StepFactory = Box<dyn Fn() -> Box<dyn Step> + Send + Sync>;

/// Explicit, ordered registration of the steps forming one pipeline.
#[derive(Default)]
pub struct StepSet {
    entries: Vec<(String, StepFactory)>,
}

impl StepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Step> + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), Box::new(factory)));
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn build(&self, name: &str) -> Option<Box<dyn Step>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
