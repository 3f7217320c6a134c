//! Persisted run state.
//!
//! One `Run` is one backup attempt. The whole struct is the checkpoint: it
//! is rewritten (atomically, tmp + rename) after every step so a later
//! invocation can pick up exactly where this one stopped.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    Running,
    Complete,
    Failed,
}

/// Per-step execution record, owned by the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    /// Only ever increases, across process restarts too.
    pub attempts: u32,
    pub status: StepStatus,
    /// Step-published key/value data, readable by later steps.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StepRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempts: 0,
            status: StepStatus::NotStarted,
            data: serde_json::Map::new(),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Working directory holding the dump, manifests and archive.
    pub dir: PathBuf,
    pub steps: Vec<StepRecord>,
    /// Index of the next step to execute; steps before it are complete.
    pub next_step: usize,
    pub status: RunStatus,
    pub started_at: i64,
}

impl Run {
    pub fn new(step_names: &[String], dir: PathBuf, started_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            dir,
            steps: step_names
                .iter()
                .map(|name| StepRecord::new(name.as_str()))
                .collect(),
            next_step: 0,
            status: RunStatus::Pending,
            started_at,
        }
    }

    /// Load the checkpoint; `None` when no run has been persisted.
    pub fn load(path: &Path) -> Result<Option<Run>> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the checkpoint atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn record(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn load_missing_checkpoint_is_none() -> Result<()> {
        let dir = TempDir::new().unwrap();
        assert!(Run::load(&dir.path().join("run-state.json"))?.is_none());
        Ok(())
    }

    #[test]
    fn checkpoint_roundtrip() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("run-state.json");

        let mut run = Run::new(
            &names(&["discovery", "database"]),
            dir.path().join("run-1"),
            1_700_000_000,
        );
        run.status = RunStatus::Running;
        run.steps[0].status = StepStatus::Complete;
        run.steps[0].attempts = 1;
        run.steps[0]
            .data
            .insert("tables".into(), serde_json::json!(["wp_posts"]));
        run.next_step = 1;
        run.save(&state_path)?;

        let loaded = Run::load(&state_path)?.unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.next_step, 1);
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.steps[0].status, StepStatus::Complete);
        assert_eq!(
            loaded.record("discovery").unwrap().data["tables"],
            serde_json::json!(["wp_posts"])
        );
        Ok(())
    }

    #[test]
    fn save_overwrites_previous_checkpoint() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("run-state.json");

        let mut run = Run::new(&names(&["a"]), dir.path().to_path_buf(), 0);
        run.save(&state_path)?;
        run.next_step = 1;
        run.status = RunStatus::Completed;
        run.save(&state_path)?;

        let loaded = Run::load(&state_path)?.unwrap();
        assert_eq!(loaded.next_step, 1);
        assert!(loaded.is_finished());
        Ok(())
    }
}
