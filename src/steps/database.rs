//! Database-dump step.
//!
//! Dumps the tables and views discovered earlier into the run directory.
//! The in-progress marker is hidden for the duration of the dump so that a
//! restored snapshot never claims a backup is active, and a small manifest
//! (`filelist-sql.json`) hands the dump file to the archive step.

use crate::db::{DumpOptions, SiteDatabase};
use crate::error::{BackupError, Result};
use crate::filelist::ManifestEntry;
use crate::pipeline::step::{Step, StepContext};
use crate::progress::InProgressTracker;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

pub const SQL_MANIFEST: &str = "filelist-sql.json";

pub struct DatabaseStep {
    db: Arc<dyn SiteDatabase>,
    tracker: Arc<InProgressTracker>,
    dump_filepath: Option<PathBuf>,
    dumped: bool,
}

impl DatabaseStep {
    pub fn new(db: Arc<dyn SiteDatabase>, tracker: Arc<InProgressTracker>) -> Self {
        Self {
            db,
            tracker,
            dump_filepath: None,
            dumped: false,
        }
    }

    fn dump_options(&self, ctx: &StepContext<'_>) -> Result<DumpOptions> {
        let tables: Vec<String> = match ctx.step_info(super::DISCOVERY, "tables") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => {
                return Err(anyhow::anyhow!("discovery step published no table list").into());
            }
        };
        let views: Vec<String> = match ctx.step_info(super::DISCOVERY, "views") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };

        Ok(DumpOptions {
            include_tables: tables,
            include_views: views,
            add_drop_table: true,
            default_character_set: self.db.charset().map(str::to_string),
        })
    }
}

#[async_trait]
impl Step for DatabaseStep {
    fn name(&self) -> &'static str {
        super::DATABASE
    }

    async fn pre(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        // Timestamp to the second keeps the name unique within a run.
        let filename = format!(
            "{}.{}.sql",
            self.db.name(),
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        ctx.set_info("db_filename", json!(filename));
        self.dump_filepath = Some(ctx.path_to(&filename));

        self.tracker.pre_dump()
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let options = self.dump_options(ctx)?;

        // A dump that silently skips views is an incomplete backup, so the
        // privilege gate fires before any file is written.
        if !options.include_views.is_empty() && !self.db.has_privileges(&["SHOW VIEW"]).await? {
            return Err(BackupError::Permission(
                "The database contains views, but the database user does not have \
                 the permissions needed to create a backup."
                    .into(),
            ));
        }

        let path = self
            .dump_filepath
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("dump path not prepared"))?;

        self.db.dump_to(path, &options).await.map_err(|e| match e {
            BackupError::Dump(_) | BackupError::Permission(_) => e,
            other => BackupError::Dump(other.to_string()),
        })?;

        self.dumped = true;
        Ok(())
    }

    async fn post(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        ctx.set_info("db_time_stop", json!(chrono::Utc::now().timestamp()));
        self.tracker.post_dump()?;

        if self.dumped {
            if let Some(path) = &self.dump_filepath {
                let size = std::fs::metadata(path)?.len();
                let basename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let manifest = vec![ManifestEntry(path.clone(), basename, size)];
                std::fs::write(
                    ctx.path_to(SQL_MANIFEST),
                    serde_json::to_string(&manifest)?,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filelist::read_manifest;
    use crate::pipeline::run::Run;
    use crate::settings::MemorySettingsStore;
    use crate::steps::{DATABASE, DISCOVERY};
    use std::path::Path;
    use tempfile::TempDir;

    struct StubDatabase {
        views: Vec<String>,
        has_show_view: bool,
    }

    #[async_trait]
    impl SiteDatabase for StubDatabase {
        fn name(&self) -> &str {
            "site"
        }

        fn charset(&self) -> Option<&str> {
            None
        }

        async fn table_names(&self) -> Result<Vec<String>> {
            Ok(vec!["wp_posts".into()])
        }

        async fn view_names(&self) -> Result<Vec<String>> {
            Ok(self.views.clone())
        }

        async fn has_privileges(&self, _privileges: &[&str]) -> Result<bool> {
            Ok(self.has_show_view)
        }

        async fn dump_to(&self, path: &Path, _options: &DumpOptions) -> Result<()> {
            std::fs::write(path, b"-- stub dump\n")?;
            Ok(())
        }
    }

    fn run_with_discovery(dir: &Path, views: &[&str]) -> Run {
        let names = vec![DISCOVERY.to_string(), DATABASE.to_string()];
        let mut run = Run::new(&names, dir.to_path_buf(), 0);
        run.steps[0]
            .data
            .insert("tables".into(), json!(["wp_posts"]));
        run.steps[0].data.insert("views".into(), json!(views));
        run.next_step = 1;
        run
    }

    fn tracker() -> Arc<InProgressTracker> {
        Arc::new(InProgressTracker::new(Arc::new(MemorySettingsStore::new())))
    }

    #[tokio::test]
    async fn view_gate_blocks_dump_without_show_view() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let tracker = tracker();
        tracker.set(Some(42))?;

        let db = Arc::new(StubDatabase {
            views: vec!["v_totals".into()],
            has_show_view: false,
        });
        let mut step = DatabaseStep::new(db, tracker.clone());
        let mut run = run_with_discovery(dir.path(), &["v_totals"]);
        let mut ctx = StepContext::new(&mut run, 1);

        step.pre(&mut ctx).await?;
        // The marker is hidden for the duration of the dump.
        assert_eq!(tracker.get()?, None);

        let err = step.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BackupError::Permission(_)));
        assert!(err.to_string().contains("views"));

        step.post(&mut ctx).await?;
        assert_eq!(tracker.get()?, Some(42));

        // The gate fired before anything touched the run directory.
        assert!(std::fs::read_dir(dir.path())?.next().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn view_dump_proceeds_with_show_view() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(StubDatabase {
            views: vec!["v_totals".into()],
            has_show_view: true,
        });
        let mut step = DatabaseStep::new(db, tracker());
        let mut run = run_with_discovery(dir.path(), &["v_totals"]);
        let mut ctx = StepContext::new(&mut run, 1);

        step.pre(&mut ctx).await?;
        step.run(&mut ctx).await?;
        step.post(&mut ctx).await?;
        assert!(dir.path().join(SQL_MANIFEST).exists());
        Ok(())
    }

    #[tokio::test]
    async fn dump_publishes_manifest_and_restores_marker() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let tracker = tracker();
        tracker.set(Some(1_700_000_000))?;

        let db = Arc::new(StubDatabase {
            views: Vec::new(),
            has_show_view: false,
        });
        let mut step = DatabaseStep::new(db, tracker.clone());
        let mut run = run_with_discovery(dir.path(), &[]);
        let mut ctx = StepContext::new(&mut run, 1);

        step.pre(&mut ctx).await?;
        step.run(&mut ctx).await?;
        step.post(&mut ctx).await?;

        assert_eq!(tracker.get()?, Some(1_700_000_000));

        let filename: String =
            serde_json::from_value(run.steps[1].data["db_filename"].clone())?;
        assert!(filename.starts_with("site."));
        assert!(filename.ends_with(".sql"));

        let manifest = read_manifest(&dir.path().join(SQL_MANIFEST))?;
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].0, dir.path().join(&filename));
        assert_eq!(manifest[0].1, filename);
        assert_eq!(manifest[0].2, b"-- stub dump\n".len() as u64);
        Ok(())
    }
}
