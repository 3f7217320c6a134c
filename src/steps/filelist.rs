//! Filelist-creation step.

use crate::error::Result;
use crate::filelist::FilelistBuilder;
use crate::fs::FileEnumerator;
use crate::pipeline::step::{Step, StepContext};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

pub struct FilelistStep {
    enumerator: Arc<dyn FileEnumerator>,
    site_root: PathBuf,
}

impl FilelistStep {
    pub fn new(enumerator: Arc<dyn FileEnumerator>, site_root: PathBuf) -> Self {
        Self {
            enumerator,
            site_root,
        }
    }
}

#[async_trait]
impl Step for FilelistStep {
    fn name(&self) -> &'static str {
        super::FILELIST
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let enumerator = Arc::clone(&self.enumerator);
        let root = self.site_root.clone();
        let run_dir = ctx.dir().to_path_buf();

        // The walk is CPU- and I/O-bound; keep it off the async runtime.
        let (total_size, file_count) = tokio::task::spawn_blocking(move || -> Result<(u64, usize)> {
            let mut builder = FilelistBuilder::new();
            let lists = builder.run(enumerator.as_ref(), &root)?;
            let file_count = lists.values().map(|files| files.len()).sum();
            builder.write_manifests(&run_dir)?;
            Ok((builder.total_size(), file_count))
        })
        .await
        .map_err(|e| anyhow::anyhow!("filelist task panicked: {e}"))??;

        tracing::info!(file_count, total_size, "Filelist manifests written");
        ctx.set_info("total_size", json!(total_size));
        ctx.set_info("file_count", json!(file_count));
        Ok(())
    }
}
