//! Discovery step: records what the later steps will operate on.

use crate::db::SiteDatabase;
use crate::error::Result;
use crate::pipeline::step::{Step, StepContext};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

pub struct DiscoveryStep {
    db: Arc<dyn SiteDatabase>,
    site_root: PathBuf,
}

impl DiscoveryStep {
    pub fn new(db: Arc<dyn SiteDatabase>, site_root: PathBuf) -> Self {
        Self { db, site_root }
    }
}

#[async_trait]
impl Step for DiscoveryStep {
    fn name(&self) -> &'static str {
        super::DISCOVERY
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let tables = self.db.table_names().await?;
        let views = self.db.view_names().await?;

        tracing::info!(
            tables = tables.len(),
            views = views.len(),
            "Discovered database objects"
        );

        ctx.set_info("tables", json!(tables));
        ctx.set_info("views", json!(views));
        ctx.set_info("site_root", json!(self.site_root.display().to_string()));
        Ok(())
    }
}
