//! Remote-transfer step.
//!
//! Uploads the finished archive over SFTP and then prunes remote archives
//! beyond the configured retention count. When no remote credentials are
//! configured the step is a no-op with an informational notice, so local
//! backups keep working without a remote.

use crate::error::Result;
use crate::notice::{NoticeSink, Severity};
use crate::pipeline::step::{Step, StepContext};
use crate::remote::{SftpClient, REMOTE_BACKUP_DIR, REMOTE_KEY};
use crate::settings::SettingsStore;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub struct UploadStep {
    store: Arc<dyn SettingsStore>,
    notices: Arc<dyn NoticeSink>,
}

impl UploadStep {
    pub fn new(store: Arc<dyn SettingsStore>, notices: Arc<dyn NoticeSink>) -> Self {
        Self { store, notices }
    }
}

#[async_trait]
impl Step for UploadStep {
    fn name(&self) -> &'static str {
        super::UPLOAD
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let credential = self
            .store
            .get()?
            .remote
            .get(REMOTE_KEY)
            .cloned()
            .unwrap_or_default();

        if !credential.is_configured() {
            self.notices.notify(
                "No remote storage configured; the archive stays local.",
                Severity::Info,
            );
            ctx.set_info("uploaded", json!(false));
            return Ok(());
        }

        let archive_name: String = match ctx.step_info(super::ARCHIVE, "archive") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => {
                return Err(anyhow::anyhow!("archive step published no archive name").into());
            }
        };
        let local = ctx.path_to(&archive_name);
        let retention_count = credential.retention_count;

        // ssh2 is synchronous; the whole transfer runs off the async runtime.
        let pruned = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut client = SftpClient::from_credential(&credential);
            client.upload(&local, REMOTE_BACKUP_DIR)?;
            let pruned = client.enforce_retention(REMOTE_BACKUP_DIR, retention_count)?;
            client.disconnect();
            Ok(pruned)
        })
        .await
        .map_err(|e| anyhow::anyhow!("upload task panicked: {e}"))??;

        tracing::info!(
            archive = %archive_name,
            pruned = pruned.len(),
            "Archive uploaded to remote storage"
        );
        ctx.set_info("uploaded", json!(true));
        ctx.set_info("pruned", json!(pruned));
        Ok(())
    }
}
