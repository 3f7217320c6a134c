//! Archive-assembly step.
//!
//! Packages the dump file and every categorized filelist into a single
//! compressed tarball inside the run directory, using the best compressor
//! the prober found.

use crate::compressor::{self, LIB_TAR_GZ, LIB_ZSTD};
use crate::error::Result;
use crate::filelist::{read_manifest, FileKind, ManifestEntry};
use crate::pipeline::step::{Step, StepContext};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tar::Builder as TarBuilder;

pub struct ArchiveStep;

impl ArchiveStep {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArchiveStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for ArchiveStep {
    fn name(&self) -> &'static str {
        super::ARCHIVE
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        let compressor = select_compressor()?;
        let short_id: String = ctx.run_id().chars().take(8).collect();
        let extension = if compressor == LIB_ZSTD { "tar.zst" } else { "tar.gz" };
        let archive_name = format!(
            "backup-{}-{}.{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S"),
            short_id,
            extension
        );

        let run_dir = ctx.dir().to_path_buf();
        let archive_path = ctx.path_to(&archive_name);

        let entries = collect_entries(&run_dir)?;
        tracing::info!(
            entries = entries.len(),
            compressor,
            archive = %archive_name,
            "Assembling archive"
        );

        let size = tokio::task::spawn_blocking(move || {
            build_archive(&entries, &archive_path, compressor)
        })
        .await
        .map_err(|e| anyhow::anyhow!("archive task panicked: {e}"))??;

        ctx.set_info("archive", json!(archive_name));
        ctx.set_info("archive_size", json!(size));
        ctx.set_info("compressor", json!(compressor));
        Ok(())
    }
}

fn select_compressor() -> Result<&'static str> {
    for candidate in [LIB_TAR_GZ, LIB_ZSTD] {
        if compressor::is_compressor_available(candidate) {
            return Ok(candidate);
        }
    }
    Err(anyhow::anyhow!("no usable compressor detected").into())
}

/// Gather every manifest written earlier in the run: the SQL filelist plus
/// one manifest per file category.
fn collect_entries(run_dir: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();

    let sql_manifest = run_dir.join(super::database::SQL_MANIFEST);
    if sql_manifest.exists() {
        entries.extend(read_manifest(&sql_manifest)?);
    }
    for kind in FileKind::ALL {
        let manifest = run_dir.join(kind.manifest_name());
        if manifest.exists() {
            entries.extend(read_manifest(&manifest)?);
        }
    }

    Ok(entries)
}

fn build_archive(entries: &[ManifestEntry], archive_path: &Path, compressor: &str) -> Result<u64> {
    if compressor == LIB_ZSTD {
        let file = File::create(archive_path)?;
        let encoder = zstd::stream::write::Encoder::new(file, 3)?.auto_finish();
        let mut builder = TarBuilder::new(encoder);
        append_entries(&mut builder, entries)?;
        builder.finish()?;
    } else {
        let file = File::create(archive_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = TarBuilder::new(encoder);
        append_entries(&mut builder, entries)?;
        let encoder = builder.into_inner()?;
        encoder.finish()?;
    }

    Ok(std::fs::metadata(archive_path)?.len())
}

fn append_entries<W: Write>(builder: &mut TarBuilder<W>, entries: &[ManifestEntry]) -> Result<()> {
    for ManifestEntry(path, name, _) in entries {
        if !path.exists() {
            // The tree may have changed since the filelist pass.
            tracing::warn!(path = %path.display(), "File vanished before archiving, skipping");
            continue;
        }
        builder.append_path_with_name(path, name)?;
    }
    Ok(())
}
