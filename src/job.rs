use crate::{config::Config, util::ensure_dir};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::warn;

/// Declared file type of the source document, as reported by the job source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclaredFormat {
    SlideDeck,
    WordDoc,
    LegacySlideDeck,
    LegacyWordDoc,
    Pdf,
    Other,
}

impl DeclaredFormat {
    pub fn from_file_type(file_type: &str) -> Self {
        match file_type.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pptx" => Self::SlideDeck,
            "docx" => Self::WordDoc,
            "ppt" => Self::LegacySlideDeck,
            "doc" => Self::LegacyWordDoc,
            "pdf" => Self::Pdf,
            _ => Self::Other,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::SlideDeck => "pptx",
            Self::WordDoc => "docx",
            Self::LegacySlideDeck => "ppt",
            Self::LegacyWordDoc => "doc",
            Self::Pdf => "pdf",
            Self::Other => "bin",
        }
    }

    /// Zip-container formats, the only ones the repair engine can open directly.
    pub fn is_zip_based(&self) -> bool {
        matches!(self, Self::SlideDeck | Self::WordDoc)
    }

    /// Legacy binary formats that must be normalized to a zip container first.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::LegacySlideDeck | Self::LegacyWordDoc)
    }

    pub fn is_slides(&self) -> bool {
        matches!(self, Self::SlideDeck | Self::LegacySlideDeck)
    }

    pub fn needs_conversion(&self) -> bool {
        !matches!(self, Self::Pdf | Self::Other)
    }
}

/// One document to convert. Owns every temp path for the job; dropping the
/// job removes them all, whichever way the state machine terminated.
pub struct ConversionJob {
    pub doc_id: u64,
    pub format: DeclaredFormat,
    /// Unique tag embedded in every working path, used by the supervisor to
    /// spot orphaned helper processes in the OS process table.
    pub marker: String,
    pub source_path: PathBuf,
    pub images_dir: PathBuf,
    work: Option<TempDir>,
    keep: bool,
}

impl ConversionJob {
    pub fn create(cfg: &Config, doc_id: u64, format: DeclaredFormat) -> Result<Self> {
        let work_root = PathBuf::from(&cfg.paths.work_dir);
        ensure_dir(&work_root)?;

        let marker = format!("deckshot-{}-{}", std::process::id(), doc_id);
        let work = tempfile::Builder::new()
            .prefix(&format!("{marker}-"))
            .tempdir_in(&work_root)
            .with_context(|| format!("creating work dir under {}", work_root.display()))?;

        let source_path = work.path().join(format!("source.{}", format.extension()));
        let images_dir = work.path().join("images");
        ensure_dir(&images_dir)?;

        Ok(Self {
            doc_id,
            format,
            marker,
            source_path,
            images_dir,
            work: Some(work),
            keep: cfg.debug.keep_work_dirs,
        })
    }

    pub fn work_dir(&self) -> &Path {
        self.work
            .as_ref()
            .map(|w| w.path())
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn source_bytes(&self) -> u64 {
        std::fs::metadata(&self.source_path)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Remove the work tree now instead of at drop, surfacing any error.
    pub fn finish(mut self) -> Result<()> {
        if let Some(work) = self.work.take() {
            if self.keep {
                let kept = work.keep();
                warn!("keeping work dir for inspection: {}", kept.display());
            } else {
                work.close().with_context(|| "removing job work dir")?;
            }
        }
        Ok(())
    }
}
