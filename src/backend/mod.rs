pub mod libreoffice;
pub mod unoconv;

use crate::config::Config;
use crate::supervise::{self, classify, Outcome, ProcessTreeFinder};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    LibreOffice,
    Unoconv,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::LibreOffice => "libreoffice",
            BackendKind::Unoconv => "unoconv",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "libreoffice" => Some(BackendKind::LibreOffice),
            "unoconv" => Some(BackendKind::Unoconv),
            _ => None,
        }
    }
}

/// One completed conversion attempt.
pub struct ConvertAttempt {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// One supervised conversion attempt of `input` to PDF. On success the
/// produced PDF is moved to a stable path inside `work_dir`; the attempt's
/// own out/profile dirs are removed on every exit path.
pub fn run_convert(
    cfg: &Config,
    finder: &dyn ProcessTreeFinder,
    kind: BackendKind,
    input: &Path,
    work_dir: &Path,
    marker: &str,
    timeout: Duration,
) -> Result<ConvertAttempt> {
    let out_dir = attempt_dir(work_dir, marker, "out")?;
    let profile_dir = attempt_dir(work_dir, marker, "profile")?;
    libreoffice::seed_profile(profile_dir.path())?;

    let mut argv = match kind {
        BackendKind::LibreOffice => {
            libreoffice::convert_argv(cfg, input, out_dir.path(), profile_dir.path(), "pdf")
        }
        BackendKind::Unoconv => {
            unoconv::convert_argv(cfg, input, &out_dir.path().join("converted.pdf"))
        }
    };
    if should_use_xvfb(cfg) {
        argv = wrap_xvfb(argv);
    }

    let mut plan = supervise::plan(cfg, argv, marker, timeout);
    let (remove, set) = libreoffice::env_overrides();
    plan.env_remove = remove;
    plan.env_set = set;

    let record = supervise::run(&plan, finder)?;
    debug!(
        "backend {} exited {:?} after {:?}",
        kind.name(),
        record.exit,
        record.elapsed
    );

    let produced = match first_pdf(out_dir.path()) {
        Some(pdf) => {
            let dest = work_dir.join("converted.pdf");
            std::fs::rename(&pdf, &dest)
                .with_context(|| format!("moving produced PDF {}", pdf.display()))?;
            Some(dest)
        }
        None => None,
    };

    Ok(ConvertAttempt {
        outcome: classify(&record, produced),
        elapsed: record.elapsed,
    })
}

/// Supervised normalization of a legacy binary format to its zip-based
/// sibling (.ppt -> .pptx, .doc -> .docx), used before archive repair.
pub fn run_normalize(
    cfg: &Config,
    finder: &dyn ProcessTreeFinder,
    input: &Path,
    work_dir: &Path,
    marker: &str,
    target_ext: &str,
    timeout: Duration,
) -> Result<Option<PathBuf>> {
    let out_dir = attempt_dir(work_dir, marker, "normalize")?;
    let profile_dir = attempt_dir(work_dir, marker, "profile")?;
    libreoffice::seed_profile(profile_dir.path())?;

    let mut argv =
        libreoffice::convert_argv(cfg, input, out_dir.path(), profile_dir.path(), target_ext);
    if should_use_xvfb(cfg) {
        argv = wrap_xvfb(argv);
    }

    let mut plan = supervise::plan(cfg, argv, marker, timeout);
    let (remove, set) = libreoffice::env_overrides();
    plan.env_remove = remove;
    plan.env_set = set;

    let record = supervise::run(&plan, finder)?;

    let produced = first_with_ext(out_dir.path(), target_ext);
    match produced {
        Some(path) => {
            let dest = work_dir.join(format!("normalized.{target_ext}"));
            std::fs::rename(&path, &dest)
                .with_context(|| format!("moving normalized file {}", path.display()))?;
            Ok(Some(dest))
        }
        None => {
            warn!(
                "normalization to {target_ext} produced nothing (exit {:?})",
                record.exit
            );
            Ok(None)
        }
    }
}

fn attempt_dir(work_dir: &Path, marker: &str, label: &str) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(&format!("{marker}-{label}-"))
        .tempdir_in(work_dir)
        .with_context(|| format!("creating {label} dir"))
}

fn should_use_xvfb(cfg: &Config) -> bool {
    match cfg.backends.use_xvfb.as_str() {
        "always" => true,
        "never" => false,
        _ => xvfb_available(),
    }
}

pub fn xvfb_available() -> bool {
    std::process::Command::new("which")
        .arg("xvfb-run")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn wrap_xvfb(argv: Vec<String>) -> Vec<String> {
    let mut wrapped = vec![
        "xvfb-run".to_string(),
        "-a".to_string(),
        "-s".to_string(),
        "-screen 0 1024x768x24".to_string(),
    ];
    wrapped.extend(argv);
    wrapped
}

fn first_pdf(dir: &Path) -> Option<PathBuf> {
    first_with_ext(dir, "pdf")
}

fn first_with_ext(dir: &Path, ext: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(ext))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    found.into_iter().next()
}
