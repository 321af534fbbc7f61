use crate::backend::{self, BackendKind};
use crate::client::ApiClient;
use crate::config::Config;
use crate::job::{ConversionJob, DeclaredFormat};
use crate::raster;
use crate::reduce;
use crate::repair;
use crate::report::{AttemptReport, FailureKind, JobReport, JobStatus};
use crate::supervise::{Outcome, ProcessTreeFinder};
use crate::util::{ensure_dir, hash_file, now_rfc3339};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Per-job state machine. Transitions are strictly sequential; the only
/// concurrency inside a job is the single supervised child of the current
/// attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Downloading,
    Converting,
    Repairing,
    Rasterizing,
    Uploading,
    Done,
    Failed,
}

/// Artifact variant a backend attempt runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Reduced,
    Original,
    Repaired,
}

impl ArtifactKind {
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Reduced => "reduced",
            ArtifactKind::Original => "original",
            ArtifactKind::Repaired => "repaired",
        }
    }
}

/// Wall-clock budget for one attempt, scaled to the artifact size: a base
/// plus a per-megabyte increment, floored and capped. Monotonically
/// non-decreasing in size.
pub fn timeout_budget(cfg: &Config, artifact_bytes: u64) -> Duration {
    let mb = artifact_bytes / (1024 * 1024);
    let scaled = cfg
        .limits
        .timeout_base_seconds
        .saturating_add(cfg.limits.timeout_per_mb_seconds.saturating_mul(mb));
    let secs = scaled
        .max(cfg.limits.timeout_floor_seconds)
        .min(cfg.limits.timeout_cap_seconds);
    Duration::from_secs(secs)
}

/// Ordered backend candidates for a declared format. Empty for PDF (which
/// skips straight to rasterization) and for unhandled formats.
pub fn backend_plan(cfg: &Config, format: DeclaredFormat) -> Vec<BackendKind> {
    if !format.needs_conversion() {
        return Vec::new();
    }
    let names = if format.is_slides() {
        &cfg.backends.slide_order
    } else {
        &cfg.backends.word_order
    };
    let plan: Vec<BackendKind> = names
        .iter()
        .filter_map(|name| {
            let kind = BackendKind::from_name(name);
            if kind.is_none() {
                warn!("unknown backend in config, skipping: {name}");
            }
            kind
        })
        .collect();
    plan
}

enum Source<'a> {
    Remote { client: &'a ApiClient, url: String },
    Local(&'a Path),
}

enum Sink<'a> {
    Remote { client: &'a ApiClient, doc_id: u64 },
    Dir(&'a Path),
}

struct Drive {
    attempts: Vec<AttemptReport>,
    dropped: Vec<String>,
    images: Vec<PathBuf>,
    page_count: u32,
    status: JobStatus,
}

pub struct Orchestrator<'a> {
    cfg: &'a Config,
    finder: &'a dyn ProcessTreeFinder,
}

impl<'a> Orchestrator<'a> {
    pub fn new(cfg: &'a Config, finder: &'a dyn ProcessTreeFinder) -> Self {
        Self { cfg, finder }
    }

    /// Fetch, convert and upload one remote job. Every temp path belongs to
    /// the job and is removed whichever way the state machine terminates.
    pub fn process_remote(&self, client: &ApiClient, doc_id: u64) -> Result<JobReport> {
        let started = now_rfc3339();
        let meta = client
            .fetch_job(doc_id)
            .with_context(|| format!("fetching metadata for doc_id={doc_id}"))?;
        let format = DeclaredFormat::from_file_type(&meta.file_type);

        let Some(url) = meta.file_url.filter(|u| !u.is_empty()) else {
            info!("doc_id={doc_id} has no file url, skipping");
            return Ok(skipped_report(doc_id, format, started));
        };
        if format == DeclaredFormat::Other {
            info!("doc_id={doc_id} declared type {} unhandled, skipping", meta.file_type);
            return Ok(skipped_report(doc_id, format, started));
        }

        let job = ConversionJob::create(self.cfg, doc_id, format)?;
        let result = self.drive(
            &job,
            Source::Remote { client, url },
            Sink::Remote { client, doc_id },
        );
        self.seal(job, started, result)
    }

    /// Convert a local file, leaving the preview images in `out_dir`.
    pub fn process_local(&self, input: &Path, out_dir: &Path) -> Result<JobReport> {
        let started = now_rfc3339();
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format = DeclaredFormat::from_file_type(ext);
        anyhow::ensure!(
            format != DeclaredFormat::Other,
            "unsupported input type: {}",
            input.display()
        );

        let job = ConversionJob::create(self.cfg, 0, format)?;
        let result = self.drive(&job, Source::Local(input), Sink::Dir(out_dir));
        self.seal(job, started, result)
    }

    fn seal(&self, job: ConversionJob, started: String, result: Result<Drive>) -> Result<JobReport> {
        let doc_id = job.doc_id;
        let format = job.format;
        let source_bytes = job.source_bytes();
        let source_sha256 = hash_file(self.cfg, &job.source_path).unwrap_or_default();
        let marker = job.marker.clone();

        let finish = job.finish();

        let drive = result?;
        finish?;

        let report = JobReport {
            doc_id,
            format,
            source_bytes,
            source_sha256,
            attempts: drive.attempts,
            dropped_members: drive.dropped,
            images: drive.images.len(),
            page_count: drive.page_count,
            status: drive.status,
            started,
            finished: now_rfc3339(),
        };
        match &report.status {
            JobStatus::Failed(kind) => warn!("doc_id={doc_id} failed ({marker}): {kind}"),
            _ => info!(
                "doc_id={doc_id} {:?}: {} image(s), {} page(s)",
                report.status, report.images, report.page_count
            ),
        }
        Ok(report)
    }

    fn drive(&self, job: &ConversionJob, source: Source<'_>, sink: Sink<'_>) -> Result<Drive> {
        let mut out = Drive {
            attempts: Vec::new(),
            dropped: Vec::new(),
            images: Vec::new(),
            page_count: 0,
            status: JobStatus::Done,
        };
        let mut pdf: Option<PathBuf> = None;

        let mut state = JobState::Downloading;
        loop {
            state = match state {
                JobState::Downloading => {
                    let fetched = match &source {
                        Source::Remote { client, url } => client
                            .download(url, &job.source_path)
                            .map(|_| ())
                            .map_err(|e| format!("{e:#}")),
                        Source::Local(path) => std::fs::copy(path, &job.source_path)
                            .map(|_| ())
                            .map_err(|e| e.to_string()),
                    };
                    match fetched {
                        Ok(()) if job.format == DeclaredFormat::Pdf => {
                            pdf = Some(job.source_path.clone());
                            JobState::Rasterizing
                        }
                        Ok(()) => JobState::Converting,
                        Err(detail) => {
                            out.status = JobStatus::Failed(FailureKind::Download(detail));
                            JobState::Failed
                        }
                    }
                }

                JobState::Converting => {
                    match self.convert_ladder(job, &mut out.attempts)? {
                        Ok(path) => {
                            pdf = Some(path);
                            JobState::Rasterizing
                        }
                        Err(_) => JobState::Repairing,
                    }
                }

                JobState::Repairing => {
                    match self.repair_and_retry(job, &mut out.attempts, &mut out.dropped)? {
                        Ok(path) => {
                            pdf = Some(path);
                            JobState::Rasterizing
                        }
                        Err(kind) => {
                            out.status = JobStatus::Failed(kind);
                            JobState::Failed
                        }
                    }
                }

                JobState::Rasterizing => {
                    let pdf_path = pdf.clone().context("no PDF to rasterize")?;
                    let max_pages = if job.format == DeclaredFormat::Pdf {
                        self.cfg.raster.max_pdf_pages
                    } else {
                        self.cfg.raster.max_slide_pages
                    };
                    match raster::rasterize(
                        self.cfg,
                        self.finder,
                        &pdf_path,
                        &job.images_dir,
                        max_pages,
                        &job.marker,
                    ) {
                        Ok(images) => {
                            out.page_count = raster::page_count(self.cfg, &pdf_path)
                                .unwrap_or(images.len() as u32);
                            out.images = images;
                            JobState::Uploading
                        }
                        Err(err) => {
                            out.status =
                                JobStatus::Failed(FailureKind::Raster(format!("{err:#}")));
                            JobState::Failed
                        }
                    }
                }

                JobState::Uploading => {
                    let delivered = match &sink {
                        Sink::Remote { client, doc_id } => client
                            .upload(*doc_id, &out.images, out.page_count)
                            .map_err(|e| format!("{e:#}")),
                        Sink::Dir(dir) => copy_images(&out.images, dir).map_err(|e| format!("{e:#}")),
                    };
                    match delivered {
                        Ok(()) => JobState::Done,
                        Err(detail) => {
                            out.status = JobStatus::Failed(FailureKind::Upload(detail));
                            JobState::Failed
                        }
                    }
                }

                JobState::Done | JobState::Failed => break,
            };
        }

        Ok(out)
    }

    /// Reduced variant first (when the size window admits one), then the
    /// original. The first attempt producing a rasterizable PDF wins; the
    /// rest are never started.
    fn convert_ladder(
        &self,
        job: &ConversionJob,
        attempts: &mut Vec<AttemptReport>,
    ) -> Result<std::result::Result<PathBuf, FailureKind>> {
        let plan = backend_plan(self.cfg, job.format);
        anyhow::ensure!(!plan.is_empty(), "no conversion backend configured");

        let mut ladder = Vec::new();
        if job.format.is_zip_based() {
            if let Some(reduced) = reduce::reduce(self.cfg, &job.source_path, job.work_dir())? {
                ladder.push((ArtifactKind::Reduced, reduced));
            }
        }
        ladder.push((ArtifactKind::Original, job.source_path.clone()));

        let mut last = FailureKind::NoOutputProduced;
        for (artifact, path) in &ladder {
            match self.try_backends(job, &plan, *artifact, path, attempts)? {
                Ok(pdf) => return Ok(Ok(pdf)),
                Err(kind) => last = kind,
            }
        }
        Ok(Err(last))
    }

    /// Repair once, retry the backend sequence once against the repaired
    /// artifact. Anything failing past here is terminal for the job.
    fn repair_and_retry(
        &self,
        job: &ConversionJob,
        attempts: &mut Vec<AttemptReport>,
        dropped: &mut Vec<String>,
    ) -> Result<std::result::Result<PathBuf, FailureKind>> {
        let budget = timeout_budget(self.cfg, job.source_bytes());
        let repaired = repair::repair(
            self.cfg,
            self.finder,
            &job.source_path,
            job.format,
            job.work_dir(),
            &job.marker,
            budget,
        )?;

        let Some(outcome) = repaired else {
            return Ok(Err(FailureKind::RepairUnavailable));
        };
        dropped.extend(outcome.dropped_members);

        let plan = backend_plan(self.cfg, job.format);
        match self.try_backends(
            job,
            &plan,
            ArtifactKind::Repaired,
            &outcome.repaired_path,
            attempts,
        )? {
            Ok(pdf) => Ok(Ok(pdf)),
            Err(kind) => Ok(Err(kind)),
        }
    }

    fn try_backends(
        &self,
        job: &ConversionJob,
        plan: &[BackendKind],
        artifact: ArtifactKind,
        path: &Path,
        attempts: &mut Vec<AttemptReport>,
    ) -> Result<std::result::Result<PathBuf, FailureKind>> {
        let artifact_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let budget = timeout_budget(self.cfg, artifact_bytes);
        let mut last = FailureKind::NoOutputProduced;

        for backend in plan {
            info!(
                "doc_id={} attempting {} on {} artifact (budget {:?})",
                job.doc_id,
                backend.name(),
                artifact.label(),
                budget
            );
            let attempt = backend::run_convert(
                self.cfg,
                self.finder,
                *backend,
                path,
                job.work_dir(),
                &job.marker,
                budget,
            )?;
            attempts.push(AttemptReport {
                backend: backend.name().to_string(),
                artifact: artifact.label().to_string(),
                outcome: attempt.outcome.label().to_string(),
                timeout_seconds: budget.as_secs(),
                elapsed_ms: attempt.elapsed.as_millis() as u64,
            });

            match attempt.outcome {
                Outcome::Success { output } => return Ok(Ok(output)),
                Outcome::Timeout => last = FailureKind::ConversionTimeout,
                Outcome::Crashed { detail } => last = FailureKind::ConversionCrashed(detail),
                Outcome::NoOutput => last = FailureKind::NoOutputProduced,
            }
            warn!(
                "doc_id={} backend {} failed on {} artifact: {last}",
                job.doc_id,
                backend.name(),
                artifact.label()
            );
        }

        Ok(Err(last))
    }
}

fn copy_images(images: &[PathBuf], out_dir: &Path) -> Result<()> {
    ensure_dir(out_dir)?;
    for image in images {
        let name = image
            .file_name()
            .context("image path has no file name")?;
        std::fs::copy(image, out_dir.join(name))
            .with_context(|| format!("copying {}", image.display()))?;
    }
    Ok(())
}

fn skipped_report(doc_id: u64, format: DeclaredFormat, started: String) -> JobReport {
    JobReport {
        doc_id,
        format,
        source_bytes: 0,
        source_sha256: String::new(),
        attempts: Vec::new(),
        dropped_members: Vec::new(),
        images: 0,
        page_count: 0,
        status: JobStatus::Skipped,
        started,
        finished: now_rfc3339(),
    }
}
