use std::path::PathBuf;
use std::time::Duration;

/// Resource ceiling applied to the child itself before exec, so a runaway
/// backend is capped independently of the supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceCeiling {
    pub memory_bytes: Option<u64>,
    pub cpu_seconds: Option<u64>,
}

/// A fully-formed external command plus the envelope it runs under.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub argv: Vec<String>,
    pub env_remove: Vec<String>,
    pub env_set: Vec<(String, String)>,
    pub ceiling: ResourceCeiling,
    pub timeout: Duration,
    /// Unique per-job tag present in the working paths of every process
    /// belonging to this attempt; used to sweep orphaned helpers.
    pub marker: String,
    pub poll_interval: Duration,
    pub term_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

#[derive(Debug)]
pub struct RunRecord {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Classified result of one supervised conversion attempt.
#[derive(Debug)]
pub enum Outcome {
    Success { output: PathBuf },
    Timeout,
    Crashed { detail: String },
    NoOutput,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Timeout => "timeout",
            Outcome::Crashed { .. } => "crashed",
            Outcome::NoOutput => "no_output",
        }
    }
}

/// Presence of expected output is authoritative over the exit code: several
/// backends emit non-fatal warnings (javaldx and friends) and still return
/// nonzero after a perfectly good conversion. A timed-out attempt is the
/// exception: whatever file the killed backend left behind may be
/// half-written and is never trusted.
pub fn classify(record: &RunRecord, output: Option<PathBuf>) -> Outcome {
    if record.exit == ExitKind::TimedOut {
        return Outcome::Timeout;
    }
    if let Some(path) = output {
        return Outcome::Success { output: path };
    }

    match &record.exit {
        ExitKind::TimedOut => Outcome::Timeout,
        ExitKind::Signaled(sig) => Outcome::Crashed {
            detail: format!("terminated by signal {sig}"),
        },
        ExitKind::Exited(_) => {
            if kill_evidence(&record.stderr) {
                Outcome::Crashed {
                    detail: first_line(&record.stderr),
                }
            } else {
                Outcome::NoOutput
            }
        }
    }
}

fn kill_evidence(stderr: &str) -> bool {
    stderr.contains("Killed") || stderr.contains("SIGKILL") || stderr.contains("Segmentation fault")
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").trim().to_string()
}
