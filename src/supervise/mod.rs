pub mod limits;
pub mod procscan;
pub mod types;

pub use procscan::{ProcScanner, ProcessTreeFinder, SweepSignal};
pub use types::{classify, ExitKind, Outcome, ResourceCeiling, RunPlan, RunRecord};

use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Build a plan with the configured ceilings and supervision intervals.
pub fn plan(cfg: &Config, argv: Vec<String>, marker: &str, timeout: Duration) -> RunPlan {
    RunPlan {
        argv,
        env_remove: Vec::new(),
        env_set: Vec::new(),
        ceiling: ResourceCeiling {
            memory_bytes: Some(cfg.limits.memory_limit_mb * 1024 * 1024),
            cpu_seconds: Some(timeout.as_secs().max(1)),
        },
        timeout,
        marker: marker.to_string(),
        poll_interval: Duration::from_millis(cfg.limits.poll_interval_ms.max(1)),
        term_grace: Duration::from_millis(cfg.limits.term_grace_ms),
    }
}

/// Run one external command under supervision: ceilings applied in the child
/// before exec, liveness polled on a short interval so wall-clock expiry is
/// caught mid-flight, and on every exit path a process-table sweep for the
/// job marker so no helper outlives the attempt.
pub fn run(plan: &RunPlan, finder: &dyn ProcessTreeFinder) -> Result<RunRecord> {
    let (exe, args) = plan
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;

    debug!(
        "supervised run {} timeout={:?} marker={}",
        exe, plan.timeout, plan.marker
    );

    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for key in &plan.env_remove {
        cmd.env_remove(key);
    }
    for (key, value) in &plan.env_set {
        cmd.env(key, value);
    }
    let ceiling = plan.ceiling;
    unsafe {
        cmd.pre_exec(move || limits::apply_ceiling(&ceiling));
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning backend: {exe}"))?;

    // Drain pipes on dedicated threads so a chatty backend can't deadlock
    // itself on a full stdout/stderr buffer. The buffers come back over
    // channels, never via join: a helper that inherited the pipe keeps the
    // read blocked long after the child itself is dead.
    let out_rx = spawn_pipe_reader(child.stdout.take());
    let err_rx = spawn_pipe_reader(child.stderr.take());

    let started = Instant::now();
    let exit = loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            break exit_kind(status);
        }

        if started.elapsed() > plan.timeout {
            warn!(
                "backend exceeded timeout ({:?}); escalating termination",
                plan.timeout
            );
            terminate_child(&mut child, plan.term_grace)?;
            break ExitKind::TimedOut;
        }

        std::thread::sleep(plan.poll_interval);
    };
    let elapsed = started.elapsed();

    // Sweep before collecting the pipes. Covers virtual-display helpers and
    // anything the backend spawned that outlived it, whichever way the child
    // itself went down; killing a pipe-holder here is also what unblocks the
    // readers.
    sweep(finder, &plan.marker, plan.term_grace);

    let stdout = drain_pipe(&out_rx, plan.term_grace, "stdout");
    let stderr = drain_pipe(&err_rx, plan.term_grace, "stderr");

    Ok(RunRecord {
        exit,
        stdout,
        stderr,
        elapsed,
    })
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = bounded::<Vec<u8>>(1);
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Wait up to `deadline` for a reader to hand over its buffer. Past that the
/// pipe is held by something the sweep could not identify; the reader thread
/// is abandoned rather than letting it stall the attempt.
fn drain_pipe(rx: &Receiver<Vec<u8>>, deadline: Duration, label: &str) -> String {
    match rx.recv_timeout(deadline) {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(RecvTimeoutError::Timeout) => {
            warn!("{label} pipe still open past the grace period; abandoning reader");
            String::new()
        }
        Err(RecvTimeoutError::Disconnected) => String::new(),
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. The child is always reaped.
fn terminate_child(child: &mut Child, grace: Duration) -> Result<()> {
    let pid = Pid::from_raw(child.id() as i32);
    let _ = kill(pid, Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    loop {
        if child.try_wait().with_context(|| "try_wait after term")?.is_some() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let _ = kill(pid, Signal::SIGKILL);
    child.wait().with_context(|| "wait after kill")?;
    Ok(())
}

/// Escalating termination of every process the finder can tie to the marker.
pub fn sweep(finder: &dyn ProcessTreeFinder, marker: &str, grace: Duration) {
    let pids = finder.find_by_marker(marker);
    if pids.is_empty() {
        return;
    }
    warn!("sweeping {} orphaned process(es) for marker {marker}", pids.len());

    for &pid in &pids {
        finder.signal(pid, SweepSignal::Term);
    }
    std::thread::sleep(grace);
    for &pid in &pids {
        if finder.alive(pid) {
            finder.signal(pid, SweepSignal::Kill);
        }
    }
}

fn exit_kind(status: ExitStatus) -> ExitKind {
    match status.code() {
        Some(code) => ExitKind::Exited(code),
        None => ExitKind::Signaled(status.signal().unwrap_or(0)),
    }
}
