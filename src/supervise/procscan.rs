use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepSignal {
    Term,
    Kill,
}

/// Capability interface over the OS process table. The conversion engines are
/// known to leave orphaned helper processes (soffice.bin, Xvfb) behind on
/// crash or kill; those are found by the per-job marker embedded in their
/// command line or working directory. Tests substitute an in-memory fake.
pub trait ProcessTreeFinder: Send + Sync {
    fn find_by_marker(&self, marker: &str) -> Vec<u32>;
    fn signal(&self, pid: u32, sig: SweepSignal);
    fn alive(&self, pid: u32) -> bool;
}

/// Production finder backed by /proc enumeration.
pub struct ProcScanner;

impl ProcessTreeFinder for ProcScanner {
    fn find_by_marker(&self, marker: &str) -> Vec<u32> {
        // Every working path embeds the marker followed by a separator.
        // Matching with the separator keeps one job's marker from matching
        // another's paths (job 4 vs job 45 under the same pid).
        let needle = format!("{marker}-");
        let own = std::process::id();
        let mut pids = Vec::new();
        let entries = match std::fs::read_dir("/proc") {
            Ok(e) => e,
            Err(_) => return pids,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if pid == own {
                continue;
            }
            if proc_matches(&entry.path(), &needle) {
                pids.push(pid);
            }
        }
        pids
    }

    fn signal(&self, pid: u32, sig: SweepSignal) {
        let sig = match sig {
            SweepSignal::Term => Signal::SIGTERM,
            SweepSignal::Kill => Signal::SIGKILL,
        };
        if let Err(err) = kill(Pid::from_raw(pid as i32), sig) {
            debug!("signal {sig:?} to pid {pid} failed: {err}");
        }
    }

    fn alive(&self, pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
}

fn proc_matches(proc_dir: &Path, needle: &str) -> bool {
    if let Ok(cmdline) = std::fs::read(proc_dir.join("cmdline")) {
        let cmdline = String::from_utf8_lossy(&cmdline);
        if cmdline.contains(needle) {
            return true;
        }
    }
    if let Ok(cwd) = std::fs::read_link(proc_dir.join("cwd")) {
        if cwd.to_string_lossy().contains(needle) {
            return true;
        }
    }
    false
}
