use deckshot::config::Config;
use deckshot::supervise::{self, ExitKind, ProcScanner, ProcessTreeFinder, SweepSignal};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory stand-in for the /proc scanner, recording every signal sent.
struct FakeFinder {
    pids: Vec<u32>,
    survives_term: bool,
    signals: Mutex<Vec<(u32, SweepSignal)>>,
}

impl FakeFinder {
    fn empty() -> Self {
        Self {
            pids: Vec::new(),
            survives_term: false,
            signals: Mutex::new(Vec::new()),
        }
    }

    fn with_orphans(pids: Vec<u32>, survives_term: bool) -> Self {
        Self {
            pids,
            survives_term,
            signals: Mutex::new(Vec::new()),
        }
    }
}

impl ProcessTreeFinder for FakeFinder {
    fn find_by_marker(&self, _marker: &str) -> Vec<u32> {
        self.pids.clone()
    }

    fn signal(&self, pid: u32, sig: SweepSignal) {
        self.signals.lock().unwrap().push((pid, sig));
    }

    fn alive(&self, _pid: u32) -> bool {
        self.survives_term
    }
}

fn fast_cfg() -> Config {
    let mut cfg = Config::default();
    cfg.limits.poll_interval_ms = 20;
    cfg.limits.term_grace_ms = 100;
    cfg
}

#[test]
fn clean_exit_is_recorded() {
    let cfg = fast_cfg();
    let finder = FakeFinder::empty();
    let plan = supervise::plan(
        &cfg,
        vec!["/bin/sh".into(), "-c".into(), "exit 0".into()],
        "t-clean",
        Duration::from_secs(5),
    );
    let record = supervise::run(&plan, &finder).unwrap();
    assert_eq!(record.exit, ExitKind::Exited(0));
}

#[test]
fn nonzero_exit_code_is_preserved() {
    let cfg = fast_cfg();
    let finder = FakeFinder::empty();
    let plan = supervise::plan(
        &cfg,
        vec!["/bin/sh".into(), "-c".into(), "exit 3".into()],
        "t-code",
        Duration::from_secs(5),
    );
    let record = supervise::run(&plan, &finder).unwrap();
    assert_eq!(record.exit, ExitKind::Exited(3));
}

#[test]
fn output_pipes_are_drained() {
    let cfg = fast_cfg();
    let finder = FakeFinder::empty();
    let plan = supervise::plan(
        &cfg,
        vec![
            "/bin/sh".into(),
            "-c".into(),
            "echo out-line; echo err-line >&2".into(),
        ],
        "t-pipes",
        Duration::from_secs(5),
    );
    let record = supervise::run(&plan, &finder).unwrap();
    assert!(record.stdout.contains("out-line"));
    assert!(record.stderr.contains("err-line"));
}

#[test]
fn hung_child_times_out_and_dies() {
    let cfg = fast_cfg();
    let finder = FakeFinder::empty();
    let plan = supervise::plan(
        &cfg,
        vec!["/bin/sh".into(), "-c".into(), "sleep 30".into()],
        "t-hang",
        Duration::from_millis(200),
    );
    let record = supervise::run(&plan, &finder).unwrap();
    assert_eq!(record.exit, ExitKind::TimedOut);
    // Expiry is caught within roughly one poll interval plus the grace.
    assert!(record.elapsed < Duration::from_secs(5));
}

#[test]
fn helper_holding_the_pipes_does_not_stall_the_supervisor() {
    let cfg = fast_cfg();
    let finder = FakeFinder::empty();
    // The background sleep inherits the output pipes and outlives the child,
    // so the readers stay blocked long after the timeout fires.
    let plan = supervise::plan(
        &cfg,
        vec![
            "/bin/sh".into(),
            "-c".into(),
            "sleep 6 & exec sleep 30".into(),
        ],
        "t-pipe-holder",
        Duration::from_millis(200),
    );
    let started = Instant::now();
    let record = supervise::run(&plan, &finder).unwrap();
    assert_eq!(record.exit, ExitKind::TimedOut);
    // Return is bounded by the poll interval plus the grace periods, not by
    // the lifetime of whatever still holds the pipes.
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn env_overrides_reach_the_child() {
    let cfg = fast_cfg();
    let finder = FakeFinder::empty();
    let mut plan = supervise::plan(
        &cfg,
        vec!["/bin/sh".into(), "-c".into(), "echo probe=$T_PROBE".into()],
        "t-env",
        Duration::from_secs(5),
    );
    plan.env_set.push(("T_PROBE".into(), "42".into()));
    let record = supervise::run(&plan, &finder).unwrap();
    assert!(record.stdout.contains("probe=42"));
}

#[test]
fn sweep_escalates_on_surviving_orphans() {
    let finder = FakeFinder::with_orphans(vec![111, 222], true);
    supervise::sweep(&finder, "t-sweep", Duration::from_millis(10));

    let signals = finder.signals.lock().unwrap();
    assert_eq!(
        &signals[..2],
        &[(111, SweepSignal::Term), (222, SweepSignal::Term)]
    );
    assert!(signals.contains(&(111, SweepSignal::Kill)));
    assert!(signals.contains(&(222, SweepSignal::Kill)));
}

#[test]
fn sweep_stops_at_term_when_orphans_die() {
    let finder = FakeFinder::with_orphans(vec![333], false);
    supervise::sweep(&finder, "t-sweep-term", Duration::from_millis(10));

    let signals = finder.signals.lock().unwrap();
    assert_eq!(signals.as_slice(), &[(333, SweepSignal::Term)]);
}

#[test]
fn marker_match_does_not_cross_job_boundaries() {
    // Two live jobs under the same pid, ids 4 and 45: the sweep for job 4
    // must not pick up job 45's backend.
    let dir = tempfile::tempdir().unwrap();
    let marker = format!("deckshot-{}-4", std::process::id());
    let mine = dir.path().join(format!("{marker}-aaaa"));
    let other = dir
        .path()
        .join(format!("deckshot-{}-45-bbbb", std::process::id()));
    std::fs::create_dir_all(&mine).unwrap();
    std::fs::create_dir_all(&other).unwrap();

    let mut a = std::process::Command::new("sleep")
        .arg("30")
        .current_dir(&mine)
        .spawn()
        .unwrap();
    let mut b = std::process::Command::new("sleep")
        .arg("30")
        .current_dir(&other)
        .spawn()
        .unwrap();

    let found = ProcScanner.find_by_marker(&marker);
    let verdict = (found.contains(&a.id()), found.contains(&b.id()));

    a.kill().ok();
    a.wait().ok();
    b.kill().ok();
    b.wait().ok();

    assert_eq!(verdict, (true, false));
}
