use deckshot::backend::BackendKind;
use deckshot::config::Config;
use deckshot::job::DeclaredFormat;
use deckshot::orchestrate::{backend_plan, timeout_budget};
use std::time::Duration;

const MB: u64 = 1024 * 1024;

#[test]
fn tiny_inputs_hit_the_floor() {
    let mut cfg = Config::default();
    cfg.limits.timeout_floor_seconds = 300;
    cfg.limits.timeout_base_seconds = 180;
    assert_eq!(timeout_budget(&cfg, 0), Duration::from_secs(300));
}

#[test]
fn budget_scales_with_size() {
    let cfg = Config::default();
    assert_eq!(
        timeout_budget(&cfg, 10 * MB),
        Duration::from_secs(180 + 15 * 10)
    );
}

#[test]
fn budget_is_capped() {
    let cfg = Config::default();
    assert_eq!(
        timeout_budget(&cfg, 10_000 * MB),
        Duration::from_secs(cfg.limits.timeout_cap_seconds)
    );
}

#[test]
fn budget_is_monotonic() {
    let cfg = Config::default();
    let mut prev = Duration::ZERO;
    for mb in [0u64, 1, 5, 40, 200, 2000] {
        let b = timeout_budget(&cfg, mb * MB);
        assert!(b >= prev);
        prev = b;
    }
}

#[test]
fn pdf_needs_no_backend() {
    let cfg = Config::default();
    assert!(backend_plan(&cfg, DeclaredFormat::Pdf).is_empty());
    assert!(backend_plan(&cfg, DeclaredFormat::Other).is_empty());
}

#[test]
fn slide_and_word_orders_are_separate() {
    let mut cfg = Config::default();
    cfg.backends.slide_order = vec!["unoconv".into(), "libreoffice".into()];
    cfg.backends.word_order = vec!["libreoffice".into()];

    assert_eq!(
        backend_plan(&cfg, DeclaredFormat::SlideDeck),
        vec![BackendKind::Unoconv, BackendKind::LibreOffice]
    );
    assert_eq!(
        backend_plan(&cfg, DeclaredFormat::WordDoc),
        vec![BackendKind::LibreOffice]
    );
    // Legacy formats follow the chain of their modern sibling.
    assert_eq!(
        backend_plan(&cfg, DeclaredFormat::LegacySlideDeck),
        vec![BackendKind::Unoconv, BackendKind::LibreOffice]
    );
}

#[test]
fn unknown_backend_names_are_skipped() {
    let mut cfg = Config::default();
    cfg.backends.slide_order = vec!["imaginary".into(), "libreoffice".into()];
    assert_eq!(
        backend_plan(&cfg, DeclaredFormat::SlideDeck),
        vec![BackendKind::LibreOffice]
    );
}
