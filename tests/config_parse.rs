use deckshot::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../deckshot.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.limits.timeout_floor_seconds, 120);
    assert_eq!(cfg.backends.slide_order, vec!["libreoffice".to_string()]);
    assert!(!cfg.paths.work_dir.is_empty());
}

#[test]
fn empty_config_falls_back_to_defaults() {
    let cfg: Config = toml::from_str("").expect("parse empty TOML");
    assert_eq!(cfg.raster.first_page_quality, 60);
    assert_eq!(cfg.raster.other_pages_quality, 5);
    assert_eq!(cfg.limits.memory_limit_mb, 1024);
}
