use crate::config::Config;
use crate::util::ensure_dir;
use anyhow::{Context, Result};
use std::path::Path;

const JAVASETTINGS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<oor:component-data xmlns:oor="http://openoffice.org/2001/registry" xmlns:xs="http://www.w3.org/2001/XMLSchema" oor:name="Java" oor:package="org.openoffice.Office">
  <node oor:name="JavaInfo">
    <node oor:name="JavaList">
      <prop oor:name="JavaCount" oor:type="xs:int">
        <value>0</value>
      </prop>
    </node>
  </node>
</oor:component-data>"#;

const REGISTRYMODS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<oor:component-data xmlns:oor="http://openoffice.org/2001/registry" xmlns:xs="http://www.w3.org/2001/XMLSchema" oor:name="Common" oor:package="org.openoffice.Office">
  <node oor:name="Misc">
    <node oor:name="FirstRun">
      <prop oor:name="bCompleted" oor:type="xs:boolean">
        <value>true</value>
      </prop>
    </node>
  </node>
</oor:component-data>"#;

/// Pre-seed an isolated profile so soffice neither looks for a JRE nor shows
/// first-run dialogs. Without this the first headless start on a fresh
/// profile can hang or spray javaldx errors.
pub fn seed_profile(profile_dir: &Path) -> Result<()> {
    let config_dir = profile_dir.join("user").join("config");
    ensure_dir(&config_dir)?;

    std::fs::write(
        config_dir.join("javasettings_Linux_x86_64.xml"),
        JAVASETTINGS,
    )
    .with_context(|| "writing javasettings")?;

    std::fs::write(
        profile_dir.join("user").join("registrymodifications.xcu"),
        REGISTRYMODS,
    )
    .with_context(|| "writing registrymodifications")?;

    Ok(())
}

/// soffice argv converting `input` to `target` ("pdf", "pptx", "docx") into
/// `out_dir`, with all state confined to `profile_dir`.
pub fn convert_argv(
    cfg: &Config,
    input: &Path,
    out_dir: &Path,
    profile_dir: &Path,
    target: &str,
) -> Vec<String> {
    vec![
        cfg.backends.soffice_exe.clone(),
        "--headless".into(),
        "--norestore".into(),
        "--nolockcheck".into(),
        "--nodefault".into(),
        "--nologo".into(),
        format!("-env:UserInstallation=file://{}", profile_dir.display()),
        "--convert-to".into(),
        target.into(),
        "--outdir".into(),
        out_dir.display().to_string(),
        input.display().to_string(),
    ]
}

/// Headless environment: no X display, no OpenCL, no Java discovery.
pub fn env_overrides() -> (Vec<String>, Vec<(String, String)>) {
    let remove = vec![
        "DISPLAY".to_string(),
        "JAVA_HOME".to_string(),
        "JRE_HOME".to_string(),
        "JDK_HOME".to_string(),
    ];
    let set = vec![
        ("SAL_USE_VCLPLUGIN".to_string(), "gen".to_string()),
        ("SAL_DISABLE_OPENCL".to_string(), "1".to_string()),
    ];
    (remove, set)
}
