use crate::config::Config;
use std::path::Path;

/// unoconv argv converting `input` to a PDF at `output`. Alternate backend:
/// drives a listener-mode soffice, which survives some inputs that crash a
/// direct `--convert-to` invocation.
pub fn convert_argv(cfg: &Config, input: &Path, output: &Path) -> Vec<String> {
    vec![
        cfg.backends.unoconv_exe.clone(),
        "-f".into(),
        "pdf".into(),
        "-o".into(),
        output.display().to_string(),
        input.display().to_string(),
    ]
}
