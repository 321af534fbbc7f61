use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub backends: Backends,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub reduce: Reduce,
    #[serde(default)]
    pub repair: Repair,
    #[serde(default)]
    pub raster: Raster,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub hashing: Hashing,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: Default::default(),
            paths: Default::default(),
            api: Default::default(),
            backends: Default::default(),
            limits: Default::default(),
            reduce: Default::default(),
            repair: Default::default(),
            raster: Default::default(),
            queue: Default::default(),
            hashing: Default::default(),
            logging: Default::default(),
            debug: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub work_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            work_dir: ".deckshot-work".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub base_url: String,
    /// Env var holding the bearer token, so the secret never lands in TOML.
    pub token_env: String,
    pub request_timeout_seconds: u64,
}
impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            token_env: "DECKSHOT_TOKEN".into(),
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backends {
    /// Ordered backend names tried for slide decks (pptx/ppt).
    pub slide_order: Vec<String>,
    /// Ordered backend names tried for word-processor documents (docx/doc).
    pub word_order: Vec<String>,
    pub soffice_exe: String,
    pub unoconv_exe: String,
    /// "auto" probes for xvfb-run, "always"/"never" force it.
    pub use_xvfb: String,
}
impl Default for Backends {
    fn default() -> Self {
        Self {
            slide_order: vec!["libreoffice".into()],
            word_order: vec!["libreoffice".into()],
            soffice_exe: "soffice".into(),
            unoconv_exe: "unoconv".into(),
            use_xvfb: "auto".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub memory_limit_mb: u64,
    pub timeout_floor_seconds: u64,
    pub timeout_base_seconds: u64,
    pub timeout_per_mb_seconds: u64,
    pub timeout_cap_seconds: u64,
    pub poll_interval_ms: u64,
    pub term_grace_ms: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 1024,
            timeout_floor_seconds: 120,
            timeout_base_seconds: 180,
            timeout_per_mb_seconds: 15,
            timeout_cap_seconds: 900,
            poll_interval_ms: 1000,
            term_grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reduce {
    pub enabled: bool,
    /// Size window outside which the reduced variant is skipped.
    pub min_bytes: u64,
    pub max_bytes: u64,
}
impl Default for Reduce {
    fn default() -> Self {
        Self {
            enabled: true,
            min_bytes: 2 * 1024 * 1024,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repair {
    pub placeholder_px: u32,
}
impl Default for Repair {
    fn default() -> Self {
        Self {
            placeholder_px: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    pub pdftoppm_exe: String,
    pub pdfinfo_exe: String,
    pub dpi: u32,
    /// Page cap for converted slide/word documents.
    pub max_slide_pages: u32,
    /// Page cap for PDF-native jobs.
    pub max_pdf_pages: u32,
    pub max_width: u32,
    pub first_page_quality: u8,
    pub other_pages_quality: u8,
    pub timeout_seconds: u64,
}
impl Default for Raster {
    fn default() -> Self {
        Self {
            pdftoppm_exe: "pdftoppm".into(),
            pdfinfo_exe: "pdfinfo".into(),
            dpi: 200,
            max_slide_pages: 4,
            max_pdf_pages: 3,
            max_width: 800,
            first_page_quality: 60,
            other_pages_quality: 5,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    /// 0 = half the available CPUs, minimum 2.
    pub workers: usize,
    pub capacity_multiplier: usize,
    /// Delay between producer requests, to avoid hammering the job source.
    pub pace_ms: u64,
}
impl Default for Queue {
    fn default() -> Self {
        Self {
            workers: 0,
            capacity_multiplier: 2,
            pace_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashing {
    pub mode: String,
    pub fast_window_bytes: u64,
}
impl Default for Hashing {
    fn default() -> Self {
        Self {
            mode: "fast_2x16mb".into(),
            fast_window_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_work_dirs: bool,
    pub dump_reports: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_work_dirs: false,
            dump_reports: false,
        }
    }
}
