use crate::config::Config;
use crate::supervise::{self, ExitKind, ProcessTreeFinder};
use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Total page count via pdfinfo. Best-effort: a malformed PDF just means the
/// report falls back to the number of rendered pages.
pub fn page_count(cfg: &Config, pdf: &Path) -> Option<u32> {
    let output = Command::new(&cfg.raster.pdfinfo_exe)
        .arg(pdf)
        .output()
        .ok()?;
    if !output.status.success() {
        warn!("pdfinfo failed for {}", pdf.display());
        return None;
    }
    parse_page_count(&String::from_utf8_lossy(&output.stdout))
}

pub(crate) fn parse_page_count(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Render the first `max_pages` pages of `pdf` at the configured DPI and
/// encode them as JPEG previews into `images_dir`. The first page is the
/// storefront image and keeps a higher quality than the rest.
pub fn rasterize(
    cfg: &Config,
    finder: &dyn ProcessTreeFinder,
    pdf: &Path,
    images_dir: &Path,
    max_pages: u32,
    marker: &str,
) -> Result<Vec<PathBuf>> {
    let render_dir = tempfile::Builder::new()
        .prefix(&format!("{marker}-render-"))
        .tempdir_in(images_dir.parent().unwrap_or(Path::new(".")))
        .with_context(|| "creating render dir")?;
    let prefix = render_dir.path().join("page");

    let argv = vec![
        cfg.raster.pdftoppm_exe.clone(),
        "-png".into(),
        "-r".into(),
        cfg.raster.dpi.to_string(),
        "-f".into(),
        "1".into(),
        "-l".into(),
        max_pages.max(1).to_string(),
        pdf.display().to_string(),
        prefix.display().to_string(),
    ];

    let plan = supervise::plan(
        cfg,
        argv,
        marker,
        Duration::from_secs(cfg.raster.timeout_seconds),
    );
    let record = supervise::run(&plan, finder)?;
    if record.exit == ExitKind::TimedOut {
        return Err(anyhow!("pdftoppm timed out"));
    }

    let mut rendered = rendered_pages(render_dir.path())?;
    if rendered.is_empty() {
        return Err(anyhow!(
            "pdftoppm produced no pages (exit {:?}): {}",
            record.exit,
            record.stderr.lines().next().unwrap_or("")
        ));
    }
    rendered.truncate(max_pages as usize);

    let mut saved = Vec::with_capacity(rendered.len());
    for (i, page) in rendered.iter().enumerate() {
        let img = image::open(page).with_context(|| format!("decoding {}", page.display()))?;
        let img = downscale(img, cfg.raster.max_width);

        let quality = if i == 0 {
            cfg.raster.first_page_quality
        } else {
            cfg.raster.other_pages_quality
        };
        let dest = images_dir.join(format!("page_{}.jpg", i + 1));
        let file = std::fs::File::create(&dest)
            .with_context(|| format!("creating {}", dest.display()))?;
        let mut writer = BufWriter::new(file);
        DynamicImage::ImageRgb8(img.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
            .with_context(|| format!("encoding {}", dest.display()))?;
        debug!("saved {} (quality {quality})", dest.display());
        saved.push(dest);
    }

    Ok(saved)
}

/// pdftoppm names output `page-1.png` or zero-padded `page-01.png`; sort by
/// the numeric suffix, not lexically.
fn rendered_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| "reading render dir")? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(num) = stem.rsplit('-').next().and_then(|n| n.parse::<u32>().ok()) {
            pages.push((num, path));
        }
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}

fn downscale(img: DynamicImage, max_width: u32) -> DynamicImage {
    match resized_dims(img.width(), img.height(), max_width) {
        Some((w, h)) => img.resize_exact(w, h, image::imageops::FilterType::Lanczos3),
        None => img,
    }
}

pub(crate) fn resized_dims(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
    if max_width == 0 || width <= max_width {
        return None;
    }
    let ratio = max_width as f64 / width as f64;
    let new_height = ((height as f64 * ratio) as u32).max(1);
    Some((max_width, new_height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pdfinfo_pages_line() {
        let out = "Title: deck\nPages:          7\nEncrypted: no\n";
        assert_eq!(parse_page_count(out), Some(7));
    }

    #[test]
    fn missing_pages_line_is_none() {
        assert_eq!(parse_page_count("Title: deck\n"), None);
    }

    #[test]
    fn wide_pages_downscale_preserving_ratio() {
        assert_eq!(resized_dims(1600, 1200, 800), Some((800, 600)));
        assert_eq!(resized_dims(800, 600, 800), None);
        assert_eq!(resized_dims(400, 300, 800), None);
    }
}
