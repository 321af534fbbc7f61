use crate::config::Config;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Whether the source falls inside the window where producing a reduced
/// variant is worth it: below it the savings are noise, above it the
/// recompression pass itself is too slow.
pub fn within_window(cfg: &Config, source_bytes: u64) -> bool {
    cfg.reduce.enabled
        && source_bytes >= cfg.reduce.min_bytes
        && source_bytes <= cfg.reduce.max_bytes
}

/// Produce a size-reduced variant of a zip-based source by recompressing
/// every member at the maximum deflate level (office tooling routinely stores
/// media uncompressed or lightly compressed). Returns `None` when the source
/// is outside the window, is not a readable archive, or did not shrink.
pub fn reduce(cfg: &Config, input: &Path, work_dir: &Path) -> Result<Option<PathBuf>> {
    let source_bytes = std::fs::metadata(input)
        .with_context(|| format!("stat {}", input.display()))?
        .len();
    if !within_window(cfg, source_bytes) {
        return Ok(None);
    }

    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut archive = match ZipArchive::new(file) {
        Ok(a) => a,
        Err(err) => {
            debug!("skipping reduction, not a readable archive: {err}");
            return Ok(None);
        }
    };

    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("zip");
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("source");
    let reduced_path = work_dir.join(format!("{stem}-reduced.{ext}"));

    let out = File::create(&reduced_path)
        .with_context(|| format!("creating {}", reduced_path.display()))?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    for i in 0..archive.len() {
        let mut member = match archive.by_index(i) {
            Ok(m) => m,
            Err(err) => {
                // A corrupt member means the source needs repair, not
                // reduction; let the conversion path discover that.
                debug!("skipping reduction, unreadable member: {err}");
                drop(writer);
                let _ = std::fs::remove_file(&reduced_path);
                return Ok(None);
            }
        };
        if member.is_dir() {
            continue;
        }
        let name = member.name().to_string();
        let mut bytes = Vec::new();
        if member.read_to_end(&mut bytes).is_err() {
            drop(writer);
            let _ = std::fs::remove_file(&reduced_path);
            return Ok(None);
        }
        writer
            .start_file(&name, options)
            .with_context(|| format!("starting member {name}"))?;
        writer.write_all(&bytes)?;
    }
    writer.finish().with_context(|| "finishing reduced archive")?;

    let reduced_bytes = std::fs::metadata(&reduced_path).map(|m| m.len()).unwrap_or(0);
    if reduced_bytes == 0 || reduced_bytes >= source_bytes {
        debug!("reduced variant not smaller ({reduced_bytes} >= {source_bytes}); discarding");
        let _ = std::fs::remove_file(&reduced_path);
        return Ok(None);
    }

    info!(
        "reduced source {} -> {} bytes ({})",
        source_bytes,
        reduced_bytes,
        reduced_path.display()
    );
    Ok(Some(reduced_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds() {
        let cfg = Config::default();
        assert!(!within_window(&cfg, 1024));
        assert!(within_window(&cfg, 10 * 1024 * 1024));
        assert!(!within_window(&cfg, 500 * 1024 * 1024));
    }

    #[test]
    fn disabled_reduction_is_skipped() {
        let mut cfg = Config::default();
        cfg.reduce.enabled = false;
        assert!(!within_window(&cfg, 10 * 1024 * 1024));
    }

    #[test]
    fn stored_archive_shrinks() {
        let mut cfg = Config::default();
        cfg.reduce.min_bytes = 0;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("deck.pptx");

        let file = File::create(&input).unwrap();
        let mut writer = ZipWriter::new(file);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        writer.start_file("ppt/media/blob.bin", stored).unwrap();
        writer.write_all(&vec![0u8; 256 * 1024]).unwrap();
        writer.finish().unwrap();

        let reduced = reduce(&cfg, &input, dir.path()).unwrap().unwrap();
        let before = std::fs::metadata(&input).unwrap().len();
        let after = std::fs::metadata(&reduced).unwrap().len();
        assert!(after < before);

        // Already tightly packed: a second pass has nothing left to gain.
        assert!(reduce(&cfg, &reduced, dir.path()).unwrap().is_none());
    }
}
