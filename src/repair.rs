use crate::backend;
use crate::config::Config;
use crate::job::DeclaredFormat;
use crate::supervise::ProcessTreeFinder;
use crate::util::ensure_dir;
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Debug)]
pub struct RepairOutcome {
    pub repaired_path: PathBuf,
    /// Archive entries that could not be recovered: images were replaced by
    /// placeholders, everything else was omitted.
    pub dropped_members: Vec<String>,
}

/// Best-effort repair of a zip-based office document that a backend rejected.
/// Legacy binary formats are first normalized to their zip-based sibling via
/// one supervised conversion; if that fails, so does repair. Returns `None`
/// when the input is unrepairable.
pub fn repair(
    cfg: &Config,
    finder: &dyn ProcessTreeFinder,
    input: &Path,
    format: DeclaredFormat,
    work_dir: &Path,
    marker: &str,
    timeout: Duration,
) -> Result<Option<RepairOutcome>> {
    let (path, ext) = if format.is_legacy() {
        let target = match format {
            DeclaredFormat::LegacySlideDeck => "pptx",
            _ => "docx",
        };
        match backend::run_normalize(cfg, finder, input, work_dir, marker, target, timeout)? {
            Some(normalized) => {
                info!("normalized legacy source to {}", normalized.display());
                (normalized, target)
            }
            None => return Ok(None),
        }
    } else if format.is_zip_based() {
        (input.to_path_buf(), format.extension())
    } else {
        return Ok(None);
    };

    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive = match ZipArchive::new(file) {
        Ok(a) => a,
        Err(err) => {
            warn!("{} is not a valid zip container: {err}", path.display());
            return Ok(None);
        }
    };

    let extract_root = tempfile::Builder::new()
        .prefix(&format!("{marker}-repair-"))
        .tempdir_in(work_dir)
        .with_context(|| "creating repair dir")?;

    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.name_for_index(i).unwrap_or_default().to_string())
        .collect();

    // Member-wise extraction: one corrupted entry must not abort the rest.
    let mut dropped = Vec::new();
    for (i, name) in names.iter().enumerate() {
        if name.is_empty() || name.ends_with('/') {
            continue;
        }
        let Some(dest) = sanitized_dest(extract_root.path(), name) else {
            warn!("skipping archive entry escaping the tree: {name}");
            continue;
        };

        match extract_member(&mut archive, i, &dest) {
            Ok(()) => {}
            Err(err) => {
                if is_image_member(name) {
                    warn!("replacing corrupted image with placeholder: {name} ({err})");
                    write_placeholder(&dest, cfg.repair.placeholder_px)?;
                } else {
                    warn!("omitting corrupted member: {name} ({err})");
                }
                dropped.push(name.clone());
            }
        }
    }

    if !dropped.is_empty() {
        clean_references(extract_root.path(), &dropped)?;
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("source");
    let repaired_path = work_dir.join(format!("{stem}-repaired.{ext}"));
    repack(extract_root.path(), &repaired_path)?;

    info!(
        "repaired {} -> {} ({} member(s) dropped)",
        path.display(),
        repaired_path.display(),
        dropped.len()
    );

    Ok(Some(RepairOutcome {
        repaired_path,
        dropped_members: dropped,
    }))
}

fn extract_member(archive: &mut ZipArchive<File>, index: usize, dest: &Path) -> Result<()> {
    let mut member = archive.by_index(index)?;
    let mut bytes = Vec::new();
    // CRC mismatches surface here, at the end of the read.
    member.read_to_end(&mut bytes)?;
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(dest, bytes).with_context(|| format!("writing {}", dest.display()))?;
    Ok(())
}

fn sanitized_dest(root: &Path, name: &str) -> Option<PathBuf> {
    let mut dest = root.to_path_buf();
    for part in name.split('/') {
        if part.is_empty() || part == "." || part == ".." || part.contains('\\') {
            return None;
        }
        dest.push(part);
    }
    Some(dest)
}

fn is_image_member(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}

/// Fixed-size white placeholder keeping the member path present so the
/// document stays structurally valid.
fn write_placeholder(dest: &Path, px: u32) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    let img = image::RgbImage::from_pixel(px.max(1), px.max(1), image::Rgb([255, 255, 255]));
    img.save(dest)
        .with_context(|| format!("writing placeholder {}", dest.display()))?;
    Ok(())
}

/// Strip every reference to a dropped member: relationship entries whose
/// target names it, then blip nodes embedding the removed relationship ids.
fn clean_references(root: &Path, dropped: &[String]) -> Result<()> {
    let basenames: Vec<String> = dropped
        .iter()
        .filter_map(|m| m.rsplit('/').next())
        .map(|s| s.to_string())
        .collect();

    let mut xml_files = Vec::new();
    let mut rels_files = Vec::new();
    collect_documents(root, &mut xml_files, &mut rels_files)?;

    let mut removed_ids = Vec::new();
    for path in &rels_files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let (cleaned, ids) = clean_relationships(&content, &basenames)?;
        removed_ids.extend(ids);
        std::fs::write(path, cleaned).with_context(|| format!("writing {}", path.display()))?;
    }

    if removed_ids.is_empty() {
        return Ok(());
    }

    for path in xml_files.iter().chain(rels_files.iter()) {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cleaned = clean_embeds(&content, &removed_ids)?;
        std::fs::write(path, cleaned).with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(())
}

fn collect_documents(
    dir: &Path,
    xml: &mut Vec<PathBuf>,
    rels: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_documents(&path, xml, rels)?;
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.ends_with(".rels") {
                rels.push(path);
            } else if name.ends_with(".xml") {
                xml.push(path);
            }
        }
    }
    Ok(())
}

/// Remove `<Relationship .../>` entries whose Target names a dropped member;
/// returns the cleaned document and the relationship ids that were removed.
pub(crate) fn clean_relationships(
    content: &str,
    dropped_basenames: &[String],
) -> Result<(String, Vec<String>)> {
    let rel_re = Regex::new(r"<Relationship\b[^>]*?/>").with_context(|| "relationship regex")?;
    let id_re = Regex::new(r#"\bId="([^"]*)""#).with_context(|| "id regex")?;
    let target_re = Regex::new(r#"\bTarget="([^"]*)""#).with_context(|| "target regex")?;

    let mut removed = Vec::new();
    let cleaned = rel_re.replace_all(content, |caps: &Captures| {
        let element = &caps[0];
        let target = target_re
            .captures(element)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        if dropped_basenames.iter().any(|b| target.contains(b.as_str())) {
            if let Some(id) = id_re.captures(element) {
                removed.push(id[1].to_string());
            }
            String::new()
        } else {
            element.to_string()
        }
    });

    Ok((cleaned.into_owned(), removed))
}

/// Remove blip nodes (image embeds) referencing any of the removed ids.
pub(crate) fn clean_embeds(content: &str, removed_ids: &[String]) -> Result<String> {
    let mut out = content.to_string();
    for id in removed_ids {
        let pattern = format!(
            r#"(?s)<[\w]*:?blip\b[^>]*?(?:r:embed|r:link)="{}"[^>]*?(?:/>|>.*?</[\w]*:?blip>)"#,
            regex::escape(id)
        );
        let re = Regex::new(&pattern).with_context(|| "blip regex")?;
        out = re.replace_all(&out, "").into_owned();
    }
    Ok(out)
}

/// Repackage the patched tree; the result is a structurally valid archive
/// even when some members are placeholders.
fn repack(root: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest).with_context(|| format!("creating {}", dest.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    for path in files {
        let rel = path
            .strip_prefix(root)
            .with_context(|| "relativizing member path")?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer
            .start_file(&name, options)
            .with_context(|| format!("starting member {name}"))?;
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        writer.write_all(&bytes)?;
    }

    writer.finish().with_context(|| "finishing archive")?;
    Ok(())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &str = r#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="t" Target="../media/image1.png"/>
<Relationship Id="rId2" Type="t" Target="../media/image2.png"/>
</Relationships>"#;

    #[test]
    fn relationship_to_dropped_member_is_removed() {
        let (cleaned, ids) =
            clean_relationships(RELS, &["image1.png".to_string()]).unwrap();
        assert!(!cleaned.contains("image1.png"));
        assert!(cleaned.contains("image2.png"));
        assert_eq!(ids, vec!["rId1".to_string()]);
    }

    #[test]
    fn untouched_document_round_trips() {
        let (cleaned, ids) = clean_relationships(RELS, &["missing.png".to_string()]).unwrap();
        assert_eq!(cleaned, RELS);
        assert!(ids.is_empty());
    }

    #[test]
    fn blip_embedding_removed_id_is_stripped() {
        let xml = r#"<p:pic><a:blipFill><a:blip r:embed="rId1"/></a:blipFill></p:pic>"#;
        let cleaned = clean_embeds(xml, &["rId1".to_string()]).unwrap();
        assert!(!cleaned.contains("rId1"));
        assert!(cleaned.contains("blipFill"));
    }

    #[test]
    fn paired_blip_element_is_stripped() {
        let xml =
            r#"<a:blip r:embed="rId9"><a:alphaModFix amt="50000"/></a:blip><a:srcRect/>"#;
        let cleaned = clean_embeds(xml, &["rId9".to_string()]).unwrap();
        assert!(!cleaned.contains("rId9"));
        assert!(cleaned.contains("srcRect"));
    }
}
