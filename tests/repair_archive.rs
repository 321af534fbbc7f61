use deckshot::config::Config;
use deckshot::job::DeclaredFormat;
use deckshot::repair;
use deckshot::supervise::{ProcessTreeFinder, SweepSignal};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

struct NullFinder;

impl ProcessTreeFinder for NullFinder {
    fn find_by_marker(&self, _marker: &str) -> Vec<u32> {
        Vec::new()
    }
    fn signal(&self, _pid: u32, _sig: SweepSignal) {}
    fn alive(&self, _pid: u32) -> bool {
        false
    }
}

const SLIDE_XML: &str = r#"<?xml version="1.0"?>
<p:sld><p:pic><a:blipFill><a:blip r:embed="rId1"/></a:blipFill></p:pic>
<p:pic><a:blipFill><a:blip r:embed="rId2"/></a:blipFill></p:pic></p:sld>"#;

const SLIDE_RELS: &str = r#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="image" Target="../media/image1.png"/>
<Relationship Id="rId2" Type="image" Target="../media/image2.png"/>
</Relationships>"#;

/// Marker bytes for the member that gets corrupted after packing. Stored
/// uncompressed so the run is easy to find and damage in the raw file.
const CORRUPTIBLE: [u8; 4096] = [0xAB; 4096];

fn build_deck(path: &Path) {
    let file = File::create(path).unwrap();
    let mut writer = ZipWriter::new(file);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file("[Content_Types].xml", deflated).unwrap();
    writer.write_all(b"<?xml version=\"1.0\"?><Types/>").unwrap();

    writer.start_file("ppt/slides/slide1.xml", deflated).unwrap();
    writer.write_all(SLIDE_XML.as_bytes()).unwrap();

    writer
        .start_file("ppt/slides/_rels/slide1.xml.rels", deflated)
        .unwrap();
    writer.write_all(SLIDE_RELS.as_bytes()).unwrap();

    writer.start_file("ppt/media/image1.png", stored).unwrap();
    writer.write_all(&CORRUPTIBLE).unwrap();

    writer.start_file("ppt/media/image2.png", deflated).unwrap();
    writer.write_all(b"intact-image-bytes").unwrap();

    writer.finish().unwrap();
}

/// Flip part of the stored member's data without touching the archive
/// structure, so the member fails its checksum on extraction.
fn corrupt_stored_member(path: &Path) {
    let mut bytes = std::fs::read(path).unwrap();
    let start = bytes
        .windows(64)
        .position(|w| w.iter().all(|&b| b == 0xAB))
        .expect("stored run present");
    for b in &mut bytes[start..start + 64] {
        *b = 0xCD;
    }
    std::fs::write(path, bytes).unwrap();
}

fn member_string(archive: &mut ZipArchive<File>, name: &str) -> String {
    let mut member = archive.by_name(name).unwrap();
    let mut out = String::new();
    member.read_to_string(&mut out).unwrap();
    out
}

fn run_repair(input: &Path, work_dir: &Path) -> repair::RepairOutcome {
    let cfg = Config::default();
    repair::repair(
        &cfg,
        &NullFinder,
        input,
        DeclaredFormat::SlideDeck,
        work_dir,
        "t-repair",
        Duration::from_secs(10),
    )
    .unwrap()
    .expect("deck should be repairable")
}

#[test]
fn corrupted_image_is_replaced_and_unreferenced() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");
    build_deck(&input);
    corrupt_stored_member(&input);

    let outcome = run_repair(&input, dir.path());
    assert_eq!(
        outcome.dropped_members,
        vec!["ppt/media/image1.png".to_string()]
    );

    let file = File::open(&outcome.repaired_path).unwrap();
    let mut repaired = ZipArchive::new(file).unwrap();

    // The member path survives, holding a placeholder image.
    let mut placeholder = Vec::new();
    repaired
        .by_name("ppt/media/image1.png")
        .unwrap()
        .read_to_end(&mut placeholder)
        .unwrap();
    assert!(!placeholder.is_empty());
    assert_ne!(&placeholder[..4], &CORRUPTIBLE[..4]);

    // No dangling relationship or embed remains.
    let rels = member_string(&mut repaired, "ppt/slides/_rels/slide1.xml.rels");
    assert!(!rels.contains("image1.png"));
    assert!(rels.contains("image2.png"));

    let slide = member_string(&mut repaired, "ppt/slides/slide1.xml");
    assert!(!slide.contains("rId1"));
    assert!(slide.contains("rId2"));
}

#[test]
fn intact_members_survive_repair_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");
    build_deck(&input);
    corrupt_stored_member(&input);

    let outcome = run_repair(&input, dir.path());
    let file = File::open(&outcome.repaired_path).unwrap();
    let mut repaired = ZipArchive::new(file).unwrap();

    let mut intact = Vec::new();
    repaired
        .by_name("ppt/media/image2.png")
        .unwrap()
        .read_to_end(&mut intact)
        .unwrap();
    assert_eq!(intact, b"intact-image-bytes");
}

#[test]
fn repairing_a_healthy_deck_drops_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");
    build_deck(&input);

    let outcome = run_repair(&input, dir.path());
    assert!(outcome.dropped_members.is_empty());

    let file = File::open(&outcome.repaired_path).unwrap();
    let mut repaired = ZipArchive::new(file).unwrap();
    let rels = member_string(&mut repaired, "ppt/slides/_rels/slide1.xml.rels");
    assert!(rels.contains("image1.png"));
    assert!(rels.contains("image2.png"));
}

#[test]
fn garbage_input_is_unrepairable() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");
    std::fs::write(&input, b"not a zip archive at all").unwrap();

    let cfg = Config::default();
    let outcome = repair::repair(
        &cfg,
        &NullFinder,
        &input,
        DeclaredFormat::SlideDeck,
        dir.path(),
        "t-garbage",
        Duration::from_secs(10),
    )
    .unwrap();
    assert!(outcome.is_none());
}

#[test]
fn traversal_member_names_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");

    let file = File::create(&input).unwrap();
    let mut writer = ZipWriter::new(file);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file("../escape.xml", deflated).unwrap();
    writer.write_all(b"<x/>").unwrap();
    writer.start_file("ppt/slides/slide1.xml", deflated).unwrap();
    writer.write_all(b"<p:sld/>").unwrap();
    writer.finish().unwrap();

    let outcome = run_repair(&input, dir.path());
    let file = File::open(&outcome.repaired_path).unwrap();
    let repaired = ZipArchive::new(file).unwrap();
    let names: Vec<&str> = repaired.file_names().collect();
    assert_eq!(names, vec!["ppt/slides/slide1.xml"]);

    // Nothing landed outside the work tree either.
    assert!(!dir.path().parent().unwrap().join("escape.xml").exists());
}

#[test]
fn repaired_output_lands_in_the_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");
    build_deck(&input);

    let outcome = run_repair(&input, dir.path());
    assert_eq!(
        outcome.repaired_path,
        PathBuf::from(dir.path().join("deck-repaired.pptx"))
    );
}
