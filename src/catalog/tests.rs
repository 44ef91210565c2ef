// Tests for the video catalog

use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

/// Transcoder that writes a small file for every tier except the failing ones
struct FakeTranscoder {
    calls: AtomicUsize,
    failing_heights: Vec<u32>,
    write_empty: bool,
}

impl FakeTranscoder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing_heights: Vec::new(),
            write_empty: false,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscodePort for FakeTranscoder {
    async fn transcode(
        &self,
        _source: &Path,
        tier: &StreamProfile,
        output: &Path,
    ) -> Result<(), DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_heights.contains(&tier.height) {
            return Err(DomainError::ProcessFailed("encoder crashed".to_string()));
        }
        let content: &[u8] = if self.write_empty { b"" } else { b"video" };
        std::fs::write(output, content)?;
        Ok(())
    }

    async fn cancel_transcode(&self) {}
}

struct Fixture {
    _root: TempDir,
    videos: PathBuf,
    transcoded: PathBuf,
    transcoder: Arc<FakeTranscoder>,
    catalog: VideoCatalog,
}

fn fixture_with(transcoder: FakeTranscoder) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let videos = root.path().join("videos");
    let transcoded = root.path().join("transcoded");
    let transcoder = Arc::new(transcoder);
    let catalog = VideoCatalog::new(&videos, &transcoded, transcoder.clone());
    catalog.ensure_directories().unwrap();
    Fixture {
        _root: root,
        videos,
        transcoded,
        transcoder,
        catalog,
    }
}

fn fixture() -> Fixture {
    fixture_with(FakeTranscoder::new())
}

fn write(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_ensure_directories_creates_both() {
    let f = fixture();
    assert!(f.videos.is_dir());
    assert!(f.transcoded.is_dir());
}

#[test]
fn test_scan_filters_extensions() {
    let f = fixture();
    write(&f.videos.join("b.MKV"), b"1234");
    write(&f.videos.join("a.mp4"), b"12");
    write(&f.videos.join("notes.txt"), b"x");
    std::fs::create_dir_all(f.videos.join("nested.mp4")).unwrap();

    let entries = f.catalog.scan();
    let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, vec!["a.mp4", "b.MKV"]);
    assert_eq!(entries[1].file_size, 4);
    assert_eq!(entries[1].extension, "mkv");
}

#[test]
fn test_scan_is_idempotent() {
    let f = fixture();
    write(&f.videos.join("a.mp4"), b"12");
    write(&f.videos.join("b.webm"), b"34");

    let first = f.catalog.scan();
    let second = f.catalog.scan();
    assert_eq!(first, second);
    assert_eq!(f.catalog.len(), 2);
}

#[test]
fn test_scan_drops_removed_files() {
    let f = fixture();
    write(&f.videos.join("a.mp4"), b"12");
    write(&f.videos.join("b.mp4"), b"34");
    f.catalog.scan();

    std::fs::remove_file(f.videos.join("a.mp4")).unwrap();
    let entries = f.catalog.scan();
    assert_eq!(entries.len(), 1);
    assert!(f.catalog.get("a.mp4").is_none());
    assert!(f.catalog.get("b.mp4").is_some());
}

#[test]
fn test_scan_of_missing_directory_clears_catalog() {
    let f = fixture();
    write(&f.videos.join("a.mp4"), b"12");
    f.catalog.scan();
    assert!(!f.catalog.is_empty());

    std::fs::remove_dir_all(&f.videos).unwrap();
    assert!(f.catalog.scan().is_empty());
    assert!(f.catalog.is_empty());
}

#[test]
fn test_scan_warms_variants_from_disk() {
    let f = fixture();
    write(&f.videos.join("movie.mp4"), b"source");
    write(&f.transcoded.join("movie").join("movie_720p.mp4"), b"v");
    write(&f.transcoded.join("movie").join("movie_240p.mp4"), b"");

    f.catalog.scan();
    let entry = f.catalog.get("movie.mp4").unwrap();
    assert_eq!(entry.variants().len(), 1);
    assert_eq!(entry.variants()[0].height, 720);
    assert_eq!(entry.variants()[0].bitrate_bps, 2_500_000);
}

#[tokio::test]
async fn test_prepare_adopts_existing_variants_without_encoding() {
    let f = fixture();
    write(&f.videos.join("clip.mp4"), b"source");
    f.catalog.scan();
    let entry = f.catalog.get("clip.mp4").unwrap();
    assert!(!entry.has_variants());

    // variants appear on disk after the scan
    write(&f.transcoded.join("clip").join("clip_360p.mp4"), b"v");
    write(&f.transcoded.join("clip").join("clip_240p.mp4"), b"v");

    let prepared = f.catalog.prepare(&entry).await.unwrap();
    let heights: Vec<u32> = prepared.variants().iter().map(|v| v.height).collect();
    assert_eq!(heights, vec![360, 240]);
    assert_eq!(f.transcoder.calls(), 0);
    assert_eq!(f.catalog.get("clip.mp4").unwrap().variants().len(), 2);
}

#[tokio::test]
async fn test_prepare_transcodes_every_tier() {
    let f = fixture();
    write(&f.videos.join("clip.mp4"), b"source");
    f.catalog.scan();
    let entry = f.catalog.get("clip.mp4").unwrap();

    let prepared = f.catalog.prepare(&entry).await.unwrap();
    let heights: Vec<u32> = prepared.variants().iter().map(|v| v.height).collect();
    assert_eq!(heights, vec![1080, 720, 480, 360, 240]);
    assert_eq!(f.transcoder.calls(), 5);
    assert!(f.transcoded.join("clip").join("clip_1080p.mp4").is_file());

    // prepared entries are returned untouched
    let again = f.catalog.prepare(&prepared).await.unwrap();
    assert_eq!(again, prepared);
    assert_eq!(f.transcoder.calls(), 5);
}

#[tokio::test]
async fn test_prepare_skips_failing_tiers() {
    let f = fixture_with(FakeTranscoder {
        failing_heights: vec![1080, 480],
        ..FakeTranscoder::new()
    });
    write(&f.videos.join("clip.mp4"), b"source");
    f.catalog.scan();
    let entry = f.catalog.get("clip.mp4").unwrap();

    let prepared = f.catalog.prepare(&entry).await.unwrap();
    let heights: Vec<u32> = prepared.variants().iter().map(|v| v.height).collect();
    assert_eq!(heights, vec![720, 360, 240]);
    assert_eq!(f.transcoder.calls(), 5);
}

#[tokio::test]
async fn test_prepare_rejects_empty_outputs() {
    let f = fixture_with(FakeTranscoder {
        write_empty: true,
        ..FakeTranscoder::new()
    });
    write(&f.videos.join("clip.mp4"), b"source");
    f.catalog.scan();
    let entry = f.catalog.get("clip.mp4").unwrap();

    let prepared = f.catalog.prepare(&entry).await.unwrap();
    assert!(!prepared.has_variants());
}

#[tokio::test]
async fn test_prepare_missing_source_is_an_error() {
    let f = fixture();
    write(&f.videos.join("gone.mp4"), b"source");
    f.catalog.scan();
    let entry = f.catalog.get("gone.mp4").unwrap();
    std::fs::remove_file(&entry.file_path).unwrap();

    assert!(matches!(
        f.catalog.prepare(&entry).await,
        Err(DomainError::FileNotFound(_))
    ));
    assert_eq!(f.transcoder.calls(), 0);
}
