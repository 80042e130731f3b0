//! Integration tests for the clipboard poller, driven by the in-memory clipboard

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::watch;

use clipstash::clipboard::memory::MemoryClipboard;
use clipstash::config::FilterConfig;
use clipstash::history::{EntryKind, HistoryStore, InsertOutcome};
use clipstash::poller::{
    ImagePoll, NoiseFilter, PollMode, Poller, PollerSettings, TextPoll,
};

struct Fixture {
    clipboard: Arc<MemoryClipboard>,
    store: Arc<HistoryStore>,
    _temp_dir: TempDir,
}

async fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        HistoryStore::open(&temp_dir.path().join("history.db"), 50)
            .await
            .unwrap(),
    );
    Fixture {
        clipboard: Arc::new(MemoryClipboard::new()),
        store,
        _temp_dir: temp_dir,
    }
}

fn poller(fixture: &Fixture, settings: PollerSettings, filter: NoiseFilter) -> Poller {
    Poller::new(
        fixture.clipboard.clone(),
        Arc::clone(&fixture.store),
        filter,
        settings,
    )
}

fn small_png(shade: u8) -> Vec<u8> {
    let image = RgbaImage::from_pixel(8, 8, Rgba([shade, shade, shade, 255]));
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

async fn texts(store: &HistoryStore) -> Vec<String> {
    store
        .snapshot()
        .await
        .unwrap()
        .iter()
        .filter_map(|e| e.as_text().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_copy_sequence_builds_history() {
    let fixture = fixture().await;
    let mut poller = poller(
        &fixture,
        PollerSettings::for_mode(PollMode::TextOnly),
        NoiseFilter::default(),
    );

    for text in ["first copy", "second copy", "first copy"] {
        fixture.clipboard.set_text(text);
        poller.poll_once(false).await;
    }

    assert_eq!(texts(&fixture.store).await, vec!["second copy", "first copy"]);
}

#[tokio::test]
async fn test_user_ignore_patterns() {
    let fixture = fixture().await;
    let filter = NoiseFilter::from_config(&FilterConfig {
        ignore_patterns: vec![r"^\d{6}$".to_string()],
        ..FilterConfig::default()
    })
    .unwrap();
    let mut poller = poller(&fixture, PollerSettings::for_mode(PollMode::TextOnly), filter);

    fixture.clipboard.set_text("123456");
    assert_eq!(poller.poll_once(false).await.text, TextPoll::Filtered);

    fixture.clipboard.set_text("meeting at 10");
    assert_eq!(
        poller.poll_once(false).await.text,
        TextPoll::Stored(InsertOutcome::Inserted)
    );
    assert_eq!(texts(&fixture.store).await, vec!["meeting at 10"]);
}

#[tokio::test]
async fn test_image_capture_in_standard_mode() {
    let fixture = fixture().await;
    let mut poller = poller(
        &fixture,
        PollerSettings::for_mode(PollMode::Standard),
        NoiseFilter::default(),
    );

    fixture.clipboard.set_image(small_png(10), "png");
    let reports = [
        poller.poll_once(false).await,
        poller.poll_once(false).await,
        poller.poll_once(false).await,
    ];
    assert_eq!(reports[0].text, TextPoll::NoContent);
    assert_eq!(reports[0].image, ImagePoll::Skipped);
    assert_eq!(
        reports[2].image,
        ImagePoll::Stored(InsertOutcome::Inserted)
    );
    assert_eq!(fixture.clipboard.image_reads(), 1);

    fixture.clipboard.set_image(small_png(200), "png");
    let forced = poller.poll_once(true).await;
    assert_eq!(forced.image, ImagePoll::Stored(InsertOutcome::Inserted));

    let kinds: Vec<EntryKind> = fixture
        .store
        .snapshot()
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind())
        .collect();
    assert_eq!(kinds, vec![EntryKind::Image, EntryKind::Image]);
}

#[tokio::test]
async fn test_text_only_mode_never_reads_images() {
    let fixture = fixture().await;
    let mut poller = poller(
        &fixture,
        PollerSettings::for_mode(PollMode::TextOnly),
        NoiseFilter::default(),
    );

    fixture.clipboard.set_image(small_png(1), "png");
    for _ in 0..9 {
        poller.poll_once(false).await;
    }
    assert_eq!(fixture.clipboard.image_reads(), 0);
    assert_eq!(fixture.clipboard.text_reads(), 9);
}

#[tokio::test]
async fn test_backoff_then_recovery() {
    let fixture = fixture().await;
    let settings = PollerSettings::for_mode(PollMode::Minimal);
    let mut poller = poller(&fixture, settings.clone(), NoiseFilter::default());

    fixture.clipboard.set_text("eventually readable");
    fixture.clipboard.fail_next_reads(settings.max_errors as usize);

    for _ in 0..settings.max_errors {
        assert_eq!(poller.poll_once(false).await.text, TextPoll::ReadFailed);
    }
    assert_eq!(poller.next_delay(), settings.backoff_interval);

    let report = poller.poll_once(false).await;
    assert!(report.stored_anything());
    assert_eq!(poller.next_delay(), settings.interval);
}

#[tokio::test]
async fn test_run_loop_captures_and_stops() {
    let fixture = fixture().await;
    let mut settings = PollerSettings::for_mode(PollMode::Standard);
    settings.interval = Duration::from_millis(10);
    let poller = poller(&fixture, settings, NoiseFilter::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(shutdown_rx));

    fixture.clipboard.set_text("copied while running");
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller did not stop")
        .unwrap();

    assert_eq!(texts(&fixture.store).await, vec!["copied while running"]);
    let reads_after_stop = fixture.clipboard.text_reads();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.clipboard.text_reads(), reads_after_stop);
}
