//! Clipboard polling loop
//!
//! The [`Poller`] samples a [`ClipboardSource`] on a mode-dependent
//! schedule, drops noise, and hands new captures to the [`HistoryStore`].
//! Text is read on every iteration; images only on every Nth one. Consecutive
//! read failures stretch the delay first to a retry interval and then to a
//! long backoff, and a single good read resets it.

pub mod noise;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clipboard::{ClipboardError, ClipboardImage, ClipboardSource};
use crate::config::PollerConfig;
use crate::history::{HistoryError, HistoryStore, InsertOutcome};

pub use noise::{is_system_noise, NoiseFilter};

/// Text shorter than this (in characters) is never inserted.
pub const MIN_TEXT_LENGTH: usize = 2;

/// Bytes compared when checking whether the clipboard image changed
const IMAGE_PREFIX_LEN: usize = 1024;

/// Polling profile
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum PollMode {
    /// Text and images
    #[default]
    Standard,
    /// Text only, slower
    TextOnly,
    /// Text only, lowest wakeup rate
    Minimal,
    /// No background polling; captures only happen on demand
    Passive,
}

impl PollMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollMode::Standard => "standard",
            PollMode::TextOnly => "text-only",
            PollMode::Minimal => "minimal",
            PollMode::Passive => "passive",
        }
    }
}

/// Timing and capture settings for a [`Poller`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    pub mode: PollMode,
    /// Delay between healthy polls
    pub interval: Duration,
    /// Delay after a failed read
    pub retry_interval: Duration,
    /// Delay once `max_errors` consecutive reads have failed
    pub backoff_interval: Duration,
    pub max_errors: u32,
    /// Check for an image every N polls; `None` disables image capture
    pub image_every: Option<u32>,
    pub min_text_length: usize,
}

impl PollerSettings {
    /// Built-in settings for `mode`
    pub fn for_mode(mode: PollMode) -> Self {
        let (interval, retry, backoff, max_errors, image_every) = match mode {
            PollMode::Standard => (2, 3, 10, 5, Some(3)),
            PollMode::TextOnly => (3, 5, 15, 5, None),
            PollMode::Minimal => (10, 10, 30, 3, None),
            PollMode::Passive => (10, 10, 30, 3, None),
        };

        Self {
            mode,
            interval: Duration::from_secs(interval),
            retry_interval: Duration::from_secs(retry),
            backoff_interval: Duration::from_secs(backoff),
            max_errors,
            image_every,
            min_text_length: MIN_TEXT_LENGTH,
        }
    }

    /// Settings for the configured mode with any explicit overrides applied
    pub fn from_config(config: &PollerConfig) -> Self {
        Self::for_mode(config.mode).with_overrides(config)
    }

    /// Apply the optional overrides from `config`, keeping the mode.
    pub fn with_overrides(mut self, config: &PollerConfig) -> Self {
        if let Some(secs) = config.interval_secs {
            self.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = config.retry_secs {
            self.retry_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = config.backoff_secs {
            self.backoff_interval = Duration::from_secs(secs);
        }
        if let Some(max_errors) = config.max_errors {
            self.max_errors = max_errors.max(1);
        }
        if let Some(every) = config.image_every {
            self.image_every = (every > 0).then_some(every);
        }
        self
    }
}

/// What happened to the text side of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextPoll {
    /// Passed to the store, with the store's verdict
    Stored(InsertOutcome),
    /// Same text as the previous read
    Unchanged,
    /// Too short or matched the noise filter
    Filtered,
    /// Clipboard held no usable text
    NoContent,
    /// Reading the clipboard failed
    ReadFailed,
    /// The store rejected the write
    StoreFailed,
}

/// What happened to the image side of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePoll {
    /// Not this iteration
    Skipped,
    Stored(InsertOutcome),
    /// Same length and prefix as the previous image
    Unchanged,
    NoContent,
    ReadFailed,
    /// Bytes did not decode as an image
    Invalid,
    StoreFailed,
}

/// Outcome of [`Poller::poll_once`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub text: TextPoll,
    pub image: ImagePoll,
}

impl PollReport {
    /// Whether anything new landed in the store
    pub fn stored_anything(&self) -> bool {
        matches!(&self.text, TextPoll::Stored(outcome) if outcome.is_stored())
            || matches!(&self.image, ImagePoll::Stored(outcome) if outcome.is_stored())
    }
}

/// Cheap identity for the last image seen
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageFingerprint {
    len: usize,
    prefix: Vec<u8>,
}

impl ImageFingerprint {
    fn of(image: &ClipboardImage) -> Self {
        let end = image.data.len().min(IMAGE_PREFIX_LEN);
        Self {
            len: image.data.len(),
            prefix: image.data[..end].to_vec(),
        }
    }
}

/// Samples the clipboard and feeds the history store
pub struct Poller {
    source: Arc<dyn ClipboardSource>,
    store: Arc<HistoryStore>,
    filter: NoiseFilter,
    settings: PollerSettings,
    last_text: Option<String>,
    last_image: Option<ImageFingerprint>,
    consecutive_errors: u32,
    iteration: u64,
    storage_down: bool,
}

impl Poller {
    pub fn new(
        source: Arc<dyn ClipboardSource>,
        store: Arc<HistoryStore>,
        filter: NoiseFilter,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            store,
            filter,
            settings,
            last_text: None,
            last_image: None,
            consecutive_errors: 0,
            iteration: 0,
            storage_down: false,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Delay before the next poll given the current error streak
    pub fn next_delay(&self) -> Duration {
        if self.consecutive_errors == 0 {
            self.settings.interval
        } else if self.consecutive_errors < self.settings.max_errors {
            self.settings.retry_interval
        } else {
            self.settings.backoff_interval
        }
    }

    /// Run one iteration. `force_image` checks for an image regardless of
    /// the mode's schedule.
    pub async fn poll_once(&mut self, force_image: bool) -> PollReport {
        self.iteration += 1;

        let text = self.poll_text().await;

        let image_due = match self.settings.image_every {
            Some(every) => self.iteration % u64::from(every) == 0,
            None => false,
        };
        let image = if force_image || image_due {
            self.poll_image().await
        } else {
            ImagePoll::Skipped
        };

        PollReport { text, image }
    }

    async fn poll_text(&mut self) -> TextPoll {
        let raw = match self.source.read_text().await {
            Ok(raw) => raw,
            Err(e) if e.is_failure() => {
                self.consecutive_errors += 1;
                if self.consecutive_errors == self.settings.max_errors {
                    warn!(
                        "Clipboard read failed {} times in a row, backing off to {:?}: {}",
                        self.consecutive_errors, self.settings.backoff_interval, e
                    );
                } else {
                    debug!(
                        "Clipboard read failed ({} consecutive): {}",
                        self.consecutive_errors, e
                    );
                }
                return TextPoll::ReadFailed;
            }
            Err(_) => {
                self.consecutive_errors = 0;
                return TextPoll::NoContent;
            }
        };

        if self.consecutive_errors > 0 {
            debug!(
                "Clipboard readable again after {} failures",
                self.consecutive_errors
            );
            self.consecutive_errors = 0;
        }

        let text = raw.trim();
        if self.last_text.as_deref() == Some(text) {
            return TextPoll::Unchanged;
        }
        self.last_text = Some(text.to_string());

        if text.chars().count() < self.settings.min_text_length || self.filter.is_noise(text) {
            debug!("Ignoring clipboard text as noise");
            return TextPoll::Filtered;
        }

        match self.store.insert_text(text).await {
            Ok(outcome) => {
                self.storage_recovered();
                debug!("Text capture: {:?}", outcome);
                TextPoll::Stored(outcome)
            }
            Err(e) => {
                self.store_failed(&e);
                TextPoll::StoreFailed
            }
        }
    }

    async fn poll_image(&mut self) -> ImagePoll {
        let image = match self.source.read_image().await {
            Ok(image) => {
                // The clipboard answered, so the failure streak is over.
                self.consecutive_errors = 0;
                image
            }
            Err(ClipboardError::NoContent) => return ImagePoll::NoContent,
            Err(e) => {
                debug!("Clipboard image read failed: {}", e);
                return ImagePoll::ReadFailed;
            }
        };

        let fingerprint = ImageFingerprint::of(&image);
        if self.last_image.as_ref() == Some(&fingerprint) {
            return ImagePoll::Unchanged;
        }
        self.last_image = Some(fingerprint);

        match self.store.insert_image(&image.data, &image.format).await {
            Ok(outcome) => {
                self.storage_recovered();
                debug!("Image capture ({} bytes): {:?}", image.data.len(), outcome);
                ImagePoll::Stored(outcome)
            }
            Err(HistoryError::InvalidImage(reason)) => {
                warn!("Skipping clipboard image: {}", reason);
                ImagePoll::Invalid
            }
            Err(e) => {
                self.store_failed(&e);
                ImagePoll::StoreFailed
            }
        }
    }

    fn store_failed(&mut self, error: &HistoryError) {
        match error {
            HistoryError::StorageUnavailable => {
                if !self.storage_down {
                    error!("History storage unavailable, captures are not being saved");
                    self.storage_down = true;
                }
            }
            other => error!("Failed to save clipboard capture: {}", other),
        }
    }

    fn storage_recovered(&mut self) {
        if self.storage_down {
            info!("History storage available again");
            self.storage_down = false;
        }
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A poll that has started always completes before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if self.settings.mode == PollMode::Passive {
            info!("Passive mode, clipboard polling disabled");
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            return;
        }

        info!(
            "Polling {} clipboard every {:?} ({} mode)",
            self.source.name(),
            self.settings.interval,
            self.settings.mode.as_str()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.poll_once(false).await;

            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Clipboard poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MockClipboardSource;
    use crate::history::SkipReason;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = ::image::RgbaImage::from_pixel(width, height, ::image::Rgba([10, 20, 30, 255]));
        let mut cursor = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ::image::ImageFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    async fn setup(
        mock: MockClipboardSource,
        settings: PollerSettings,
    ) -> (Poller, Arc<HistoryStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            HistoryStore::open(&temp_dir.path().join("history.db"), 50)
                .await
                .unwrap(),
        );
        let poller = Poller::new(
            Arc::new(mock),
            Arc::clone(&store),
            NoiseFilter::default(),
            settings,
        );
        (poller, store, temp_dir)
    }

    #[test]
    fn test_mode_table() {
        let standard = PollerSettings::for_mode(PollMode::Standard);
        assert_eq!(standard.interval, Duration::from_secs(2));
        assert_eq!(standard.retry_interval, Duration::from_secs(3));
        assert_eq!(standard.backoff_interval, Duration::from_secs(10));
        assert_eq!(standard.max_errors, 5);
        assert_eq!(standard.image_every, Some(3));

        let text_only = PollerSettings::for_mode(PollMode::TextOnly);
        assert_eq!(text_only.interval, Duration::from_secs(3));
        assert_eq!(text_only.image_every, None);

        let minimal = PollerSettings::for_mode(PollMode::Minimal);
        assert_eq!(minimal.backoff_interval, Duration::from_secs(30));
        assert_eq!(minimal.max_errors, 3);
    }

    #[test]
    fn test_overrides() {
        let config = PollerConfig {
            mode: PollMode::Standard,
            interval_secs: Some(1),
            image_every: Some(0),
            ..PollerConfig::default()
        };
        let settings = PollerSettings::from_config(&config);
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.retry_interval, Duration::from_secs(3));
        assert_eq!(settings.image_every, None);
    }

    #[tokio::test]
    async fn test_text_is_stored_once() {
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text()
            .times(2)
            .returning(|| Ok("  copied text \n".to_string()));

        let (mut poller, store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::TextOnly)).await;

        let first = poller.poll_once(false).await;
        assert_eq!(first.text, TextPoll::Stored(InsertOutcome::Inserted));
        assert_eq!(first.image, ImagePoll::Skipped);
        assert!(first.stored_anything());

        let second = poller.poll_once(false).await;
        assert_eq!(second.text, TextPoll::Unchanged);

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.as_text(), Some("copied text"));
    }

    #[tokio::test]
    async fn test_noise_and_short_text_filtered() {
        let mut mock = MockClipboardSource::new();
        let mut reads = vec!["package main".to_string(), "x".to_string()].into_iter();
        mock.expect_read_text()
            .times(2)
            .returning(move || Ok(reads.next().unwrap()));

        let (mut poller, store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::TextOnly)).await;

        assert_eq!(poller.poll_once(false).await.text, TextPoll::Filtered);
        assert_eq!(poller.poll_once(false).await.text, TextPoll::Filtered);
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failures_escalate_to_backoff_and_reset() {
        let mut mock = MockClipboardSource::new();
        let mut calls = 0;
        mock.expect_read_text().returning(move || {
            calls += 1;
            if calls <= 5 {
                Err(ClipboardError::Platform("display gone".to_string()))
            } else {
                Ok("back again".to_string())
            }
        });

        let (mut poller, _store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::TextOnly)).await;
        assert_eq!(poller.next_delay(), Duration::from_secs(3));

        poller.poll_once(false).await;
        assert_eq!(poller.next_delay(), Duration::from_secs(5));

        for _ in 0..4 {
            assert_eq!(poller.poll_once(false).await.text, TextPoll::ReadFailed);
        }
        assert_eq!(poller.consecutive_errors(), 5);
        assert_eq!(poller.next_delay(), Duration::from_secs(15));

        let report = poller.poll_once(false).await;
        assert_eq!(report.text, TextPoll::Stored(InsertOutcome::Inserted));
        assert_eq!(poller.consecutive_errors(), 0);
        assert_eq!(poller.next_delay(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_image_read_resets_failure_streak() {
        let png = png_bytes(4, 4);
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text()
            .returning(|| Err(ClipboardError::Platform("text target broken".to_string())));
        mock.expect_read_image()
            .returning(move || Ok(ClipboardImage::new(png.clone(), "png")));

        let settings = PollerSettings::for_mode(PollMode::Standard);
        let (mut poller, _store, _temp_dir) = setup(mock, settings.clone()).await;

        poller.poll_once(false).await;
        poller.poll_once(false).await;
        assert_eq!(poller.consecutive_errors(), 2);
        assert_eq!(poller.next_delay(), settings.retry_interval);

        let report = poller.poll_once(false).await;
        assert_eq!(report.text, TextPoll::ReadFailed);
        assert_eq!(report.image, ImagePoll::Stored(InsertOutcome::Inserted));
        assert_eq!(poller.consecutive_errors(), 0);
        assert_eq!(poller.next_delay(), settings.interval);

        for _ in 0..9 {
            poller.poll_once(false).await;
            assert!(poller.consecutive_errors() < settings.max_errors);
            assert_ne!(poller.next_delay(), settings.backoff_interval);
        }
    }

    #[tokio::test]
    async fn test_empty_clipboard_is_not_a_failure() {
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text()
            .returning(|| Err(ClipboardError::NoContent));

        let (mut poller, _store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::Minimal)).await;

        for _ in 0..5 {
            assert_eq!(poller.poll_once(false).await.text, TextPoll::NoContent);
        }
        assert_eq!(poller.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_images_checked_every_third_poll() {
        let png = png_bytes(4, 4);
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text()
            .returning(|| Err(ClipboardError::NoContent));
        mock.expect_read_image()
            .times(2)
            .returning(move || Ok(ClipboardImage::new(png.clone(), "png")));

        let (mut poller, store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::Standard)).await;

        let reports: Vec<PollReport> = {
            let mut reports = Vec::new();
            for _ in 0..6 {
                reports.push(poller.poll_once(false).await);
            }
            reports
        };

        assert_eq!(reports[0].image, ImagePoll::Skipped);
        assert_eq!(reports[1].image, ImagePoll::Skipped);
        assert_eq!(reports[2].image, ImagePoll::Stored(InsertOutcome::Inserted));
        assert_eq!(reports[5].image, ImagePoll::Unchanged);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_forced_image_and_invalid_bytes() {
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text()
            .returning(|| Err(ClipboardError::NoContent));
        mock.expect_read_image()
            .times(1)
            .returning(|| Ok(ClipboardImage::new(vec![0u8; 64], "png")));

        let (mut poller, store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::TextOnly)).await;

        let report = poller.poll_once(true).await;
        assert_eq!(report.image, ImagePoll::Invalid);
        assert!(!report.stored_anything());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_store_keeps_sampling() {
        let mut mock = MockClipboardSource::new();
        let mut reads = vec!["first value", "second value"].into_iter();
        mock.expect_read_text()
            .times(2)
            .returning(move || Ok(reads.next().unwrap().to_string()));

        let (mut poller, store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::TextOnly)).await;

        store.close().await.unwrap();
        assert_eq!(poller.poll_once(false).await.text, TextPoll::StoreFailed);
        assert_eq!(poller.poll_once(false).await.text, TextPoll::StoreFailed);
        assert!(poller.storage_down);
        // Storage errors are not clipboard failures.
        assert_eq!(poller.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_same_as_latest_reported_as_skip() {
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text()
            .times(1)
            .returning(|| Ok("already here".to_string()));

        let (mut poller, store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::TextOnly)).await;
        store.insert_text("already here").await.unwrap();

        assert_eq!(
            poller.poll_once(false).await.text,
            TextPoll::Stored(InsertOutcome::Skipped(SkipReason::SameAsLatest))
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut mock = MockClipboardSource::new();
        mock.expect_name().return_const("mock");
        mock.expect_read_text()
            .returning(|| Ok("from the loop".to_string()));

        let mut settings = PollerSettings::for_mode(PollMode::TextOnly);
        settings.interval = Duration::from_millis(10);
        let (poller, store, _temp_dir) = setup(mock, settings).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_passive_mode_never_reads() {
        let mut mock = MockClipboardSource::new();
        mock.expect_read_text().never();

        let (poller, _store, _temp_dir) =
            setup(mock, PollerSettings::for_mode(PollMode::Passive)).await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(tx);
        handle.await.unwrap();
    }
}
