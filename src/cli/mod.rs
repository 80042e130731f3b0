use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clipboard::{self, ClipboardSource};
use crate::config::Config;
use crate::history::migrate::{self, ImportReport};
use crate::history::{ClearHook, Entry, EntryPayload, HistoryError, HistoryStore};
use crate::poller::{ImagePoll, NoiseFilter, PollMode, PollReport, Poller, PollerSettings, TextPoll};

pub mod history_picker;

/// Characters of text shown per entry by `list`
pub const PREVIEW_CHARS: usize = 80;

#[derive(Parser, Debug)]
#[command(name = "clipstash")]
#[command(about = "Clipboard history manager")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ~/.config/clipstash/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    #[command(about = "Watch the clipboard and record history (runs in the foreground)")]
    Daemon {
        /// Polling profile, overriding the configuration
        #[arg(short, long, value_enum)]
        mode: Option<PollMode>,
    },

    #[command(about = "Record the current clipboard content now")]
    Capture,

    #[command(about = "Show clipboard history, newest first")]
    List {
        /// Show at most this many entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    #[command(about = "Browse history interactively")]
    Pick,

    #[command(about = "Copy entry N (as numbered by `list`) back to the clipboard")]
    Restore { number: usize },

    #[command(about = "Delete entry N (as numbered by `list`)")]
    Delete { number: usize },

    #[command(about = "Replace the text of entry N (as numbered by `list`)")]
    Edit { number: usize, text: String },

    #[command(about = "Delete all history")]
    Clear,

    #[command(about = "Show daemon and history status")]
    Status,

    #[command(about = "Stop the running daemon")]
    Stop,

    #[command(about = "Import a legacy history file")]
    Import {
        /// File to import (defaults to the configured legacy sources)
        path: Option<PathBuf>,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

/// Map a 1-based, newest-first entry number to a store index.
pub fn index_for_number(len: usize, number: usize) -> crate::Result<usize> {
    if number == 0 || number > len {
        return Err(HistoryError::InvalidIndex { index: number, len }.into());
    }
    Ok(len - number)
}

/// One line of `list` output
pub fn format_entry(number: usize, entry: &Entry) -> String {
    format!(
        "{:>3}. {} {}",
        number,
        entry.captured_at.with_timezone(&chrono::Local).format("%m-%d %H:%M"),
        entry.preview(PREVIEW_CHARS)
    )
}

fn describe_report(report: &PollReport) -> String {
    let text = match &report.text {
        TextPoll::Stored(outcome) => format!("text {:?}", outcome),
        TextPoll::Unchanged => "text unchanged".to_string(),
        TextPoll::Filtered => "text ignored as noise".to_string(),
        TextPoll::NoContent => "no text".to_string(),
        TextPoll::ReadFailed => "text read failed".to_string(),
        TextPoll::StoreFailed => "text could not be saved".to_string(),
    };
    let image = match &report.image {
        ImagePoll::Skipped => "image not checked".to_string(),
        ImagePoll::Stored(outcome) => format!("image {:?}", outcome),
        ImagePoll::Unchanged => "image unchanged".to_string(),
        ImagePoll::NoContent => "no image".to_string(),
        ImagePoll::ReadFailed => "image read failed".to_string(),
        ImagePoll::Invalid => "image could not be decoded".to_string(),
        ImagePoll::StoreFailed => "image could not be saved".to_string(),
    };
    format!("{}, {}", text, image)
}

fn describe_import(path: &Path, report: &ImportReport) -> String {
    format!(
        "Imported {} entries from {:?} ({} format, {} skipped); original moved to {:?}",
        report.imported, path, report.format, report.skipped, report.backup_path
    )
}

/// Copy an entry back to the clipboard
pub async fn restore_entry(clipboard: &dyn ClipboardSource, entry: &Entry) -> crate::Result<()> {
    match &entry.payload {
        EntryPayload::Text(text) => clipboard.write_text(text).await?,
        EntryPayload::Image(image) => {
            clipboard
                .write_image(&image.data, &image.info.format)
                .await?
        }
    }
    Ok(())
}

#[cfg(unix)]
fn running_daemon_pid() -> Result<Option<u32>> {
    crate::daemon::running_daemon(&crate::daemon::get_pidfile_path()?)
}

#[cfg(not(unix))]
fn running_daemon_pid() -> Result<Option<u32>> {
    Ok(None)
}

pub struct CliHandler {
    config: Arc<Config>,
    config_path: Option<PathBuf>,
    history: Option<Arc<HistoryStore>>,
    clipboard: Option<Arc<dyn ClipboardSource>>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Arc::new(Config::load_config(config_path.as_deref())?);
        Ok(Self::with_config(config, config_path))
    }

    pub fn with_config(config: Arc<Config>, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            history: None,
            clipboard: None,
        }
    }

    /// Use an already opened store and clipboard instead of the configured ones
    pub fn with_components(
        config: Arc<Config>,
        history: Arc<HistoryStore>,
        clipboard: Arc<dyn ClipboardSource>,
    ) -> Self {
        Self {
            config,
            config_path: None,
            history: Some(history),
            clipboard: Some(clipboard),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lazily open the history store when needed
    async fn ensure_history(&mut self) -> Result<Arc<HistoryStore>> {
        if let Some(history) = &self.history {
            return Ok(Arc::clone(history));
        }

        info!("Opening history store");
        let history = Arc::new(
            HistoryStore::open(&self.config.history.database, self.config.history.capacity)
                .await
                .with_context(|| {
                    format!(
                        "Failed to open history database {:?}",
                        self.config.history.database
                    )
                })?,
        );
        self.history = Some(Arc::clone(&history));
        Ok(history)
    }

    /// Lazily initialize the clipboard backend when needed
    fn ensure_clipboard(&mut self) -> Result<Arc<dyn ClipboardSource>> {
        if let Some(clipboard) = &self.clipboard {
            return Ok(Arc::clone(clipboard));
        }

        info!("Initializing clipboard backend");
        let clipboard = clipboard::create_source(self.config.poller.backend)
            .context("Failed to access the clipboard")?;
        self.clipboard = Some(Arc::clone(&clipboard));
        Ok(clipboard)
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Daemon { mode } => self.run_daemon(mode).await,
            Commands::Capture => self.capture().await,
            Commands::List { limit, json } => self.show_history(limit, json).await,
            Commands::Pick => self.pick().await,
            Commands::Restore { number } => self.restore(number).await,
            Commands::Delete { number } => self.delete(number).await,
            Commands::Edit { number, text } => self.edit(number, &text).await,
            Commands::Clear => self.clear().await,
            Commands::Status => self.show_status().await,
            Commands::Stop => self.stop_daemon().await,
            Commands::Import { path } => self.import(path).await,
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    /// Foreground daemon: import legacy files, then poll until signalled.
    #[cfg(unix)]
    async fn run_daemon(&mut self, mode: Option<PollMode>) -> Result<()> {
        use crate::daemon;

        let pidfile = daemon::get_pidfile_path()?;
        if let Some(pid) = daemon::running_daemon(&pidfile)? {
            bail!("clipstash daemon is already running with PID {}", pid);
        }

        let store = self.ensure_history().await?;
        self.import_configured_sources(&store).await;

        let clipboard = self.ensure_clipboard()?;
        let mut poller_config = self.config.poller.clone();
        if let Some(mode) = mode {
            poller_config.mode = mode;
        }
        let settings = PollerSettings::from_config(&poller_config);
        let filter = NoiseFilter::from_config(&self.config.filter)?;

        daemon::write_pidfile(&pidfile, std::process::id())?;
        info!("clipstash daemon started ({} mode)", settings.mode.as_str());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(clipboard, Arc::clone(&store), filter, settings);
        let poller_task = tokio::spawn(poller.run(shutdown_rx));

        let signal_result = daemon::shutdown_signal().await;

        let _ = shutdown_tx.send(true);
        if let Err(e) = poller_task.await {
            error!("Poller task failed: {}", e);
        }

        if let Err(e) = store.close().await {
            error!("Failed to close history store: {}", e);
        }
        daemon::remove_pidfile(&pidfile)?;
        info!("clipstash daemon stopped");

        signal_result
    }

    #[cfg(not(unix))]
    async fn run_daemon(&mut self, _mode: Option<PollMode>) -> Result<()> {
        bail!("The daemon is only supported on Unix platforms")
    }

    async fn import_configured_sources(&self, store: &HistoryStore) {
        for source in &self.config.history.legacy_sources {
            match migrate::import_legacy(store, source).await {
                Ok(Some(report)) => info!("{}", describe_import(source, &report)),
                Ok(None) => {}
                Err(e) => warn!("Could not import legacy history {:?}: {}", source, e),
            }
        }
    }

    async fn capture(&mut self) -> Result<()> {
        let store = self.ensure_history().await?;
        let clipboard = self.ensure_clipboard()?;
        let filter = NoiseFilter::from_config(&self.config.filter)?;
        let settings = PollerSettings::from_config(&self.config.poller);

        let mut poller = Poller::new(clipboard, store, filter, settings);
        let report = poller.poll_once(true).await;

        if report.stored_anything() {
            println!("Captured: {}", describe_report(&report));
        } else {
            println!("Nothing captured: {}", describe_report(&report));
        }
        Ok(())
    }

    async fn show_history(&mut self, limit: Option<usize>, json: bool) -> Result<()> {
        let history = self.ensure_history().await?;
        let entries = history.snapshot().await?;
        let limit = limit.unwrap_or(entries.len());
        let newest_first: Vec<&Entry> = entries.iter().rev().take(limit).collect();

        if json {
            println!("{}", serde_json::to_string_pretty(&newest_first)?);
            return Ok(());
        }

        if newest_first.is_empty() {
            println!("No clipboard history found");
            return Ok(());
        }

        println!(
            "Clipboard History (showing {} of {} entries):",
            newest_first.len(),
            entries.len()
        );
        for (i, entry) in newest_first.iter().enumerate() {
            println!("{}", format_entry(i + 1, entry));
        }
        Ok(())
    }

    async fn pick(&mut self) -> Result<()> {
        let history = self.ensure_history().await?;
        let clipboard = self.ensure_clipboard()?;
        let mut picker = history_picker::HistoryPicker::new(history, clipboard);
        picker.show().await
    }

    async fn entry_for_number(&mut self, number: usize) -> Result<(Arc<HistoryStore>, Entry)> {
        let history = self.ensure_history().await?;
        let mut entries = history.snapshot().await?;
        let index = index_for_number(entries.len(), number)?;
        Ok((history, entries.swap_remove(index)))
    }

    async fn restore(&mut self, number: usize) -> Result<()> {
        let (_, entry) = self.entry_for_number(number).await?;
        let clipboard = self.ensure_clipboard()?;
        restore_entry(clipboard.as_ref(), &entry).await?;
        println!("Restored: {}", entry.preview(PREVIEW_CHARS));
        Ok(())
    }

    async fn delete(&mut self, number: usize) -> Result<()> {
        // Resolve by identity so a concurrent daemon insert cannot shift the target.
        let (history, entry) = self.entry_for_number(number).await?;
        history.remove(&entry.key()).await?;
        println!("Deleted entry #{}", number);
        Ok(())
    }

    async fn edit(&mut self, number: usize, text: &str) -> Result<()> {
        let (history, entry) = self.entry_for_number(number).await?;
        history.edit(&entry.key(), text).await?;
        println!("Updated entry #{}", number);
        Ok(())
    }

    async fn clear(&mut self) -> Result<()> {
        let history = self.ensure_history().await?;
        let hooks: Vec<ClearHook> = vec![Box::new(|| println!("Clipboard history cleared"))];
        history.clear(hooks).await?;
        Ok(())
    }

    async fn show_status(&mut self) -> Result<()> {
        println!("clipstash Status:");
        println!("  Version: {}", crate::VERSION);
        println!(
            "  Build: {} ({}, {})",
            env!("CLIPSTASH_TARGET"),
            env!("CLIPSTASH_PROFILE"),
            env!("CLIPSTASH_BUILD_DATE")
        );
        println!("  Compiler: {}", env!("CLIPSTASH_RUSTC_VERSION"));

        let config_path = self
            .config_path
            .clone()
            .or_else(Config::find_config_path)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string());
        println!("  Config: {}", config_path);
        println!("  Poll mode: {}", self.config.poller.mode.as_str());

        match running_daemon_pid()? {
            Some(pid) => println!("  Daemon: running (PID {})", pid),
            None => println!("  Daemon: not running"),
        }

        println!("  Database: {}", self.config.history.database.display());
        match self.ensure_history().await {
            Ok(history) => println!(
                "  Entries: {} / {}",
                history.len().await?,
                history.capacity()
            ),
            Err(e) => println!("  Entries: unavailable ({:#})", e),
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn stop_daemon(&self) -> Result<()> {
        use crate::daemon::{self, StopOutcome};

        match daemon::stop_daemon(&daemon::get_pidfile_path()?).await? {
            StopOutcome::NotRunning => println!("clipstash daemon is not running"),
            StopOutcome::Stopped(pid) => println!("clipstash daemon (PID {}) stopped", pid),
            StopOutcome::Killed(pid) => {
                println!("clipstash daemon (PID {}) did not exit and was killed", pid)
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn stop_daemon(&self) -> Result<()> {
        bail!("The daemon is only supported on Unix platforms")
    }

    async fn import(&mut self, path: Option<PathBuf>) -> Result<()> {
        let history = self.ensure_history().await?;

        let Some(path) = path else {
            let before = history.len().await?;
            self.import_configured_sources(&history).await;
            let after = history.len().await?;
            println!(
                "Checked {} legacy sources; history now has {} entries (was {})",
                self.config.history.legacy_sources.len(),
                after,
                before
            );
            return Ok(());
        };

        match migrate::import_legacy(&history, &path).await? {
            Some(report) => println!("{}", describe_import(&path, &report)),
            None => return Err(anyhow!("No such file: {:?}", path)),
        }
        Ok(())
    }

    fn handle_config_action(&mut self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                print!("{}", self.config.to_toml()?);
            }
            ConfigAction::Init { force } => {
                let path = match &self.config_path {
                    Some(path) => path.clone(),
                    None => Config::default_config_path()
                        .ok_or_else(|| anyhow!("Could not find config directory"))?,
                };
                Config::write_example(&path, force)?;
                println!("Example configuration written to {:?}", path);
            }
            ConfigAction::Validate => {
                match self.config_path.clone().or_else(Config::find_config_path) {
                    Some(path) => {
                        Config::validate(&path)?;
                        println!("Configuration {:?} is valid", path);
                    }
                    None => println!("No configuration file found; using defaults"),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_for_number() {
        assert_eq!(index_for_number(4, 1).unwrap(), 3);
        assert_eq!(index_for_number(4, 4).unwrap(), 0);
        assert!(index_for_number(4, 0).is_err());
        assert!(index_for_number(4, 5).is_err());
        assert!(index_for_number(0, 1).is_err());
    }

    #[test]
    fn test_unknown_number_is_invalid_index() {
        assert!(matches!(
            index_for_number(2, 3),
            Err(crate::Error::History(HistoryError::InvalidIndex { index: 3, len: 2 }))
        ));
    }

    #[tokio::test]
    async fn test_restore_reports_clipboard_errors() {
        use crate::clipboard::ClipboardError;
        use crate::clipboard::MockClipboardSource;

        let mut mock = MockClipboardSource::new();
        mock.expect_write_text()
            .returning(|_| Err(ClipboardError::Platform("no display".to_string())));

        let entry = Entry {
            id: 1,
            captured_at: chrono::Utc::now(),
            payload: EntryPayload::Text("hello".to_string()),
        };
        assert!(matches!(
            restore_entry(&mock, &entry).await,
            Err(crate::Error::Clipboard(ClipboardError::Platform(_)))
        ));
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
