use std::io::{self, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::{Attribute, Print, SetAttribute},
    terminal::{
        self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use tracing::debug;

use super::restore_entry;
use crate::clipboard::ClipboardSource;
use crate::history::{ClearHook, Entry, EntryKey, EntryPayload, HistoryStore};

/// How often the picker re-reads the store while idle
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const HEADER_LINES: u16 = 4;

pub struct HistoryPicker {
    history: Arc<HistoryStore>,
    clipboard: Arc<dyn ClipboardSource>,
    /// Newest first
    entries: Vec<Entry>,
    selected_index: usize,
    search_term: String,
    status: Option<String>,
    needs_reload: Arc<AtomicBool>,
    raw_mode: bool,
}

#[derive(Debug, PartialEq)]
enum PickerAction {
    Continue,
    Restore(Entry),
    Delete(EntryKey),
    Clear,
    Exit,
}

impl HistoryPicker {
    pub fn new(history: Arc<HistoryStore>, clipboard: Arc<dyn ClipboardSource>) -> Self {
        Self {
            history,
            clipboard,
            entries: Vec::new(),
            selected_index: 0,
            search_term: String::new(),
            status: None,
            needs_reload: Arc::new(AtomicBool::new(false)),
            raw_mode: false,
        }
    }

    pub async fn show(&mut self) -> Result<()> {
        self.load_entries().await?;

        if self.entries.is_empty() {
            println!("No clipboard history found");
            return Ok(());
        }

        enable_raw_mode()?;
        self.raw_mode = true;
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;

        let result = self.run_picker().await;

        self.restore_terminal();
        let restored = result?;

        if let Some(entry) = restored {
            println!("Restored: {}", entry.preview(super::PREVIEW_CHARS));
        }
        Ok(())
    }

    async fn load_entries(&mut self) -> Result<()> {
        self.history.reload().await?;
        let mut entries = self.history.snapshot().await?;
        entries.reverse();
        self.entries = entries;
        self.clamp_selection();
        Ok(())
    }

    async fn run_picker(&mut self) -> Result<Option<Entry>> {
        let mut stdout = io::stdout();

        loop {
            if self.needs_reload.swap(false, Ordering::SeqCst) {
                self.load_entries().await?;
            }
            self.draw(&mut stdout)?;

            if !event::poll(REFRESH_INTERVAL)? {
                // Pick up captures made by the daemon meanwhile.
                self.load_entries().await?;
                continue;
            }

            let Event::Key(key_event) = event::read()? else {
                continue;
            };
            if key_event.kind != KeyEventKind::Press {
                continue;
            }

            match self.handle_key_event(key_event) {
                PickerAction::Continue => {}
                PickerAction::Exit => return Ok(None),
                PickerAction::Restore(entry) => {
                    restore_entry(self.clipboard.as_ref(), &entry).await?;
                    return Ok(Some(entry));
                }
                PickerAction::Delete(key) => {
                    debug!("Deleting {} entry from picker", key.kind.as_str());
                    match self.history.remove(&key).await {
                        Ok(()) => self.status = Some("Entry deleted".to_string()),
                        Err(e) => self.status = Some(format!("Delete failed: {}", e)),
                    }
                    self.load_entries().await?;
                }
                PickerAction::Clear => {
                    let flag = Arc::clone(&self.needs_reload);
                    let hooks: Vec<ClearHook> =
                        vec![Box::new(move || flag.store(true, Ordering::SeqCst))];
                    match self.history.clear(hooks).await {
                        Ok(()) => self.status = Some("History cleared".to_string()),
                        Err(e) => self.status = Some(format!("Clear failed: {}", e)),
                    }
                }
            }
        }
    }

    fn draw(&self, stdout: &mut Stdout) -> Result<()> {
        let (width, height) = terminal::size().unwrap_or((80, 24));
        let width = usize::from(width).max(20);
        let rows = usize::from(height.saturating_sub(HEADER_LINES + 1)).max(1);

        queue!(
            stdout,
            Clear(ClearType::All),
            MoveTo(0, 0),
            Print("clipstash history"),
            MoveTo(0, 1),
            Print("↑/↓ move  Enter restore  Del delete  Ctrl-L clear  Esc quit"),
            MoveTo(0, 2),
            Print(format!("Search: {}", self.search_term)),
        )?;

        let visible = self.filtered_entries();
        let offset = self.selected_index.saturating_sub(rows - 1);

        for (row, (i, entry)) in visible.iter().enumerate().skip(offset).take(rows).enumerate() {
            let line = format!(
                "{} {}",
                entry.captured_at.with_timezone(&chrono::Local).format("%m-%d %H:%M"),
                entry.preview(width.saturating_sub(22))
            );
            queue!(stdout, MoveTo(0, HEADER_LINES + row as u16))?;
            if i == self.selected_index {
                queue!(
                    stdout,
                    SetAttribute(Attribute::Reverse),
                    Print(format!("► {}", line)),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                queue!(stdout, Print(format!("  {}", line)))?;
            }
        }

        if visible.is_empty() {
            queue!(stdout, MoveTo(0, HEADER_LINES), Print("  (no matches)"))?;
        }

        if let Some(status) = &self.status {
            queue!(stdout, MoveTo(0, height.saturating_sub(1)), Print(status))?;
        }

        stdout.flush()?;
        Ok(())
    }

    fn filtered_entries(&self) -> Vec<&Entry> {
        if self.search_term.is_empty() {
            return self.entries.iter().collect();
        }

        let needle = self.search_term.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| match &entry.payload {
                EntryPayload::Text(text) => text.to_lowercase().contains(&needle),
                EntryPayload::Image(image) => {
                    "image".contains(&needle) || image.info.format.contains(&needle)
                }
            })
            .collect()
    }

    fn selected_entry(&self) -> Option<&Entry> {
        self.filtered_entries().get(self.selected_index).copied()
    }

    fn clamp_selection(&mut self) {
        let count = self.filtered_entries().len();
        if self.selected_index >= count {
            self.selected_index = count.saturating_sub(1);
        }
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) -> PickerAction {
        let ctrl = key_event.modifiers.contains(KeyModifiers::CONTROL);

        match key_event.code {
            KeyCode::Esc => PickerAction::Exit,
            KeyCode::Char('c') if ctrl => PickerAction::Exit,
            KeyCode::Char('l') if ctrl => PickerAction::Clear,
            KeyCode::Enter => match self.selected_entry() {
                Some(entry) => PickerAction::Restore(entry.clone()),
                None => PickerAction::Continue,
            },
            KeyCode::Delete => match self.selected_entry() {
                Some(entry) => PickerAction::Delete(entry.key()),
                None => PickerAction::Continue,
            },
            KeyCode::Up => {
                self.selected_index = self.selected_index.saturating_sub(1);
                PickerAction::Continue
            }
            KeyCode::Down => {
                let filtered_count = self.filtered_entries().len();
                if self.selected_index < filtered_count.saturating_sub(1) {
                    self.selected_index += 1;
                }
                PickerAction::Continue
            }
            KeyCode::Char(c) if !ctrl => {
                self.search_term.push(c);
                self.selected_index = 0;
                PickerAction::Continue
            }
            KeyCode::Backspace => {
                self.search_term.pop();
                self.selected_index = 0;
                PickerAction::Continue
            }
            _ => PickerAction::Continue,
        }
    }

    fn restore_terminal(&mut self) {
        if self.raw_mode {
            let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
            let _ = disable_raw_mode();
            self.raw_mode = false;
        }
    }
}

impl Drop for HistoryPicker {
    fn drop(&mut self) {
        self.restore_terminal();
    }
}
