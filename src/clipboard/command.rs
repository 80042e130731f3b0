//! Clipboard access through xclip or wl-clipboard
//!
//! Every call spawns the tool and waits at most [`COMMAND_TIMEOUT`] for it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{check_size, ClipboardError, ClipboardImage, ClipboardSource};
use crate::history::image::mime_type;

/// Upper bound on a single clipboard tool invocation
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Image targets we know how to store, mapped to their format names
const IMAGE_TARGETS: [(&str, &str); 5] = [
    ("image/png", "png"),
    ("image/jpeg", "jpeg"),
    ("image/jpg", "jpeg"),
    ("image/gif", "gif"),
    ("image/bmp", "bmp"),
];

/// External clipboard tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// X11 `xclip`
    Xclip,
    /// Wayland `wl-paste` / `wl-copy`
    WlClipboard,
}

/// Clipboard backed by external tools
pub struct CommandClipboard {
    tool: Tool,
}

impl CommandClipboard {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }

    /// Pick the tool matching the running session.
    pub fn detect() -> Result<Self, ClipboardError> {
        let wayland = std::env::var_os("WAYLAND_DISPLAY").is_some();

        if wayland && find_in_path("wl-paste").is_some() && find_in_path("wl-copy").is_some() {
            return Ok(Self::new(Tool::WlClipboard));
        }
        if find_in_path("xclip").is_some() {
            return Ok(Self::new(Tool::Xclip));
        }

        Err(ClipboardError::ToolNotFound)
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    fn read_text_command(&self) -> (&'static str, Vec<&'static str>) {
        match self.tool {
            Tool::Xclip => ("xclip", vec!["-selection", "clipboard", "-o"]),
            Tool::WlClipboard => ("wl-paste", vec!["--no-newline"]),
        }
    }

    fn list_targets_command(&self) -> (&'static str, Vec<&'static str>) {
        match self.tool {
            Tool::Xclip => ("xclip", vec!["-selection", "clipboard", "-t", "TARGETS", "-o"]),
            Tool::WlClipboard => ("wl-paste", vec!["--list-types"]),
        }
    }

    fn read_target_command<'a>(&self, target: &'a str) -> (&'static str, Vec<&'a str>) {
        match self.tool {
            Tool::Xclip => ("xclip", vec!["-selection", "clipboard", "-t", target, "-o"]),
            Tool::WlClipboard => ("wl-paste", vec!["--no-newline", "--type", target]),
        }
    }

    fn write_command<'a>(&self, target: Option<&'a str>) -> (&'static str, Vec<&'a str>) {
        match (self.tool, target) {
            (Tool::Xclip, Some(target)) => {
                ("xclip", vec!["-selection", "clipboard", "-t", target, "-i"])
            }
            (Tool::Xclip, None) => ("xclip", vec!["-selection", "clipboard", "-i"]),
            (Tool::WlClipboard, Some(target)) => ("wl-copy", vec!["--type", target]),
            (Tool::WlClipboard, None) => ("wl-copy", vec![]),
        }
    }
}

#[async_trait]
impl ClipboardSource for CommandClipboard {
    async fn read_text(&self) -> Result<String, ClipboardError> {
        let (program, args) = self.read_text_command();
        let output = read_output(program, &args).await?;
        if output.is_empty() {
            return Err(ClipboardError::NoContent);
        }
        String::from_utf8(output).map_err(|_| ClipboardError::InvalidText)
    }

    async fn read_image(&self) -> Result<ClipboardImage, ClipboardError> {
        let (program, args) = self.list_targets_command();
        let targets = read_output(program, &args).await?;
        let targets = String::from_utf8_lossy(&targets);

        let (target, format) =
            pick_image_target(targets.lines()).ok_or(ClipboardError::NoContent)?;

        let (program, args) = self.read_target_command(target);
        let data = read_output(program, &args).await?;
        if data.is_empty() {
            return Err(ClipboardError::NoContent);
        }
        check_size(data.len())?;

        Ok(ClipboardImage::new(data, format))
    }

    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        check_size(text.len())?;
        let (program, args) = self.write_command(None);
        write_input(program, &args, text.as_bytes()).await
    }

    async fn write_image(&self, data: &[u8], format: &str) -> Result<(), ClipboardError> {
        check_size(data.len())?;
        let mime = mime_type(format);
        let (program, args) = self.write_command(Some(&mime));
        write_input(program, &args, data).await
    }

    fn name(&self) -> &'static str {
        match self.tool {
            Tool::Xclip => "xclip",
            Tool::WlClipboard => "wl-clipboard",
        }
    }
}

/// First advertised target we can store, in the order the owner lists them.
fn pick_image_target<'a>(
    targets: impl Iterator<Item = &'a str>,
) -> Option<(&'static str, &'static str)> {
    targets.map(str::trim).find_map(|target| {
        IMAGE_TARGETS
            .iter()
            .find(|(mime, _)| *mime == target)
            .copied()
    })
}

async fn read_output(program: &str, args: &[&str]) -> Result<Vec<u8>, ClipboardError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = timeout(COMMAND_TIMEOUT, command.output())
        .await
        .map_err(|_| ClipboardError::Timeout(COMMAND_TIMEOUT))??;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    debug!("{} exited with {}: {}", program, output.status, stderr);

    // Both tools report an empty selection as a failure exit.
    let lowered = stderr.to_lowercase();
    if lowered.contains("not available")
        || lowered.contains("no selection")
        || lowered.contains("nothing is copied")
        || lowered.contains("no suitable type")
    {
        return Err(ClipboardError::NoContent);
    }

    Err(ClipboardError::Platform(format!(
        "{} failed ({}): {}",
        program, output.status, stderr
    )))
}

async fn write_input(program: &str, args: &[&str], input: &[u8]) -> Result<(), ClipboardError> {
    // xclip forks a child that keeps serving the selection; it must not
    // inherit our pipes or waiting on them would block until it exits.
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
        stdin.shutdown().await?;
    }

    let status = match timeout(COMMAND_TIMEOUT, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.start_kill();
            return Err(ClipboardError::Timeout(COMMAND_TIMEOUT));
        }
    };

    if !status.success() {
        return Err(ClipboardError::Platform(format!(
            "{} exited with {}",
            program, status
        )));
    }
    Ok(())
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
