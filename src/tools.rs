// External tool discovery: yt-dlp, ffmpeg, ffprobe

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    YtDlp,
    Ffmpeg,
    Ffprobe,
}

impl Tool {
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::YtDlp => "yt-dlp",
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }
}

/// Locate a tool binary: common install paths first, then PATH.
pub fn find_tool(tool: Tool) -> Result<PathBuf> {
    let binary_name = tool.binary_name();

    // 1. Common install locations
    let common_paths = [
        format!("/opt/homebrew/bin/{}", binary_name),
        format!("/usr/local/bin/{}", binary_name),
        format!("/usr/bin/{}", binary_name),
    ];

    for path in common_paths {
        if Path::new(&path).exists() {
            return Ok(PathBuf::from(path));
        }
    }

    // 2. PATH lookup
    if let Ok(output) = Command::new("which").arg(binary_name).output() {
        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
    }

    Err(Error::ToolNotFound(binary_name.to_string()))
}

/// Report a tool's version, for diagnostics. None if the probe fails.
pub fn tool_version(tool: Tool, path: &Path) -> Option<String> {
    // ffmpeg/ffprobe use a single-dash flag
    let arg = match tool {
        Tool::YtDlp => "--version",
        Tool::Ffmpeg | Tool::Ffprobe => "-version",
    };

    match Command::new(path).arg(arg).output() {
        Ok(output) if output.status.success() => {
            let out = String::from_utf8_lossy(&output.stdout);
            out.lines().next().map(|line| line.trim().to_string())
        }
        _ => None,
    }
}

/// Container duration in seconds, via ffprobe.
pub fn probe_duration(ffprobe: &Path, media_path: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(media_path)
        .output()
        .map_err(|e| spawn_error(Tool::Ffprobe, &e))?;

    if !output.status.success() {
        return Err(Error::Conversion(format!(
            "ffprobe could not read {}: {}",
            media_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    raw.trim().parse::<f64>().map_err(|_| {
        Error::Conversion(format!(
            "ffprobe reported no duration for {}",
            media_path.display()
        ))
    })
}

/// Map a process spawn failure: a missing binary is a tool problem, the
/// rest is surfaced as a write error (exec permissions, resource limits).
pub(crate) fn spawn_error(tool: Tool, err: &std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::ToolNotFound(tool.binary_name().to_string())
    } else {
        Error::Write(format!("failed to start {}: {}", tool.binary_name(), err))
    }
}
