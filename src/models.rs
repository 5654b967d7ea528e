// Common data models for the pipeline

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::tools::{self, Tool};

/// Requested output container, one fetch strategy per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Mp4,
    Mp3,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            Self::Mp4 => MediaKind::Video,
            Self::Mp3 => MediaKind::Audio,
        }
    }
}

/// One download operation: constructed per user action, discarded after
/// the operation terminates.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    pub format: OutputFormat,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            url: url.into(),
            destination: default_destination(),
            format,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidUrl("URL is empty".to_string()));
        }
        Ok(())
    }
}

/// Default save location: the user's download directory
pub fn default_destination() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Pipeline phase a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Downloading,
    Converting,
    Trimming,
    Finished,
    Failed,
}

/// Normalized progress update delivered to the observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Handle to a media file already on disk. The content stays owned by the
/// filesystem; this is a path plus the metadata the pipeline needs.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub duration_seconds: f64,
}

impl MediaAsset {
    /// Build an asset from an existing local file, probing its duration
    /// with ffprobe. The extension decides the media kind.
    pub fn probe(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let kind = match extension_of(&path).as_deref() {
            Some("mp4") => MediaKind::Video,
            Some("mp3") => MediaKind::Audio,
            other => {
                return Err(Error::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };
        let ffprobe = tools::find_tool(Tool::Ffprobe)?;
        let duration_seconds = tools::probe_duration(&ffprobe, &path)?;
        Ok(Self {
            path,
            kind,
            duration_seconds,
        })
    }

    pub(crate) fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }
}

fn extension_of(path: &std::path::Path) -> Option<String> {
    path.extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_lowercase())
}

/// One trim operation over an already-local media file
#[derive(Debug, Clone)]
pub struct TrimRequest {
    pub source: MediaAsset,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub output_path: PathBuf,
}
