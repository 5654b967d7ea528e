// Error types for the download / convert / trim pipeline

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub enum Error {
    /// Connectivity or resolution failure while talking to the remote host
    Network(String),

    /// No stream matches the requested constraints (removed, region-locked, ...)
    UnavailableStream(String),

    /// ffmpeg decode/encode step failed
    Conversion(String),

    /// Trim range violates 0 <= start < end <= duration
    InvalidRange {
        start: f64,
        end: f64,
        duration: f64,
    },

    /// File extension is not one of the supported media kinds
    UnsupportedFormat(String),

    /// Destination directory or output file could not be created
    Write(String),

    /// Another operation is already in flight on this orchestrator
    Busy,

    /// yt-dlp / ffmpeg / ffprobe not found on this system
    ToolNotFound(String),

    /// Empty or unusable resource URL
    InvalidUrl(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::UnavailableStream(msg) => write!(f, "No usable stream: {}", msg),
            Self::Conversion(msg) => write!(f, "Conversion failed: {}", msg),
            Self::InvalidRange { start, end, duration } => write!(
                f,
                "Invalid trim range: start {:.3}s, end {:.3}s, duration {:.3}s \
                 (expected 0 <= start < end <= duration)",
                start, end, duration
            ),
            Self::UnsupportedFormat(ext) => {
                write!(f, "Unsupported media format: {} (expected mp4 or mp3)", ext)
            }
            Self::Write(msg) => write!(f, "Write error: {}", msg),
            Self::Busy => write!(f, "Another operation is already in progress"),
            Self::ToolNotFound(tool) => write!(f, "Tool not found: {}", tool),
            Self::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Classify yt-dlp stderr output into the error taxonomy.
    ///
    /// Keyword detection over the collected stderr text; anything that does
    /// not look like a missing stream or a bad URL is treated as a transport
    /// problem, with the original text preserved as the cause.
    pub fn classify_fetch_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        // Missing/blocked streams first: these are terminal regardless of
        // connectivity.
        if lower.contains("requested format is not available")
            || lower.contains("no video formats found")
            || lower.contains("video unavailable")
            || lower.contains("this video is not available")
            || lower.contains("private video")
        {
            return Self::UnavailableStream(stderr.to_string());
        }

        if lower.contains("unsupported url") || lower.contains("is not a valid url") {
            return Self::InvalidUrl(stderr.to_string());
        }

        if lower.contains("command not found")
            || lower.contains("no such file or directory")
        {
            return Self::ToolNotFound(stderr.to_string());
        }

        // Connectivity: timeouts, DNS, resets.
        Self::Network(stderr.to_string())
    }
}
