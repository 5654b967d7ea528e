// ClipTrimmer: local media sub-range extraction

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::convert::DEFAULT_MP3_BITRATE_KBPS;
use crate::errors::{Error, Result};
use crate::models::{Phase, ProgressEvent, TrimRequest};
use crate::progress::ProgressReporter;
use crate::tools::{self, Tool};
use crate::utils::stderr_tail;

/// Produces a `[start, end)` sub-range of a local MP4/MP3 file through
/// ffmpeg. Independent of the download pipeline; operates on files already
/// on disk.
pub struct ClipTrimmer {
    ffmpeg: PathBuf,
}

impl ClipTrimmer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ffmpeg: tools::find_tool(Tool::Ffmpeg)?,
        })
    }

    /// Use an explicit ffmpeg binary instead of discovering one.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: path.into() }
    }

    /// Cut the requested sub-range into `output_path`. Blocking; run it
    /// from a worker thread. On success the observer has received a
    /// monotonic progress ramp ending in `(Finished, 100)`.
    pub fn trim(
        &self,
        request: &TrimRequest,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<PathBuf> {
        let mut reporter = ProgressReporter::new(on_progress);
        match self.trim_inner(request, &mut reporter) {
            Ok(path) => {
                reporter.finish();
                Ok(path)
            }
            Err(e) => {
                reporter.fail();
                Err(e)
            }
        }
    }

    fn trim_inner(
        &self,
        request: &TrimRequest,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<PathBuf> {
        // Validation first; no filesystem writes until it passes.
        let extension = match request.source.extension().as_deref() {
            Some(ext @ ("mp4" | "mp3")) => ext.to_string(),
            other => {
                return Err(Error::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };

        let (start, end, duration) = (
            request.start_seconds,
            request.end_seconds,
            request.source.duration_seconds,
        );
        if !(start >= 0.0 && start < end && end <= duration)
            || !start.is_finite()
            || !end.is_finite()
        {
            return Err(Error::InvalidRange {
                start,
                end,
                duration,
            });
        }

        if let Some(parent) = request.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Write(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        log::info!(
            "trimming {} [{:.3}s, {:.3}s) -> {}",
            request.source.path.display(),
            start,
            end,
            request.output_path.display()
        );

        // Deterministic synthetic ramp: ffmpeg's single blocking call gives
        // no usable byte progress for a short local copy, so the observer
        // gets evenly spaced steps, then 100 once the write is done.
        for step in 1..=9 {
            reporter.report(Phase::Trimming, f64::from(step) * 10.0);
        }

        self.run_ffmpeg(request, &extension)?;

        if !request.output_path.is_file() {
            return Err(Error::Write(format!(
                "ffmpeg exited successfully but {} is missing",
                request.output_path.display()
            )));
        }

        reporter.report(Phase::Trimming, 100.0);
        Ok(request.output_path.clone())
    }

    fn run_ffmpeg(&self, request: &TrimRequest, extension: &str) -> Result<()> {
        let duration = request.end_seconds - request.start_seconds;

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-ss")
            .arg(format!("{:.3}", request.start_seconds))
            .arg("-t")
            .arg(format!("{:.3}", duration))
            .arg("-i")
            .arg(&request.source.path);

        command.args(encode_args(extension));

        let output = command
            .arg(&request.output_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| tools::spawn_error(Tool::Ffmpeg, &e))?;

        if !output.status.success() {
            remove_partial(&request.output_path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Conversion(stderr_tail(&stderr, 4)));
        }
        Ok(())
    }
}

/// Codec arguments for the trimmed output. Re-encoding lands the cut on
/// the requested boundaries instead of the nearest keyframe.
fn encode_args(extension: &str) -> Vec<String> {
    match extension {
        "mp4" => [
            "-map",
            "0:v:0",
            "-map",
            "0:a:0?",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-crf",
            "20",
            "-c:a",
            "aac",
            "-b:a",
            "160k",
            "-movflags",
            "+faststart",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        _ => vec![
            "-vn".to_string(),
            "-codec:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", DEFAULT_MP3_BITRATE_KBPS),
        ],
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("could not remove partial output {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaAsset, MediaKind};

    fn video_asset(path: PathBuf, duration: f64) -> MediaAsset {
        MediaAsset {
            path,
            kind: MediaKind::Video,
            duration_seconds: duration,
        }
    }

    fn run_trim(request: &TrimRequest) -> (Result<PathBuf>, Vec<ProgressEvent>) {
        let trimmer = ClipTrimmer::with_binary("ffmpeg-unused");
        let mut events = Vec::new();
        let mut observer = |event: ProgressEvent| events.push(event);
        let result = trimmer.trim(request, &mut observer);
        (result, events)
    }

    #[test]
    fn start_after_end_is_an_invalid_range_with_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let request = TrimRequest {
            source: video_asset(PathBuf::from("/tmp/in.mp4"), 60.0),
            start_seconds: 10.0,
            end_seconds: 5.0,
            output_path: output.clone(),
        };

        let (result, events) = run_trim(&request);
        assert!(matches!(
            result,
            Err(Error::InvalidRange { start, end, .. }) if start == 10.0 && end == 5.0
        ));
        assert!(!output.exists());
        assert_eq!(events.last().unwrap().phase, Phase::Failed);
    }

    #[test]
    fn end_past_duration_is_an_invalid_range() {
        let request = TrimRequest {
            source: video_asset(PathBuf::from("/tmp/in.mp4"), 30.0),
            start_seconds: 0.0,
            end_seconds: 31.0,
            output_path: PathBuf::from("/tmp/out.mp4"),
        };
        let (result, _) = run_trim(&request);
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn negative_start_is_an_invalid_range() {
        let request = TrimRequest {
            source: video_asset(PathBuf::from("/tmp/in.mp4"), 30.0),
            start_seconds: -1.0,
            end_seconds: 10.0,
            output_path: PathBuf::from("/tmp/out.mp4"),
        };
        let (result, _) = run_trim(&request);
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn unsupported_source_extension_is_rejected_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.avi");
        let request = TrimRequest {
            source: video_asset(PathBuf::from("/tmp/in.avi"), 30.0),
            start_seconds: 0.0,
            end_seconds: 10.0,
            output_path: output.clone(),
        };

        let (result, _) = run_trim(&request);
        assert!(matches!(result, Err(Error::UnsupportedFormat(ext)) if ext == "avi"));
        assert!(!output.exists());
    }

    #[test]
    fn mp3_trim_uses_the_shared_default_bitrate() {
        let args = encode_args("mp3");
        assert!(args.contains(&format!("{}k", DEFAULT_MP3_BITRATE_KBPS)));
        assert!(args.contains(&"libmp3lame".to_string()));

        let args = encode_args("mp4");
        assert!(args.contains(&"libx264".to_string()));
    }

    #[test]
    fn validation_failure_emits_no_progress_steps() {
        let request = TrimRequest {
            source: video_asset(PathBuf::from("/tmp/in.mp4"), 30.0),
            start_seconds: 5.0,
            end_seconds: 5.0,
            output_path: PathBuf::from("/tmp/out.mp4"),
        };
        let (_, events) = run_trim(&request);
        assert!(events.iter().all(|e| e.phase != Phase::Trimming));
    }
}
