// FormatConverter: ffmpeg container normalization

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::errors::{Error, Result};
use crate::models::{MediaAsset, MediaKind, Phase};
use crate::progress::ProgressReporter;
use crate::tools::{self, Tool};
use crate::utils::stderr_tail;

/// Audio bitrate used when re-encoding to MP3, in kbps.
pub const DEFAULT_MP3_BITRATE_KBPS: u32 = 192;

/// Ensures a fetched asset carries the requested container, re-encoding
/// through ffmpeg when it does not. Already-correct assets pass through
/// untouched.
pub struct FormatConverter {
    ffmpeg: PathBuf,
    audio_bitrate_kbps: u32,
}

impl FormatConverter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ffmpeg: tools::find_tool(Tool::Ffmpeg)?,
            audio_bitrate_kbps: DEFAULT_MP3_BITRATE_KBPS,
        })
    }

    /// Use an explicit ffmpeg binary instead of discovering one.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: path.into(),
            audio_bitrate_kbps: DEFAULT_MP3_BITRATE_KBPS,
        }
    }

    pub fn with_audio_bitrate(mut self, kbps: u32) -> Self {
        self.audio_bitrate_kbps = kbps;
        self
    }

    /// Convert `asset` to `target_ext` if needed. On success the original
    /// intermediate file is deleted; on failure it is left intact and any
    /// partial output is removed.
    pub fn ensure_format(
        &self,
        asset: MediaAsset,
        target_ext: &str,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<MediaAsset> {
        let target_ext = target_ext.to_lowercase();
        let target_kind = match target_ext.as_str() {
            "mp4" => MediaKind::Video,
            "mp3" => MediaKind::Audio,
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        };

        if asset.extension().as_deref() == Some(target_ext.as_str()) {
            log::debug!("{} already .{}, no conversion", asset.path.display(), target_ext);
            return Ok(asset);
        }

        let output_path = asset.path.with_extension(&target_ext);
        log::info!(
            "converting {} -> {}",
            asset.path.display(),
            output_path.display()
        );

        match self.run_ffmpeg(&asset, &target_ext, &output_path, reporter) {
            Ok(()) => {}
            Err(e) => {
                // The original must survive a failed conversion; only the
                // partial output goes.
                if output_path.exists() {
                    if let Err(cleanup) = std::fs::remove_file(&output_path) {
                        log::warn!(
                            "could not remove partial output {}: {}",
                            output_path.display(),
                            cleanup
                        );
                    }
                }
                return Err(e);
            }
        }

        if !output_path.is_file() {
            return Err(Error::Conversion(format!(
                "ffmpeg exited successfully but {} is missing",
                output_path.display()
            )));
        }

        reporter.report(Phase::Converting, 100.0);

        // Output confirmed on disk; the intermediate can go now.
        if let Err(e) = std::fs::remove_file(&asset.path) {
            log::warn!(
                "could not remove intermediate {}: {}",
                asset.path.display(),
                e
            );
        }

        Ok(MediaAsset {
            path: output_path,
            kind: target_kind,
            duration_seconds: asset.duration_seconds,
        })
    }

    fn run_ffmpeg(
        &self,
        asset: &MediaAsset,
        target_ext: &str,
        output_path: &std::path::Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg);
        command.arg("-y").arg("-i").arg(&asset.path);

        match target_ext {
            "mp3" => {
                command
                    .arg("-vn")
                    .arg("-codec:a")
                    .arg("libmp3lame")
                    .arg("-b:a")
                    .arg(format!("{}k", self.audio_bitrate_kbps));
            }
            "mp4" => {
                command
                    .arg("-map")
                    .arg("0:v:0")
                    .arg("-map")
                    .arg("0:a:0?")
                    .arg("-c:v")
                    .arg("libx264")
                    .arg("-preset")
                    .arg("veryfast")
                    .arg("-crf")
                    .arg("20")
                    .arg("-c:a")
                    .arg("aac")
                    .arg("-b:a")
                    .arg("160k")
                    .arg("-movflags")
                    .arg("+faststart");
            }
            // ensure_format gated the extension already
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        }

        let mut child = command
            .arg("-progress")
            .arg("pipe:1")
            .arg("-nostats")
            .arg(output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| tools::spawn_error(Tool::Ffmpeg, &e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Write("failed to capture ffmpeg stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Write("failed to capture ffmpeg stderr".to_string()))?;

        let stderr_handle = std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            let mut lines = Vec::new();
            for line in reader.lines().map_while(std::result::Result::ok) {
                lines.push(line);
            }
            lines.join("\n")
        });

        let reader = BufReader::new(stdout);
        for line in reader.lines().map_while(std::result::Result::ok) {
            if let Some(percent) = progress_percent(&line, asset.duration_seconds) {
                reporter.report(Phase::Converting, percent);
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::Write(format!("ffmpeg did not exit cleanly: {}", e)))?;
        let stderr_output = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            return Err(Error::Conversion(stderr_tail(&stderr_output, 4)));
        }
        Ok(())
    }
}

/// Convert an ffmpeg `-progress` key-value line into a percentage of the
/// known duration. Unknown duration suppresses reporting entirely.
fn progress_percent(line: &str, duration_seconds: f64) -> Option<f64> {
    if duration_seconds <= 0.0 {
        return None;
    }
    // ffmpeg reports microseconds under both keys (out_time_ms included).
    let micros: f64 = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?
        .trim()
        .parse()
        .ok()?;
    Some((micros / 1_000_000.0 / duration_seconds) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressEvent;

    fn audio_asset(path: PathBuf) -> MediaAsset {
        MediaAsset {
            path,
            kind: MediaKind::Audio,
            duration_seconds: 30.0,
        }
    }

    #[test]
    fn matching_extension_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("song.mp3");
        std::fs::write(&file, b"audio").unwrap();

        let converter = FormatConverter::with_binary("ffmpeg-unused");
        let mut observer = |_: ProgressEvent| {};
        let mut reporter = ProgressReporter::new(&mut observer);

        let asset = converter
            .ensure_format(audio_asset(file.clone()), "mp3", &mut reporter)
            .unwrap();
        assert_eq!(asset.path, file);
        // idempotent: a second pass returns the same path untouched
        let again = converter
            .ensure_format(asset, "mp3", &mut reporter)
            .unwrap();
        assert_eq!(again.path, file);
        assert!(file.is_file());
    }

    #[test]
    fn extension_comparison_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.MP4");
        std::fs::write(&file, b"video").unwrap();

        let converter = FormatConverter::with_binary("ffmpeg-unused");
        let mut observer = |_: ProgressEvent| {};
        let mut reporter = ProgressReporter::new(&mut observer);

        let asset = MediaAsset {
            path: file.clone(),
            kind: MediaKind::Video,
            duration_seconds: 5.0,
        };
        let result = converter.ensure_format(asset, "mp4", &mut reporter).unwrap();
        assert_eq!(result.path, file);
    }

    #[test]
    fn unsupported_target_is_rejected_before_any_work() {
        let converter = FormatConverter::with_binary("ffmpeg-unused");
        let mut observer = |_: ProgressEvent| {};
        let mut reporter = ProgressReporter::new(&mut observer);

        let err = converter
            .ensure_format(audio_asset(PathBuf::from("/tmp/song.m4a")), "avi", &mut reporter)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ext) if ext == "avi"));
    }

    #[test]
    fn progress_lines_scale_against_duration() {
        assert_eq!(progress_percent("out_time_us=15000000", 30.0), Some(50.0));
        assert_eq!(progress_percent("out_time_ms=30000000", 30.0), Some(100.0));
        assert_eq!(progress_percent("frame=120", 30.0), None);
        // unknown duration suppresses reporting
        assert_eq!(progress_percent("out_time_us=15000000", 0.0), None);
    }

    #[test]
    fn default_bitrate_is_documented_192() {
        assert_eq!(DEFAULT_MP3_BITRATE_KBPS, 192);
        let converter = FormatConverter::with_binary("ffmpeg-unused").with_audio_bitrate(256);
        assert_eq!(converter.audio_bitrate_kbps, 256);
    }
}
