// MediaFetchEngine: yt-dlp wrapper with line-parsed progress

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use regex::Regex;

use crate::errors::{Error, Result};
use crate::models::{DownloadRequest, MediaAsset, OutputFormat, Phase};
use crate::progress::ProgressReporter;
use crate::tools::{self, Tool};
use crate::utils::{sanitize_title, stderr_tail};

/// Metadata probed before the transfer starts
#[derive(Debug, Clone)]
struct ResourceMeta {
    title: String,
    duration_seconds: f64,
    ext: String,
}

/// Fetches a remote media resource to local storage through the yt-dlp
/// binary, emitting `Downloading` progress parsed from its output.
pub struct MediaFetchEngine {
    ytdlp: PathBuf,
}

impl MediaFetchEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            ytdlp: tools::find_tool(Tool::YtDlp)?,
        })
    }

    /// Use an explicit yt-dlp binary instead of discovering one.
    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self { ytdlp: path.into() }
    }

    /// Retrieve the resource described by `request` into its destination
    /// directory. Blocking; run it from a worker thread.
    pub fn fetch(
        &self,
        request: &DownloadRequest,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<MediaAsset> {
        request.validate()?;

        std::fs::create_dir_all(&request.destination).map_err(|e| {
            Error::Write(format!(
                "cannot create destination {}: {}",
                request.destination.display(),
                e
            ))
        })?;

        let meta = self.probe(&request.url)?;
        let stem = sanitize_title(&meta.title);
        log::info!(
            "fetching '{}' ({:?}) into {}",
            stem,
            request.format,
            request.destination.display()
        );

        let args = build_download_args(request, &stem);
        let last_destination = self.run_download(&args, reporter)?;

        let path = resolve_output_path(request, &stem, &meta, last_destination)?;
        reporter.report(Phase::Downloading, 100.0);
        log::info!("fetch complete: {}", path.display());

        Ok(MediaAsset {
            path,
            kind: request.format.media_kind(),
            duration_seconds: meta.duration_seconds,
        })
    }

    /// One `--dump-json` call: title, duration and container extension.
    fn probe(&self, url: &str) -> Result<ResourceMeta> {
        let output = Command::new(&self.ytdlp)
            .args([
                "--dump-json",
                "--no-playlist",
                "--no-warnings",
                "--socket-timeout",
                "15",
                "--retries",
                "2",
                url,
            ])
            .output()
            .map_err(|e| tools::spawn_error(Tool::YtDlp, &e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::classify_fetch_stderr(&stderr_tail(&stderr, 4)));
        }

        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| {
                Error::Network(format!("unexpected yt-dlp metadata output: {}", e))
            })?;

        Ok(ResourceMeta {
            title: json["title"].as_str().unwrap_or("download").to_string(),
            duration_seconds: json["duration"].as_f64().unwrap_or(0.0),
            ext: json["ext"].as_str().unwrap_or("mp4").to_string(),
        })
    }

    /// Spawn yt-dlp and stream its stdout, turning `[download]` lines into
    /// progress events. Returns the last `Destination:` path seen, if any.
    fn run_download(
        &self,
        args: &[String],
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<Option<PathBuf>> {
        let mut child = Command::new(&self.ytdlp)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| tools::spawn_error(Tool::YtDlp, &e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Write("failed to capture yt-dlp stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Write("failed to capture yt-dlp stderr".to_string()))?;

        // Collect stderr on the side while the main loop reads progress.
        let stderr_handle = std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            let mut lines = Vec::new();
            for line in reader.lines().map_while(std::result::Result::ok) {
                lines.push(line);
            }
            lines.join("\n")
        });

        let mut last_destination = None;
        let reader = BufReader::new(stdout);
        for line in reader.lines().map_while(std::result::Result::ok) {
            if let Some(percent) = parse_progress_percent(&line) {
                reporter.report(Phase::Downloading, percent);
            } else if let Some(dest) = parse_destination(&line) {
                log::debug!("destination: {}", dest.display());
                last_destination = Some(dest);
            } else if is_merge_line(&line) {
                // Merge runs after both streams are complete.
                reporter.report(Phase::Downloading, 99.0);
            } else if is_already_downloaded_line(&line) {
                reporter.report(Phase::Downloading, 100.0);
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::Write(format!("yt-dlp did not exit cleanly: {}", e)))?;
        let stderr_output = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            return Err(Error::classify_fetch_stderr(&stderr_tail(&stderr_output, 4)));
        }
        Ok(last_destination)
    }
}

fn build_download_args(request: &DownloadRequest, stem: &str) -> Vec<String> {
    // MP4 wants the best video+audio pair (merged when no progressive
    // stream exists); MP3 wants the best audio-only stream. Container
    // normalization beyond the merge belongs to FormatConverter.
    let format_spec = match request.format {
        OutputFormat::Mp4 => "bv*+ba/b",
        OutputFormat::Mp3 => "ba/b",
    };

    let mut args = vec![
        "-f".to_string(),
        format_spec.to_string(),
        "--no-playlist".to_string(),
        "--newline".to_string(),
        "--no-update".to_string(),
        "--socket-timeout".to_string(),
        "30".to_string(),
        "--retries".to_string(),
        "5".to_string(),
        "-P".to_string(),
        request.destination.to_string_lossy().to_string(),
        // Literal sanitized stem: the final path stays predictable.
        "-o".to_string(),
        format!("{}.%(ext)s", stem),
    ];

    if request.format == OutputFormat::Mp4 {
        args.push("--merge-output-format".to_string());
        args.push("mp4".to_string());
    }

    args.push(request.url.clone());
    args
}

/// Where the finished file ended up.
///
/// The order depends on the format. An MP4 run merges into `<stem>.mp4`
/// and deletes the fragment paths, so the merged target comes first. An
/// MP3 run never produces `<stem>.mp3` itself (that is FormatConverter's
/// job), so the reported destination and the probed ext come first; were
/// `<stem>.mp3` checked first, a converted file left by an earlier run of
/// the same URL would shadow the fresh download.
fn resolve_output_path(
    request: &DownloadRequest,
    stem: &str,
    meta: &ResourceMeta,
    last_destination: Option<PathBuf>,
) -> Result<PathBuf> {
    let target = request
        .destination
        .join(format!("{}.{}", stem, request.format.extension()));
    let probed = request.destination.join(format!("{}.{}", stem, meta.ext));

    let mut candidates = Vec::new();
    match request.format {
        OutputFormat::Mp4 => {
            candidates.push(target);
            candidates.extend(last_destination);
            candidates.push(probed);
        }
        OutputFormat::Mp3 => {
            candidates.extend(last_destination);
            candidates.push(probed);
            candidates.push(target);
        }
    }

    for candidate in candidates {
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(Error::Write(format!(
        "download finished but no output file found for '{}' in {}",
        stem,
        request.destination.display()
    )))
}

/// Parse a yt-dlp progress line like:
/// `[download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32`
///
/// Lines without a known total size do not match, so no percentage is
/// reported until the total becomes known.
fn parse_progress_percent(line: &str) -> Option<f64> {
    lazy_static::lazy_static! {
        static ref PROGRESS_RE: Regex = Regex::new(
            r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*\d+\.?\d*\s*\w+"
        ).unwrap();
    }
    let caps = PROGRESS_RE.captures(line)?;
    caps.get(1)?.as_str().parse().ok()
}

fn parse_destination(line: &str) -> Option<PathBuf> {
    lazy_static::lazy_static! {
        static ref DEST_RE: Regex =
            Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
    }
    let caps = DEST_RE.captures(line)?;
    Some(PathBuf::from(caps.get(1)?.as_str().trim()))
}

fn is_merge_line(line: &str) -> bool {
    lazy_static::lazy_static! {
        static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
    }
    MERGE_RE.is_match(line)
}

fn is_already_downloaded_line(line: &str) -> bool {
    line.contains("has already been downloaded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_from_progress_lines() {
        let line = "[download]   6.2% of ~ 343.72MiB at  420.30KiB/s ETA 12:32 (frag 29/454)";
        assert_eq!(parse_progress_percent(line), Some(6.2));

        let line = "[download] 100% of 10.00MiB at 2.00MiB/s";
        assert_eq!(parse_progress_percent(line), Some(100.0));
    }

    #[test]
    fn suppresses_lines_with_unknown_total() {
        // No total size yet: yt-dlp only reports the byte count.
        assert_eq!(
            parse_progress_percent("[download]   1.00MiB at  2.00MiB/s (unknown ETA)"),
            None
        );
        assert_eq!(parse_progress_percent("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn parses_destination_lines() {
        let line = "[download] Destination: /tmp/out/My Song.m4a";
        assert_eq!(
            parse_destination(line),
            Some(PathBuf::from("/tmp/out/My Song.m4a"))
        );
        assert_eq!(parse_destination("[download]  42.0% of 1.00MiB"), None);
    }

    #[test]
    fn recognizes_merge_and_cached_lines() {
        assert!(is_merge_line(r#"[Merger] Merging formats into "clip.mp4""#));
        assert!(!is_merge_line("[download] 50.0% of 1MiB"));
        assert!(is_already_downloaded_line(
            "[download] /tmp/out/clip.mp4 has already been downloaded"
        ));
    }

    #[test]
    fn mp4_args_select_merged_video() {
        let request = DownloadRequest::new("https://youtu.be/abc", OutputFormat::Mp4)
            .with_destination("/tmp/out");
        let args = build_download_args(&request, "clip");
        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "bv*+ba/b");
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(args.contains(&"clip.%(ext)s".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc");
    }

    #[test]
    fn mp3_args_select_audio_only() {
        let request = DownloadRequest::new("https://youtu.be/abc", OutputFormat::Mp3)
            .with_destination("/tmp/out");
        let args = build_download_args(&request, "clip");
        assert_eq!(args[1], "ba/b");
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn missing_output_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = DownloadRequest::new("https://youtu.be/abc", OutputFormat::Mp3)
            .with_destination(dir.path());
        let meta = ResourceMeta {
            title: "clip".to_string(),
            duration_seconds: 10.0,
            ext: "m4a".to_string(),
        };
        let err = resolve_output_path(&request, "clip", &meta, None).unwrap_err();
        assert!(matches!(err, Error::Write(_)));
    }

    #[test]
    fn fresh_audio_download_wins_over_leftover_mp3() {
        // A previous run of the same URL leaves its converted clip.mp3 in
        // the destination. The new fetch must still hand the fresh audio
        // stream to the converter, not the leftover.
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("clip.mp3");
        let fresh = dir.path().join("clip.webm");
        std::fs::write(&stale, b"old").unwrap();
        std::fs::write(&fresh, b"new").unwrap();

        let request = DownloadRequest::new("https://youtu.be/abc", OutputFormat::Mp3)
            .with_destination(dir.path());
        let meta = ResourceMeta {
            title: "clip".to_string(),
            duration_seconds: 10.0,
            ext: "webm".to_string(),
        };
        let path =
            resolve_output_path(&request, "clip", &meta, Some(fresh.clone())).unwrap();
        assert_eq!(path, fresh);

        // Without a reported destination the probed ext still wins.
        let path = resolve_output_path(&request, "clip", &meta, None).unwrap();
        assert_eq!(path, fresh);
    }

    #[test]
    fn merged_mp4_wins_over_leftover_fragments() {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("clip.mp4");
        let fragment = dir.path().join("clip.webm");
        std::fs::write(&merged, b"merged").unwrap();
        std::fs::write(&fragment, b"video-only").unwrap();

        let request = DownloadRequest::new("https://youtu.be/abc", OutputFormat::Mp4)
            .with_destination(dir.path());
        let meta = ResourceMeta {
            title: "clip".to_string(),
            duration_seconds: 10.0,
            ext: "webm".to_string(),
        };
        let path =
            resolve_output_path(&request, "clip", &meta, Some(fragment)).unwrap();
        assert_eq!(path, merged);
    }

    #[test]
    fn resolves_reported_destination_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("clip.webm");
        std::fs::write(&audio, b"x").unwrap();

        let request = DownloadRequest::new("https://youtu.be/abc", OutputFormat::Mp3)
            .with_destination(dir.path());
        let meta = ResourceMeta {
            title: "clip".to_string(),
            duration_seconds: 10.0,
            ext: "m4a".to_string(),
        };
        let path =
            resolve_output_path(&request, "clip", &meta, Some(audio.clone())).unwrap();
        assert_eq!(path, audio);
    }
}
