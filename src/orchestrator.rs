// DownloadOrchestrator: one fetch+convert run at a time

use std::sync::atomic::{AtomicBool, Ordering};

use crate::convert::FormatConverter;
use crate::errors::{Error, Result};
use crate::fetch::MediaFetchEngine;
use crate::models::{DownloadRequest, MediaAsset, OutputFormat, ProgressEvent};
use crate::progress::ProgressReporter;

/// Façade over fetch + convert, one operation per output format.
///
/// At most one run may be in flight per instance; overlapping calls are
/// rejected with `Error::Busy` instead of interleaving progress callbacks
/// from two operations. Engines are built fresh for every call, so nothing
/// mutable is shared across requests.
pub struct DownloadOrchestrator {
    in_flight: AtomicBool,
}

impl DownloadOrchestrator {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Download the resource as MP4: best merged video+audio, container
    /// normalized to mp4 when the fetched stream is something else.
    pub fn run_mp4(
        &self,
        request: &DownloadRequest,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<MediaAsset> {
        self.run(request, OutputFormat::Mp4, on_progress)
    }

    /// Download the resource as MP3: best audio-only stream, re-encoded to
    /// mp3 when the fetched container differs.
    pub fn run_mp3(
        &self,
        request: &DownloadRequest,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<MediaAsset> {
        self.run(request, OutputFormat::Mp3, on_progress)
    }

    fn run(
        &self,
        request: &DownloadRequest,
        format: OutputFormat,
        on_progress: &mut dyn FnMut(ProgressEvent),
    ) -> Result<MediaAsset> {
        let _guard = self.begin()?;

        let mut reporter = ProgressReporter::new(on_progress);
        let result = run_pipeline(request, format, &mut reporter);
        match &result {
            Ok(asset) => {
                log::info!("download finished: {}", asset.path.display());
                reporter.finish();
            }
            Err(e) => {
                log::info!("download failed: {}", e);
                reporter.fail();
            }
        }
        result
    }

    /// Claim the in-flight slot, or reject. The returned guard releases it
    /// on drop, whichever way the operation ends.
    fn begin(&self) -> Result<BusyGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        Ok(BusyGuard {
            flag: &self.in_flight,
        })
    }
}

impl Default for DownloadOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

fn run_pipeline(
    request: &DownloadRequest,
    format: OutputFormat,
    reporter: &mut ProgressReporter<'_>,
) -> Result<MediaAsset> {
    // One operation per format: the request's format field follows the
    // entry point that was called.
    let request = DownloadRequest {
        format,
        ..request.clone()
    };

    let engine = MediaFetchEngine::new()?;
    let asset = engine.fetch(&request, reporter)?;

    let converter = FormatConverter::new()?;
    converter.ensure_format(asset, format.extension(), reporter)
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
