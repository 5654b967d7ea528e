// tubesnip: YouTube download (MP4/MP3) and local media trimming core.
//
// Everything here is blocking and meant for a caller-owned worker thread;
// progress reaches the caller through the `FnMut(ProgressEvent)` observer,
// which is invoked from that worker context.

pub mod convert;
pub mod errors;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod tools;
pub mod trim;
pub mod utils;

pub use convert::{FormatConverter, DEFAULT_MP3_BITRATE_KBPS};
pub use errors::{Error, Result};
pub use fetch::MediaFetchEngine;
pub use models::{
    default_destination, DownloadRequest, MediaAsset, MediaKind, OutputFormat, Phase,
    ProgressEvent, TrimRequest,
};
pub use orchestrator::DownloadOrchestrator;
pub use progress::ProgressReporter;
pub use trim::ClipTrimmer;
