//! Archive Analyzer: reads a RAR or 7z payload's central-directory metadata
//! through a synthetic filesystem backed by the segment map, and reports
//! each internal file's packed byte range across ordered volumes.

pub mod rar;
pub mod sevenzip;
pub mod vfs;

use std::time::Duration;

use lazy_regex::regex;

use crate::errors::ImportError;
use crate::model::ArchiveInternalFile;

/// Hard wall-clock bound on a single archive analysis (§4.5).
pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One volume as seen by the analyzer: its path (for lenient name matching)
/// and its segment sequence (for byte-range reads through the VFS).
#[derive(Clone, Debug)]
pub struct Volume {
    pub path: String,
    pub segments: crate::model::SegmentSequence,
}

/// Sort key for a RAR volume name; lower sorts first. See §4.5.
#[must_use]
pub fn rar_order_key(name: &str) -> (u32, String) {
    let lower = name.to_lowercase();

    if let Some(caps) = regex!(r"\.part(\d+)\.rar$"i).captures(&lower) {
        let part: u32 = caps[1].parse().unwrap_or(0);
        return (part, lower);
    }
    if let Some(caps) = regex!(r"\.r(\d+)$"i).captures(&lower) {
        let part: u32 = caps[1].parse().unwrap_or(0);
        return (part + 1, lower);
    }
    if let Some(caps) = regex!(r"\.(\d+)$").captures(&lower) {
        let part: u32 = caps[1].parse().unwrap_or(0);
        return (part, lower);
    }
    (0, lower)
}

/// Sort key for a 7z volume name: `(priority, part, filename)`. See §4.5.
#[must_use]
pub fn sevenzip_order_key(name: &str) -> (u8, u32, String) {
    let lower = name.to_lowercase();

    if let Some(caps) = regex!(r"\.7z\.(\d+)$"i).captures(&lower) {
        let number: u32 = caps[1].parse().unwrap_or(1);
        return (2, number.saturating_sub(1), lower);
    }
    if lower.ends_with(".7z") {
        return (1, 0, lower);
    }
    (3, u32::MAX, lower)
}

/// Orders RAR volumes into extraction order.
#[must_use]
pub fn order_rar_volumes(mut volumes: Vec<Volume>) -> Vec<Volume> {
    volumes.sort_by(|a, b| rar_order_key(&a.path).cmp(&rar_order_key(&b.path)));
    volumes
}

/// Orders 7z volumes into extraction order.
#[must_use]
pub fn order_7z_volumes(mut volumes: Vec<Volume>) -> Vec<Volume> {
    volumes.sort_by(|a, b| sevenzip_order_key(&a.path).cmp(&sevenzip_order_key(&b.path)));
    volumes
}

/// Result of analyzing one archive.
#[derive(Clone, Debug, Default)]
pub struct AnalyzedArchive {
    pub files: Vec<ArchiveInternalFile>,
    /// Names of entries skipped because they were compressed, encrypted, or directories.
    pub skipped: Vec<String>,
}

/// Runs the synchronous, potentially long-running `body` (a RAR/7z
/// central-directory walk over a [`vfs::VolumeReader`]) on a blocking-pool
/// thread, racing it against the mandatory §4.5 wall-clock bound.
///
/// `body` blocks its thread for the full analysis — it drives `VolumeReader`,
/// whose reads block on network I/O via `futures::executor::block_on` — so it
/// must never run directly on a tokio reactor thread. Wrapping it in
/// `spawn_blocking` is what makes the timeout actually enforceable: the
/// analysis keeps running to completion on its own thread, but
/// `tokio::time::timeout` can still give up on waiting for it and return
/// control to the caller.
pub async fn with_analysis_timeout<F, T>(body: F) -> Result<T, ImportError>
where
    F: FnOnce() -> Result<T, ImportError> + Send + 'static,
    T: Send + 'static,
{
    with_timeout(ANALYSIS_TIMEOUT, body).await
}

/// Same as [`with_analysis_timeout`] but with a caller-supplied bound, for
/// callers that expose the timeout as a configuration knob.
pub async fn with_timeout<F, T>(duration: Duration, body: F) -> Result<T, ImportError>
where
    F: FnOnce() -> Result<T, ImportError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(body);
    match tokio::time::timeout(duration, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(_join_error)) => Err(ImportError::Store("archive analysis task panicked".into())),
        Err(_elapsed) => Err(ImportError::ArchiveAnalysisTimeout),
    }
}
