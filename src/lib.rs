#![doc = include_str!("../README.md")]

mod archive;
mod classify;
mod deobfuscate;
mod encryption;
mod errors;
mod metadata;
mod model;
mod obfuscation;
mod orchestrator;
mod par2;
mod parser;
mod provider;
mod queue;
mod slicer;
mod strm;
mod subject;
mod subparsers;
mod validator;
mod xml;

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;

pub use crate::archive::{AnalyzedArchive, Volume, order_7z_volumes, order_rar_volumes, rar_order_key, sevenzip_order_key};
pub use crate::errors::{FileAttributeKind, ImportError, ParseNzbError};
pub use crate::metadata::{JsonFileMetadataStore, MetadataStore};
pub use crate::model::{
    ArchiveFileParts, ArchiveInternalFile, Encryption, FileHealth, MessageId, MetadataRecord, Par2FileDescriptor,
    ParsedFile, ParsedManifest, PayloadKind, Priority, QueueItem, QueueStatus, RarPart, Segment, SegmentSequence,
    VirtualPath, sequence_byte_count,
};
pub use crate::orchestrator::{ImportConfig, ImportOutcome, Orchestrator};
pub use crate::provider::{ArticleBodyStream, ArticleStreamProvider, ProviderError, StatResult, YencHeaders};
pub use crate::queue::{QueueStats, QueueStore, SqliteQueueStore};
pub use crate::strm::StrmLink;
pub use crate::validator::ValidationConfig;

/// Parses an NZB document into a [`ParsedManifest`], resolving every file's
/// logical size, name, and archive classification against live article
/// headers fetched through `provider`.
///
/// # Errors
///
/// Returns an [`ImportError`] if the XML is malformed, the manifest
/// structure is invalid (see [`ParseNzbError`]), or resolving a file's
/// first-segment headers fails after retrying transient provider errors.
pub async fn parse_manifest<P: ArticleStreamProvider>(
    xml: impl AsRef<str>,
    source_path: impl Into<String>,
    provider: &P,
) -> Result<ParsedManifest, ImportError> {
    crate::parser::parse_manifest(xml.as_ref(), source_path, provider).await
}

/// Parses an NZB file from disk into a [`ParsedManifest`]. Handles both
/// regular and gzipped NZB files.
///
/// # Errors
///
/// Returns an [`ImportError`] if the file cannot be read or decompressed, or
/// if [`parse_manifest`] fails on its contents.
pub async fn parse_manifest_file<P: ArticleStreamProvider>(
    path: impl AsRef<Path>,
    provider: &P,
) -> Result<ParsedManifest, ImportError> {
    let path = path.as_ref();
    let canonical = dunce::canonicalize(path).map_err(ImportError::Io)?;

    let content = if canonical.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz")) {
        let gzipped = fs::read(&canonical).map_err(ImportError::Io)?;
        let mut decoder = GzDecoder::new(&gzipped[..]);
        let mut content = String::new();
        decoder.read_to_string(&mut content).map_err(ImportError::Io)?;
        content
    } else {
        fs::read_to_string(&canonical).map_err(ImportError::Io)?
    };

    parse_manifest(content, canonical.display().to_string(), provider).await
}
