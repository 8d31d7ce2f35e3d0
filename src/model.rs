//! The core data model: message IDs, segments, parsed files/manifests, and
//! the records the Import Orchestrator persists to the queue and metadata
//! stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier for one Usenet article. The only key by which body
/// bytes are fetchable from an [`crate::provider::ArticleStreamProvider`].
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        MessageId(value)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        MessageId(value.to_owned())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A slash-delimited identifier addressing a logical file in the synthesized
/// filesystem. Always has a leading `/`.
pub type VirtualPath = String;

/// One article's contribution to a file.
///
/// Invariant: `0 <= start_offset <= end_offset < segment_size`. Byte count is
/// `end_offset - start_offset + 1`. `segment_size` is the full article
/// payload size and is invariant under slicing; `start_offset`/`end_offset`
/// narrow as the Slicer carves sub-ranges out of a volume's byte stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub message_id: MessageId,
    pub start_offset: u64,
    pub end_offset: u64,
    pub segment_size: u64,
}

impl Segment {
    #[must_use]
    pub fn whole(message_id: MessageId, segment_size: u64) -> Self {
        Self {
            message_id,
            start_offset: 0,
            end_offset: segment_size.saturating_sub(1),
            segment_size,
        }
    }

    /// Number of bytes this segment contributes: `end - start + 1`.
    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.end_offset - self.start_offset + 1
    }

    #[must_use]
    pub fn is_structurally_valid(&self) -> bool {
        !self.message_id.0.is_empty()
            && self.start_offset <= self.end_offset
            && self.segment_size > 0
            && self.end_offset < self.segment_size
    }
}

/// An ordered list of [`Segment`]s describing a contiguous logical byte
/// stream. Order is significant.
pub type SegmentSequence = Vec<Segment>;

/// Sum of byte counts across a segment sequence.
#[must_use]
pub fn sequence_byte_count(segments: &SegmentSequence) -> u64 {
    segments.iter().map(Segment::byte_count).sum()
}

/// How a file's bytes are transformed before being posted, if at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encryption {
    #[default]
    None,
    Rclone,
}

/// The payload shape a manifest resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    SingleFile,
    MultiFile,
    RarArchive,
    SevenZipArchive,
    Strm,
}

/// One logical file declared by (or derived from) the manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedFile {
    pub subject: String,
    pub filename: String,
    pub logical_size: u64,
    pub segments: SegmentSequence,
    pub newsgroups: Vec<String>,
    pub is_rar_volume: bool,
    pub is_7z_volume: bool,
    pub encryption: Encryption,
    pub password: Option<String>,
    pub salt: Option<String>,
    pub release_date_unix: i64,
}

impl ParsedFile {
    #[must_use]
    pub fn expected_byte_count(&self) -> u64 {
        match self.encryption {
            Encryption::None => self.logical_size,
            Encryption::Rclone => crate::encryption::encrypted_size(self.logical_size),
        }
    }
}

/// Container produced by the Manifest Parser.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedManifest {
    pub source_path: String,
    pub filename: String,
    pub total_size: u64,
    pub kind: PayloadKind,
    pub files: Vec<ParsedFile>,
    pub segment_count: usize,
    pub nominal_segment_size: u64,
    pub password: Option<String>,
}

/// A record extracted by the Deobfuscator from a PAR2 file-description packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Par2FileDescriptor {
    pub file_id: [u8; 16],
    pub file_md5: [u8; 16],
    pub first16k_md5: [u8; 16],
    pub file_length: u64,
    pub filename: String,
}

/// Where an archive-internal file's packed bytes live inside one RAR volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RarPart {
    pub volume_path: String,
    pub data_offset: u64,
    pub packed_size: u64,
}

/// One file inside a RAR or 7z archive, as reported by the Archive Analyzer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveInternalFile {
    pub internal_path: String,
    pub flat_filename: String,
    pub size: u64,
    pub parts: ArchiveFileParts,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveFileParts {
    Rar(Vec<RarPart>),
    SevenZip { archive_offset: u64, size: u64 },
}

/// Import priority; claim order is priority-weighted, FIFO within a bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Terminal and transient states of a [`QueueItem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Fallback,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Retrying => "retrying",
            QueueStatus::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "retrying" => Ok(QueueStatus::Retrying),
            "fallback" => Ok(QueueStatus::Fallback),
            other => Err(format!("unknown queue status '{other}'")),
        }
    }
}

/// A durable record owned by the Import Orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub nzb_path: String,
    pub base_path: Option<String>,
    pub category: Option<String>,
    pub priority: Priority,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub file_size: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub fallback_external_id: Option<String>,
    pub storage_path: Option<String>,
    pub extracted_files_hint: Option<String>,
}

/// The metadata record written for each resolved virtual file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub logical_size: u64,
    pub source_nzb_path: String,
    pub status: FileHealth,
    pub segments: SegmentSequence,
    pub encryption: Encryption,
    pub password: Option<String>,
    pub salt: Option<String>,
    pub release_date_unix: i64,
    pub extracted_files_hint: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileHealth {
    Healthy,
}
