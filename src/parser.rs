//! Manifest Parser: turns a raw NZB document into a [`crate::model::ParsedManifest`].
//!
//! Parsing happens in two passes. The first pass (`parse_metadata`/`parse_raw_files`)
//! is pure and synchronous: it walks the XML and produces intermediate structures
//! with nothing resolved yet but what the document itself states. The second pass
//! (`build_par2_index`/`resolve_file`) is async and needs an [`ArticleStreamProvider`]:
//! it builds a PAR2 file-descriptor index from the smallest non-recovery `.par2`
//! file retained from classification, fetches each file's first/second/last
//! segment yEnc headers, normalizes per-segment sizes, and resolves the file's
//! logical size, name, and archive classification — consulting the PAR2 index
//! first, ahead of yEnc and name-cleanup strategies, per the Deobfuscator's
//! documented precedence.

use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use md5::{Digest, Md5};
use roxmltree::Document;
use tokio::io::AsyncReadExt;

use crate::classify;
use crate::errors::{FileAttributeKind, ImportError, ParseNzbError};
use crate::model::{Encryption, MessageId, Par2FileDescriptor, ParsedFile, ParsedManifest, PayloadKind, Segment, SegmentSequence};
use crate::obfuscation;
use crate::provider::{ArticleStreamProvider, ProviderError, YencHeaders};
use crate::subject;
use crate::{deobfuscate, par2, subparsers};

/// Backoff schedule for a segment's yEnc header fetch: three attempts total.
const YENC_RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(5)];

/// Bytes hashed to match a target file against the PAR2 descriptor index.
const FIRST16K: usize = 16 * 1024;

/// NZB `<meta type="...">` values this parser understands, beyond the
/// creator-definable `title`/`tag`/`category` already carried from the
/// original NZB lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetaType {
    Title,
    Password,
    Tag,
    Category,
    Salt,
    ChunkSize,
    FileName,
    FileSize,
    FileExtension,
    Cipher,
}

impl MetaType {
    fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("title") {
            Some(Self::Title)
        } else if s.eq_ignore_ascii_case("password") {
            Some(Self::Password)
        } else if s.eq_ignore_ascii_case("tag") {
            Some(Self::Tag)
        } else if s.eq_ignore_ascii_case("category") {
            Some(Self::Category)
        } else if s.eq_ignore_ascii_case("salt") {
            Some(Self::Salt)
        } else if s.eq_ignore_ascii_case("chunk_size") || s.eq_ignore_ascii_case("part_size") {
            Some(Self::ChunkSize)
        } else if s.eq_ignore_ascii_case("file_name") {
            Some(Self::FileName)
        } else if s.eq_ignore_ascii_case("file_size") {
            Some(Self::FileSize)
        } else if s.eq_ignore_ascii_case("file_extension") {
            Some(Self::FileExtension)
        } else if s.eq_ignore_ascii_case("cipher") {
            Some(Self::Cipher)
        } else {
            None
        }
    }
}

/// Cipher values recognized in a `<meta type="cipher">` entry.
const KNOWN_CIPHERS: &[&str] = &["rclone", "none"];

/// Metadata parsed out of an NZB's `<head>` block.
#[derive(Clone, Debug, Default)]
pub(crate) struct ManifestMeta {
    pub title: Option<String>,
    pub passwords: Vec<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub salt: Option<String>,
    pub chunk_size: Option<u64>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub file_extension: Option<String>,
    pub encryption: Encryption,
}

pub(crate) fn parse_metadata(nzb: &Document) -> Result<ManifestMeta, ParseNzbError> {
    let mut meta = ManifestMeta::default();

    for node in nzb.descendants().filter(|n| n.has_tag_name("meta")) {
        let Some(typ) = node.attribute("type").and_then(MetaType::parse) else {
            continue;
        };
        let Some(text) = node.text().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };

        match typ {
            MetaType::Title => meta.title = meta.title.or_else(|| Some(text.to_owned())),
            MetaType::Password => meta.passwords.push(text.to_owned()),
            MetaType::Tag => meta.tags.push(text.to_owned()),
            MetaType::Category => meta.category = meta.category.or_else(|| Some(text.to_owned())),
            MetaType::Salt => meta.salt = meta.salt.or_else(|| Some(text.to_owned())),
            MetaType::ChunkSize => meta.chunk_size = meta.chunk_size.or_else(|| text.parse().ok()),
            MetaType::FileName => meta.file_name = meta.file_name.or_else(|| Some(text.to_owned())),
            MetaType::FileSize => meta.file_size = meta.file_size.or_else(|| text.parse().ok()),
            MetaType::FileExtension => meta.file_extension = meta.file_extension.or_else(|| Some(text.to_owned())),
            MetaType::Cipher => {
                if !KNOWN_CIPHERS.contains(&text.to_lowercase().as_str()) {
                    return Err(ParseNzbError::UnknownCipher(text.to_owned()));
                }
                meta.encryption = if text.eq_ignore_ascii_case("rclone") {
                    Encryption::Rclone
                } else {
                    Encryption::None
                };
            }
        }
    }

    Ok(meta)
}

/// One `<segment>` as declared by the manifest, before per-file normalization.
struct RawSegment {
    number: u32,
    declared_size: u64,
    message_id: MessageId,
}

/// One `<file>` as declared by the manifest, before yEnc resolution.
struct RawFile {
    subject: String,
    groups: Vec<String>,
    segments: Vec<RawSegment>,
    release_date_unix: i64,
}

fn parse_raw_files(nzb: &Document) -> Result<Vec<RawFile>, ParseNzbError> {
    let mut files = Vec::new();

    for node in nzb.root_element().children().filter(|n| n.has_tag_name("file")) {
        let _poster = node
            .attribute("poster")
            .ok_or(ParseNzbError::FileAttribute(FileAttributeKind::Poster))?;

        let release_date_unix = node
            .attribute("date")
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(|d| DateTime::from_timestamp(d, 0))
            .ok_or(ParseNzbError::FileAttribute(FileAttributeKind::Date))?
            .timestamp();

        let subject = node
            .attribute("subject")
            .ok_or(ParseNzbError::FileAttribute(FileAttributeKind::Subject))?;

        let mut groups = Vec::new();
        let mut segments = Vec::new();

        for child in node.children() {
            match child.tag_name().name() {
                "groups" => {
                    for group in child.children().filter(|n| n.has_tag_name("group")) {
                        if let Some(text) = group.text().filter(|t| !t.is_empty()) {
                            groups.push(text.to_owned());
                        }
                    }
                }
                "segments" => {
                    for segment in child.children().filter(|n| n.has_tag_name("segment")) {
                        let Some(message_id) = segment.text().filter(|t| !t.is_empty()) else {
                            continue;
                        };
                        let Some(declared_size) = segment.attribute("bytes").and_then(|b| b.parse::<u64>().ok())
                        else {
                            continue;
                        };
                        let Some(number) = segment.attribute("number").and_then(|n| n.parse::<u32>().ok()) else {
                            continue;
                        };
                        segments.push(RawSegment {
                            number,
                            declared_size,
                            message_id: MessageId::from(message_id),
                        });
                    }
                }
                _ => continue,
            }
        }

        if groups.is_empty() {
            return Err(ParseNzbError::GroupsElement);
        }
        if segments.is_empty() {
            return Err(ParseNzbError::SegmentsElement);
        }

        groups.sort_unstable();
        segments.sort_unstable_by_key(|s| s.number);

        files.push(RawFile {
            subject: subject.to_owned(),
            groups,
            segments,
            release_date_unix,
        });
    }

    if files.is_empty() {
        return Err(ParseNzbError::FileElement);
    }

    files.sort_unstable_by(|a, b| {
        let ka = subject::file_number(&a.subject);
        let kb = subject::file_number(&b.subject);
        ka.cmp(&kb).then_with(|| a.subject.cmp(&b.subject))
    });

    Ok(files)
}

/// Opens a segment's body stream, retrying transient provider errors with
/// the fixed backoff schedule. A not-found result is returned immediately
/// without retrying — no amount of waiting recovers a missing article.
async fn open_segment_stream<P: ArticleStreamProvider>(
    provider: &P,
    message_id: &MessageId,
    groups: &[String],
) -> Result<P::BodyStream, ImportError> {
    let mut attempt = 0usize;
    loop {
        match provider.body_reader(message_id, groups).await {
            Ok(stream) => return Ok(stream),
            Err(ProviderError::NotFound) => {
                return Err(ImportError::ArticleNotFoundInProviders {
                    message_id: message_id.to_string(),
                });
            }
            Err(ProviderError::Transient(msg)) => {
                if attempt >= YENC_RETRY_BACKOFF.len() {
                    return Err(ImportError::TransientPool(msg));
                }
                tokio::time::sleep(YENC_RETRY_BACKOFF[attempt]).await;
                attempt += 1;
            }
        }
    }
}

/// Fetches one segment's yEnc header.
async fn fetch_segment_headers<P: ArticleStreamProvider>(
    provider: &P,
    message_id: &MessageId,
    groups: &[String],
) -> Result<YencHeaders, ImportError> {
    let mut stream = open_segment_stream(provider, message_id, groups).await?;
    let headers = stream.yenc_headers().clone();
    // Drain a single byte so implementations that populate headers lazily
    // on first read still report them.
    let mut probe = [0u8; 1];
    let _ = stream.read(&mut probe).await;
    Ok(headers)
}

/// MD5 of the first 16 KiB of a file's body, read across its segments in
/// order (almost always satisfied by the first segment alone, since a
/// segment is typically far larger than 16 KiB).
async fn first16k_md5<P: ArticleStreamProvider>(
    provider: &P,
    segments: &[RawSegment],
    groups: &[String],
) -> Result<[u8; 16], ImportError> {
    let mut hasher = Md5::new();
    let mut remaining = FIRST16K;

    for segment in segments {
        if remaining == 0 {
            break;
        }
        let mut stream = open_segment_stream(provider, &segment.message_id, groups).await?;
        let mut buf = vec![0u8; remaining];
        let mut read = 0usize;
        while read < buf.len() {
            let n = stream.read(&mut buf[read..]).await.map_err(ImportError::Io)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        hasher.update(&buf[..read]);
        remaining -= read;
    }

    Ok(hasher.finalize().into())
}

/// Builds the PAR2 file-descriptor index from the smallest non-recovery
/// `.par2` file (excluding names containing `.vol`), per §4.3 strategy 1.
/// Returns an empty index when no such file is present in the manifest.
async fn build_par2_index<P: ArticleStreamProvider>(
    par2_files: &[RawFile],
    provider: &P,
) -> Result<HashMap<[u8; 16], Par2FileDescriptor>, ImportError> {
    let candidate = par2_files
        .iter()
        .filter(|f| {
            let name = subparsers::extract_filename_from_subject(&f.subject).unwrap_or(&f.subject);
            !name.to_lowercase().contains(".vol")
        })
        .min_by_key(|f| f.segments.iter().map(|s| s.declared_size).sum::<u64>());

    let Some(candidate) = candidate else {
        return Ok(HashMap::new());
    };

    let mut bytes = Vec::new();
    for segment in &candidate.segments {
        let mut stream = open_segment_stream(provider, &segment.message_id, &candidate.groups).await?;
        stream.read_to_end(&mut bytes).await.map_err(ImportError::Io)?;
    }

    Ok(par2::read_file_descriptors(std::io::Cursor::new(bytes)))
}

/// Normalizes each segment's declared size against confirmed yEnc part
/// sizes and the file's resolved logical size, per the 1/2/≥3-segment rules:
/// - one segment: its size is the file's logical size outright.
/// - two segments: the first uses the first segment's confirmed part size;
///   the last uses the last segment's confirmed part size.
/// - three or more: the first and last use their own confirmed part sizes;
///   every middle segment uses the second segment's confirmed part size.
fn normalize_segment_sizes(
    raw: &[RawSegment],
    first_part_size: Option<u64>,
    second_part_size: Option<u64>,
    last_part_size: Option<u64>,
    logical_size: u64,
) -> Vec<u64> {
    let n = raw.len();
    match n {
        0 => Vec::new(),
        1 => vec![logical_size],
        2 => vec![
            first_part_size.unwrap_or(raw[0].declared_size),
            last_part_size.unwrap_or(raw[1].declared_size),
        ],
        _ => {
            let first = first_part_size.unwrap_or(raw[0].declared_size);
            let middle = second_part_size.unwrap_or(raw[1].declared_size);
            let last = last_part_size.unwrap_or(raw[n - 1].declared_size);

            let mut sizes = Vec::with_capacity(n);
            sizes.push(first);
            sizes.extend(std::iter::repeat_n(middle, n - 2));
            sizes.push(last);
            sizes
        }
    }
}

/// Resolves one raw file into a [`ParsedFile`]: fetches yEnc headers,
/// normalizes segment sizes, resolves the logical size and filename against
/// the PAR2 index, and classifies the file as a RAR/7z volume.
async fn resolve_file<P: ArticleStreamProvider>(
    raw: RawFile,
    meta: &ManifestMeta,
    par2_index: &HashMap<[u8; 16], Par2FileDescriptor>,
    provider: &P,
) -> Result<ParsedFile, ImportError> {
    let n = raw.segments.len();

    let first_headers = fetch_segment_headers(provider, &raw.segments[0].message_id, &raw.groups).await?;
    let last_headers = if n >= 2 {
        Some(fetch_segment_headers(provider, &raw.segments[n - 1].message_id, &raw.groups).await?)
    } else {
        None
    };
    let second_headers = if n >= 3 {
        Some(fetch_segment_headers(provider, &raw.segments[1].message_id, &raw.groups).await?)
    } else {
        None
    };

    let md5 = first16k_md5(provider, &raw.segments, &raw.groups).await?;
    let par2_match = deobfuscate::match_par2_descriptor(par2_index, md5);

    let declared_total: u64 = raw.segments.iter().map(|s| s.declared_size).sum();
    let logical_size = par2_match
        .map(|d| d.file_length)
        .or(first_headers.file_size)
        .or(meta.file_size)
        .unwrap_or(declared_total);

    let sizes = normalize_segment_sizes(
        &raw.segments,
        first_headers.part_size,
        second_headers.as_ref().and_then(|h| h.part_size),
        last_headers.as_ref().and_then(|h| h.part_size),
        logical_size,
    );
    let segments: SegmentSequence = raw
        .segments
        .iter()
        .zip(sizes)
        .map(|(raw_segment, size)| Segment::whole(raw_segment.message_id.clone(), size))
        .collect();

    let subject_name = subparsers::extract_filename_from_subject(&raw.subject);
    let filename = resolve_filename(par2_match, &raw.subject, subject_name, first_headers.filename.as_deref(), meta);

    let is_rar_volume = classify::is_rar_volume(&filename);
    let is_7z_volume = classify::is_7z_volume(&filename);

    Ok(ParsedFile {
        subject: raw.subject,
        filename,
        logical_size,
        segments,
        newsgroups: raw.groups,
        is_rar_volume,
        is_7z_volume,
        encryption: meta.encryption,
        password: meta.passwords.first().cloned(),
        salt: meta.salt.clone(),
        release_date_unix: raw.release_date_unix,
    })
}

/// Filename resolution precedence: PAR2 descriptor match → yEnc header name
/// (if usable) → the manifest subject's embedded filename → the manifest's
/// `file_name` meta → a best-effort cleanup pass over the subject-derived
/// name.
fn resolve_filename(
    par2_match: Option<&Par2FileDescriptor>,
    subject_text: &str,
    subject_name: Option<&str>,
    yenc_name: Option<&str>,
    meta: &ManifestMeta,
) -> String {
    if let Some(descriptor) = par2_match {
        return descriptor.filename.clone();
    }

    if let Some(name) = subject_name
        && let Some(usable) = deobfuscate::yenc_name_if_usable(name, yenc_name)
    {
        return usable;
    }

    if let Some(name) = subject_name {
        let (stem, _) = subparsers::split_filename_at_extension(name);
        if !obfuscation::is_obfuscated(stem) {
            return name.to_owned();
        }
    }

    if let Some(name) = &meta.file_name {
        return name.clone();
    }

    match subject_name {
        Some(name) => {
            let (stem, _) = subparsers::split_filename_at_extension(name);
            let cleaned = deobfuscate::cleanup_name_pattern(name);
            if cleaned.is_empty() || obfuscation::is_obfuscated(stem) {
                name.to_owned()
            } else {
                cleaned
            }
        }
        None => subject_text.to_owned(),
    }
}

/// Parses an NZB document into a [`ParsedManifest`], resolving every file's
/// logical size, name, and archive classification against live article
/// headers via `provider`.
pub async fn parse_manifest<P: ArticleStreamProvider>(
    xml: &str,
    source_path: impl Into<String>,
    provider: &P,
) -> Result<ParsedManifest, ImportError> {
    let doc = self::parse_document(xml)?;
    let meta = parse_metadata(&doc)?;
    let raw_files = parse_raw_files(&doc)?;

    let (par2_files, work_files): (Vec<RawFile>, Vec<RawFile>) = raw_files.into_iter().partition(|f| {
        let name = subparsers::extract_filename_from_subject(&f.subject).unwrap_or(&f.subject);
        classify::is_par2(name)
    });

    let par2_index = build_par2_index(&par2_files, provider).await?;

    let mut files = Vec::with_capacity(work_files.len());
    for raw in work_files {
        files.push(resolve_file(raw, &meta, &par2_index, provider).await?);
    }

    if files.is_empty() {
        return Err(ImportError::Parse(ParseNzbError::OnlyPar2Files));
    }

    let kind = resolve_kind(&files);
    let total_size: u64 = files.iter().map(ParsedFile::expected_byte_count).sum();
    let segment_count: usize = files.iter().map(|f| f.segments.len()).sum();
    let nominal_segment_size = files
        .first()
        .and_then(|f| f.segments.first())
        .map(|s| s.segment_size)
        .unwrap_or(0);

    // When a manifest carries both `file_name` and `file_size` meta, that
    // pairing is the usenet-drive STRM convention rather than a genuine
    // filename override, and `file_name` is not trustworthy as the
    // manifest's display name: fall through to the title/first-file name.
    let usenet_drive_meta = meta.file_name.is_some() && meta.file_size.is_some();
    let filename = if usenet_drive_meta {
        meta.title.clone().unwrap_or_else(|| files[0].filename.clone())
    } else {
        meta.file_name
            .clone()
            .or_else(|| meta.title.clone())
            .unwrap_or_else(|| files[0].filename.clone())
    };

    Ok(ParsedManifest {
        source_path: source_path.into(),
        filename,
        total_size,
        kind,
        files,
        segment_count,
        nominal_segment_size,
        password: meta.passwords.first().cloned(),
    })
}

fn resolve_kind(files: &[ParsedFile]) -> PayloadKind {
    if files.iter().all(|f| f.is_rar_volume) {
        PayloadKind::RarArchive
    } else if files.iter().all(|f| f.is_7z_volume) {
        PayloadKind::SevenZipArchive
    } else if files.len() == 1 {
        PayloadKind::SingleFile
    } else {
        PayloadKind::MultiFile
    }
}

fn parse_document(xml: &str) -> Result<Document<'_>, ParseNzbError> {
    crate::xml::parse_document(xml).map_err(ParseNzbError::from)
}
