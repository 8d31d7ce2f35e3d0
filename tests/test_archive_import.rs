//! End-to-end archive import: a hand-built RAR4 split-volume archive and a
//! hand-built 7z archive, each driven through `Orchestrator::run_once`
//! against a `MockProvider`, exercising `VolumeReader`/`archive::rar`/
//! `archive::sevenzip` together instead of in isolation.

mod common;

use std::fs;

use altnzb_core::{
    ArticleStreamProvider, ImportConfig, ImportOutcome, MetadataRecord, MetadataStore, Orchestrator, Priority, QueueStore, SqliteQueueStore,
    ValidationConfig,
};
use common::{MockArticle, MockProvider, multi_file_nzb, single_file_nzb};
use tempfile::tempdir;
use tokio::io::AsyncReadExt;

fn write_nzb(dir: &std::path::Path, name: &str, xml: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, xml).unwrap();
    path.display().to_string()
}

/// Reads every segment's bytes back out of `provider` and concatenates them,
/// the same way the Slicer's sliced `SegmentSequence` is meant to be
/// consumed: each segment names a sub-range of one article's full body.
async fn read_segments(provider: &MockProvider, segments: &altnzb_core::SegmentSequence) -> Vec<u8> {
    let mut out = Vec::new();
    for segment in segments {
        let mut stream = provider.body_reader(&segment.message_id, &[]).await.unwrap();
        let mut full = Vec::new();
        stream.read_to_end(&mut full).await.unwrap();
        let start = segment.start_offset as usize;
        let end = segment.end_offset as usize;
        out.extend_from_slice(&full[start..=end]);
    }
    out
}

// --- RAR4 fixture -----------------------------------------------------

const SIG_RAR4: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x00];
const BLOCK_MAIN: u8 = 0x73;
const BLOCK_FILE: u8 = 0x74;
const METHOD_STORE: u8 = 0x30;

/// Builds one RAR4 volume's raw bytes: signature, a MAIN block, then a
/// single stored FILE block. `total_unpacked` is the *whole* (unsplit)
/// file's size, which every volume of a split RAR4 file declares in its own
/// header regardless of how much of the data that volume itself carries.
fn rar4_volume(name: &str, data: &[u8], total_unpacked: u32) -> Vec<u8> {
    let mut buf = SIG_RAR4.to_vec();

    // MAIN block: 7-byte common header + 6-byte body, no extra data to skip.
    buf.extend_from_slice(&0u16.to_le_bytes()); // crc16
    buf.push(BLOCK_MAIN);
    buf.extend_from_slice(&0u16.to_le_bytes()); // flags
    buf.extend_from_slice(&13u16.to_le_bytes()); // header_size
    buf.extend_from_slice(&[0u8; 6]);

    let name_bytes = name.as_bytes();
    let body_len = 4 + 4 + 1 + 4 + 4 + 1 + 1 + 2 + 4 + name_bytes.len();
    let header_size = 7u16 + body_len as u16;

    buf.extend_from_slice(&0u16.to_le_bytes()); // crc16
    buf.push(BLOCK_FILE);
    buf.extend_from_slice(&0u16.to_le_bytes()); // flags
    buf.extend_from_slice(&header_size.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes()); // packed size: this volume's chunk
    buf.extend_from_slice(&total_unpacked.to_le_bytes()); // unpacked size: whole file
    buf.push(3); // host_os
    buf.extend_from_slice(&0u32.to_le_bytes()); // crc32
    buf.extend_from_slice(&0u32.to_le_bytes()); // mtime
    buf.push(29); // unpack_ver
    buf.push(METHOD_STORE);
    buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // attr
    buf.extend_from_slice(name_bytes);
    buf.extend_from_slice(data);

    buf
}

#[tokio::test]
async fn imports_a_two_volume_rar4_archive() {
    let drop_dir = tempdir().unwrap();
    let storage_dir = tempdir().unwrap();
    let metadata_dir = tempdir().unwrap();

    let whole = b"Hello, Usenet!";
    let (chunk1, chunk2) = whole.split_at(7);
    let vol1 = rar4_volume("movie.mkv", chunk1, whole.len() as u32);
    let vol2 = rar4_volume("movie.mkv", chunk2, whole.len() as u32);

    let provider = MockProvider::new();
    provider.insert(
        "r1@example.com",
        MockArticle::Body { headers: altnzb_core::YencHeaders::default(), bytes: vol1.clone() },
    );
    provider.insert(
        "r2@example.com",
        MockArticle::Body { headers: altnzb_core::YencHeaders::default(), bytes: vol2.clone() },
    );

    let subject1 = format!(r#"[1/2] - "release.part1.rar" yEnc (1/1) {}"#, vol1.len());
    let subject2 = format!(r#"[2/2] - "release.part2.rar" yEnc (1/1) {}"#, vol2.len());
    let xml = multi_file_nzb(&[
        (subject1.as_str(), "r1@example.com", vol1.len() as u64),
        (subject2.as_str(), "r2@example.com", vol2.len() as u64),
    ]);
    let nzb_path = write_nzb(drop_dir.path(), "release.nzb", &xml);

    let queue = SqliteQueueStore::open_in_memory().unwrap();
    let metadata = altnzb_core::JsonFileMetadataStore::new(metadata_dir.path());
    queue.enqueue(&nzb_path, None, None, Priority::Normal).unwrap();

    let config = ImportConfig {
        storage_dir: storage_dir.path().to_path_buf(),
        failed_dir: storage_dir.path().join("failed"),
        validation: ValidationConfig { skip_health_check: false, ..ValidationConfig::default() },
        ..ImportConfig::default()
    };

    let orchestrator = Orchestrator::new(queue, metadata, provider, config);
    let (_id, outcome) = orchestrator.run_once().await.unwrap().expect("item was queued");

    let virtual_paths = match outcome {
        ImportOutcome::Completed { virtual_paths } => virtual_paths,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(virtual_paths.len(), 1);
    assert!(virtual_paths[0].ends_with("movie.mkv"), "got {:?}", virtual_paths[0]);

    // Re-fetch through the same handle the Orchestrator just wrote into, and
    // confirm the reassembled bytes match the original unsplit file — proof
    // that the analysis actually ran (rather than timing out silently) and
    // that slicing picked the right byte ranges out of each volume.
    let provider = MockProvider::new();
    provider.insert("r1@example.com", MockArticle::Body { headers: altnzb_core::YencHeaders::default(), bytes: vol1 });
    provider.insert("r2@example.com", MockArticle::Body { headers: altnzb_core::YencHeaders::default(), bytes: vol2 });

    let metadata = altnzb_core::JsonFileMetadataStore::new(metadata_dir.path());
    let record: MetadataRecord = metadata.get(&virtual_paths[0]).unwrap().expect("metadata record written");
    assert_eq!(record.logical_size, whole.len() as u64);

    let reassembled = read_segments(&provider, &record.segments).await;
    assert_eq!(reassembled.as_slice(), whole.as_slice());
}

// --- 7z fixture ---------------------------------------------------------

/// 7z's variable-length integer encoding: values under 128 fit in one byte
/// equal to the value itself, which covers everything this minimal fixture
/// needs (pack/unpack sizes, counts, property lengths).
fn number_byte(v: u64) -> u8 {
    assert!(v < 0x80, "fixture helper only supports small values");
    v as u8
}

fn utf16le_name(name: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for unit in name.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes.extend_from_slice(&[0u8, 0u8]); // null terminator
    bytes
}

/// Standard IEEE CRC32 (poly 0xEDB88320), needed for the 7z signature
/// header's two checksum fields. Not pulled in as a crate dependency since
/// this fixture is the only place in the tree that needs it.
fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Builds a minimal valid 7z archive: one folder, one `copy`-method coder,
/// one file, no compression — exactly the shape `sevenzip::analyze` is
/// willing to report a byte range for.
fn build_minimal_7z(name: &str, data: &[u8]) -> Vec<u8> {
    let pack_size = data.len() as u64;
    let unpack_size = data.len() as u64;

    let mut streams_info = Vec::new();
    streams_info.push(0x06); // kPackInfo
    streams_info.push(number_byte(0)); // PackPos
    streams_info.push(number_byte(1)); // NumPackStreams
    streams_info.push(0x09); // kSize
    streams_info.push(number_byte(pack_size));
    streams_info.push(0x00); // kEnd (PackInfo)
    streams_info.push(0x0B); // kFolder
    streams_info.push(number_byte(1)); // NumFolders
    streams_info.push(0x00); // External
    streams_info.push(number_byte(1)); // NumCoders
    streams_info.push(0x01); // coder flags: CodecIdSize = 1
    streams_info.push(0x00); // codec id: copy
    streams_info.push(0x0C); // kCodersUnpackSize
    streams_info.push(number_byte(unpack_size));
    streams_info.push(0x00); // kEnd (UnpackInfo)
    streams_info.push(0x00); // kEnd (StreamsInfo)

    let name_data = utf16le_name(name);
    let mut files_info = Vec::new();
    files_info.push(number_byte(1)); // NumFiles
    files_info.push(0x11); // kName
    files_info.push(number_byte(1 + name_data.len() as u64)); // property size: External byte + name bytes
    files_info.push(0x00); // External
    files_info.extend_from_slice(&name_data);
    files_info.push(0x00); // kEnd of property list

    let mut header = Vec::new();
    header.push(0x01); // kHeader
    header.push(0x04); // kMainStreamsInfo
    header.extend_from_slice(&streams_info);
    header.push(0x05); // kFilesInfo
    header.extend_from_slice(&files_info);
    header.push(0x00); // kEnd (Header)

    let next_header_offset = pack_size;
    let next_header_size = header.len() as u64;
    let next_header_crc = crc32(&header);

    let mut start_header = Vec::new();
    start_header.extend_from_slice(&next_header_offset.to_le_bytes());
    start_header.extend_from_slice(&next_header_size.to_le_bytes());
    start_header.extend_from_slice(&next_header_crc.to_le_bytes());
    let start_header_crc = crc32(&start_header);

    let mut archive = Vec::new();
    archive.extend_from_slice(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]); // signature
    archive.extend_from_slice(&[0x00, 0x04]); // version
    archive.extend_from_slice(&start_header_crc.to_le_bytes());
    archive.extend_from_slice(&start_header);
    archive.extend_from_slice(data); // packed (copy-method) data
    archive.extend_from_slice(&header);
    archive
}

#[tokio::test]
async fn imports_a_single_volume_7z_archive() {
    let drop_dir = tempdir().unwrap();
    let storage_dir = tempdir().unwrap();
    let metadata_dir = tempdir().unwrap();

    let content = b"hello world";
    let archive_bytes = build_minimal_7z("movie.mkv", content);

    let provider = MockProvider::new();
    provider.insert(
        "z1@example.com",
        MockArticle::Body { headers: altnzb_core::YencHeaders::default(), bytes: archive_bytes.clone() },
    );

    let subject = format!(r#"[1/1] - "release.7z" yEnc (1/1) {}"#, archive_bytes.len());
    let xml = single_file_nzb(&subject, &["z1@example.com"], archive_bytes.len() as u64);
    let nzb_path = write_nzb(drop_dir.path(), "release.nzb", &xml);

    let queue = SqliteQueueStore::open_in_memory().unwrap();
    let metadata = altnzb_core::JsonFileMetadataStore::new(metadata_dir.path());
    queue.enqueue(&nzb_path, None, None, Priority::Normal).unwrap();

    let config = ImportConfig {
        storage_dir: storage_dir.path().to_path_buf(),
        failed_dir: storage_dir.path().join("failed"),
        validation: ValidationConfig { skip_health_check: false, ..ValidationConfig::default() },
        ..ImportConfig::default()
    };

    let orchestrator = Orchestrator::new(queue, metadata, provider, config);
    let (_id, outcome) = orchestrator.run_once().await.unwrap().expect("item was queued");

    let virtual_paths = match outcome {
        ImportOutcome::Completed { virtual_paths } => virtual_paths,
        other => panic!("expected Completed, got {other:?}"),
    };
    assert_eq!(virtual_paths.len(), 1);
    assert!(virtual_paths[0].ends_with("movie.mkv"), "got {:?}", virtual_paths[0]);

    let provider = MockProvider::new();
    provider.insert("z1@example.com", MockArticle::Body { headers: altnzb_core::YencHeaders::default(), bytes: archive_bytes });

    let metadata = altnzb_core::JsonFileMetadataStore::new(metadata_dir.path());
    let record: MetadataRecord = metadata.get(&virtual_paths[0]).unwrap().expect("metadata record written");
    assert_eq!(record.logical_size, content.len() as u64);

    let reassembled = read_segments(&provider, &record.segments).await;
    assert_eq!(reassembled.as_slice(), content.as_slice());
}
