//! 7z central-directory reader, built on `sevenz-rust2` because it accepts
//! any `Read + Seek` source rather than a path — the synthetic filesystem
//! requirement the hand-rolled RAR walker exists to work around too.
//!
//! 7z entries are folder/coder based rather than flat byte ranges. Only a
//! folder holding exactly one file, stored with the `copy` (no-compression)
//! coder, has a packed byte range we can report without actually
//! decompressing — everything else (solid blocks, compressed folders,
//! encrypted headers) is skipped with a warning, matching §4.5's "only
//! stored entries are emitted" rule.

use sevenz_rust2::{Archive, Password};

use crate::archive::{AnalyzedArchive, Volume};
use crate::errors::ImportError;
use crate::model::{ArchiveFileParts, ArchiveInternalFile, SegmentSequence};
use crate::provider::ArticleStreamProvider;

use super::vfs::VolumeReader;

const COPY_METHOD_ID: &[u8] = &[0x00];

/// Size of the fixed 7z signature header that precedes the packed streams.
const SIGNATURE_HEADER_SIZE: u64 = 32;

/// Concatenates every volume's segments into the one logical 7z bytestream.
fn concatenated_segments(volumes: &[Volume]) -> SegmentSequence {
    volumes.iter().flat_map(|v| v.segments.iter().cloned()).collect()
}

/// Analyzes a (possibly multi-part) 7z archive, returning the stored
/// entries' offsets within the concatenated archive bytestream.
pub fn analyze<P: ArticleStreamProvider>(
    provider: &P,
    newsgroups: &[String],
    volumes: &[Volume],
    prefetch_bytes: u64,
) -> Result<AnalyzedArchive, ImportError> {
    let segments = concatenated_segments(volumes);
    let mut reader = VolumeReader::new(provider, newsgroups.to_vec(), segments).with_prefetch_bytes(prefetch_bytes);

    let archive = Archive::read(&mut reader, &Password::empty())
        .map_err(|e| ImportError::Store(format!("failed to read 7z header: {e}")))?;

    let mut files = Vec::new();
    let mut skipped = Vec::new();

    let mut file_index = 0usize;
    let mut pack_stream_cursor = 0usize;

    for folder in &archive.folders {
        let files_in_folder = folder.num_unpack_substreams.max(1);
        let pack_streams_used = folder.coders.len().max(1);
        let first_pack_stream = pack_stream_cursor;
        pack_stream_cursor += pack_streams_used;

        if files_in_folder != 1 || folder.coders.len() != 1 || folder.coders[0].method_id.as_ref() != COPY_METHOD_ID {
            // Solid, compressed, or multi-coder folder: bytes aren't a plain copy.
            for _ in 0..files_in_folder {
                if let Some(entry) = archive.files.get(file_index) {
                    if !entry.is_directory() {
                        skipped.push(entry.name.clone());
                    }
                }
                file_index += 1;
            }
            continue;
        }

        let Some(entry) = archive.files.get(file_index) else {
            file_index += 1;
            continue;
        };
        file_index += 1;

        if entry.is_directory() {
            continue;
        }

        let archive_offset = SIGNATURE_HEADER_SIZE
            + archive.pack_pos
            + archive.pack_sizes[..first_pack_stream].iter().sum::<u64>();

        let internal_path = entry.name.replace('\\', "/");
        let flat_filename = internal_path.rsplit('/').next().unwrap_or(&internal_path).to_owned();

        files.push(ArchiveInternalFile {
            internal_path,
            flat_filename,
            size: entry.size,
            parts: ArchiveFileParts::SevenZip {
                archive_offset,
                size: entry.size,
            },
        });
    }

    Ok(AnalyzedArchive { files, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenated_segments_preserves_volume_order() {
        use crate::model::{MessageId, Segment};

        let v0 = Volume {
            path: "release.7z".into(),
            segments: vec![Segment::whole(MessageId::from("a"), 100)],
        };
        let v1 = Volume {
            path: "release.7z.001".into(),
            segments: vec![Segment::whole(MessageId::from("b"), 200)],
        };
        let combined = concatenated_segments(&[v0, v1]);
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].message_id, MessageId::from("a"));
        assert_eq!(combined[1].message_id, MessageId::from("b"));
    }
}
