//! Minimal read-only PAR2 packet parsing, scoped to exactly what the
//! Deobfuscator needs: file-description packets indexed by their first-16KiB
//! MD5, so an obfuscated file can be matched against its real name and size.
//!
//! Packet layout (little-endian), per the PAR2 packet spec:
//! ```text
//! offset  size  field
//! 0       8     magic "PAR2\0PKT"
//! 8       8     packet length, including this header
//! 16      16    MD5 of the packet body (everything after this field)
//! 32      16    recovery set id
//! 48      16    packet type
//! 64      ..    packet body (length - 64 bytes)
//! ```
//! File-description packet body: 16B file id, 16B full-file MD5, 16B MD5 of
//! the first 16 KiB, 8B LE file length, then the filename padded to a
//! 4-byte boundary with trailing nulls/control bytes.

use std::collections::HashMap;
use std::io::Read;

use crate::model::Par2FileDescriptor;

const MAGIC: &[u8; 8] = b"PAR2\0PKT";
const HEADER_LEN: u64 = 64;
const FILE_DESC_TYPE: &[u8; 16] = b"PAR 2.0\0FileDesc";
const MAX_PACKETS: usize = 100;

/// Stream PAR2 packets from `reader`, returning every file-description
/// packet found, keyed by `first16k_md5`. Stops after [`MAX_PACKETS`]
/// packets or at the first truncated/malformed header, returning whatever
/// was read up to that point rather than erroring — a truncated PAR2 file
/// is common (partial download) and shouldn't abort deobfuscation.
pub fn read_file_descriptors<R: Read>(mut reader: R) -> HashMap<[u8; 16], Par2FileDescriptor> {
    let mut out = HashMap::new();

    for _ in 0..MAX_PACKETS {
        let mut header = [0u8; HEADER_LEN as usize];
        if reader.read_exact(&mut header).is_err() {
            break;
        }

        if &header[0..8] != MAGIC {
            break;
        }
        let length = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let packet_type: [u8; 16] = header[48..64].try_into().unwrap();

        if length < HEADER_LEN {
            break;
        }
        let body_len = (length - HEADER_LEN) as usize;

        let mut body = vec![0u8; body_len];
        if reader.read_exact(&mut body).is_err() {
            break;
        }

        if &packet_type == FILE_DESC_TYPE {
            if let Some(desc) = parse_file_description(&body) {
                out.insert(desc.first16k_md5, desc);
            }
        }
    }

    out
}

fn parse_file_description(body: &[u8]) -> Option<Par2FileDescriptor> {
    if body.len() < 56 {
        return None;
    }

    let file_id: [u8; 16] = body[0..16].try_into().ok()?;
    let file_md5: [u8; 16] = body[16..32].try_into().ok()?;
    let first16k_md5: [u8; 16] = body[32..48].try_into().ok()?;
    let file_length = u64::from_le_bytes(body[48..56].try_into().ok()?);

    let name_bytes = &body[56..];
    let end = name_bytes
        .iter()
        .position(|&b| b == 0 || b < 0x20)
        .unwrap_or(name_bytes.len());
    let filename = String::from_utf8_lossy(&name_bytes[..end]).into_owned();

    Some(Par2FileDescriptor {
        file_id,
        file_md5,
        first16k_md5,
        file_length,
        filename,
    })
}
