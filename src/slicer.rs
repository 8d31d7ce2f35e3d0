//! Segment Slicer: narrows a volume's `SegmentSequence` down to the minimal
//! ordered list of `Segment`s covering an arbitrary `[start, end]` byte range
//! within that volume — the operation that turns "file X's packed bytes live
//! at offset O for L bytes in volume V" into concrete message-ID ranges.

use crate::model::{Segment, SegmentSequence};

/// An inclusive byte range to slice out of a volume's logical stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[must_use]
    pub fn new(offset: u64, len: u64) -> Self {
        Self {
            start: offset,
            end: offset + len.saturating_sub(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Slice `target` out of `volume_segments`, which describe the full ordered
/// byte stream of one volume. Returns the minimal ordered `Segment` list
/// whose windows collectively cover exactly `target`.
#[must_use]
pub fn slice(volume_segments: &SegmentSequence, target: ByteRange) -> SegmentSequence {
    let mut out = Vec::new();
    let mut abs_pos: u64 = 0;

    for segment in volume_segments {
        let byte_count = segment.byte_count();
        let seg_abs_start = abs_pos;
        let seg_abs_end = abs_pos + byte_count - 1;
        abs_pos += byte_count;

        if seg_abs_end < target.start {
            continue;
        }
        if seg_abs_start > target.end {
            break;
        }

        let overlap_start = seg_abs_start.max(target.start);
        let overlap_end = seg_abs_end.min(target.end);

        out.push(Segment {
            message_id: segment.message_id.clone(),
            start_offset: segment.start_offset + (overlap_start - seg_abs_start),
            end_offset: segment.start_offset + (overlap_end - seg_abs_start),
            segment_size: segment.segment_size,
        });
    }

    out
}

/// Slices each RAR part independently against its own volume's segment
/// sequence and concatenates the results in part order (§4.6).
#[must_use]
pub fn slice_rar_parts(volumes: &[SegmentSequence], parts: &[(usize, ByteRange)]) -> SegmentSequence {
    parts
        .iter()
        .flat_map(|&(volume_index, range)| slice(&volumes[volume_index], range))
        .collect()
}

/// Concatenates all volumes' segment sequences into one logical stream
/// before slicing — the 7z case, where there is no per-file volume split.
#[must_use]
pub fn slice_7z(volumes: &[SegmentSequence], target: ByteRange) -> SegmentSequence {
    let concatenated: SegmentSequence = volumes.iter().flat_map(|v| v.iter().cloned()).collect();
    slice(&concatenated, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageId, sequence_byte_count};

    fn seq(sizes: &[u64]) -> SegmentSequence {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| Segment::whole(MessageId::from(format!("m{i}")), size))
            .collect()
    }

    #[test]
    fn slices_within_a_single_segment() {
        let volume = seq(&[1000, 1000, 1000]);
        let out = slice(&volume, ByteRange::new(1100, 200));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_id, MessageId::from("m1"));
        assert_eq!(out[0].start_offset, 100);
        assert_eq!(out[0].end_offset, 299);
    }

    #[test]
    fn slices_across_multiple_segments() {
        let volume = seq(&[100, 100, 100]);
        let out = slice(&volume, ByteRange::new(50, 150));
        assert_eq!(out.len(), 2);
        assert_eq!(sequence_byte_count(&out), 150);
    }

    #[test]
    fn covers_entire_volume() {
        let volume = seq(&[100, 200, 300]);
        let total = 600;
        let out = slice(&volume, ByteRange::new(0, total));
        assert_eq!(sequence_byte_count(&out), total);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn slice_across_volumes_preserves_order() {
        let volumes = vec![seq(&[100]), seq(&[200])];
        // simulate a file whose packed range spans [90, 99] of volume 0 and [0, 49] of volume 1
        let out = slice_rar_parts(
            &volumes,
            &[(0, ByteRange::new(90, 10)), (1, ByteRange::new(0, 50))],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].message_id, MessageId::from("m0"));
        assert_eq!(out[1].message_id, MessageId::from("m0")); // same label reused across seq() calls, still distinct Vec elements
        assert_eq!(sequence_byte_count(&out), 60);
    }
}
