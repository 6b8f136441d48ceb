//! Block payload parsing.
//!
//! A Block (or SimpleBlock) body is:
//!
//! ```text
//! [track number: VINT] [timecode: i16, relative to cluster] [flags: u8] [frames...]
//! ```
//!
//! Flag bits: 7 = keyframe (SimpleBlock only), 3 = invisible, 2..1 = lacing
//! (00 none, 01 Xiph, 10 fixed, 11 EBML), 0 = discardable. Laced bodies carry
//! a frame-count byte and a size table; the frame table built here records
//! `{position, length}` spans into the source. The bytes themselves are never
//! copied; consumers read them lazily through the reader capability.

use crate::ebml;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// Frame-packing scheme of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lacing {
    /// Single frame per block.
    None,
    /// Xiph-style lacing with byte-run sizes.
    Xiph,
    /// All frames share one size.
    Fixed,
    /// First size as a VINT, then signed VINT deltas.
    Ebml,
}

/// One media frame inside a block: a span into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Absolute offset of the frame bytes.
    pub pos: u64,
    /// Frame length in bytes.
    pub len: u64,
}

impl Frame {
    /// Read the frame bytes into `buf`, which must be exactly `len` long.
    pub fn read_into<R: MkvReader>(&self, reader: &R, buf: &mut [u8]) -> Result<()> {
        if buf.len() as u64 != self.len {
            return Err(MkvError::InvalidBlock(format!(
                "frame buffer is {} bytes, frame is {}",
                buf.len(),
                self.len
            )));
        }
        ebml::require(reader, self.pos, self.len)?;
        reader.read_into(self.pos, buf)
    }

    /// Read the frame bytes into an owned buffer.
    pub fn read<R: MkvReader>(&self, reader: &R) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.len as usize];
        self.read_into(reader, &mut buf)?;
        Ok(buf)
    }
}

const KEY_FLAG: u8 = 0x80;
const INVISIBLE_FLAG: u8 = 0x08;
const DISCARDABLE_FLAG: u8 = 0x01;

/// A parsed Block or SimpleBlock body.
#[derive(Debug, Clone)]
pub struct Block {
    start: u64,
    size: u64,
    track: u64,
    timecode: i16,
    flags: u8,
    frames: Vec<Frame>,
}

impl Block {
    /// Parse a block body spanning `size` bytes at absolute `start`.
    ///
    /// Only the header and the lacing size table are read; frame bytes stay
    /// in the source.
    pub(crate) fn parse<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<Block> {
        let stop = start + size;
        let mut pos = start;

        let (track, track_len) = ebml::read_vint(reader, pos)?;
        pos += track_len;
        if track == 0 {
            return Err(MkvError::InvalidBlock("zero track number".to_string()));
        }
        if pos + 3 > stop {
            return Err(MkvError::InvalidBlock(
                "block header exceeds payload".to_string(),
            ));
        }

        ebml::require(reader, pos, 3)?;
        let mut head = [0u8; 3];
        reader.read_into(pos, &mut head)?;
        let timecode = i16::from_be_bytes([head[0], head[1]]);
        let flags = head[2];
        pos += 3;

        let lacing = match (flags >> 1) & 0x03 {
            0 => Lacing::None,
            1 => Lacing::Xiph,
            2 => Lacing::Fixed,
            _ => Lacing::Ebml,
        };

        let frames = parse_frames(reader, pos, stop, lacing)?;

        Ok(Block {
            start,
            size,
            track,
            timecode,
            flags,
            frames,
        })
    }

    /// Absolute offset of the block body.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Size of the block body in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Track this block belongs to.
    pub fn track_number(&self) -> u64 {
        self.track
    }

    /// Timecode relative to the owning cluster, in raw ticks.
    pub fn relative_timecode(&self) -> i16 {
        self.timecode
    }

    /// Absolute timecode in raw ticks, given the owning cluster's timecode.
    pub fn timecode(&self, cluster_timecode: i64) -> i64 {
        cluster_timecode + i64::from(self.timecode)
    }

    /// Absolute time in nanoseconds.
    pub fn time_ns(&self, cluster_timecode: i64, timecode_scale: u64) -> i64 {
        self.timecode(cluster_timecode) * timecode_scale as i64
    }

    /// True for a keyframe.
    pub fn is_key(&self) -> bool {
        self.flags & KEY_FLAG != 0
    }

    /// Mark or unmark this block as a keyframe.
    pub fn set_key(&mut self, key: bool) {
        if key {
            self.flags |= KEY_FLAG;
        } else {
            self.flags &= !KEY_FLAG;
        }
    }

    /// True when the frame should be decoded but not displayed.
    pub fn is_invisible(&self) -> bool {
        self.flags & INVISIBLE_FLAG != 0
    }

    /// True when the frame may be dropped under pressure.
    pub fn is_discardable(&self) -> bool {
        self.flags & DISCARDABLE_FLAG != 0
    }

    /// Frame-packing scheme.
    pub fn lacing(&self) -> Lacing {
        match (self.flags >> 1) & 0x03 {
            0 => Lacing::None,
            1 => Lacing::Xiph,
            2 => Lacing::Fixed,
            _ => Lacing::Ebml,
        }
    }

    /// Number of frames in the block.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The `index`-th frame.
    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// All frames in order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// Derive the frame table for the payload in `[pos, stop)`.
fn parse_frames<R: MkvReader>(
    reader: &R,
    mut pos: u64,
    stop: u64,
    lacing: Lacing,
) -> Result<Vec<Frame>> {
    if lacing == Lacing::None {
        return Ok(vec![Frame {
            pos,
            len: stop - pos,
        }]);
    }

    if pos >= stop {
        return Err(MkvError::InvalidLacing(
            "laced block has no frame count".to_string(),
        ));
    }
    ebml::require(reader, pos, 1)?;
    let mut count = [0u8; 1];
    reader.read_into(pos, &mut count)?;
    pos += 1;
    let frame_count = count[0] as u64 + 1;

    let sizes = match lacing {
        Lacing::None => unreachable!(),
        Lacing::Fixed => {
            let remainder = stop - pos;
            if remainder % frame_count != 0 {
                return Err(MkvError::InvalidLacing(format!(
                    "{} payload bytes not evenly divisible into {} frames",
                    remainder, frame_count
                )));
            }
            vec![remainder / frame_count; frame_count as usize]
        }
        Lacing::Xiph => {
            let mut sizes = Vec::with_capacity(frame_count as usize);
            for _ in 0..frame_count - 1 {
                let mut size = 0u64;
                loop {
                    if pos >= stop {
                        return Err(MkvError::InvalidLacing(
                            "Xiph size table runs past the payload".to_string(),
                        ));
                    }
                    ebml::require(reader, pos, 1)?;
                    let mut b = [0u8; 1];
                    reader.read_into(pos, &mut b)?;
                    pos += 1;
                    size += b[0] as u64;
                    if b[0] < 255 {
                        break;
                    }
                }
                sizes.push(size);
            }
            finish_with_remainder(sizes, pos, stop)?
        }
        Lacing::Ebml => {
            let mut sizes = Vec::with_capacity(frame_count as usize);
            if frame_count > 1 {
                let (first, len) = ebml::read_vint(reader, pos)?;
                if pos + len > stop {
                    return Err(MkvError::InvalidLacing(
                        "EBML size table runs past the payload".to_string(),
                    ));
                }
                pos += len;
                sizes.push(first);
                let mut prev = first as i64;

                for _ in 1..frame_count - 1 {
                    let (raw, len) = ebml::read_vint(reader, pos)?;
                    if pos + len > stop {
                        return Err(MkvError::InvalidLacing(
                            "EBML size table runs past the payload".to_string(),
                        ));
                    }
                    pos += len;
                    prev += signed_vint_delta(raw, len);
                    if prev < 0 {
                        return Err(MkvError::InvalidLacing(
                            "negative laced frame size".to_string(),
                        ));
                    }
                    sizes.push(prev as u64);
                }
            }
            finish_with_remainder(sizes, pos, stop)?
        }
    };

    let mut frames = Vec::with_capacity(sizes.len());
    for len in sizes {
        frames.push(Frame { pos, len });
        pos += len;
    }
    debug_assert_eq!(pos, stop);
    Ok(frames)
}

/// Append the final frame size as whatever the declared sizes leave over,
/// failing when they already exceed the payload.
fn finish_with_remainder(mut sizes: Vec<u64>, pos: u64, stop: u64) -> Result<Vec<u64>> {
    let remainder = stop - pos;
    let declared: u64 = sizes.iter().sum();
    if declared > remainder {
        return Err(MkvError::InvalidLacing(format!(
            "declared frame sizes ({}) exceed payload ({})",
            declared, remainder
        )));
    }
    sizes.push(remainder - declared);
    Ok(sizes)
}

/// Decode an EBML-lacing delta: a VINT of `length` bytes biased by
/// `2^(7*length - 1) - 1`.
fn signed_vint_delta(value: u64, length: u64) -> i64 {
    let bias = (1i64 << (7 * length - 1)) - 1;
    value as i64 - bias
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SliceReader;

    fn parse(body: &[u8]) -> Result<Block> {
        let reader = SliceReader::new(body.to_vec());
        Block::parse(&reader, 0, body.len() as u64)
    }

    #[test]
    fn test_no_lacing_single_frame() {
        // track 1, timecode 5, key flag, 4 payload bytes
        let body = [0x81, 0x00, 0x05, 0x80, 0xDE, 0xAD, 0xBE, 0xEF];
        let block = parse(&body).unwrap();

        assert_eq!(block.track_number(), 1);
        assert_eq!(block.relative_timecode(), 5);
        assert!(block.is_key());
        assert!(!block.is_invisible());
        assert!(!block.is_discardable());
        assert_eq!(block.lacing(), Lacing::None);
        assert_eq!(block.frame_count(), 1);

        let frame = block.frame(0).unwrap();
        assert_eq!((frame.pos, frame.len), (4, 4));

        let reader = SliceReader::new(body.to_vec());
        assert_eq!(frame.read(&reader).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_negative_relative_timecode() {
        let body = [0x81, 0xFF, 0xFE, 0x00, 0xAA];
        let block = parse(&body).unwrap();
        assert_eq!(block.relative_timecode(), -2);
        assert_eq!(block.timecode(100), 98);
        assert_eq!(block.time_ns(100, 1_000_000), 98_000_000);
    }

    #[test]
    fn test_fixed_lacing() {
        // 4 frames over 8 payload bytes: count byte 3, flags lacing=fixed (0b100).
        let mut body = vec![0x81, 0x00, 0x00, 0x04, 0x03];
        body.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let block = parse(&body).unwrap();

        assert_eq!(block.lacing(), Lacing::Fixed);
        assert_eq!(block.frame_count(), 4);
        for (i, frame) in block.frames().iter().enumerate() {
            assert_eq!(frame.len, 2);
            assert_eq!(frame.pos, 5 + 2 * i as u64);
        }
    }

    #[test]
    fn test_fixed_lacing_uneven_fails() {
        // 4 frames over 9 payload bytes cannot divide evenly.
        let mut body = vec![0x81, 0x00, 0x00, 0x04, 0x03];
        body.extend_from_slice(&[0; 9]);
        assert!(matches!(parse(&body), Err(MkvError::InvalidLacing(_))));
    }

    #[test]
    fn test_xiph_lacing() {
        // 3 frames: sizes 2, 300 (255+45), remainder 1.
        let mut body = vec![0x81, 0x00, 0x00, 0x02, 0x02];
        body.extend_from_slice(&[2, 255, 45]);
        body.extend_from_slice(&vec![0xAB; 303]);
        let block = parse(&body).unwrap();

        assert_eq!(block.lacing(), Lacing::Xiph);
        assert_eq!(block.frame_count(), 3);
        let lens: Vec<u64> = block.frames().iter().map(|f| f.len).collect();
        assert_eq!(lens, vec![2, 300, 1]);

        // Frames tile the payload without overlap.
        let mut expected = 8u64;
        for frame in block.frames() {
            assert_eq!(frame.pos, expected);
            expected += frame.len;
        }
        assert_eq!(expected, body.len() as u64);
    }

    #[test]
    fn test_xiph_lacing_oversized_fails() {
        // Declared 10 bytes but only 4 remain after the size table.
        let mut body = vec![0x81, 0x00, 0x00, 0x02, 0x01, 10];
        body.extend_from_slice(&[0; 4]);
        assert!(matches!(parse(&body), Err(MkvError::InvalidLacing(_))));
    }

    #[test]
    fn test_ebml_lacing() {
        // 3 frames: first size 4 (VINT 0x84), delta -1 (VINT 0xBE = 62, bias
        // 63), remainder.
        let mut body = vec![0x81, 0x00, 0x00, 0x06, 0x02, 0x84, 0xBE];
        body.extend_from_slice(&vec![0xCD; 4 + 3 + 2]);
        let block = parse(&body).unwrap();

        assert_eq!(block.lacing(), Lacing::Ebml);
        let lens: Vec<u64> = block.frames().iter().map(|f| f.len).collect();
        assert_eq!(lens, vec![4, 3, 2]);
    }

    #[test]
    fn test_ebml_lacing_negative_size_fails() {
        // First size 1, delta -2 drives the second size negative.
        let body = vec![0x81, 0x00, 0x00, 0x06, 0x02, 0x81, 0xBD, 0xAA];
        assert!(matches!(parse(&body), Err(MkvError::InvalidLacing(_))));
    }

    #[test]
    fn test_signed_vint_delta_bias() {
        assert_eq!(signed_vint_delta(63, 1), 0);
        assert_eq!(signed_vint_delta(64, 1), 1);
        assert_eq!(signed_vint_delta(62, 1), -1);
        assert_eq!(signed_vint_delta(8191, 2), 0);
        assert_eq!(signed_vint_delta(8192, 2), 1);
        assert_eq!(signed_vint_delta(8190, 2), -1);
    }

    #[test]
    fn test_zero_track_number_fails() {
        let body = [0x80, 0x00, 0x00, 0x00, 0xAA];
        assert!(matches!(parse(&body), Err(MkvError::InvalidBlock(_))));
    }

    #[test]
    fn test_set_key() {
        let body = [0x81, 0x00, 0x00, 0x00, 0xAA];
        let mut block = parse(&body).unwrap();
        assert!(!block.is_key());
        block.set_key(true);
        assert!(block.is_key());
        block.set_key(false);
        assert!(!block.is_key());
    }

    #[test]
    fn test_frame_read_into_wrong_length() {
        let body = [0x81, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        let block = parse(&body).unwrap();
        let reader = SliceReader::new(body.to_vec());
        let mut short = [0u8; 1];
        assert!(block.frame(0).unwrap().read_into(&reader, &mut short).is_err());
    }
}
