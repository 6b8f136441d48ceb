//! Clusters and their block entries.
//!
//! A cluster is discovered knowing only its position; its timecode is read by
//! [`Cluster::load`] and its entries materialize one at a time through
//! [`Cluster::parse_one`]. A cluster whose size field is all-ones ("unknown
//! size") is terminated by the first segment-level element ID observed in its
//! payload, which retroactively fixes the element size.

use crate::block::Block;
use crate::ebml;
use crate::elements;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// A Block wrapped with reference metadata.
#[derive(Debug, Clone)]
pub struct BlockGroup {
    block: Block,
    prev: Option<i64>,
    next: Option<i64>,
    duration: Option<i64>,
    discard_padding: Option<i64>,
}

impl BlockGroup {
    /// The contained block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Timecode of the previous referenced block, relative to this block.
    pub fn prev_timecode(&self) -> Option<i64> {
        self.prev
    }

    /// Timecode of the next referenced block, relative to this block.
    pub fn next_timecode(&self) -> Option<i64> {
        self.next
    }

    /// Block duration in raw ticks.
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    /// Discard padding in nanoseconds.
    pub fn discard_padding(&self) -> Option<i64> {
        self.discard_padding
    }
}

/// One entry in a cluster: a SimpleBlock or a BlockGroup.
#[derive(Debug, Clone)]
pub enum BlockEntry {
    /// A standalone SimpleBlock.
    Simple(Block),
    /// A Block with group metadata.
    Group(BlockGroup),
}

impl BlockEntry {
    /// The entry's block, whichever variant it is.
    pub fn block(&self) -> &Block {
        match self {
            BlockEntry::Simple(block) => block,
            BlockEntry::Group(group) => group.block(),
        }
    }

    /// Group metadata, when this entry is a BlockGroup.
    pub fn as_group(&self) -> Option<&BlockGroup> {
        match self {
            BlockEntry::Simple(_) => None,
            BlockEntry::Group(group) => Some(group),
        }
    }
}

/// Result of advancing a cluster's entry parser by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseOutcome {
    /// One more entry was appended.
    Entry,
    /// The cluster's payload is exhausted.
    Done,
}

/// A cluster of blocks sharing a relative-time base.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Offset of the element relative to the segment payload.
    pub(crate) pos: u64,
    /// Absolute offset of the element.
    pub(crate) element_start: u64,
    /// Total element size (header + payload); `None` until known.
    pub(crate) element_size: Option<u64>,
    /// Sequence index in the loaded run; `None` while preloaded.
    pub(crate) index: Option<usize>,
    timecode: Option<i64>,
    /// Absolute offset of the next unparsed payload byte; set by `load`.
    parse_pos: Option<u64>,
    entries: Vec<BlockEntry>,
    entries_done: bool,
}

impl Cluster {
    pub(crate) fn new(
        pos: u64,
        element_start: u64,
        element_size: Option<u64>,
        index: Option<usize>,
    ) -> Self {
        Self {
            pos,
            element_start,
            element_size,
            index,
            timecode: None,
            parse_pos: None,
            entries: Vec::new(),
            entries_done: false,
        }
    }

    /// Offset of the element relative to the segment payload.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Absolute offset of the element.
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total element size; `None` while an unknown-size cluster is still
    /// being parsed.
    pub fn element_size(&self) -> Option<u64> {
        self.element_size
    }

    /// Absolute offset just past the element, when the size is known.
    pub(crate) fn end(&self) -> Option<u64> {
        self.element_size.map(|s| self.element_start + s)
    }

    /// Sequence index within the segment; `None` while preloaded.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Cluster timecode in raw ticks; `None` until loaded.
    pub fn timecode(&self) -> Option<i64> {
        self.timecode
    }

    /// Cluster time in nanoseconds.
    pub fn time_ns(&self, timecode_scale: u64) -> Option<i64> {
        self.timecode.map(|tc| tc * timecode_scale as i64)
    }

    /// Number of entries materialized so far.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The `index`-th materialized entry.
    pub fn entry(&self, index: usize) -> Option<&BlockEntry> {
        self.entries.get(index)
    }

    /// All entries materialized so far, in payload order.
    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    /// True once every entry has been materialized.
    pub fn is_fully_parsed(&self) -> bool {
        self.entries_done
    }

    /// Time of the earliest materialized entry, in nanoseconds.
    pub fn first_time_ns(&self, timecode_scale: u64) -> Option<i64> {
        let tc = self.timecode?;
        self.entries
            .first()
            .map(|e| e.block().time_ns(tc, timecode_scale))
    }

    /// Time of the latest materialized entry, in nanoseconds.
    pub fn last_time_ns(&self, timecode_scale: u64) -> Option<i64> {
        let tc = self.timecode?;
        self.entries
            .last()
            .map(|e| e.block().time_ns(tc, timecode_scale))
    }

    /// Read the cluster's element header and Timecode child. Idempotent.
    ///
    /// The timecode must precede the first block, as required by the format.
    pub(crate) fn load<R: MkvReader>(&mut self, reader: &R, stream_stop: Option<u64>) -> Result<()> {
        if self.parse_pos.is_some() {
            return Ok(());
        }

        let el = ebml::read_element(reader, self.element_start, stream_stop)?;
        if el.id != elements::CLUSTER {
            return Err(MkvError::InvalidStructure(format!(
                "expected Cluster at offset {}, found id 0x{:X}",
                self.element_start, el.id
            )));
        }

        let element_size = self.element_size.or(el.element_size());
        let stop = element_size.map(|s| self.element_start + s);

        let mut p = el.payload_start;
        let mut timecode = None;
        loop {
            if let Some(stop) = stop {
                if p >= stop {
                    break;
                }
            } else {
                if self.at_stream_end(reader, p) {
                    break;
                }
                let (id, _) = ebml::read_id(reader, p)?;
                if elements::is_segment_level(id) {
                    break;
                }
            }

            let child = ebml::read_element(reader, p, stop)?;
            match child.id {
                elements::TIMECODE => {
                    let size = unsized_child_err(&child)?;
                    let ticks = ebml::unserialize_uint(reader, child.payload_start, size)?;
                    timecode = Some(ticks as i64);
                    break;
                }
                elements::SIMPLE_BLOCK | elements::BLOCK_GROUP => break,
                _ => {
                    unsized_child_err(&child)?;
                    p = child.payload_end().expect("size checked above");
                }
            }
        }

        let timecode = timecode.ok_or_else(|| {
            MkvError::InvalidStructure(format!(
                "cluster at offset {} has no timecode before its first block",
                self.element_start
            ))
        })?;

        self.timecode = Some(timecode);
        self.element_size = element_size;
        self.parse_pos = Some(el.payload_start);
        Ok(())
    }

    /// Materialize the next entry, or report that the payload is exhausted.
    ///
    /// A format error discards every entry already appended to this cluster.
    pub(crate) fn parse_one<R: MkvReader>(
        &mut self,
        reader: &R,
        stream_stop: Option<u64>,
    ) -> Result<ParseOutcome> {
        self.load(reader, stream_stop)?;
        if self.entries_done {
            return Ok(ParseOutcome::Done);
        }

        let result = self.parse_one_inner(reader);
        if let Err(err) = &result {
            if !err.is_need_more() {
                self.entries.clear();
                self.entries_done = true;
            }
        }
        result
    }

    fn parse_one_inner<R: MkvReader>(&mut self, reader: &R) -> Result<ParseOutcome> {
        let mut p = self.parse_pos.expect("cluster loaded");
        let stop = self.end();

        loop {
            if let Some(stop) = stop {
                if p >= stop {
                    self.parse_pos = Some(p);
                    self.entries_done = true;
                    return Ok(ParseOutcome::Done);
                }
            } else {
                // Unknown size: the next segment-level ID (or the end of the
                // stream) terminates the cluster and fixes its element size.
                if self.at_stream_end(reader, p) {
                    self.finish_unknown_size(p);
                    return Ok(ParseOutcome::Done);
                }
                let (id, _) = ebml::read_id(reader, p)?;
                if elements::is_segment_level(id) {
                    self.finish_unknown_size(p);
                    return Ok(ParseOutcome::Done);
                }
            }

            let child = ebml::read_element(reader, p, stop)?;
            let size = unsized_child_err(&child)?;
            let child_end = child.payload_start + size;

            match child.id {
                elements::TIMECODE => {
                    let ticks = ebml::unserialize_uint(reader, child.payload_start, size)?;
                    self.timecode = Some(ticks as i64);
                    p = child_end;
                    self.parse_pos = Some(p);
                }
                elements::SIMPLE_BLOCK => {
                    let block = Block::parse(reader, child.payload_start, size)?;
                    self.entries.push(BlockEntry::Simple(block));
                    self.parse_pos = Some(child_end);
                    return Ok(ParseOutcome::Entry);
                }
                elements::BLOCK_GROUP => {
                    let group = parse_block_group(reader, child.payload_start, size)?;
                    self.entries.push(BlockEntry::Group(group));
                    self.parse_pos = Some(child_end);
                    return Ok(ParseOutcome::Entry);
                }
                _ => {
                    p = child_end;
                    self.parse_pos = Some(p);
                }
            }
        }
    }

    fn finish_unknown_size(&mut self, end: u64) {
        self.element_size = Some(end - self.element_start);
        self.parse_pos = Some(end);
        self.entries_done = true;
    }

    fn at_stream_end<R: MkvReader>(&self, reader: &R, p: u64) -> bool {
        let (total, _) = reader.length();
        total.map_or(false, |t| p >= t)
    }
}

fn unsized_child_err(child: &ebml::Element) -> Result<u64> {
    child.size.ok_or_else(|| MkvError::InvalidElementSize {
        offset: child.element_start,
        message: format!("cluster child 0x{:X} has unknown size", child.id),
    })
}

/// Parse a BlockGroup body: one Block plus reference metadata.
///
/// The first negative ReferenceBlock becomes `prev`, the first positive one
/// `next`; a block with no references is a key block.
fn parse_block_group<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<BlockGroup> {
    let stop = start + size;
    let mut p = start;

    let mut block: Option<Block> = None;
    let mut prev: Option<i64> = None;
    let mut next: Option<i64> = None;
    let mut duration: Option<i64> = None;
    let mut discard_padding: Option<i64> = None;

    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = unsized_child_err(&child)?;

        match child.id {
            elements::BLOCK => {
                if block.is_none() {
                    block = Some(Block::parse(reader, child.payload_start, csize)?);
                }
            }
            elements::REFERENCE_BLOCK => {
                let reference = ebml::unserialize_int(reader, child.payload_start, csize)?;
                if reference < 0 {
                    prev.get_or_insert(reference);
                } else if reference > 0 {
                    next.get_or_insert(reference);
                }
            }
            elements::BLOCK_DURATION => {
                duration = Some(ebml::unserialize_uint(reader, child.payload_start, csize)? as i64);
            }
            elements::DISCARD_PADDING => {
                discard_padding = Some(ebml::unserialize_int(reader, child.payload_start, csize)?);
            }
            _ => {}
        }

        p = child.payload_start + csize;
    }

    let mut block = block
        .ok_or_else(|| MkvError::InvalidStructure("BlockGroup without a Block".to_string()))?;
    if prev.is_none() && next.is_none() {
        block.set_key(true);
    }

    Ok(BlockGroup {
        block,
        prev,
        next,
        duration,
        discard_padding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SliceReader;

    /// Assemble an element: id + minimal size + body.
    fn element(id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let id_bytes = id.to_be_bytes();
        let skip = id_bytes.iter().position(|&b| b != 0).unwrap_or(3);
        out.extend_from_slice(&id_bytes[skip..]);
        assert!(body.len() < 127, "test helper supports 1-byte sizes only");
        out.push(0x80 | body.len() as u8);
        out.extend_from_slice(body);
        out
    }

    fn simple_block(track: u8, timecode: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0x80 | track];
        body.extend_from_slice(&timecode.to_be_bytes());
        body.push(flags);
        body.extend_from_slice(payload);
        element(elements::SIMPLE_BLOCK, &body)
    }

    fn cluster_bytes(timecode: u8, children: &[Vec<u8>]) -> Vec<u8> {
        let mut body = element(elements::TIMECODE, &[timecode]);
        for child in children {
            body.extend_from_slice(child);
        }
        element(elements::CLUSTER, &body)
    }

    #[test]
    fn test_load_reads_timecode() {
        let data = cluster_bytes(9, &[simple_block(1, 0, 0x80, &[0xAA])]);
        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));

        cluster.load(&reader, None).unwrap();
        assert_eq!(cluster.timecode(), Some(9));
        assert_eq!(cluster.time_ns(1_000_000), Some(9_000_000));

        // Idempotent.
        cluster.load(&reader, None).unwrap();
        assert_eq!(cluster.timecode(), Some(9));
    }

    #[test]
    fn test_parse_entries() {
        let data = cluster_bytes(
            0,
            &[
                simple_block(1, 0, 0x80, &[0xDE, 0xAD]),
                simple_block(2, 5, 0x00, &[0xBE]),
            ],
        );
        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));

        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Entry);
        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Entry);
        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Done);
        assert!(cluster.is_fully_parsed());

        assert_eq!(cluster.entry_count(), 2);
        let first = cluster.entry(0).unwrap();
        assert_eq!(first.block().track_number(), 1);
        assert!(first.block().is_key());
        let second = cluster.entry(1).unwrap();
        assert_eq!(second.block().track_number(), 2);
        assert_eq!(second.block().relative_timecode(), 5);

        // Entry times are non-decreasing in enumeration order.
        assert!(cluster.first_time_ns(1).unwrap() <= cluster.last_time_ns(1).unwrap());
    }

    #[test]
    fn test_cluster_missing_timecode_is_invalid() {
        let body = simple_block(1, 0, 0x80, &[0xAA]);
        let data = element(elements::CLUSTER, &body);
        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));
        assert!(matches!(
            cluster.load(&reader, None),
            Err(MkvError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_block_group_references() {
        let block = element(elements::BLOCK, &[0x81, 0x00, 0x02, 0x00, 0xAA]);
        let reference = element(elements::REFERENCE_BLOCK, &[0xFE]); // -2
        let duration = element(elements::BLOCK_DURATION, &[0x08]);
        let mut group_body = block;
        group_body.extend_from_slice(&reference);
        group_body.extend_from_slice(&duration);
        let group = element(elements::BLOCK_GROUP, &group_body);

        let mut body = element(elements::TIMECODE, &[0]);
        body.extend_from_slice(&group);
        let data = element(elements::CLUSTER, &body);

        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));
        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Entry);

        let entry = cluster.entry(0).unwrap();
        let group = entry.as_group().unwrap();
        assert_eq!(group.prev_timecode(), Some(-2));
        assert_eq!(group.next_timecode(), None);
        assert_eq!(group.duration(), Some(8));
        // A referenced block is not a key block.
        assert!(!entry.block().is_key());
    }

    #[test]
    fn test_block_group_without_references_is_key() {
        let block = element(elements::BLOCK, &[0x81, 0x00, 0x00, 0x00, 0xAA]);
        let group = element(elements::BLOCK_GROUP, &block);
        let mut body = element(elements::TIMECODE, &[0]);
        body.extend_from_slice(&group);
        let data = element(elements::CLUSTER, &body);

        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));
        cluster.parse_one(&reader, None).unwrap();
        assert!(cluster.entry(0).unwrap().block().is_key());
    }

    #[test]
    fn test_corrupt_cluster_discards_entries() {
        // Second entry is a BlockGroup with no Block inside.
        let empty_group = element(elements::BLOCK_GROUP, &element(elements::BLOCK_DURATION, &[1]));
        let data = cluster_bytes(0, &[simple_block(1, 0, 0x80, &[0xAA]), empty_group]);
        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));

        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Entry);
        assert_eq!(cluster.entry_count(), 1);

        assert!(cluster.parse_one(&reader, None).is_err());
        assert_eq!(cluster.entry_count(), 0);
    }

    #[test]
    fn test_unknown_size_cluster_terminated_by_top_level_id() {
        let mut data = Vec::new();
        // Cluster with unknown size.
        data.extend_from_slice(&elements::CLUSTER.to_be_bytes());
        data.push(0xFF);
        let cluster_payload_children = [
            element(elements::TIMECODE, &[3]),
            simple_block(1, 0, 0x80, &[0xAB, 0xCD]),
        ];
        for child in &cluster_payload_children {
            data.extend_from_slice(child);
        }
        let cluster_end = data.len() as u64;
        // The next cluster terminates the first.
        data.extend_from_slice(&cluster_bytes(10, &[simple_block(1, 0, 0x80, &[0x01])]));

        let reader = SliceReader::new(data);
        let mut cluster = Cluster::new(0, 0, None, Some(0));

        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Entry);
        assert_eq!(cluster.parse_one(&reader, None).unwrap(), ParseOutcome::Done);

        assert_eq!(cluster.element_size(), Some(cluster_end));
        assert_eq!(cluster.timecode(), Some(3));
        assert_eq!(cluster.entry_count(), 1);
        assert_eq!(
            cluster.entry(0).unwrap().block().frame(0).unwrap().len,
            2
        );
    }
}
