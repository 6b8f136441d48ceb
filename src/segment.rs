//! The Segment driver.
//!
//! A [`Segment`] owns the reader and every parsed structure: the metadata
//! singletons (SeekHead, Info, Tracks, Cues) and the cluster array. The
//! cluster array is two contiguous runs ordered by position: *loaded*
//! clusters carry the sequence indices `0, 1, 2, ...` and were discovered by
//! the forward cursor; *preloaded* clusters (no index yet) were discovered
//! out of band, by a cue or by [`Segment::parse_next`] scanning ahead.
//!
//! The top-level state machine is a single cursor plus an optional pending
//! unknown-size cluster. The cursor never regresses, and every driver entry
//! point either completes, fails, or returns [`MkvError::NeedBytes`] with the
//! visible state unchanged.

use crate::cluster::{BlockEntry, Cluster, ParseOutcome};
use crate::cues::{Cues, TrackPosition};
use crate::ebml;
use crate::elements;
use crate::error::{MkvError, Result};
use crate::info::{SegmentInfo, DEFAULT_TIMECODE_SCALE};
use crate::reader::MkvReader;
use crate::seekhead::SeekHead;
use crate::tracks::{Track, Tracks};

/// Handle to a cluster within a segment.
///
/// Clusters are identified by their offset relative to the segment payload,
/// which never changes once discovered; the end-of-stream sentinel compares
/// equal to `parse_next(last)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRef {
    /// The cluster at the given segment-relative offset.
    At(u64),
    /// End of stream.
    Eos,
}

impl ClusterRef {
    /// True for the end-of-stream sentinel.
    pub fn is_eos(&self) -> bool {
        matches!(self, ClusterRef::Eos)
    }
}

/// Handle to a block entry within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRef {
    /// A materialized entry.
    At {
        /// Owning cluster's segment-relative offset.
        cluster: u64,
        /// Entry index within the cluster.
        index: usize,
    },
    /// End of stream.
    Eos,
}

impl EntryRef {
    /// True for the end-of-stream sentinel.
    pub fn is_eos(&self) -> bool {
        matches!(self, EntryRef::Eos)
    }

    /// The owning cluster, when this is not the sentinel.
    pub fn cluster(&self) -> ClusterRef {
        match self {
            EntryRef::At { cluster, .. } => ClusterRef::At(*cluster),
            EntryRef::Eos => ClusterRef::Eos,
        }
    }
}

/// A Matroska/WebM segment over a byte source.
pub struct Segment<R> {
    reader: R,
    /// Absolute offset of the segment payload.
    start: u64,
    /// Payload size; `None` when streamed with unknown size.
    size: Option<u64>,
    /// Absolute offset of the next unconsumed top-level byte.
    pos: u64,
    /// Segment-relative position of the unknown-size cluster being parsed.
    pending_unknown_size: Option<u64>,
    seek_head: Option<SeekHead>,
    info: Option<SegmentInfo>,
    tracks: Option<Tracks>,
    cues: Option<Cues>,
    clusters: Vec<Cluster>,
    loaded_count: usize,
}

impl<R: MkvReader> Segment<R> {
    /// Locate the Segment element by scanning from `pos`, skipping the EBML
    /// header and any leading Void, and position the cursor at the start of
    /// the segment payload.
    pub fn create(reader: R, pos: u64) -> Result<Segment<R>> {
        let mut p = pos;
        loop {
            let (total, _) = reader.length();
            if let Some(total) = total {
                if p >= total {
                    return Err(MkvError::InvalidStructure(
                        "no Segment element found".to_string(),
                    ));
                }
            }

            let el = ebml::read_element(&reader, p, None)?;
            if el.id == elements::SEGMENT {
                log::debug!(
                    "segment payload at offset {}, size {:?}",
                    el.payload_start, el.size
                );
                return Ok(Segment {
                    start: el.payload_start,
                    size: el.size,
                    pos: el.payload_start,
                    pending_unknown_size: None,
                    seek_head: None,
                    info: None,
                    tracks: None,
                    cues: None,
                    clusters: Vec::new(),
                    loaded_count: 0,
                    reader,
                });
            }

            // EBML header, Void, CRC, or a foreign top-level element: skip.
            p = el.payload_end().ok_or_else(|| {
                MkvError::InvalidStructure(format!(
                    "element 0x{:X} before the Segment has unknown size",
                    el.id
                ))
            })?;
        }
    }

    /// The underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Absolute offset of the segment payload.
    pub fn payload_start(&self) -> u64 {
        self.start
    }

    /// Payload size; `None` when streamed with unknown size.
    pub fn payload_size(&self) -> Option<u64> {
        self.size
    }

    /// Absolute offset of the next unconsumed top-level byte.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Absolute offset just past the payload, falling back to the reader's
    /// total length while the payload size is unknown.
    fn stop(&self) -> Option<u64> {
        self.size
            .map(|s| self.start + s)
            .or_else(|| self.reader.length().0)
    }

    /// True once the cursor has consumed the whole payload.
    pub fn done_parsing(&self) -> bool {
        if self.pending_unknown_size.is_some() {
            return false;
        }
        match self.stop() {
            Some(stop) => self.pos >= stop,
            None => false,
        }
    }

    /// Consume non-Cluster top-level elements until the first Cluster ID (or
    /// the end of the payload).
    ///
    /// At most one SeekHead, Info, Tracks, and Cues is retained; on
    /// duplicates the first wins. Chapters, Tags, and Attachments are
    /// skipped. A no-op once complete.
    pub fn parse_headers(&mut self) -> Result<()> {
        loop {
            let stop = self.stop();
            if let Some(stop) = stop {
                if self.pos >= stop {
                    return Ok(());
                }
            }

            let el = ebml::read_element(&self.reader, self.pos, stop)?;
            if el.id == elements::CLUSTER {
                return Ok(());
            }

            let size = el.size.ok_or_else(|| MkvError::InvalidElementSize {
                offset: el.element_start,
                message: format!("top-level element 0x{:X} has unknown size", el.id),
            })?;
            let payload_end = el.payload_start + size;
            // Each metadata element is parsed atomically: insist on its whole
            // body, so a retry after NeedBytes re-reads from the same cursor.
            ebml::require(&self.reader, el.payload_start, size)?;

            match el.id {
                elements::SEEK_HEAD => {
                    if self.seek_head.is_none() {
                        let seek_head = SeekHead::parse(&self.reader, &el)?;
                        log::debug!("parsed SeekHead with {} entries", seek_head.count());
                        self.seek_head = Some(seek_head);
                    } else {
                        log::warn!(
                            "duplicate SeekHead at offset {}, keeping the first",
                            el.element_start
                        );
                    }
                }
                elements::INFO => {
                    if self.info.is_none() {
                        let info = SegmentInfo::parse(&self.reader, &el)?;
                        log::debug!("timecode scale {} ns/tick", info.timecode_scale());
                        self.info = Some(info);
                    } else {
                        log::warn!(
                            "duplicate Info at offset {}, keeping the first",
                            el.element_start
                        );
                    }
                }
                elements::TRACKS => {
                    if self.tracks.is_none() {
                        let tracks = Tracks::parse(&self.reader, &el)?;
                        log::debug!("parsed {} tracks", tracks.len());
                        self.tracks = Some(tracks);
                    } else {
                        log::warn!(
                            "duplicate Tracks at offset {}, keeping the first",
                            el.element_start
                        );
                    }
                }
                elements::CUES => {
                    if self.cues.is_none() {
                        // Recorded by span only; cue points load lazily.
                        self.cues = Some(Cues::new(&el)?);
                    } else {
                        log::warn!(
                            "duplicate Cues at offset {}, keeping the first",
                            el.element_start
                        );
                    }
                }
                // Skipped wholesale.
                elements::CHAPTERS
                | elements::TAGS
                | elements::ATTACHMENTS
                | elements::VOID
                | elements::CRC32 => {}
                _ => {}
            }

            self.pos = payload_end;
        }
    }

    /// Discover the next cluster and append it to the loaded run (or promote
    /// its preloaded preview), advancing the cursor past it.
    ///
    /// Returns `false` when no cluster remains. An unknown-size cluster is
    /// parsed through to the top-level ID that terminates it.
    pub fn load_cluster(&mut self) -> Result<bool> {
        if self.pending_unknown_size.is_some() {
            return self.continue_unknown_size();
        }
        self.parse_headers()?;

        loop {
            let stop = self.stop();
            if let Some(stop) = stop {
                if self.pos >= stop {
                    return Ok(false);
                }
            }

            let el = ebml::read_element(&self.reader, self.pos, stop)?;
            if el.id != elements::CLUSTER {
                if el.id == elements::CUES && self.cues.is_none() && el.size.is_some() {
                    // Cues written after the clusters.
                    self.cues = Some(Cues::new(&el)?);
                }
                self.pos = el.payload_end().ok_or_else(|| MkvError::InvalidElementSize {
                    offset: el.element_start,
                    message: format!("top-level element 0x{:X} has unknown size", el.id),
                })?;
                continue;
            }

            let rel = el.element_start - self.start;
            self.append_or_promote(rel, el.element_start, el.element_size())?;
            log::debug!("cluster {} at segment offset {}", self.loaded_count - 1, rel);

            match el.payload_end() {
                Some(end) => {
                    self.pos = end;
                    return Ok(true);
                }
                None => {
                    self.pending_unknown_size = Some(rel);
                    return self.continue_unknown_size();
                }
            }
        }
    }

    /// Drive the pending unknown-size cluster until the next top-level ID
    /// fixes its size, then move the cursor past it.
    fn continue_unknown_size(&mut self) -> Result<bool> {
        let rel = self
            .pending_unknown_size
            .expect("an unknown-size cluster is pending");
        let idx = self
            .cluster_index(rel)
            .expect("the pending cluster is indexed");
        self.ensure_cluster_end(idx)?;
        Ok(true)
    }

    /// The cluster strictly following `curr` in segment order.
    ///
    /// Served from the loaded or preloaded runs when cached; otherwise the
    /// payload is scanned forward and the discovered cluster is preloaded
    /// (the forward cursor is not moved).
    pub fn parse_next(&mut self, curr: ClusterRef) -> Result<ClusterRef> {
        let rel = match curr {
            ClusterRef::Eos => return Ok(ClusterRef::Eos),
            ClusterRef::At(rel) => rel,
        };
        let Some(idx) = self.cluster_index(rel) else {
            return Ok(ClusterRef::Eos);
        };

        if idx + 1 < self.loaded_count {
            return Ok(ClusterRef::At(self.clusters[idx + 1].pos));
        }

        let mut p = self.ensure_cluster_end(idx)?;
        loop {
            let stop = self.stop();
            if let Some(stop) = stop {
                if p >= stop {
                    return Ok(ClusterRef::Eos);
                }
            }

            let el = ebml::read_element(&self.reader, p, stop)?;
            match el.id {
                elements::CLUSTER => {
                    let next_rel = el.element_start - self.start;
                    if self.cluster_index(next_rel).is_none() {
                        self.preload_at(next_rel, el.element_start, el.element_size());
                    }
                    return Ok(ClusterRef::At(next_rel));
                }
                elements::CUES if self.cues.is_none() && el.size.is_some() => {
                    self.cues = Some(Cues::new(&el)?);
                    p = el.payload_end().expect("size checked above");
                }
                _ => {
                    p = el.payload_end().ok_or_else(|| MkvError::InvalidElementSize {
                        offset: el.element_start,
                        message: format!("top-level element 0x{:X} has unknown size", el.id),
                    })?;
                }
            }
        }
    }

    /// The last loaded cluster whose scaled time is at or before `time_ns`.
    ///
    /// With nothing loaded the result is EOS; a time before the first
    /// cluster resolves to the first cluster.
    pub fn find_cluster(&mut self, time_ns: i64) -> Result<ClusterRef> {
        if self.loaded_count == 0 {
            return Ok(ClusterRef::Eos);
        }

        if time_ns <= self.cluster_time_ns_at(0)? {
            return Ok(ClusterRef::At(self.clusters[0].pos));
        }

        // Binary search for the last cluster with time <= time_ns; the
        // invariant is time(lo) <= time_ns < time(hi).
        let mut lo = 0usize;
        let mut hi = self.loaded_count;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.cluster_time_ns_at(mid)? <= time_ns {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(ClusterRef::At(self.clusters[lo].pos))
    }

    /// The cluster at the given segment-relative position, preloading one
    /// (index −1 until the forward cursor reaches it) when absent.
    pub fn find_or_preload_cluster(&mut self, rel_pos: u64) -> ClusterRef {
        if self.cluster_index(rel_pos).is_none() {
            self.preload_at(rel_pos, self.start + rel_pos, None);
        }
        ClusterRef::At(rel_pos)
    }

    /// Parse the headers and every cluster.
    pub fn load(&mut self) -> Result<()> {
        self.parse_headers()?;
        while self.load_cluster()? {}
        Ok(())
    }

    /// The SeekHead, once parsed.
    pub fn seek_head(&self) -> Option<&SeekHead> {
        self.seek_head.as_ref()
    }

    /// The segment Info, once parsed.
    pub fn info(&self) -> Option<&SegmentInfo> {
        self.info.as_ref()
    }

    /// The track table, once parsed.
    pub fn tracks(&self) -> Option<&Tracks> {
        self.tracks.as_ref()
    }

    /// The cue index, once discovered.
    pub fn cues(&self) -> Option<&Cues> {
        self.cues.as_ref()
    }

    /// Nanoseconds per raw tick (the Info value, or the format default).
    pub fn timecode_scale(&self) -> u64 {
        self.info
            .as_ref()
            .map(|i| i.timecode_scale())
            .unwrap_or(DEFAULT_TIMECODE_SCALE)
    }

    /// Segment duration scaled to nanoseconds, when the Info carries one.
    pub fn duration_ns(&self) -> Option<i64> {
        self.info.as_ref().and_then(|i| i.duration_ns())
    }

    /// Number of loaded clusters.
    pub fn count(&self) -> usize {
        self.loaded_count
    }

    /// The first loaded cluster, or EOS when none is loaded.
    pub fn first(&self) -> ClusterRef {
        if self.loaded_count == 0 {
            ClusterRef::Eos
        } else {
            ClusterRef::At(self.clusters[0].pos)
        }
    }

    /// The last loaded cluster, or EOS when none is loaded.
    pub fn last(&self) -> ClusterRef {
        if self.loaded_count == 0 {
            ClusterRef::Eos
        } else {
            ClusterRef::At(self.clusters[self.loaded_count - 1].pos)
        }
    }

    /// Resolve a cluster handle.
    pub fn cluster(&self, cluster: ClusterRef) -> Option<&Cluster> {
        match cluster {
            ClusterRef::Eos => None,
            ClusterRef::At(rel) => self.cluster_index(rel).map(|i| &self.clusters[i]),
        }
    }

    /// A cluster's scaled time, once its timecode is loaded.
    pub fn cluster_time_ns(&self, cluster: ClusterRef) -> Option<i64> {
        self.cluster(cluster)?.time_ns(self.timecode_scale())
    }

    /// Resolve an entry handle to its materialized entry.
    pub fn block_entry(&self, entry: EntryRef) -> Option<&BlockEntry> {
        match entry {
            EntryRef::Eos => None,
            EntryRef::At { cluster, index } => {
                self.cluster(ClusterRef::At(cluster))?.entry(index)
            }
        }
    }

    /// An entry's scaled absolute time.
    pub fn entry_time_ns(&self, entry: EntryRef) -> Option<i64> {
        let EntryRef::At { cluster, index } = entry else {
            return None;
        };
        let cluster = self.cluster(ClusterRef::At(cluster))?;
        let timecode = cluster.timecode()?;
        let block = cluster.entry(index)?.block();
        Some(block.time_ns(timecode, self.timecode_scale()))
    }

    /// The first entry of the segment, driving cluster loading as needed.
    pub fn first_entry(&mut self) -> Result<EntryRef> {
        while self.loaded_count == 0 {
            if !self.load_cluster()? {
                return Ok(EntryRef::Eos);
            }
        }
        let mut cref = ClusterRef::At(self.clusters[0].pos);
        loop {
            let ClusterRef::At(rel) = cref else {
                return Ok(EntryRef::Eos);
            };
            if self.ensure_entry(rel, 0)? {
                return Ok(EntryRef::At {
                    cluster: rel,
                    index: 0,
                });
            }
            cref = self.parse_next(cref)?;
        }
    }

    /// The entry following `curr`, crossing into the next cluster when the
    /// current one is exhausted.
    pub fn next_entry(&mut self, curr: EntryRef) -> Result<EntryRef> {
        let EntryRef::At { cluster, index } = curr else {
            return Ok(EntryRef::Eos);
        };
        if self.ensure_entry(cluster, index + 1)? {
            return Ok(EntryRef::At {
                cluster,
                index: index + 1,
            });
        }

        let mut cref = self.parse_next(ClusterRef::At(cluster))?;
        loop {
            let ClusterRef::At(rel) = cref else {
                return Ok(EntryRef::Eos);
            };
            if self.ensure_entry(rel, 0)? {
                return Ok(EntryRef::At {
                    cluster: rel,
                    index: 0,
                });
            }
            cref = self.parse_next(cref)?;
        }
    }

    /// The first entry admitted by the given track's policy.
    pub fn first_track_entry(&mut self, track_number: u64) -> Result<EntryRef> {
        let Some(track) = self.cloned_track(track_number) else {
            return Ok(EntryRef::Eos);
        };
        let cur = self.first_entry()?;
        self.scan_for_admitted(cur, &track)
    }

    /// The next entry after `curr` admitted by the given track's policy.
    pub fn next_track_entry(&mut self, curr: EntryRef, track_number: u64) -> Result<EntryRef> {
        let Some(track) = self.cloned_track(track_number) else {
            return Ok(EntryRef::Eos);
        };
        let cur = self.next_entry(curr)?;
        self.scan_for_admitted(cur, &track)
    }

    fn scan_for_admitted(&mut self, mut cur: EntryRef, track: &Track) -> Result<EntryRef> {
        loop {
            if cur.is_eos() {
                return Ok(EntryRef::Eos);
            }
            let entry = self.block_entry(cur).expect("entry is materialized");
            if track.admits(entry.block()) {
                return Ok(cur);
            }
            cur = self.next_entry(cur)?;
        }
    }

    /// Seek the given track to `time_ns`: the last admitted entry with time
    /// at or before the target.
    ///
    /// With cues available, the cue lookup picks the starting block and a
    /// linear scan refines forward within that cluster; otherwise the scan
    /// runs from the first cluster. A target before the first admitted entry
    /// resolves to that entry.
    pub fn seek_track(&mut self, track_number: u64, time_ns: i64) -> Result<EntryRef> {
        let Some(track) = self.cloned_track(track_number) else {
            return Ok(EntryRef::Eos);
        };

        let cue_start = if self.cues.is_some() {
            self.cue_seek_start(track_number, time_ns)?
        } else {
            None
        };

        match cue_start {
            Some(start) => {
                let EntryRef::At { cluster, .. } = start else {
                    return Ok(start);
                };
                let mut best = start;
                let mut cur = start;
                loop {
                    let entry = self.block_entry(cur).expect("entry is materialized");
                    let admitted = track.admits(entry.block());
                    let t = self.entry_time_ns(cur).expect("cluster is loaded");
                    if t > time_ns {
                        break;
                    }
                    if admitted {
                        best = cur;
                    }
                    match self.next_entry(cur)? {
                        EntryRef::At {
                            cluster: next_cluster,
                            index,
                        } if next_cluster == cluster => {
                            cur = EntryRef::At {
                                cluster: next_cluster,
                                index,
                            };
                        }
                        _ => break,
                    }
                }
                Ok(best)
            }
            None => {
                let first = self.first_track_entry(track_number)?;
                if first.is_eos() {
                    return Ok(EntryRef::Eos);
                }
                let mut best = first;
                let mut cur = first;
                loop {
                    if cur.is_eos() {
                        break;
                    }
                    let t = self.entry_time_ns(cur).expect("cluster is loaded");
                    if t > time_ns {
                        break;
                    }
                    best = cur;
                    cur = self.next_track_entry(cur, track_number)?;
                }
                Ok(best)
            }
        }
    }

    /// Find the cue for `time_ns` carrying the given track.
    ///
    /// Preloads the remaining cue points and loads the matched one; walks
    /// backwards over cues that carry no position for the track.
    pub fn find_cue(
        &mut self,
        time_ns: i64,
        track_number: u64,
    ) -> Result<Option<(usize, TrackPosition)>> {
        let scale = self.timecode_scale();
        let Self { reader, cues, .. } = self;
        let Some(cues) = cues.as_mut() else {
            return Ok(None);
        };
        cues.find(&*reader, time_ns, scale, track_number)
    }

    /// Resolve a cue track position to its block entry, preloading the
    /// target cluster and driving its parser to the cue's block index.
    pub fn cue_block(&mut self, position: &TrackPosition) -> Result<EntryRef> {
        let ClusterRef::At(rel) = self.find_or_preload_cluster(position.cluster_pos) else {
            unreachable!("find_or_preload_cluster always yields a position");
        };
        let index = (position.block.max(1) - 1) as usize;
        if !self.ensure_entry(rel, index)? {
            return Ok(EntryRef::Eos);
        }

        let entry_ref = EntryRef::At {
            cluster: rel,
            index,
        };
        let entry = self.block_entry(entry_ref).expect("entry is materialized");
        if entry.block().track_number() != position.track {
            log::warn!(
                "cue block {} in cluster at {} belongs to track {}, cue names track {}",
                position.block,
                rel,
                entry.block().track_number(),
                position.track
            );
        }
        Ok(entry_ref)
    }

    fn cue_seek_start(&mut self, track_number: u64, time_ns: i64) -> Result<Option<EntryRef>> {
        match self.find_cue(time_ns, track_number)? {
            None => Ok(None),
            Some((_, position)) => match self.cue_block(&position)? {
                EntryRef::Eos => Ok(None),
                entry => Ok(Some(entry)),
            },
        }
    }

    /// Drive the cluster at `rel` until its `index`-th entry is materialized.
    /// `false` when the cluster is exhausted first.
    fn ensure_entry(&mut self, rel: u64, index: usize) -> Result<bool> {
        let stop = self.stop();
        let Some(i) = self.cluster_index(rel) else {
            return Ok(false);
        };
        let (reader, clusters) = (&self.reader, &mut self.clusters);
        let cluster = &mut clusters[i];
        while cluster.entry_count() <= index {
            match cluster.parse_one(reader, stop)? {
                ParseOutcome::Entry => {}
                ParseOutcome::Done => return Ok(false),
            }
        }
        Ok(true)
    }

    /// A cluster's element end, parsing an unknown-size cluster through to
    /// its terminator first. Advances the forward cursor when the pending
    /// unknown-size cluster is the one that got terminated.
    fn ensure_cluster_end(&mut self, idx: usize) -> Result<u64> {
        if self.clusters[idx].end().is_none() {
            let stop = self.stop();
            let (reader, clusters) = (&self.reader, &mut self.clusters);
            let cluster = &mut clusters[idx];
            loop {
                match cluster.parse_one(reader, stop)? {
                    ParseOutcome::Entry => {}
                    ParseOutcome::Done => break,
                }
            }
        }

        let end = self.clusters[idx]
            .end()
            .expect("a terminated cluster has a size");
        if self.pending_unknown_size == Some(self.clusters[idx].pos) {
            self.pos = end;
            self.pending_unknown_size = None;
        }
        Ok(end)
    }

    fn cluster_time_ns_at(&mut self, idx: usize) -> Result<i64> {
        let stop = self.stop();
        let scale = self.timecode_scale();
        let (reader, clusters) = (&self.reader, &mut self.clusters);
        let cluster = &mut clusters[idx];
        cluster.load(reader, stop)?;
        Ok(cluster.time_ns(scale).expect("loaded cluster has a timecode"))
    }

    /// Locate a cluster by segment-relative position in either run.
    fn cluster_index(&self, rel: u64) -> Option<usize> {
        let loaded = &self.clusters[..self.loaded_count];
        if let Ok(i) = loaded.binary_search_by_key(&rel, |c| c.pos) {
            return Some(i);
        }
        let preloaded = &self.clusters[self.loaded_count..];
        if let Ok(i) = preloaded.binary_search_by_key(&rel, |c| c.pos) {
            return Some(self.loaded_count + i);
        }
        None
    }

    /// Append a freshly discovered cluster to the loaded run, or promote its
    /// preloaded preview when one exists at the same position.
    fn append_or_promote(
        &mut self,
        rel: u64,
        element_start: u64,
        element_size: Option<u64>,
    ) -> Result<()> {
        if self.loaded_count > 0 {
            let last = &self.clusters[self.loaded_count - 1];
            if rel <= last.pos {
                return Err(MkvError::InvalidStructure(format!(
                    "cluster at {} does not advance past {}",
                    rel, last.pos
                )));
            }
        }

        // A preloaded position the cursor passed without finding a cluster
        // there came from a bogus cue; drop it to keep the runs ordered.
        while self.loaded_count < self.clusters.len() && self.clusters[self.loaded_count].pos < rel
        {
            log::warn!(
                "dropping preloaded cluster at {}: no cluster element there",
                self.clusters[self.loaded_count].pos
            );
            self.clusters.remove(self.loaded_count);
        }

        if self.loaded_count < self.clusters.len() && self.clusters[self.loaded_count].pos == rel {
            let cluster = &mut self.clusters[self.loaded_count];
            cluster.index = Some(self.loaded_count);
            if cluster.element_size.is_none() {
                cluster.element_size = element_size;
            }
            self.loaded_count += 1;
            return Ok(());
        }

        let index = self.loaded_count;
        self.clusters
            .insert(index, Cluster::new(rel, element_start, element_size, Some(index)));
        self.loaded_count += 1;
        Ok(())
    }

    /// Insert a preloaded cluster into the preload run, keeping it ordered.
    fn preload_at(&mut self, rel: u64, element_start: u64, element_size: Option<u64>) {
        let preloaded = &self.clusters[self.loaded_count..];
        let at = match preloaded.binary_search_by_key(&rel, |c| c.pos) {
            Ok(_) => return,
            Err(i) => i,
        };
        self.clusters.insert(
            self.loaded_count + at,
            Cluster::new(rel, element_start, element_size, None),
        );
    }

    fn cloned_track(&self, track_number: u64) -> Option<Track> {
        self.tracks.as_ref()?.by_number(track_number).cloned()
    }
}
