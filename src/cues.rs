//! The Cues seeking index.
//!
//! Cue points go through two phases so a long file's index stays cheap to
//! hold: *preloading* records a cue's time and element span without touching
//! its TrackPosition list; *loading* parses the TrackPositions in place the
//! first time a lookup hits the cue. Lookups therefore extend the index even
//! though they are observationally read-only; they run behind the segment
//! driver's `&mut` access.

use crate::ebml;
use crate::elements;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// A cue's position for one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackPosition {
    /// Track number.
    pub track: u64,
    /// Cluster offset relative to the segment payload.
    pub cluster_pos: u64,
    /// 1-based block index within the cluster (absent or 0 reads as 1).
    pub block: u64,
}

/// One cue point: a time mapped to per-track positions.
#[derive(Debug, Clone)]
pub struct CuePoint {
    element_start: u64,
    element_size: u64,
    timecode: i64,
    /// `None` while the cue is only preloaded.
    track_positions: Option<Vec<TrackPosition>>,
}

impl CuePoint {
    /// Absolute offset of the CuePoint element.
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total size of the CuePoint element.
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Cue time in raw ticks.
    pub fn timecode(&self) -> i64 {
        self.timecode
    }

    /// Cue time in nanoseconds.
    pub fn time_ns(&self, timecode_scale: u64) -> i64 {
        self.timecode * timecode_scale as i64
    }

    /// True once the TrackPosition list has been parsed.
    pub fn is_loaded(&self) -> bool {
        self.track_positions.is_some()
    }

    /// The parsed track positions, once loaded.
    pub fn track_positions(&self) -> Option<&[TrackPosition]> {
        self.track_positions.as_deref()
    }

    /// The position for the given track, once loaded.
    pub fn find(&self, track_number: u64) -> Option<&TrackPosition> {
        self.track_positions
            .as_deref()?
            .iter()
            .find(|tp| tp.track == track_number)
    }
}

/// The lazy cue-point catalogue.
#[derive(Debug, Clone)]
pub struct Cues {
    /// Payload span.
    start: u64,
    size: u64,
    element_start: u64,
    element_size: u64,
    cue_points: Vec<CuePoint>,
    /// Parse cursor within the payload.
    pos: u64,
}

impl Cues {
    pub(crate) fn new(el: &ebml::Element) -> Result<Cues> {
        let size = el.size.ok_or_else(|| MkvError::InvalidElementSize {
            offset: el.element_start,
            message: "Cues element has unknown size".to_string(),
        })?;
        Ok(Cues {
            start: el.payload_start,
            size,
            element_start: el.element_start,
            element_size: el.element_size().expect("size checked above"),
            cue_points: Vec::new(),
            pos: el.payload_start,
        })
    }

    /// Absolute offset of the Cues element.
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total size of the Cues element.
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// True once the position of the last cue point has been observed.
    pub fn done_parsing(&self) -> bool {
        self.pos >= self.start + self.size
    }

    /// Number of cue points discovered so far.
    pub fn count(&self) -> usize {
        self.cue_points.len()
    }

    /// The `index`-th cue point, in time order.
    pub fn point(&self, index: usize) -> Option<&CuePoint> {
        self.cue_points.get(index)
    }

    /// The earliest cue point discovered.
    pub fn first(&self) -> Option<&CuePoint> {
        self.cue_points.first()
    }

    /// The latest cue point discovered.
    pub fn last(&self) -> Option<&CuePoint> {
        self.cue_points.last()
    }

    /// The cue point following the `index`-th one.
    pub fn next(&self, index: usize) -> Option<&CuePoint> {
        self.cue_points.get(index + 1)
    }

    /// Preload the next cue point: record its time and span, leaving the
    /// TrackPositions unparsed. Returns `false` when the payload is
    /// exhausted.
    pub(crate) fn preload_cue_point<R: MkvReader>(&mut self, reader: &R) -> Result<bool> {
        let stop = self.start + self.size;
        while self.pos < stop {
            let child = ebml::read_element(reader, self.pos, Some(stop))?;
            let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
                offset: child.element_start,
                message: "unsized Cues child".to_string(),
            })?;
            let child_end = child.payload_start + csize;

            if child.id != elements::CUE_POINT {
                self.pos = child_end;
                continue;
            }

            // A cue point is small; insist on its whole body before parsing
            // so preloading commits atomically.
            ebml::require(reader, child.payload_start, csize)?;
            let timecode = preload_timecode(reader, &child, csize)?;

            self.cue_points.push(CuePoint {
                element_start: child.element_start,
                element_size: child.element_size().expect("size checked above"),
                timecode,
                track_positions: None,
            });
            self.pos = child_end;
            return Ok(true);
        }
        Ok(false)
    }

    /// Preload every remaining cue point.
    pub(crate) fn preload_all<R: MkvReader>(&mut self, reader: &R) -> Result<()> {
        while self.preload_cue_point(reader)? {}
        Ok(())
    }

    /// Parse the `index`-th cue's TrackPositions in place. Idempotent.
    pub(crate) fn load_cue_point<R: MkvReader>(&mut self, reader: &R, index: usize) -> Result<()> {
        let cue = self.cue_points.get_mut(index).ok_or_else(|| {
            MkvError::InvalidStructure(format!("cue point {} out of range", index))
        })?;
        if cue.track_positions.is_some() {
            return Ok(());
        }

        let el = ebml::read_element(reader, cue.element_start, None)?;
        let size = el.size.expect("sized at preload");
        let stop = el.payload_start + size;

        let mut positions = Vec::new();
        let mut p = el.payload_start;
        while p < stop {
            let child = ebml::read_element(reader, p, Some(stop))?;
            let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
                offset: child.element_start,
                message: "unsized CuePoint child".to_string(),
            })?;

            if child.id == elements::CUE_TRACK_POSITIONS {
                if let Some(tp) = parse_track_position(reader, child.payload_start, csize)? {
                    positions.push(tp);
                } else {
                    log::warn!(
                        "cue point at {} has a track position without track or cluster",
                        cue.element_start
                    );
                }
            }

            p = child.payload_start + csize;
        }

        cue.track_positions = Some(positions);
        Ok(())
    }

    /// Find the last cue whose time is at or before `time_ns` and carries a
    /// position for `track_number`, walking backwards over cues that do not.
    ///
    /// A time before the first cue resolves to the first cue. Returns the cue
    /// index and the matching track position.
    pub(crate) fn find<R: MkvReader>(
        &mut self,
        reader: &R,
        time_ns: i64,
        timecode_scale: u64,
        track_number: u64,
    ) -> Result<Option<(usize, TrackPosition)>> {
        self.preload_all(reader)?;
        if self.cue_points.is_empty() {
            return Ok(None);
        }

        let upper = self
            .cue_points
            .partition_point(|cue| cue.time_ns(timecode_scale) <= time_ns);
        let start = upper.saturating_sub(1);

        for index in (0..=start).rev() {
            self.load_cue_point(reader, index)?;
            if let Some(tp) = self.cue_points[index].find(track_number) {
                return Ok(Some((index, *tp)));
            }
        }
        Ok(None)
    }
}

/// Extract the CueTime child, skipping (not parsing) everything else.
fn preload_timecode<R: MkvReader>(reader: &R, el: &ebml::Element, size: u64) -> Result<i64> {
    let stop = el.payload_start + size;
    let mut p = el.payload_start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
            offset: child.element_start,
            message: "unsized CuePoint child".to_string(),
        })?;
        if child.id == elements::CUE_TIME {
            return Ok(ebml::unserialize_uint(reader, child.payload_start, csize)? as i64);
        }
        p = child.payload_start + csize;
    }
    Err(MkvError::InvalidStructure(format!(
        "cue point at {} has no CueTime",
        el.element_start
    )))
}

/// Parse one CueTrackPositions body. `None` when track or cluster position
/// is missing.
fn parse_track_position<R: MkvReader>(
    reader: &R,
    start: u64,
    size: u64,
) -> Result<Option<TrackPosition>> {
    let stop = start + size;
    let mut track: Option<u64> = None;
    let mut cluster_pos: Option<u64> = None;
    let mut block: u64 = 1;

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
            offset: child.element_start,
            message: "unsized CueTrackPositions child".to_string(),
        })?;

        match child.id {
            elements::CUE_TRACK => {
                track = Some(ebml::unserialize_uint(reader, child.payload_start, csize)?);
            }
            elements::CUE_CLUSTER_POSITION => {
                cluster_pos = Some(ebml::unserialize_uint(reader, child.payload_start, csize)?);
            }
            elements::CUE_BLOCK_NUMBER => {
                let n = ebml::unserialize_uint(reader, child.payload_start, csize)?;
                block = n.max(1);
            }
            _ => {}
        }

        p = child.payload_start + csize;
    }

    Ok(match (track, cluster_pos) {
        (Some(track), Some(cluster_pos)) => Some(TrackPosition {
            track,
            cluster_pos,
            block,
        }),
        _ => None,
    })
}
