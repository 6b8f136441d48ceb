//! Segment information.

use crate::ebml;
use crate::elements;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// Default timecode scale: one millisecond per tick, in nanoseconds.
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// The segment's Info element: time base, duration, and app strings.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    element_start: u64,
    element_size: u64,
    timecode_scale: u64,
    /// Duration in raw ticks; the format stores it as a float.
    duration: Option<f64>,
    muxing_app: Option<String>,
    writing_app: Option<String>,
    title: Option<String>,
}

impl SegmentInfo {
    /// Parse an Info element body.
    pub(crate) fn parse<R: MkvReader>(reader: &R, el: &ebml::Element) -> Result<SegmentInfo> {
        let size = el.size.ok_or_else(|| MkvError::InvalidElementSize {
            offset: el.element_start,
            message: "Info element has unknown size".to_string(),
        })?;
        let stop = el.payload_start + size;

        let mut info = SegmentInfo {
            element_start: el.element_start,
            element_size: el.element_size().expect("size checked above"),
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration: None,
            muxing_app: None,
            writing_app: None,
            title: None,
        };

        let mut p = el.payload_start;
        while p < stop {
            let child = ebml::read_element(reader, p, Some(stop))?;
            let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
                offset: child.element_start,
                message: "unsized Info child".to_string(),
            })?;

            match child.id {
                elements::TIMECODE_SCALE => {
                    info.timecode_scale =
                        ebml::unserialize_uint(reader, child.payload_start, csize)?;
                }
                elements::DURATION => {
                    info.duration =
                        Some(ebml::unserialize_float(reader, child.payload_start, csize)?);
                }
                elements::MUXING_APP => {
                    info.muxing_app =
                        Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
                }
                elements::WRITING_APP => {
                    info.writing_app =
                        Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
                }
                elements::TITLE => {
                    info.title =
                        Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
                }
                _ => {}
            }

            p = child.payload_start + csize;
        }

        if info.timecode_scale == 0 {
            return Err(MkvError::InvalidStructure(
                "timecode scale of zero".to_string(),
            ));
        }

        Ok(info)
    }

    /// Absolute offset of the Info element.
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total size of the Info element.
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Nanoseconds per raw tick.
    pub fn timecode_scale(&self) -> u64 {
        self.timecode_scale
    }

    /// Segment duration in raw ticks, as stored.
    pub fn duration_ticks(&self) -> Option<f64> {
        self.duration
    }

    /// Segment duration scaled to nanoseconds.
    pub fn duration_ns(&self) -> Option<i64> {
        self.duration
            .map(|d| (d * self.timecode_scale as f64) as i64)
    }

    /// The application that muxed the file.
    pub fn muxing_app(&self) -> Option<&str> {
        self.muxing_app.as_deref()
    }

    /// The application that wrote the file.
    pub fn writing_app(&self) -> Option<&str> {
        self.writing_app.as_deref()
    }

    /// The segment title.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}
