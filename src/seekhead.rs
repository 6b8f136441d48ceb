//! The SeekHead index: element IDs mapped to positions within the segment.

use crate::ebml;
use crate::elements;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// One SeekHead entry: an element ID and its segment-relative position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekEntry {
    /// Element ID in canonical VINT form.
    pub id: u32,
    /// Position relative to the segment payload start.
    pub pos: u64,
}

/// A Void element span observed inside the SeekHead, kept to faithfully
/// describe the padding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoidElement {
    /// Absolute offset of the Void ID.
    pub element_start: u64,
    /// Total element size (ID + size + payload).
    pub element_size: u64,
}

/// The parsed SeekHead element.
#[derive(Debug, Clone)]
pub struct SeekHead {
    element_start: u64,
    element_size: u64,
    entries: Vec<SeekEntry>,
    void_elements: Vec<VoidElement>,
}

impl SeekHead {
    /// Parse a SeekHead element body.
    pub(crate) fn parse<R: MkvReader>(reader: &R, el: &ebml::Element) -> Result<SeekHead> {
        let size = el.size.ok_or_else(|| MkvError::InvalidElementSize {
            offset: el.element_start,
            message: "SeekHead element has unknown size".to_string(),
        })?;
        let stop = el.payload_start + size;

        let mut entries = Vec::new();
        let mut void_elements = Vec::new();

        let mut p = el.payload_start;
        while p < stop {
            let child = ebml::read_element(reader, p, Some(stop))?;
            let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
                offset: child.element_start,
                message: "unsized SeekHead child".to_string(),
            })?;

            match child.id {
                elements::SEEK => {
                    if let Some(entry) = parse_entry(reader, child.payload_start, csize)? {
                        entries.push(entry);
                    }
                }
                elements::VOID => {
                    void_elements.push(VoidElement {
                        element_start: child.element_start,
                        element_size: child.element_size().expect("size checked above"),
                    });
                }
                _ => {}
            }

            p = child.payload_start + csize;
        }

        Ok(SeekHead {
            element_start: el.element_start,
            element_size: el.element_size().expect("size checked above"),
            entries,
            void_elements,
        })
    }

    /// Absolute offset of the SeekHead element.
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total size of the SeekHead element.
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Number of seek entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The `index`-th seek entry in file order.
    pub fn entry(&self, index: usize) -> Option<&SeekEntry> {
        self.entries.get(index)
    }

    /// All seek entries in file order.
    pub fn entries(&self) -> &[SeekEntry] {
        &self.entries
    }

    /// Number of Void spans observed inside the SeekHead.
    pub fn void_element_count(&self) -> usize {
        self.void_elements.len()
    }

    /// The `index`-th Void span.
    pub fn void_element(&self, index: usize) -> Option<&VoidElement> {
        self.void_elements.get(index)
    }
}

/// Parse one Seek child. Entries missing either field are dropped.
fn parse_entry<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<Option<SeekEntry>> {
    let stop = start + size;
    let mut seek_id: Option<u32> = None;
    let mut seek_pos: Option<u64> = None;

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = child.size.ok_or_else(|| MkvError::InvalidElementSize {
            offset: child.element_start,
            message: "unsized Seek child".to_string(),
        })?;

        match child.id {
            elements::SEEK_ID => {
                // The payload is the target's ID bytes in canonical form.
                let bytes = ebml::unserialize_bytes(reader, child.payload_start, csize)?;
                if !bytes.is_empty() && bytes.len() <= 4 {
                    let mut id = 0u32;
                    for b in bytes {
                        id = (id << 8) | b as u32;
                    }
                    seek_id = Some(id);
                }
            }
            elements::SEEK_POSITION => {
                seek_pos = Some(ebml::unserialize_uint(reader, child.payload_start, csize)?);
            }
            _ => {}
        }

        p = child.payload_start + csize;
    }

    Ok(match (seek_id, seek_pos) {
        (Some(id), Some(pos)) => Some(SeekEntry { id, pos }),
        _ => None,
    })
}
