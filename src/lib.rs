//! # mkv-demux
//!
//! A streaming, random-access demuxer core for the Matroska/WebM container
//! format.
//!
//! The parser runs over a [`MkvReader`], a byte source that answers reads at
//! absolute positions within a window that may still be growing. Every entry
//! point either makes forward progress or reports how many more bytes it
//! needs via [`MkvError::NeedBytes`], without losing state, so the same code
//! drives fully-downloaded files and in-flight streams.
//!
//! ## Example
//!
//! ```no_run
//! use mkv_demux::{EbmlHeader, Segment, SliceReader};
//!
//! let data = std::fs::read("video.webm").unwrap();
//! let reader = SliceReader::new(data);
//!
//! let (header, _) = EbmlHeader::parse(&reader, 0).unwrap();
//! println!("doc type: {}", header.doc_type);
//!
//! let mut segment = Segment::create(&reader, 0).unwrap();
//! segment.parse_headers().unwrap();
//! for track in segment.tracks().unwrap().iter() {
//!     println!("track {}: {:?}", track.number(), track.codec_id());
//! }
//!
//! // Walk every block of track 1.
//! let mut entry = segment.first_track_entry(1).unwrap();
//! while let mkv_demux::EntryRef::At { .. } = entry {
//!     let time_ns = segment.entry_time_ns(entry).unwrap();
//!     let block = segment.block_entry(entry).unwrap().block();
//!     println!("t={} ns, {} frame(s)", time_ns, block.frame_count());
//!     entry = segment.next_track_entry(entry, 1).unwrap();
//! }
//! ```
//!
//! ## Element structure
//!
//! ```text
//! EBML Header
//! Segment
//! ├── SeekHead (index to other elements)
//! ├── Info (time base, duration)
//! ├── Tracks
//! │   └── TrackEntry
//! │       ├── Video / Audio
//! │       └── ContentEncodings
//! ├── Cues (seeking index, loaded lazily)
//! └── Cluster (media data)
//!     ├── Timecode
//!     └── SimpleBlock / BlockGroup
//! ```
//!
//! Out of scope: writing, transmuxing, codec bitstream parsing, and applying
//! content encodings (compression/encryption descriptors are exposed as
//! data).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod cluster;
pub mod cues;
pub mod ebml;
pub mod elements;
pub mod error;
pub mod info;
pub mod reader;
pub mod seekhead;
pub mod segment;
pub mod tracks;

pub use block::{Block, Frame, Lacing};
pub use cluster::{BlockEntry, BlockGroup, Cluster};
pub use cues::{CuePoint, Cues, TrackPosition};
pub use ebml::{EbmlHeader, Element};
pub use error::{MkvError, Result};
pub use info::SegmentInfo;
pub use reader::{MkvReader, SliceReader};
pub use seekhead::{SeekEntry, SeekHead, VoidElement};
pub use segment::{ClusterRef, EntryRef, Segment};
pub use tracks::{ContentEncoding, Track, TrackInfo, Tracks};

/// Major version, for wire compatibility signalling.
pub const VERSION_MAJOR: i32 = 1;
/// Minor version.
pub const VERSION_MINOR: i32 = 0;
/// Build number.
pub const VERSION_BUILD: i32 = 0;
/// Revision number.
pub const VERSION_REVISION: i32 = 0;

/// The demuxer version as `(major, minor, build, revision)`.
pub fn version() -> (i32, i32, i32, i32) {
    (VERSION_MAJOR, VERSION_MINOR, VERSION_BUILD, VERSION_REVISION)
}

/// Quick probe for the EBML magic at the head of a buffer.
pub fn is_mkv_signature(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == [0x1A, 0x45, 0xDF, 0xA3]
}
