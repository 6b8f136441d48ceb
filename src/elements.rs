//! Matroska element definitions.
//!
//! Element IDs are in canonical VINT form (length marker retained), matching
//! how they appear on the wire and how [`crate::ebml::read_id`] returns them.

// =============================================================================
// EBML Header Elements
// =============================================================================

/// EBML Header element.
pub const EBML: u32 = 0x1A45DFA3;
/// EBML Version.
pub const EBML_VERSION: u32 = 0x4286;
/// EBML Read Version.
pub const EBML_READ_VERSION: u32 = 0x42F7;
/// EBML Max ID Length.
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
/// EBML Max Size Length.
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
/// EBML Doc Type.
pub const DOC_TYPE: u32 = 0x4282;
/// EBML Doc Type Version.
pub const DOC_TYPE_VERSION: u32 = 0x4287;
/// EBML Doc Type Read Version.
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// =============================================================================
// Segment and Meta Seek Information
// =============================================================================

/// Segment (the root container for all Matroska data).
pub const SEGMENT: u32 = 0x18538067;
/// SeekHead (index of top-level elements).
pub const SEEK_HEAD: u32 = 0x114D9B74;
/// Seek entry.
pub const SEEK: u32 = 0x4DBB;
/// Seek ID.
pub const SEEK_ID: u32 = 0x53AB;
/// Seek Position.
pub const SEEK_POSITION: u32 = 0x53AC;

// =============================================================================
// Segment Information
// =============================================================================

/// Segment Info.
pub const INFO: u32 = 0x1549A966;
/// Timecode Scale (nanoseconds per tick, default 1000000 = 1ms).
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// Duration (in raw ticks, stored as a float).
pub const DURATION: u32 = 0x4489;
/// Title.
pub const TITLE: u32 = 0x7BA9;
/// Muxing App.
pub const MUXING_APP: u32 = 0x4D80;
/// Writing App.
pub const WRITING_APP: u32 = 0x5741;

// =============================================================================
// Cluster Elements
// =============================================================================

/// Cluster (contains blocks of media data).
pub const CLUSTER: u32 = 0x1F43B675;
/// Cluster Timecode (raw ticks).
pub const TIMECODE: u32 = 0xE7;
/// SimpleBlock.
pub const SIMPLE_BLOCK: u32 = 0xA3;
/// BlockGroup.
pub const BLOCK_GROUP: u32 = 0xA0;
/// Block.
pub const BLOCK: u32 = 0xA1;
/// Block Duration.
pub const BLOCK_DURATION: u32 = 0x9B;
/// Reference Block (signed timecode offset to a referenced block).
pub const REFERENCE_BLOCK: u32 = 0xFB;
/// Discard Padding.
pub const DISCARD_PADDING: u32 = 0x75A2;

// =============================================================================
// Track Elements
// =============================================================================

/// Tracks.
pub const TRACKS: u32 = 0x1654AE6B;
/// Track Entry.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Track Number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Track UID.
pub const TRACK_UID: u32 = 0x73C5;
/// Track Type.
pub const TRACK_TYPE: u32 = 0x83;
/// Flag Lacing.
pub const FLAG_LACING: u32 = 0x9C;
/// Name.
pub const NAME: u32 = 0x536E;
/// Language.
pub const LANGUAGE: u32 = 0x22B59C;
/// Codec ID.
pub const CODEC_ID: u32 = 0x86;
/// Codec Private.
pub const CODEC_PRIVATE: u32 = 0x63A2;
/// Codec Name.
pub const CODEC_NAME: u32 = 0x258688;

/// Video settings.
pub const VIDEO: u32 = 0xE0;
/// Pixel Width.
pub const PIXEL_WIDTH: u32 = 0xB0;
/// Pixel Height.
pub const PIXEL_HEIGHT: u32 = 0xBA;
/// Frame Rate (informational).
pub const FRAME_RATE: u32 = 0x2383E3;

/// Audio settings.
pub const AUDIO: u32 = 0xE1;
/// Sampling Frequency.
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
/// Channels.
pub const CHANNELS: u32 = 0x9F;
/// Bit Depth.
pub const BIT_DEPTH: u32 = 0x6264;

// =============================================================================
// Content Encoding (Compression/Encryption)
// =============================================================================

/// Content Encodings.
pub const CONTENT_ENCODINGS: u32 = 0x6D80;
/// Content Encoding.
pub const CONTENT_ENCODING: u32 = 0x6240;
/// Content Encoding Order.
pub const CONTENT_ENCODING_ORDER: u32 = 0x5031;
/// Content Encoding Scope.
pub const CONTENT_ENCODING_SCOPE: u32 = 0x5032;
/// Content Encoding Type.
pub const CONTENT_ENCODING_TYPE: u32 = 0x5033;
/// Content Compression.
pub const CONTENT_COMPRESSION: u32 = 0x5034;
/// Content Compression Algorithm.
pub const CONTENT_COMP_ALGO: u32 = 0x4254;
/// Content Compression Settings.
pub const CONTENT_COMP_SETTINGS: u32 = 0x4255;
/// Content Encryption.
pub const CONTENT_ENCRYPTION: u32 = 0x5035;
/// Content Encryption Algorithm.
pub const CONTENT_ENC_ALGO: u32 = 0x47E1;
/// Content Encryption Key ID.
pub const CONTENT_ENC_KEY_ID: u32 = 0x47E2;
/// Content Signature.
pub const CONTENT_SIGNATURE: u32 = 0x47E3;
/// Content Signature Key ID.
pub const CONTENT_SIG_KEY_ID: u32 = 0x47E4;
/// Content Signature Algorithm.
pub const CONTENT_SIG_ALGO: u32 = 0x47E5;
/// Content Signature Hash Algorithm.
pub const CONTENT_SIG_HASH_ALGO: u32 = 0x47E6;

// =============================================================================
// Cueing Data
// =============================================================================

/// Cues.
pub const CUES: u32 = 0x1C53BB6B;
/// Cue Point.
pub const CUE_POINT: u32 = 0xBB;
/// Cue Time (raw ticks).
pub const CUE_TIME: u32 = 0xB3;
/// Cue Track Positions.
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
/// Cue Track.
pub const CUE_TRACK: u32 = 0xF7;
/// Cue Cluster Position (relative to the segment payload).
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
/// Cue Block Number (1-based).
pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

// =============================================================================
// Skipped top-level elements, Void and CRC
// =============================================================================

/// Chapters (skipped).
pub const CHAPTERS: u32 = 0x1043A770;
/// Tags (skipped).
pub const TAGS: u32 = 0x1254C367;
/// Attachments (skipped).
pub const ATTACHMENTS: u32 = 0x1941A469;
/// Void (padding).
pub const VOID: u32 = 0xEC;
/// CRC-32.
pub const CRC32: u32 = 0xBF;

// =============================================================================
// Track Types
// =============================================================================

/// Track type: Video.
pub const TRACK_TYPE_VIDEO: u64 = 1;
/// Track type: Audio.
pub const TRACK_TYPE_AUDIO: u64 = 2;

/// True for IDs that only occur at segment level.
///
/// An unknown-size cluster is terminated by the first one of these observed
/// in its payload.
pub fn is_segment_level(id: u32) -> bool {
    matches!(
        id,
        SEGMENT | SEEK_HEAD | INFO | TRACKS | CUES | CLUSTER | CHAPTERS | TAGS | ATTACHMENTS
    )
}
