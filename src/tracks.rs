//! Track definitions.
//!
//! A TrackEntry is parsed into one of three variants over a shared
//! [`TrackInfo`]: video (type 1), audio (type 2), or anything else. Content
//! encodings (compression/encryption) are carried as descriptors only; the
//! demuxer never applies them.

use crate::block::Block;
use crate::ebml;
use crate::elements;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// Byte span of a sub-element, kept so callers can re-parse vendor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Absolute offset of the settings payload.
    pub start: u64,
    /// Payload size in bytes.
    pub size: u64,
}

/// A compression descriptor within a content encoding.
#[derive(Debug, Clone, Default)]
pub struct ContentCompression {
    /// Compression algorithm (0 = zlib, 3 = header stripping).
    pub algo: u64,
    /// Algorithm-private settings.
    pub settings: Vec<u8>,
}

/// An encryption descriptor within a content encoding.
#[derive(Debug, Clone, Default)]
pub struct ContentEncryption {
    /// Encryption algorithm (5 = AES).
    pub algo: u64,
    /// Key identifier.
    pub key_id: Vec<u8>,
    /// Signature of the encrypted data.
    pub signature: Vec<u8>,
    /// Identifier of the signing key.
    pub sig_key_id: Vec<u8>,
    /// Signature algorithm.
    pub sig_algo: u64,
    /// Signature hash algorithm.
    pub sig_hash_algo: u64,
}

/// One ContentEncoding descriptor: how a track's payload was transformed.
#[derive(Debug, Clone, Default)]
pub struct ContentEncoding {
    /// Order in which encodings were applied.
    pub encoding_order: u64,
    /// Which parts of the track the encoding applies to.
    pub encoding_scope: u64,
    /// 0 = compression, 1 = encryption.
    pub encoding_type: u64,
    /// Compression descriptors.
    pub compressions: Vec<ContentCompression>,
    /// Encryption descriptors.
    pub encryptions: Vec<ContentEncryption>,
}

impl ContentEncoding {
    fn parse<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<Self> {
        let stop = start + size;
        let mut encoding = ContentEncoding {
            encoding_scope: 1,
            ..Default::default()
        };

        let mut p = start;
        while p < stop {
            let child = ebml::read_element(reader, p, Some(stop))?;
            let csize = known(&child)?;

            match child.id {
                elements::CONTENT_ENCODING_ORDER => {
                    encoding.encoding_order =
                        ebml::unserialize_uint(reader, child.payload_start, csize)?;
                }
                elements::CONTENT_ENCODING_SCOPE => {
                    encoding.encoding_scope =
                        ebml::unserialize_uint(reader, child.payload_start, csize)?;
                }
                elements::CONTENT_ENCODING_TYPE => {
                    encoding.encoding_type =
                        ebml::unserialize_uint(reader, child.payload_start, csize)?;
                }
                elements::CONTENT_COMPRESSION => {
                    encoding.compressions.push(parse_compression(
                        reader,
                        child.payload_start,
                        csize,
                    )?);
                }
                elements::CONTENT_ENCRYPTION => {
                    encoding
                        .encryptions
                        .push(parse_encryption(reader, child.payload_start, csize)?);
                }
                _ => {}
            }

            p = child.payload_start + csize;
        }

        Ok(encoding)
    }
}

fn parse_compression<R: MkvReader>(
    reader: &R,
    start: u64,
    size: u64,
) -> Result<ContentCompression> {
    let stop = start + size;
    let mut compression = ContentCompression::default();

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = known(&child)?;
        match child.id {
            elements::CONTENT_COMP_ALGO => {
                compression.algo = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::CONTENT_COMP_SETTINGS => {
                compression.settings =
                    ebml::unserialize_bytes(reader, child.payload_start, csize)?;
            }
            _ => {}
        }
        p = child.payload_start + csize;
    }

    Ok(compression)
}

fn parse_encryption<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<ContentEncryption> {
    let stop = start + size;
    let mut encryption = ContentEncryption::default();

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = known(&child)?;
        match child.id {
            elements::CONTENT_ENC_ALGO => {
                encryption.algo = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::CONTENT_ENC_KEY_ID => {
                encryption.key_id = ebml::unserialize_bytes(reader, child.payload_start, csize)?;
            }
            elements::CONTENT_SIGNATURE => {
                encryption.signature =
                    ebml::unserialize_bytes(reader, child.payload_start, csize)?;
            }
            elements::CONTENT_SIG_KEY_ID => {
                encryption.sig_key_id =
                    ebml::unserialize_bytes(reader, child.payload_start, csize)?;
            }
            elements::CONTENT_SIG_ALGO => {
                encryption.sig_algo = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::CONTENT_SIG_HASH_ALGO => {
                encryption.sig_hash_algo =
                    ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            _ => {}
        }
        p = child.payload_start + csize;
    }

    Ok(encryption)
}

/// Fields shared by every track variant.
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    /// Raw track type (1 = video, 2 = audio).
    pub track_type: u64,
    /// Track number referenced by blocks (1-based).
    pub number: u64,
    /// Track UID.
    pub uid: u64,
    /// Human-readable track name.
    pub name: Option<String>,
    /// Language (ISO 639-2).
    pub language: Option<String>,
    /// Codec identifier (e.g. "V_VP9").
    pub codec_id: Option<String>,
    /// Human-readable codec name.
    pub codec_name: Option<String>,
    /// Codec-private initialization data.
    pub codec_private: Option<Vec<u8>>,
    /// Whether blocks of this track may use lacing.
    pub lacing: bool,
    /// Span of the Video/Audio settings sub-element, when present.
    pub settings: Option<Settings>,
    /// Content encoding descriptors, in file order.
    pub content_encodings: Vec<ContentEncoding>,
}

/// A track, discriminated by its type.
#[derive(Debug, Clone)]
pub enum Track {
    /// Video track (type 1).
    Video {
        /// Shared track fields.
        info: TrackInfo,
        /// Pixel width.
        width: u64,
        /// Pixel height.
        height: u64,
        /// Informational frame rate.
        frame_rate: Option<f64>,
    },
    /// Audio track (type 2).
    Audio {
        /// Shared track fields.
        info: TrackInfo,
        /// Sampling frequency in Hz.
        sampling_rate: f64,
        /// Channel count.
        channels: u64,
        /// Bits per sample.
        bit_depth: Option<u64>,
    },
    /// Any other track type.
    Other {
        /// Shared track fields.
        info: TrackInfo,
    },
}

impl Track {
    /// The shared track fields.
    pub fn info(&self) -> &TrackInfo {
        match self {
            Track::Video { info, .. } | Track::Audio { info, .. } | Track::Other { info } => info,
        }
    }

    /// Track number referenced by blocks.
    pub fn number(&self) -> u64 {
        self.info().number
    }

    /// Track UID.
    pub fn uid(&self) -> u64 {
        self.info().uid
    }

    /// Codec identifier.
    pub fn codec_id(&self) -> Option<&str> {
        self.info().codec_id.as_deref()
    }

    /// True for the video variant.
    pub fn is_video(&self) -> bool {
        matches!(self, Track::Video { .. })
    }

    /// True for the audio variant.
    pub fn is_audio(&self) -> bool {
        matches!(self, Track::Audio { .. })
    }

    /// Entry admission policy used when walking and seeking: the block must
    /// belong to this track, and audio tracks admit only key blocks.
    pub(crate) fn admits(&self, block: &Block) -> bool {
        if block.track_number() != self.number() {
            return false;
        }
        match self {
            Track::Audio { .. } => block.is_key(),
            _ => true,
        }
    }
}

#[derive(Default)]
struct VideoSettings {
    width: u64,
    height: u64,
    frame_rate: Option<f64>,
}

struct AudioSettings {
    sampling_rate: f64,
    channels: u64,
    bit_depth: Option<u64>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sampling_rate: 8000.0,
            channels: 1,
            bit_depth: None,
        }
    }
}

/// The segment's track table.
#[derive(Debug, Clone)]
pub struct Tracks {
    element_start: u64,
    element_size: u64,
    tracks: Vec<Track>,
}

impl Tracks {
    /// Parse a Tracks element body.
    pub(crate) fn parse<R: MkvReader>(reader: &R, el: &ebml::Element) -> Result<Tracks> {
        let size = known(el)?;
        let stop = el.payload_start + size;

        let mut tracks = Vec::new();
        let mut p = el.payload_start;
        while p < stop {
            let child = ebml::read_element(reader, p, Some(stop))?;
            let csize = known(&child)?;

            if child.id == elements::TRACK_ENTRY {
                tracks.push(parse_track_entry(reader, child.payload_start, csize)?);
            }

            p = child.payload_start + csize;
        }

        Ok(Tracks {
            element_start: el.element_start,
            element_size: el.element_size().expect("size checked above"),
            tracks,
        })
    }

    /// Absolute offset of the Tracks element.
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total size of the Tracks element.
    pub fn element_size(&self) -> u64 {
        self.element_size
    }

    /// Number of tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// True when the table holds no tracks.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// The `index`-th track in file order.
    pub fn by_index(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// The track with the given track number.
    pub fn by_number(&self, number: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.number() == number)
    }

    /// Iterate the tracks in file order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }
}

fn parse_track_entry<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<Track> {
    let stop = start + size;

    let mut info = TrackInfo {
        lacing: true,
        ..Default::default()
    };
    let mut video: Option<VideoSettings> = None;
    let mut audio: Option<AudioSettings> = None;

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = known(&child)?;

        match child.id {
            elements::TRACK_NUMBER => {
                info.number = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::TRACK_UID => {
                info.uid = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::TRACK_TYPE => {
                info.track_type = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::NAME => {
                info.name = Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
            }
            elements::LANGUAGE => {
                info.language =
                    Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
            }
            elements::CODEC_ID => {
                info.codec_id =
                    Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
            }
            elements::CODEC_NAME => {
                info.codec_name =
                    Some(ebml::unserialize_string(reader, child.payload_start, csize)?);
            }
            elements::CODEC_PRIVATE => {
                info.codec_private =
                    Some(ebml::unserialize_bytes(reader, child.payload_start, csize)?);
            }
            elements::FLAG_LACING => {
                info.lacing = ebml::unserialize_uint(reader, child.payload_start, csize)? != 0;
            }
            elements::VIDEO => {
                info.settings = Some(Settings {
                    start: child.payload_start,
                    size: csize,
                });
                video = Some(parse_video_settings(reader, child.payload_start, csize)?);
            }
            elements::AUDIO => {
                info.settings = Some(Settings {
                    start: child.payload_start,
                    size: csize,
                });
                audio = Some(parse_audio_settings(reader, child.payload_start, csize)?);
            }
            elements::CONTENT_ENCODINGS => {
                parse_content_encodings(reader, child.payload_start, csize, &mut info)?;
            }
            _ => {}
        }

        p = child.payload_start + csize;
    }

    if info.number == 0 {
        return Err(MkvError::InvalidStructure(
            "track entry without a track number".to_string(),
        ));
    }

    Ok(match info.track_type {
        elements::TRACK_TYPE_VIDEO => {
            let v = video.unwrap_or_default();
            Track::Video {
                info,
                width: v.width,
                height: v.height,
                frame_rate: v.frame_rate,
            }
        }
        elements::TRACK_TYPE_AUDIO => {
            let a = audio.unwrap_or_default();
            Track::Audio {
                info,
                sampling_rate: a.sampling_rate,
                channels: a.channels,
                bit_depth: a.bit_depth,
            }
        }
        _ => Track::Other { info },
    })
}

fn parse_video_settings<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<VideoSettings> {
    let stop = start + size;
    let mut video = VideoSettings::default();

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = known(&child)?;
        match child.id {
            elements::PIXEL_WIDTH => {
                video.width = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::PIXEL_HEIGHT => {
                video.height = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::FRAME_RATE => {
                video.frame_rate =
                    Some(ebml::unserialize_float(reader, child.payload_start, csize)?);
            }
            _ => {}
        }
        p = child.payload_start + csize;
    }

    Ok(video)
}

fn parse_audio_settings<R: MkvReader>(reader: &R, start: u64, size: u64) -> Result<AudioSettings> {
    let stop = start + size;
    let mut audio = AudioSettings::default();

    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = known(&child)?;
        match child.id {
            elements::SAMPLING_FREQUENCY => {
                audio.sampling_rate = ebml::unserialize_float(reader, child.payload_start, csize)?;
            }
            elements::CHANNELS => {
                audio.channels = ebml::unserialize_uint(reader, child.payload_start, csize)?;
            }
            elements::BIT_DEPTH => {
                audio.bit_depth =
                    Some(ebml::unserialize_uint(reader, child.payload_start, csize)?);
            }
            _ => {}
        }
        p = child.payload_start + csize;
    }

    Ok(audio)
}

fn parse_content_encodings<R: MkvReader>(
    reader: &R,
    start: u64,
    size: u64,
    info: &mut TrackInfo,
) -> Result<()> {
    let stop = start + size;
    let mut p = start;
    while p < stop {
        let child = ebml::read_element(reader, p, Some(stop))?;
        let csize = known(&child)?;
        if child.id == elements::CONTENT_ENCODING {
            info.content_encodings
                .push(ContentEncoding::parse(reader, child.payload_start, csize)?);
        }
        p = child.payload_start + csize;
    }
    Ok(())
}

fn known(el: &ebml::Element) -> Result<u64> {
    el.size.ok_or_else(|| MkvError::InvalidElementSize {
        offset: el.element_start,
        message: format!("element 0x{:X} has unknown size", el.id),
    })
}
