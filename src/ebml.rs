//! EBML (Extensible Binary Meta Language) parsing over a random-access reader.
//!
//! EBML is the binary framing underlying Matroska/WebM. Element IDs and sizes
//! are variable-length integers (VINTs) whose length is encoded in the leading
//! byte:
//!
//! - `1xxxxxxx`: 1 byte (7 data bits)
//! - `01xxxxxx xxxxxxxx`: 2 bytes (14 bits)
//! - `001xxxxx xxxxxxxx xxxxxxxx`: 3 bytes (21 bits)
//! - etc.
//!
//! IDs keep the marker bit (they are compared in canonical form); sizes clear
//! it, and an all-ones size payload means "unknown size". Every function here
//! takes absolute positions and leaves the caller's cursor untouched on a
//! short window, returning [`MkvError::NeedBytes`] instead.

use crate::elements;
use crate::error::{MkvError, Result};
use crate::reader::MkvReader;

/// Maximum VINT length in bytes.
pub const MAX_VINT_LENGTH: u64 = 8;

/// Maximum element ID length in bytes.
pub const MAX_ID_LENGTH: u64 = 4;

/// Check that `len` bytes at `pos` are inside the available window.
///
/// Returns [`MkvError::NeedBytes`] with the missing count when the window is
/// short, and a format error when the span runs past the known total length
/// (the source is truncated, so no amount of waiting will help).
pub(crate) fn require<R: MkvReader>(reader: &R, pos: u64, len: u64) -> Result<()> {
    let end = pos.checked_add(len).ok_or_else(|| MkvError::InvalidElementSize {
        offset: pos,
        message: "position overflow".to_string(),
    })?;

    let (total, available) = reader.length();
    if let Some(total) = total {
        if end > total {
            return Err(MkvError::InvalidElementSize {
                offset: pos,
                message: format!("{} bytes at {} run past end of source ({})", len, pos, total),
            });
        }
    }
    if end > available {
        return Err(MkvError::NeedBytes(end - available));
    }
    Ok(())
}

fn read_byte<R: MkvReader>(reader: &R, pos: u64) -> Result<u8> {
    require(reader, pos, 1)?;
    let mut buf = [0u8; 1];
    reader.read_into(pos, &mut buf)?;
    Ok(buf[0])
}

/// Read a VINT at `pos` with the length-marker bit cleared (sizes, uints).
///
/// Returns the decoded value and the number of bytes consumed.
pub fn read_vint<R: MkvReader>(reader: &R, pos: u64) -> Result<(u64, u64)> {
    let first = read_byte(reader, pos)?;
    if first == 0 {
        return Err(MkvError::InvalidVint { offset: pos });
    }

    let length = first.leading_zeros() as u64 + 1;
    debug_assert!(length <= MAX_VINT_LENGTH);
    require(reader, pos, length)?;

    let mask = (0xFFu32 >> length) as u8;
    let mut value = (first & mask) as u64;

    if length > 1 {
        let mut rest = [0u8; 7];
        let rest = &mut rest[..(length - 1) as usize];
        reader.read_into(pos + 1, rest)?;
        for &byte in rest.iter() {
            value = (value << 8) | byte as u64;
        }
    }

    Ok((value, length))
}

/// Read a VINT at `pos` as an element ID, marker bit retained.
pub fn read_id<R: MkvReader>(reader: &R, pos: u64) -> Result<(u32, u64)> {
    let first = read_byte(reader, pos)?;
    if first == 0 {
        return Err(MkvError::InvalidVint { offset: pos });
    }

    let length = first.leading_zeros() as u64 + 1;
    if length > MAX_ID_LENGTH {
        return Err(MkvError::InvalidElementId { offset: pos });
    }
    require(reader, pos, length)?;

    let mut value = first as u32;
    if length > 1 {
        let mut rest = [0u8; 3];
        let rest = &mut rest[..(length - 1) as usize];
        reader.read_into(pos + 1, rest)?;
        for &byte in rest.iter() {
            value = (value << 8) | byte as u32;
        }
    }

    Ok((value, length))
}

/// Read an element size at `pos`. `None` means unknown size (streamed).
pub fn read_size<R: MkvReader>(reader: &R, pos: u64) -> Result<(Option<u64>, u64)> {
    let (value, length) = read_vint(reader, pos)?;
    let unknown = (1u64 << (7 * length)) - 1;
    if value == unknown {
        Ok((None, length))
    } else {
        Ok((Some(value), length))
    }
}

/// Deserialize a big-endian unsigned integer body of 1..=8 bytes.
pub fn unserialize_uint<R: MkvReader>(reader: &R, pos: u64, size: u64) -> Result<u64> {
    if size == 0 || size > 8 {
        return Err(MkvError::InvalidElementSize {
            offset: pos,
            message: format!("unsigned integer of {} bytes", size),
        });
    }
    require(reader, pos, size)?;

    let mut buf = [0u8; 8];
    let buf = &mut buf[..size as usize];
    reader.read_into(pos, buf)?;

    let mut value = 0u64;
    for &byte in buf.iter() {
        value = (value << 8) | byte as u64;
    }
    Ok(value)
}

/// Deserialize a big-endian signed integer body of 1..=8 bytes,
/// sign-extended from the top bit of the first byte.
pub fn unserialize_int<R: MkvReader>(reader: &R, pos: u64, size: u64) -> Result<i64> {
    if size == 0 || size > 8 {
        return Err(MkvError::InvalidElementSize {
            offset: pos,
            message: format!("signed integer of {} bytes", size),
        });
    }
    require(reader, pos, size)?;

    let mut buf = [0u8; 8];
    let buf = &mut buf[..size as usize];
    reader.read_into(pos, buf)?;

    let mut value: i64 = if buf[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in buf.iter() {
        value = (value << 8) | byte as i64;
    }
    Ok(value)
}

/// Deserialize an IEEE 754 big-endian float body of 4 or 8 bytes.
pub fn unserialize_float<R: MkvReader>(reader: &R, pos: u64, size: u64) -> Result<f64> {
    match size {
        4 => {
            require(reader, pos, 4)?;
            let mut buf = [0u8; 4];
            reader.read_into(pos, &mut buf)?;
            Ok(f32::from_bits(u32::from_be_bytes(buf)) as f64)
        }
        8 => {
            require(reader, pos, 8)?;
            let mut buf = [0u8; 8];
            reader.read_into(pos, &mut buf)?;
            Ok(f64::from_bits(u64::from_be_bytes(buf)))
        }
        _ => Err(MkvError::InvalidElementSize {
            offset: pos,
            message: format!("float of {} bytes", size),
        }),
    }
}

/// Deserialize a UTF-8 string body, stripping a trailing NUL if present.
pub fn unserialize_string<R: MkvReader>(reader: &R, pos: u64, size: u64) -> Result<String> {
    let mut bytes = unserialize_bytes(reader, pos, size)?;
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8(bytes)
        .map_err(|e| MkvError::InvalidStructure(format!("invalid UTF-8 string: {}", e)))
}

/// Deserialize a binary body into an owned buffer.
pub fn unserialize_bytes<R: MkvReader>(reader: &R, pos: u64, size: u64) -> Result<Vec<u8>> {
    require(reader, pos, size)?;
    let mut buf = vec![0u8; size as usize];
    reader.read_into(pos, &mut buf)?;
    Ok(buf)
}

/// An EBML element header: ID, size, and where the body lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    /// Element ID in canonical VINT form.
    pub id: u32,
    /// Body size in bytes; `None` when unknown (streamed).
    pub size: Option<u64>,
    /// Absolute offset of the element (first byte of the ID).
    pub element_start: u64,
    /// Absolute offset of the body.
    pub payload_start: u64,
}

impl Element {
    /// Bytes consumed by the ID + size header.
    pub fn header_len(&self) -> u64 {
        self.payload_start - self.element_start
    }

    /// Absolute offset just past the body, when the size is known.
    pub fn payload_end(&self) -> Option<u64> {
        self.size.map(|s| self.payload_start + s)
    }

    /// Total element size (header + body), when the body size is known.
    pub fn element_size(&self) -> Option<u64> {
        self.size.map(|s| self.header_len() + s)
    }
}

/// Read the element header at `pos`.
///
/// When `stop` is given, a body extending beyond it is a format error.
pub fn read_element<R: MkvReader>(reader: &R, pos: u64, stop: Option<u64>) -> Result<Element> {
    if let Some(stop) = stop {
        if pos >= stop {
            return Err(MkvError::InvalidElementSize {
                offset: pos,
                message: "no room for an element header".to_string(),
            });
        }
    }

    let (id, id_len) = read_id(reader, pos)?;
    let (size, size_len) = read_size(reader, pos + id_len)?;
    let payload_start = pos + id_len + size_len;

    if let (Some(stop), Some(size)) = (stop, size) {
        if payload_start + size > stop {
            return Err(MkvError::InvalidElementSize {
                offset: pos,
                message: format!("element 0x{:X} overruns its container", id),
            });
        }
    }

    Ok(Element {
        id,
        size,
        element_start: pos,
        payload_start,
    })
}

fn peek_expected<R: MkvReader>(
    reader: &R,
    pos: u64,
    stop: u64,
    expected: u32,
) -> Result<Option<Element>> {
    if pos >= stop {
        return Ok(None);
    }
    let el = read_element(reader, pos, Some(stop))?;
    if el.id != expected {
        return Ok(None);
    }
    Ok(Some(el))
}

fn known_size(el: &Element) -> Result<u64> {
    el.size.ok_or_else(|| MkvError::InvalidElementSize {
        offset: el.element_start,
        message: format!("element 0x{:X} may not have unknown size", el.id),
    })
}

/// If the element at `*pos` has the expected ID, extract its unsigned integer
/// body and advance `*pos` past it; otherwise leave `*pos` untouched.
pub fn match_uint<R: MkvReader>(
    reader: &R,
    pos: &mut u64,
    stop: u64,
    expected: u32,
) -> Result<Option<u64>> {
    match peek_expected(reader, *pos, stop, expected)? {
        None => Ok(None),
        Some(el) => {
            let size = known_size(&el)?;
            let value = unserialize_uint(reader, el.payload_start, size)?;
            *pos = el.payload_start + size;
            Ok(Some(value))
        }
    }
}

/// Float-bodied counterpart of [`match_uint`].
pub fn match_float<R: MkvReader>(
    reader: &R,
    pos: &mut u64,
    stop: u64,
    expected: u32,
) -> Result<Option<f64>> {
    match peek_expected(reader, *pos, stop, expected)? {
        None => Ok(None),
        Some(el) => {
            let size = known_size(&el)?;
            let value = unserialize_float(reader, el.payload_start, size)?;
            *pos = el.payload_start + size;
            Ok(Some(value))
        }
    }
}

/// String-bodied counterpart of [`match_uint`].
pub fn match_string<R: MkvReader>(
    reader: &R,
    pos: &mut u64,
    stop: u64,
    expected: u32,
) -> Result<Option<String>> {
    match peek_expected(reader, *pos, stop, expected)? {
        None => Ok(None),
        Some(el) => {
            let size = known_size(&el)?;
            let value = unserialize_string(reader, el.payload_start, size)?;
            *pos = el.payload_start + size;
            Ok(Some(value))
        }
    }
}

/// Binary-bodied counterpart of [`match_uint`].
pub fn match_bytes<R: MkvReader>(
    reader: &R,
    pos: &mut u64,
    stop: u64,
    expected: u32,
) -> Result<Option<Vec<u8>>> {
    match peek_expected(reader, *pos, stop, expected)? {
        None => Ok(None),
        Some(el) => {
            let size = known_size(&el)?;
            let value = unserialize_bytes(reader, el.payload_start, size)?;
            *pos = el.payload_start + size;
            Ok(Some(value))
        }
    }
}

/// EBML document header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlHeader {
    /// EBML version.
    pub version: u64,
    /// EBML read version.
    pub read_version: u64,
    /// Maximum ID length.
    pub max_id_length: u64,
    /// Maximum size length.
    pub max_size_length: u64,
    /// Document type (e.g. "matroska" or "webm").
    pub doc_type: String,
    /// Document type version.
    pub doc_type_version: u64,
    /// Document type read version.
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        Self {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: String::new(),
            doc_type_version: 1,
            doc_type_read_version: 1,
        }
    }
}

impl EbmlHeader {
    /// Parse the EBML header at `pos`, skipping optional leading Void/CRC-32
    /// elements.
    ///
    /// Returns the header and the offset just past it (where the Segment
    /// search begins). Absent children take their defaults.
    pub fn parse<R: MkvReader>(reader: &R, pos: u64) -> Result<(EbmlHeader, u64)> {
        let mut pos = pos;
        let el = loop {
            let el = read_element(reader, pos, None)?;
            match el.id {
                elements::VOID | elements::CRC32 => {
                    pos = el.payload_end().ok_or_else(|| {
                        MkvError::InvalidEbmlHeader("unsized Void before EBML header".to_string())
                    })?;
                }
                elements::EBML => break el,
                other => {
                    return Err(MkvError::InvalidEbmlHeader(format!(
                        "expected EBML element, found id 0x{:X}",
                        other
                    )))
                }
            }
        };

        let size = el.size.ok_or_else(|| {
            MkvError::InvalidEbmlHeader("EBML header has unknown size".to_string())
        })?;
        let stop = el.payload_start + size;
        require(reader, el.payload_start, size)?;

        let mut header = EbmlHeader::default();
        let mut p = el.payload_start;
        while p < stop {
            if let Some(v) = match_uint(reader, &mut p, stop, elements::EBML_VERSION)? {
                header.version = v;
                continue;
            }
            if let Some(v) = match_uint(reader, &mut p, stop, elements::EBML_READ_VERSION)? {
                header.read_version = v;
                continue;
            }
            if let Some(v) = match_uint(reader, &mut p, stop, elements::EBML_MAX_ID_LENGTH)? {
                header.max_id_length = v;
                continue;
            }
            if let Some(v) = match_uint(reader, &mut p, stop, elements::EBML_MAX_SIZE_LENGTH)? {
                header.max_size_length = v;
                continue;
            }
            if let Some(v) = match_string(reader, &mut p, stop, elements::DOC_TYPE)? {
                header.doc_type = v;
                continue;
            }
            if let Some(v) = match_uint(reader, &mut p, stop, elements::DOC_TYPE_VERSION)? {
                header.doc_type_version = v;
                continue;
            }
            if let Some(v) = match_uint(reader, &mut p, stop, elements::DOC_TYPE_READ_VERSION)? {
                header.doc_type_read_version = v;
                continue;
            }

            // Unknown child: skip.
            let child = read_element(reader, p, Some(stop))?;
            p = child.payload_end().ok_or_else(|| {
                MkvError::InvalidEbmlHeader("unsized child in EBML header".to_string())
            })?;
        }

        Ok((header, stop))
    }

    /// True for a WebM document.
    pub fn is_webm(&self) -> bool {
        self.doc_type == "webm"
    }

    /// True for a Matroska document.
    pub fn is_matroska(&self) -> bool {
        self.doc_type == "matroska"
    }
}
