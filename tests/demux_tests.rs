//! End-to-end demuxing tests over hand-assembled byte streams.

use std::cell::Cell;

use mkv_demux::{
    elements, ClusterRef, EbmlHeader, EntryRef, MkvError, MkvReader, Result, Segment, SliceReader,
};

// =============================================================================
// Byte-stream builders
// =============================================================================

/// Assemble an element: ID + minimal size (1 or 2 bytes) + body.
fn element(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let id_bytes = id.to_be_bytes();
    let skip = id_bytes.iter().position(|&b| b != 0).unwrap_or(3);
    out.extend_from_slice(&id_bytes[skip..]);
    if body.len() < 127 {
        out.push(0x80 | body.len() as u8);
    } else {
        assert!(body.len() <= 0x3FFF);
        out.push(0x40 | (body.len() >> 8) as u8);
        out.push((body.len() & 0xFF) as u8);
    }
    out.extend_from_slice(body);
    out
}

/// Minimal big-endian encoding of an unsigned integer.
fn uint_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    bytes[skip..].to_vec()
}

fn webm_header() -> Vec<u8> {
    let body = element(elements::DOC_TYPE, b"webm");
    element(elements::EBML, &body)
}

fn info(timecode_scale: u64, duration_ticks: Option<f32>) -> Vec<u8> {
    let mut body = element(elements::TIMECODE_SCALE, &uint_bytes(timecode_scale));
    if let Some(d) = duration_ticks {
        body.extend_from_slice(&element(elements::DURATION, &d.to_bits().to_be_bytes()));
    }
    element(elements::INFO, &body)
}

fn track_entry(number: u8, track_type: u8) -> Vec<u8> {
    let mut body = element(elements::TRACK_NUMBER, &[number]);
    body.extend_from_slice(&element(elements::TRACK_TYPE, &[track_type]));
    element(elements::TRACK_ENTRY, &body)
}

fn tracks(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for e in entries {
        body.extend_from_slice(e);
    }
    element(elements::TRACKS, &body)
}

fn simple_block(track: u8, timecode: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0x80 | track];
    body.extend_from_slice(&timecode.to_be_bytes());
    body.push(flags);
    body.extend_from_slice(payload);
    element(elements::SIMPLE_BLOCK, &body)
}

fn cluster(timecode: u64, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut body = element(elements::TIMECODE, &uint_bytes(timecode));
    for b in blocks {
        body.extend_from_slice(b);
    }
    element(elements::CLUSTER, &body)
}

fn cue_point(timecode: u64, track: u8, cluster_pos: u64) -> Vec<u8> {
    let mut positions = element(elements::CUE_TRACK, &[track]);
    positions.extend_from_slice(&element(
        elements::CUE_CLUSTER_POSITION,
        &uint_bytes(cluster_pos),
    ));
    let mut body = element(elements::CUE_TIME, &uint_bytes(timecode));
    body.extend_from_slice(&element(elements::CUE_TRACK_POSITIONS, &positions));
    element(elements::CUE_POINT, &body)
}

/// EBML header + Segment around the given payload.
fn file(segment_payload: &[u8]) -> Vec<u8> {
    let mut data = webm_header();
    data.extend_from_slice(&element(elements::SEGMENT, segment_payload));
    data
}

/// The minimal one-cluster file of the keyframe `DE AD BE EF` scenario.
fn minimal_webm() -> Vec<u8> {
    let mut payload = info(1_000_000, Some(0.0));
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));
    payload.extend_from_slice(&cluster(
        0,
        &[simple_block(1, 0, 0x80, &[0xDE, 0xAD, 0xBE, 0xEF])],
    ));
    file(&payload)
}

// =============================================================================
// A source whose window grows on demand
// =============================================================================

/// Reader that reports an `available` window narrower than its backing data
/// and an unknown total until the window covers everything.
struct GrowingReader {
    data: Vec<u8>,
    available: Cell<u64>,
}

impl GrowingReader {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            available: Cell::new(0),
        }
    }

    fn grow(&self, n: u64) {
        let next = (self.available.get() + n).min(self.data.len() as u64);
        self.available.set(next);
    }
}

impl MkvReader for GrowingReader {
    fn read_into(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let end = pos as usize + buf.len();
        assert!(
            end as u64 <= self.available.get(),
            "parser read past the available window"
        );
        buf.copy_from_slice(&self.data[pos as usize..end]);
        Ok(())
    }

    fn length(&self) -> (Option<u64>, u64) {
        let available = self.available.get();
        let len = self.data.len() as u64;
        if available >= len {
            (Some(len), len)
        } else {
            (None, available)
        }
    }
}

/// Retry `op`, growing the window a byte per NeedBytes, counting the stalls.
fn drive<T>(reader: &GrowingReader, stalls: &mut u32, mut op: impl FnMut() -> Result<T>) -> T {
    loop {
        match op() {
            Ok(v) => return v,
            Err(e) if e.is_need_more() => {
                assert!(e.need_bytes().unwrap() > 0);
                *stalls += 1;
                reader.grow(1);
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}

// =============================================================================
// Scenario 1: empty EBML header
// =============================================================================

#[test]
fn empty_ebml_header_yields_defaults() {
    let reader = SliceReader::new(vec![0x1A, 0x45, 0xDF, 0xA3, 0x80]);
    let (header, next) = EbmlHeader::parse(&reader, 0).unwrap();

    assert_eq!(header.version, 1);
    assert_eq!(header.read_version, 1);
    assert_eq!(header.max_id_length, 4);
    assert_eq!(header.max_size_length, 8);
    assert_eq!(header.doc_type, "");
    assert_eq!(header.doc_type_version, 1);
    assert_eq!(header.doc_type_read_version, 1);

    // The Segment is expected to start right after.
    assert_eq!(next, 5);
}

// =============================================================================
// Scenario 2: minimal segment with one cluster and one SimpleBlock
// =============================================================================

#[test]
fn minimal_segment_one_simple_block() {
    let data = minimal_webm();
    assert!(mkv_demux::is_mkv_signature(&data));

    let reader = SliceReader::new(data.clone());
    let (header, _) = EbmlHeader::parse(&reader, 0).unwrap();
    assert!(header.is_webm());

    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    assert_eq!(segment.timecode_scale(), 1_000_000);
    assert_eq!(segment.duration_ns(), Some(0));
    assert_eq!(segment.count(), 1);

    let first = segment.first();
    assert_eq!(segment.cluster_time_ns(first), Some(0));

    let entry_ref = segment.first_entry().unwrap();
    let entry = segment.block_entry(entry_ref).unwrap();
    let block = entry.block();
    assert_eq!(block.track_number(), 1);
    assert!(block.is_key());
    assert_eq!(block.frame_count(), 1);

    let frame = block.frame(0).unwrap();
    assert_eq!(frame.len, 4);
    assert_eq!(
        frame.read(segment.reader()).unwrap(),
        vec![0xDE, 0xAD, 0xBE, 0xEF]
    );

    assert!(segment.next_entry(entry_ref).unwrap().is_eos());
}

// =============================================================================
// Scenario 3: fixed lacing
// =============================================================================

#[test]
fn fixed_lacing_divides_payload_evenly() {
    // 4 frames over 8 payload bytes (count byte 3, lacing bits 0b10).
    let mut laced = vec![3u8];
    laced.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));
    payload.extend_from_slice(&cluster(0, &[simple_block(1, 0, 0x04, &laced)]));

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    let entry_ref = segment.first_entry().unwrap();
    let block = segment.block_entry(entry_ref).unwrap().block();
    assert_eq!(block.frame_count(), 4);

    let mut total = 0;
    let mut prev_end = None;
    for frame in block.frames() {
        assert_eq!(frame.len, 2);
        if let Some(end) = prev_end {
            assert_eq!(frame.pos, end, "frames must not overlap");
        }
        prev_end = Some(frame.pos + frame.len);
        total += frame.len;
    }
    assert_eq!(total, 8);
}

#[test]
fn fixed_lacing_uneven_payload_is_invalid() {
    // The same block shape over 9 payload bytes cannot split into 4 frames.
    let mut laced = vec![3u8];
    laced.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);

    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));
    payload.extend_from_slice(&cluster(0, &[simple_block(1, 0, 0x04, &laced)]));

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    assert!(matches!(
        segment.first_entry(),
        Err(MkvError::InvalidLacing(_))
    ));
}

// =============================================================================
// Scenario 4: incremental delivery, byte by byte
// =============================================================================

#[test]
fn incremental_delivery_matches_all_at_once() {
    let data = minimal_webm();

    // All-at-once parse as the reference model.
    let reference = SliceReader::new(data.clone());
    let mut expected = Segment::create(&reference, 0).unwrap();
    expected.load().unwrap();
    let expected_entry = expected.first_entry().unwrap();
    let expected_frame = expected
        .block_entry(expected_entry)
        .unwrap()
        .block()
        .frame(0)
        .unwrap()
        .read(expected.reader())
        .unwrap();

    // Byte-by-byte delivery.
    let reader = GrowingReader::new(data);
    let mut stalls = 0u32;

    let mut segment = drive(&reader, &mut stalls, || Segment::create(&reader, 0));
    drive(&reader, &mut stalls, || segment.parse_headers());
    loop {
        let more = drive(&reader, &mut stalls, || segment.load_cluster());
        if !more {
            break;
        }
    }
    assert!(stalls > 0, "the growing window must have stalled the parser");

    // The incremental model equals the all-at-once model.
    assert_eq!(segment.count(), expected.count());
    assert_eq!(segment.timecode_scale(), expected.timecode_scale());
    assert_eq!(segment.duration_ns(), expected.duration_ns());
    assert_eq!(
        segment.tracks().unwrap().len(),
        expected.tracks().unwrap().len()
    );

    // Cluster bodies and frame bytes may still lie beyond the window;
    // materializing them stalls and retries the same way.
    let entry_ref = drive(&reader, &mut stalls, || segment.first_entry());
    assert_eq!(entry_ref, expected_entry);

    let frame_bytes = drive(&reader, &mut stalls, || {
        let block = segment.block_entry(entry_ref).unwrap().block();
        block.frame(0).unwrap().read(&reader)
    });
    assert_eq!(frame_bytes, expected_frame);

    let block = segment.block_entry(entry_ref).unwrap().block();
    assert_eq!(block.track_number(), 1);
    assert!(block.is_key());
}

// =============================================================================
// Scenario 5: seeking through the Cues index
// =============================================================================

/// Two clusters at 0 ms and 1000 ms plus a Cues table recording both.
/// Returns the file bytes and the two cluster offsets (segment-relative).
fn two_cluster_file_with_cues() -> (Vec<u8>, u64, u64) {
    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));

    let c1 = cluster(0, &[simple_block(1, 0, 0x80, &[0x01])]);
    let c2 = cluster(1000, &[simple_block(1, 0, 0x80, &[0x02])]);

    let c1_off = payload.len() as u64;
    payload.extend_from_slice(&c1);
    let c2_off = payload.len() as u64;
    payload.extend_from_slice(&c2);

    let mut cues_body = cue_point(0, 1, c1_off);
    cues_body.extend_from_slice(&cue_point(1000, 1, c2_off));
    payload.extend_from_slice(&element(elements::CUES, &cues_body));

    (file(&payload), c1_off, c2_off)
}

#[test]
fn cues_find_lower_bound_and_get_block() {
    let (data, c1_off, c2_off) = two_cluster_file_with_cues();
    let reader = SliceReader::new(data);
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();
    assert!(segment.cues().is_some());

    // Halfway between the cues: the cue at time 0 wins.
    let (index, position) = segment.find_cue(500_000_000, 1).unwrap().unwrap();
    assert_eq!(position.cluster_pos, c1_off);
    let scale = segment.timecode_scale();
    let cue = segment.cues().unwrap().point(index).unwrap();
    assert!(cue.time_ns(scale) <= 500_000_000);
    let successor = segment.cues().unwrap().next(index).unwrap();
    assert!(successor.time_ns(scale) > 500_000_000);

    let entry = segment.cue_block(&position).unwrap();
    assert_eq!(entry.cluster(), ClusterRef::At(c1_off));

    // Past both cues: the cue at 1000 ms wins, in the second cluster.
    let (_, position) = segment.find_cue(1_500_000_000, 1).unwrap().unwrap();
    assert_eq!(position.cluster_pos, c2_off);
    let entry = segment.cue_block(&position).unwrap();
    assert_eq!(entry.cluster(), ClusterRef::At(c2_off));
    assert_eq!(segment.entry_time_ns(entry), Some(1_000_000_000));
}

#[test]
fn seek_track_through_cues() {
    let (data, c1_off, c2_off) = two_cluster_file_with_cues();
    let reader = SliceReader::new(data);
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    let hit = segment.seek_track(1, 500_000_000).unwrap();
    assert_eq!(hit.cluster(), ClusterRef::At(c1_off));
    assert_eq!(segment.entry_time_ns(hit), Some(0));

    let hit = segment.seek_track(1, 1_500_000_000).unwrap();
    assert_eq!(hit.cluster(), ClusterRef::At(c2_off));
    assert_eq!(segment.entry_time_ns(hit), Some(1_000_000_000));
}

// =============================================================================
// Scenario 6: unknown cluster size
// =============================================================================

#[test]
fn unknown_size_cluster_fixed_by_next_top_level_id() {
    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));

    // First cluster with an all-ones (unknown) size.
    let first_off = payload.len() as u64;
    payload.extend_from_slice(&elements::CLUSTER.to_be_bytes());
    payload.push(0xFF);
    payload.extend_from_slice(&element(elements::TIMECODE, &[0]));
    payload.extend_from_slice(&simple_block(1, 0, 0x80, &[0xAA, 0xBB]));
    let second_off = payload.len() as u64;
    payload.extend_from_slice(&cluster(500, &[simple_block(1, 0, 0x80, &[0xCC])]));

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    assert_eq!(segment.count(), 2);
    let first = segment.cluster(ClusterRef::At(first_off)).unwrap();
    // The size is fixed to the gap up to the next top-level element.
    assert_eq!(first.element_size(), Some(second_off - first_off));

    // Entries parsed before termination remain valid.
    assert_eq!(first.entry_count(), 1);
    assert_eq!(first.entry(0).unwrap().block().frame(0).unwrap().len, 2);

    let second = segment.cluster(ClusterRef::At(second_off)).unwrap();
    assert_eq!(second.index(), Some(1));
}

// =============================================================================
// Invariants
// =============================================================================

#[test]
fn loaded_clusters_are_ordered_and_contiguously_indexed() {
    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));
    for t in 0..4u64 {
        payload.extend_from_slice(&cluster(t * 10, &[simple_block(1, 0, 0x80, &[t as u8])]));
    }

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    assert_eq!(segment.count(), 4);
    let mut cref = segment.first();
    let mut prev_pos = None;
    for i in 0..4 {
        let cluster = segment.cluster(cref).unwrap();
        assert_eq!(cluster.index(), Some(i));
        if let Some(prev) = prev_pos {
            assert!(cluster.position() > prev);
        }
        prev_pos = Some(cluster.position());
        cref = segment.parse_next(cref).unwrap();
    }
    assert_eq!(cref, ClusterRef::Eos);
}

#[test]
fn entry_times_are_monotonic_and_bounded_by_cluster() {
    let blocks = [
        simple_block(1, 0, 0x80, &[0x01]),
        simple_block(1, 10, 0x00, &[0x02]),
        simple_block(1, 25, 0x00, &[0x03]),
    ];
    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(1, 1)]));
    payload.extend_from_slice(&cluster(100, &blocks));

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    // Materialize every entry.
    let mut entry = segment.first_entry().unwrap();
    let mut times = Vec::new();
    while let EntryRef::At { .. } = entry {
        times.push(segment.entry_time_ns(entry).unwrap());
        entry = segment.next_entry(entry).unwrap();
    }
    assert_eq!(times.len(), 3);
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    let scale = segment.timecode_scale();
    let cluster = segment.cluster(segment.first()).unwrap();
    let cluster_time = cluster.time_ns(scale).unwrap();
    let last_time = cluster.last_time_ns(scale).unwrap();
    for &t in &times {
        assert!(cluster_time <= t && t <= last_time);
    }
}

#[test]
fn audio_seek_returns_key_block_at_or_before_target() {
    let blocks = [
        simple_block(2, 0, 0x80, &[0x01]),  // key
        simple_block(2, 10, 0x00, &[0x02]), // not key
        simple_block(2, 20, 0x80, &[0x03]), // key
    ];
    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[track_entry(2, 2)]));
    payload.extend_from_slice(&cluster(0, &blocks));

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.load().unwrap();

    // The non-key block at 10 ms is not an admissible seek target.
    let hit = segment.seek_track(2, 15_000_000).unwrap();
    let block = segment.block_entry(hit).unwrap().block();
    assert!(block.is_key());
    assert_eq!(segment.entry_time_ns(hit), Some(0));

    let hit = segment.seek_track(2, 25_000_000).unwrap();
    let block = segment.block_entry(hit).unwrap().block();
    assert!(block.is_key());
    assert_eq!(segment.entry_time_ns(hit), Some(20_000_000));
}

#[test]
fn parse_headers_after_done_is_a_no_op() {
    let data = minimal_webm();
    let reader = SliceReader::new(data);
    let mut segment = Segment::create(&reader, 0).unwrap();

    segment.parse_headers().unwrap();
    let pos = segment.position();
    segment.parse_headers().unwrap();
    segment.parse_headers().unwrap();
    assert_eq!(segment.position(), pos);
}

#[test]
fn content_encodings_are_exposed_as_descriptors() {
    let mut encryption = element(elements::CONTENT_ENC_ALGO, &[5]);
    encryption.extend_from_slice(&element(elements::CONTENT_ENC_KEY_ID, &[9, 9]));
    let mut encoding = element(elements::CONTENT_ENCODING_TYPE, &[1]);
    encoding.extend_from_slice(&element(elements::CONTENT_ENCRYPTION, &encryption));
    let encodings = element(
        elements::CONTENT_ENCODINGS,
        &element(elements::CONTENT_ENCODING, &encoding),
    );

    let mut entry = element(elements::TRACK_NUMBER, &[1]);
    entry.extend_from_slice(&element(elements::TRACK_TYPE, &[1]));
    entry.extend_from_slice(&encodings);

    let mut payload = info(1_000_000, None);
    payload.extend_from_slice(&tracks(&[element(elements::TRACK_ENTRY, &entry)]));

    let reader = SliceReader::new(file(&payload));
    let mut segment = Segment::create(&reader, 0).unwrap();
    segment.parse_headers().unwrap();

    let track = segment.tracks().unwrap().by_number(1).unwrap();
    let encodings = &track.info().content_encodings;
    assert_eq!(encodings.len(), 1);
    assert_eq!(encodings[0].encoding_type, 1);
    assert_eq!(encodings[0].encryptions[0].algo, 5);
    assert_eq!(encodings[0].encryptions[0].key_id, vec![9, 9]);
}
