//! Wire primitives for the mirror data stream.
//!
//! The peer sends a sequence of records over a single TCP connection.
//! Each record:
//! - header: 128 bytes, zero-padded, multi-byte fields big-endian
//!   - payload_size: i32 at offset 0 (byte length of the payload that follows)
//!   - type/option lead: u16 at offset 4 (low byte = record kind)
//!   - payload_option: u16 at offset 6 (meaning depends on the kind)
//!   - timestamp: u64 at offset 8 (video records; 32.32 fixed-point ticks)
//!   - frame dimensions: f32 at offsets 40/44/56/60 (codec-config records)
//! - payload: [u8; payload_size]
//!
//! Video payloads carry length-prefixed NAL units; [`rewrite_nal_lengths`]
//! turns them into an Annex-B byte stream in place. Codec-config payloads
//! carry an H.264 parameter-set record ([`parse_parameter_sets`]).

use std::io::{self, Read};

/// Fixed record header size; every record starts with this many bytes.
pub const HEADER_LEN: usize = 128;

/// Bytes examined before committing to a binary record header.
pub const PREFIX_LEN: usize = 4;

/// Parameter-set records with SPS + PPS at or above this size are dropped.
pub const MAX_PARAMETER_SET_BYTES: usize = 102_400;

/// Annex-B start code prepended to every NAL unit.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Record classification from the low byte of the header type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Encrypted H.264 access unit.
    Video,
    /// Plaintext codec configuration (SPS/PPS parameter sets).
    CodecConfig,
    /// Heartbeat/signaling records; payload is drained and discarded.
    Other(u8),
}

impl RecordKind {
    pub fn from_type_byte(b: u8) -> Self {
        match b {
            0 => RecordKind::Video,
            1 => RecordKind::CodecConfig,
            other => RecordKind::Other(other),
        }
    }
}

/// Kind of a unit delivered to the consumer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Configuration = 0,
    AccessUnit = 1,
}

/// Decoded fixed header fields. The timestamp is only meaningful for
/// [`RecordKind::Video`] records.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub payload_size: usize,
    pub kind: RecordKind,
    pub option: u16,
    pub timestamp_raw: u64,
}

/// Source and destination frame dimensions from a codec-config header.
#[derive(Debug, Clone, Copy)]
pub struct FrameDimensions {
    pub source_width: f32,
    pub source_height: f32,
    pub width: f32,
    pub height: f32,
}

/// Rotation hint carried in the high byte of a codec-config option field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationHint {
    None,
    Deg90,
    Deg180,
    Deg270,
}

/// True if the first bytes of a record are an HTTP method rather than a
/// binary header (`POST` or `GET`); such records belong to the control plane.
pub fn is_http_prefix(prefix: &[u8; PREFIX_LEN]) -> bool {
    prefix == b"POST" || &prefix[..3] == b"GET"
}

/// Decode the fixed fields of a 128-byte record header.
pub fn parse_record_header(header: &[u8; HEADER_LEN]) -> io::Result<RecordHeader> {
    let payload_size = i32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if payload_size < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative payload size {payload_size}"),
        ));
    }

    let lead = u16::from_be_bytes([header[4], header[5]]);
    let option = u16::from_be_bytes([header[6], header[7]]);
    let timestamp_raw = u64::from_be_bytes([
        header[8], header[9], header[10], header[11], header[12], header[13], header[14], header[15],
    ]);

    Ok(RecordHeader {
        payload_size: payload_size as usize,
        kind: RecordKind::from_type_byte((lead & 0xff) as u8),
        option,
        timestamp_raw,
    })
}

/// Extract the frame-dimension floats from a codec-config header.
pub fn frame_dimensions(header: &[u8; HEADER_LEN]) -> FrameDimensions {
    FrameDimensions {
        source_width: f32::from_be_bytes([header[40], header[41], header[42], header[43]]),
        source_height: f32::from_be_bytes([header[44], header[45], header[46], header[47]]),
        width: f32::from_be_bytes([header[56], header[57], header[58], header[59]]),
        height: f32::from_be_bytes([header[60], header[61], header[62], header[63]]),
    }
}

/// Decode the rotation hint from a codec-config option field.
pub fn rotation_hint(option: u16) -> RotationHint {
    match option >> 8 {
        0 => RotationHint::None,
        4 => RotationHint::Deg90,
        7 => RotationHint::Deg270,
        _ => RotationHint::Deg180,
    }
}

/// Rewrite the 4-byte big-endian NAL length prefixes in `payload` into
/// Annex-B start codes, in place. The total length is unchanged.
///
/// Returns the number of rewritten units. Fails without delivering a partial
/// rewrite count if a length field is truncated, zero, or runs past the end
/// of the payload.
pub fn rewrite_nal_lengths(payload: &mut [u8]) -> io::Result<usize> {
    let mut cursor = 0usize;
    let mut units = 0usize;

    while cursor < payload.len() {
        if cursor + 4 > payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "truncated NAL length prefix",
            ));
        }
        let len = u32::from_be_bytes([
            payload[cursor],
            payload[cursor + 1],
            payload[cursor + 2],
            payload[cursor + 3],
        ]) as usize;
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "zero-length NAL unit"));
        }
        if cursor + 4 + len > payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("NAL length {len} runs past the payload"),
            ));
        }
        payload[cursor..cursor + 4].copy_from_slice(&START_CODE);
        cursor += 4 + len;
        units += 1;
    }

    Ok(units)
}

/// H.264 parameter-set record carried by codec-config payloads.
#[derive(Debug, Clone)]
pub struct ParameterSets {
    pub version: u8,
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    /// NAL length-field size in bytes (low two bits of the indicator, plus one).
    pub nal_length_size: u8,
    /// SPS count (low five bits of the indicator).
    pub sps_count: u8,
    pub sps: Vec<u8>,
    pub pps_count: u8,
    pub pps: Vec<u8>,
}

impl ParameterSets {
    /// Total SPS + PPS bytes, the quantity bounded by
    /// [`MAX_PARAMETER_SET_BYTES`].
    pub fn parameter_bytes(&self) -> usize {
        self.sps.len() + self.pps.len()
    }

    /// Synthesize the Annex-B configuration buffer:
    /// `00 00 00 01 <sps> 00 00 00 01 <pps>`.
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.parameter_bytes() + 2 * START_CODE.len());
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&self.sps);
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&self.pps);
        out
    }
}

/// Parse an H.264 parameter-set record from a codec-config payload.
///
/// Layout: version, profile, compatibility, level (1 byte each), NAL length
/// indicator, SPS count indicator, SPS length (u16 BE), SPS bytes, PPS count,
/// two PPS length bytes, PPS bytes.
pub fn parse_parameter_sets(payload: &[u8]) -> io::Result<ParameterSets> {
    if payload.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short parameter-set record"));
    }

    let sps_len = u16::from_be_bytes([payload[6], payload[7]]) as usize;
    let sps_end = 8 + sps_len;
    if payload.len() < sps_end + 3 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated SPS"));
    }

    // The sender encodes the PPS length with the high byte masked to its top
    // five bits and the sum folded to eight bits; decoded as transmitted.
    let b1 = payload[sps_end + 1] as u16;
    let b2 = payload[sps_end + 2] as u16;
    let pps_len = (((b1 & 2040) + b2) & 255) as usize;

    let pps_start = sps_end + 3;
    if payload.len() < pps_start + pps_len {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated PPS"));
    }

    Ok(ParameterSets {
        version: payload[0],
        profile: payload[1],
        compatibility: payload[2],
        level: payload[3],
        nal_length_size: (payload[4] & 0x03) + 1,
        sps_count: payload[5] & 0x1f,
        sps: payload[8..sps_end].to_vec(),
        pps_count: payload[sps_end],
        pps: payload[pps_start..pps_start + pps_len].to_vec(),
    })
}

/// Read a full record header from a stream, for callers that already know the
/// next bytes are a binary record. The framing engine reads headers
/// incrementally instead; this is the blocking convenience form.
pub fn read_record_header(mut r: impl Read) -> io::Result<RecordHeader> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)?;
    parse_record_header(&header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_header(payload_size: i32, type_byte: u8, option: u16, timestamp: u64) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[0..4].copy_from_slice(&payload_size.to_be_bytes());
        h[4..6].copy_from_slice(&(type_byte as u16).to_be_bytes());
        h[6..8].copy_from_slice(&option.to_be_bytes());
        h[8..16].copy_from_slice(&timestamp.to_be_bytes());
        h
    }

    #[test]
    fn header_roundtrip_video() {
        let h = make_header(4096, 0, 0, 0x1234_5678_9abc_def0);
        let rec = parse_record_header(&h).unwrap();
        assert_eq!(rec.payload_size, 4096);
        assert_eq!(rec.kind, RecordKind::Video);
        assert_eq!(rec.timestamp_raw, 0x1234_5678_9abc_def0);
    }

    #[test]
    fn header_masks_type_to_low_byte() {
        let mut h = make_header(16, 0, 0, 0);
        // High byte of the type field must not leak into the kind.
        h[4..6].copy_from_slice(&0x0701u16.to_be_bytes());
        let rec = parse_record_header(&h).unwrap();
        assert_eq!(rec.kind, RecordKind::CodecConfig);
    }

    #[test]
    fn header_rejects_negative_size() {
        let h = make_header(-1, 0, 0, 0);
        let err = parse_record_header(&h).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn header_unknown_kind_is_other() {
        let h = make_header(0, 2, 0, 0);
        assert_eq!(parse_record_header(&h).unwrap().kind, RecordKind::Other(2));
        let h = make_header(0, 4, 0, 0);
        assert_eq!(parse_record_header(&h).unwrap().kind, RecordKind::Other(4));
    }

    #[test]
    fn read_header_from_stream() {
        let h = make_header(99, 1, 0, 0);
        let rec = read_record_header(Cursor::new(h)).unwrap();
        assert_eq!(rec.payload_size, 99);
        assert_eq!(rec.kind, RecordKind::CodecConfig);
    }

    #[test]
    fn http_prefixes_detected() {
        assert!(is_http_prefix(b"POST"));
        assert!(is_http_prefix(b"GET "));
        assert!(is_http_prefix(b"GET/"));
        assert!(!is_http_prefix(b"PUT "));
        assert!(!is_http_prefix(&[0, 0, 0, 16]));
    }

    #[test]
    fn frame_dimensions_at_fixed_offsets() {
        let mut h = [0u8; HEADER_LEN];
        h[40..44].copy_from_slice(&1920f32.to_be_bytes());
        h[44..48].copy_from_slice(&1080f32.to_be_bytes());
        h[56..60].copy_from_slice(&1280f32.to_be_bytes());
        h[60..64].copy_from_slice(&720f32.to_be_bytes());
        let dims = frame_dimensions(&h);
        assert_eq!(dims.source_width, 1920.0);
        assert_eq!(dims.source_height, 1080.0);
        assert_eq!(dims.width, 1280.0);
        assert_eq!(dims.height, 720.0);
    }

    #[test]
    fn rotation_hint_from_option_high_byte() {
        assert_eq!(rotation_hint(0x0000), RotationHint::None);
        assert_eq!(rotation_hint(0x0400), RotationHint::Deg90);
        assert_eq!(rotation_hint(0x0700), RotationHint::Deg270);
        assert_eq!(rotation_hint(0x0100), RotationHint::Deg180);
    }

    fn length_prefixed(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn nal_rewrite_preserves_length_and_counts_units() {
        let mut payload = length_prefixed(&[&[0x65, 1, 2, 3], &[0x41, 9, 8]]);
        let before = payload.len();
        let units = rewrite_nal_lengths(&mut payload).unwrap();
        assert_eq!(units, 2);
        assert_eq!(payload.len(), before);
        assert_eq!(&payload[0..4], &START_CODE);
        assert_eq!(payload[4], 0x65);
        assert_eq!(&payload[8..12], &START_CODE);
        assert_eq!(payload[12], 0x41);
    }

    #[test]
    fn nal_rewrite_empty_payload_is_zero_units() {
        let mut payload: Vec<u8> = Vec::new();
        assert_eq!(rewrite_nal_lengths(&mut payload).unwrap(), 0);
    }

    #[test]
    fn nal_rewrite_rejects_overrunning_length() {
        let mut payload = vec![0, 0, 0, 10, 0xAA];
        let err = rewrite_nal_lengths(&mut payload).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn nal_rewrite_rejects_zero_length() {
        let mut payload = vec![0, 0, 0, 0, 0xAA, 0xBB, 0xCC, 0xDD];
        let err = rewrite_nal_lengths(&mut payload).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn nal_rewrite_rejects_truncated_prefix() {
        let mut payload = length_prefixed(&[&[0x65, 1, 2]]);
        payload.extend_from_slice(&[0, 0]); // dangling partial length field
        let err = rewrite_nal_lengths(&mut payload).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    fn make_paramset_payload(sps: &[u8], pps: &[u8]) -> Vec<u8> {
        let mut p = vec![
            1,    // version
            0x64, // profile
            0x00, // compatibility
            0x28, // level
            0xff, // NAL length indicator (4-byte lengths)
            0xe1, // SPS count indicator (1)
        ];
        p.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        p.extend_from_slice(sps);
        p.push(1); // PPS count
        p.push(0); // PPS length high byte
        p.push(pps.len() as u8);
        p.extend_from_slice(pps);
        p
    }

    #[test]
    fn paramsets_parse_and_synthesize_annex_b() {
        let sps = [0x67, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let pps = [0x68, 0xee, 0x38, 0x80];
        let params = parse_parameter_sets(&make_paramset_payload(&sps, &pps)).unwrap();

        assert_eq!(params.version, 1);
        assert_eq!(params.profile, 0x64);
        assert_eq!(params.level, 0x28);
        assert_eq!(params.nal_length_size, 4);
        assert_eq!(params.sps_count, 1);
        assert_eq!(params.sps, sps);
        assert_eq!(params.pps_count, 1);
        assert_eq!(params.pps, pps);

        let annex_b = params.to_annex_b();
        assert_eq!(annex_b.len(), sps.len() + pps.len() + 8);
        assert_eq!(&annex_b[0..4], &START_CODE);
        assert_eq!(&annex_b[4..14], &sps);
        assert_eq!(&annex_b[14..18], &START_CODE);
        assert_eq!(&annex_b[18..], &pps);
    }

    #[test]
    fn paramsets_pps_length_folds_high_byte() {
        // High length byte 0xFF masks to 0xF8; (0xF8 + 0x10) & 0xFF == 0x08.
        let sps = [0x67, 0xaa];
        let mut p = vec![1, 0x42, 0, 0x1e, 0xff, 0xe1];
        p.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        p.extend_from_slice(&sps);
        p.push(1);
        p.push(0xff);
        p.push(0x10);
        p.extend_from_slice(&[0x68; 8]);
        let params = parse_parameter_sets(&p).unwrap();
        assert_eq!(params.pps.len(), 8);
    }

    #[test]
    fn paramsets_reject_short_record() {
        let err = parse_parameter_sets(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn paramsets_reject_truncated_sps() {
        let mut p = make_paramset_payload(&[0x67; 10], &[0x68; 4]);
        p.truncate(12); // cuts into the SPS bytes
        let err = parse_parameter_sets(&p).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn paramsets_reject_truncated_pps() {
        let mut p = make_paramset_payload(&[0x67; 10], &[0x68; 4]);
        p.truncate(p.len() - 2);
        let err = parse_parameter_sets(&p).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn parameter_bound_catches_oversized_sets() {
        let params = ParameterSets {
            version: 1,
            profile: 0x42,
            compatibility: 0,
            level: 0x1e,
            nal_length_size: 4,
            sps_count: 1,
            sps: vec![0x67; 60_000],
            pps_count: 1,
            pps: vec![0x68; 50_000],
        };
        assert!(params.parameter_bytes() >= MAX_PARAMETER_SET_BYTES);
    }
}
