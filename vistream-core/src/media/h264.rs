//! H.264 bitstream reframing.
//!
//! Codecs hand back Annex-B byte streams: NAL units separated by
//! `00 00 01` or `00 00 00 01` start codes. Browser decoders want
//! the AVCC layout instead, configured once and then fed
//! length-prefixed access units:
//!
//! ```text
//! Annex-B:  00 00 00 01 | 67 .. (SPS) | 00 00 01 | 68 .. (PPS) | 00 00 01 | 65 .. (IDR)
//!                 │
//!                 ▼
//! config:   01 | profile | compat | level | FF | E1 | len16 SPS | 01 | len16 PPS
//! frame:    len32 | 65 ..
//! ```
//!
//! Parameter sets only travel in the configuration record, so they
//! are stripped from every per-frame access unit.

use bytes::{BufMut, Bytes, BytesMut};

/// Baseline profile triple used when the SPS is too short to carry one.
pub const FALLBACK_PROFILE: [u8; 3] = [0x42, 0x00, 0x1E];

// ── NaluType ─────────────────────────────────────────────────────

/// NAL unit type (low five bits of the unit header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    /// Type of a unit, read from its first byte.
    pub fn of(unit: &[u8]) -> Option<Self> {
        unit.first().and_then(|&b| Self::from_byte(b))
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

// ── Annex-B parsing ──────────────────────────────────────────────

/// Position of the next `00 00 01` at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|p| p + from)
}

/// Iterator over the NAL units of an Annex-B stream.
///
/// Yields unit payloads without their start codes. A 4-byte start
/// code is handled as a zero byte followed by a 3-byte one; trailing
/// zero bytes are trimmed from each unit so both forms parse alike.
/// Bytes before the first start code are ignored.
pub struct AnnexBUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_start_code(data, 0).map_or(data.len(), |p| p + 3);
        Self { data, pos }
    }
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            let (end, next) = match find_start_code(self.data, self.pos) {
                Some(p) => (p, p + 3),
                None => (self.data.len(), self.data.len()),
            };

            let mut unit = &self.data[self.pos..end];
            while let [rest @ .., 0] = unit {
                unit = rest;
            }
            self.pos = next;

            if !unit.is_empty() {
                return Some(unit);
            }
        }
        None
    }
}

/// Iterator over a 4-byte length-prefixed (AVCC) access unit.
///
/// Stops at the first truncated entry.
pub struct LengthPrefixedUnits<'a> {
    data: &'a [u8],
}

impl<'a> LengthPrefixedUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for LengthPrefixedUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let (len, rest) = self.data.split_first_chunk::<4>()?;
        let len = u32::from_be_bytes(*len) as usize;
        if rest.len() < len {
            self.data = &[];
            return None;
        }
        let (unit, tail) = rest.split_at(len);
        self.data = tail;
        Some(unit)
    }
}

// ── Reframing ────────────────────────────────────────────────────

/// Rewrite an Annex-B access unit as 4-byte big-endian length-prefixed
/// units, dropping SPS and PPS.
///
/// Returns an empty buffer when nothing but parameter sets (or nothing
/// at all) was present.
pub fn annex_b_to_length_prefixed(annex_b: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(annex_b.len() + 16);
    for unit in AnnexBUnits::new(annex_b) {
        if NaluType::of(unit).is_some_and(|t| t.is_parameter_set()) {
            continue;
        }
        out.put_u32(unit.len() as u32);
        out.put_slice(unit);
    }
    out.freeze()
}

/// Whether the Annex-B stream contains an IDR slice.
pub fn contains_keyframe(annex_b: &[u8]) -> bool {
    AnnexBUnits::new(annex_b).any(|u| NaluType::of(u).is_some_and(|t| t.is_keyframe()))
}

/// First SPS and first PPS found in an Annex-B stream.
pub fn parameter_sets(annex_b: &[u8]) -> (Option<&[u8]>, Option<&[u8]>) {
    let mut sps = None;
    let mut pps = None;
    for unit in AnnexBUnits::new(annex_b) {
        match NaluType::of(unit) {
            Some(NaluType::Sps) if sps.is_none() => sps = Some(unit),
            Some(NaluType::Pps) if pps.is_none() => pps = Some(unit),
            _ => {}
        }
        if sps.is_some() && pps.is_some() {
            break;
        }
    }
    (sps, pps)
}

// ── DecoderConfig ────────────────────────────────────────────────

/// Decoder configuration record handed to every new viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// The record bytes (AVCC layout unless `degraded`).
    pub record: Bytes,
    /// The codec extradata lacked an SPS or PPS; `record` holds the raw
    /// extradata and viewers may fail to configure.
    pub degraded: bool,
}

impl DecoderConfig {
    /// Derive the record from codec extradata.
    ///
    /// Extradata that already starts with the AVCC version byte `0x01`
    /// is passed through untouched.
    pub fn from_extradata(extradata: &[u8]) -> Self {
        if extradata.first() == Some(&0x01) {
            return Self {
                record: Bytes::copy_from_slice(extradata),
                degraded: false,
            };
        }

        match parameter_sets(extradata) {
            (Some(sps), Some(pps)) => Self {
                record: build_record(sps, pps),
                degraded: false,
            },
            _ => Self {
                record: Bytes::copy_from_slice(extradata),
                degraded: true,
            },
        }
    }

    /// Profile, compatibility and level bytes of the record.
    pub fn profile(&self) -> Option<[u8; 3]> {
        if self.degraded || self.record.len() < 4 {
            return None;
        }
        Some([self.record[1], self.record[2], self.record[3]])
    }
}

fn build_record(sps: &[u8], pps: &[u8]) -> Bytes {
    let profile = match sps {
        [_, p, c, l, ..] => [*p, *c, *l],
        _ => FALLBACK_PROFILE,
    };

    let mut out = BytesMut::with_capacity(11 + sps.len() + pps.len());
    out.put_u8(0x01);
    out.put_slice(&profile);
    // Reserved bits set, 4-byte length fields.
    out.put_u8(0xFF);
    // Reserved bits set, one SPS.
    out.put_u8(0xE1);
    out.put_u16(sps.len() as u16);
    out.put_slice(sps);
    out.put_u8(0x01);
    out.put_u16(pps.len() as u16);
    out.put_slice(pps);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

    fn annex_b(units: &[&[u8]], long_codes: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            if long_codes {
                out.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                out.extend_from_slice(&[0, 0, 1]);
            }
            out.extend_from_slice(unit);
        }
        out
    }

    // ── NaluType ─────────────────────────────────────────────────

    #[test]
    fn nalu_type_masks_header_bits() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x1F), None);
        assert!(NaluType::Idr.is_keyframe());
        assert!(NaluType::Sps.is_parameter_set());
        assert!(!NaluType::Slice.is_parameter_set());
    }

    // ── AnnexBUnits ──────────────────────────────────────────────

    #[test]
    fn splits_both_start_code_lengths() {
        let mut data = annex_b(&[SPS], true);
        data.extend_from_slice(&annex_b(&[PPS, &[0x65, 0x88, 0x84][..]], false));

        let units: Vec<&[u8]> = AnnexBUnits::new(&data).collect();
        assert_eq!(units, vec![SPS, PPS, &[0x65, 0x88, 0x84][..]]);
    }

    #[test]
    fn ignores_leading_garbage_and_empty_units() {
        let data = [0xAA, 0xBB, 0, 0, 1, 0, 0, 1, 0x41, 0x9A];
        let units: Vec<&[u8]> = AnnexBUnits::new(&data).collect();
        assert_eq!(units, vec![&[0x41, 0x9A][..]]);
    }

    #[test]
    fn no_start_code_yields_nothing() {
        assert_eq!(AnnexBUnits::new(&[0x65, 0x01, 0x02]).count(), 0);
        assert_eq!(AnnexBUnits::new(&[]).count(), 0);
    }

    // ── Reframing ────────────────────────────────────────────────

    #[test]
    fn reframe_strips_parameter_sets() {
        let idr: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x33];
        let sei: &[u8] = &[0x06, 0x05, 0x10];
        let data = annex_b(&[SPS, PPS, sei, idr], true);

        let out = annex_b_to_length_prefixed(&data);
        let units: Vec<&[u8]> = LengthPrefixedUnits::new(&out).collect();

        // Two non-parameter-set units in, two entries out.
        assert_eq!(units, vec![sei, idr]);
        let payload: usize = units.iter().map(|u| u.len()).sum();
        assert_eq!(payload, out.len() - 4 * units.len());
        assert!(units
            .iter()
            .all(|u| !NaluType::of(u).is_some_and(|t| t.is_parameter_set())));
    }

    #[test]
    fn reframe_uses_big_endian_lengths() {
        let slice = vec![0x41; 300];
        let out = annex_b_to_length_prefixed(&annex_b(&[&slice], false));
        assert_eq!(&out[..4], &[0x00, 0x00, 0x01, 0x2C]);
        assert_eq!(out.len(), 304);
    }

    #[test]
    fn reframe_of_parameter_sets_only_is_empty() {
        let out = annex_b_to_length_prefixed(&annex_b(&[SPS, PPS], true));
        assert!(out.is_empty());
    }

    #[test]
    fn keyframe_detection() {
        assert!(contains_keyframe(&annex_b(&[SPS, PPS, &[0x65, 0x01][..]], true)));
        assert!(!contains_keyframe(&annex_b(&[&[0x41, 0x01][..]], true)));
    }

    // ── DecoderConfig ────────────────────────────────────────────

    #[test]
    fn record_built_from_annex_b_extradata() {
        let cfg = DecoderConfig::from_extradata(&annex_b(&[SPS, PPS], true));
        assert!(!cfg.degraded);

        let r = &cfg.record;
        assert_eq!(r[0], 0x01);
        assert_eq!(&r[1..4], &SPS[1..4]);
        assert_eq!(r[4], 0xFF);
        // Exactly one SPS.
        assert_eq!(r[5], 0xE1);
        assert_eq!(u16::from_be_bytes([r[6], r[7]]) as usize, SPS.len());
        assert_eq!(&r[8..8 + SPS.len()], SPS);
        // Exactly one PPS.
        let p = 8 + SPS.len();
        assert_eq!(r[p], 0x01);
        assert_eq!(u16::from_be_bytes([r[p + 1], r[p + 2]]) as usize, PPS.len());
        assert_eq!(&r[p + 3..], PPS);
        assert_eq!(cfg.profile(), Some([0x42, 0xC0, 0x1F]));
    }

    #[test]
    fn short_sps_uses_baseline_profile() {
        let cfg = DecoderConfig::from_extradata(&annex_b(&[&[0x67, 0x42][..], PPS], false));
        assert!(!cfg.degraded);
        assert_eq!(&cfg.record[1..4], &FALLBACK_PROFILE);
    }

    #[test]
    fn avcc_extradata_passes_through() {
        let avcc = [0x01, 0x64, 0x00, 0x28, 0xFF, 0xE1, 0x00, 0x00, 0x01, 0x00, 0x00];
        let cfg = DecoderConfig::from_extradata(&avcc);
        assert!(!cfg.degraded);
        assert_eq!(&cfg.record[..], &avcc);
    }

    #[test]
    fn missing_pps_forwards_raw_extradata() {
        let raw = annex_b(&[SPS], true);
        let cfg = DecoderConfig::from_extradata(&raw);
        assert!(cfg.degraded);
        assert_eq!(&cfg.record[..], &raw[..]);
        assert_eq!(cfg.profile(), None);
    }
}
