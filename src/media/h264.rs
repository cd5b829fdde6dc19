//! H.264/AVC NAL unit helpers
//!
//! The encoder hands the dispatcher Annex-B access units: NAL units separated
//! by start codes.
//!
//! ```text
//! +------------+-----------+------------+-----------+----
//! | 00 00 00 01| NAL (SPS) | 00 00 01   | NAL (PPS) | ...
//! +------------+-----------+------------+-----------+----
//! ```
//!
//! The NAL header is one byte; the lower 5 bits carry the unit type. Only
//! enough is parsed here to classify frames (keyframe or not) and to lift
//! parameter sets out of keyframe access units.

use bytes::{BufMut, Bytes, BytesMut};

/// Annex-B start code used when re-emitting NAL units
const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type
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

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// One NAL unit borrowed from an access unit (without start code)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nalu<'a> {
    data: &'a [u8],
}

impl<'a> Nalu<'a> {
    pub fn nalu_type(&self) -> Option<NaluType> {
        self.data.first().and_then(|b| NaluType::from_byte(*b))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Copy the unit out with a 4-byte start code prepended
    pub fn to_annexb(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(START_CODE.len() + self.data.len());
        out.put_slice(&START_CODE);
        out.put_slice(self.data);
        out.freeze()
    }
}

/// Iterator over NAL units of an Annex-B access unit
///
/// Accepts both 3-byte and 4-byte start codes. Data before the first start
/// code is ignored.
pub struct AnnexBNalus<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AnnexBNalus<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = find_start_code(data, 0).map_or(data.len(), |(_, end)| end);
        Self { data, offset }
    }
}

impl<'a> Iterator for AnnexBNalus<'a> {
    type Item = Nalu<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.data.len() {
            let start = self.offset;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.offset = next;

            // Trailing zero bytes belong to the next start code
            let mut end = end;
            while end > start && self.data[end - 1] == 0 {
                end -= 1;
            }
            if end > start {
                return Some(Nalu {
                    data: &self.data[start..end],
                });
            }
        }
        None
    }
}

/// Find the next `00 00 01` at or after `from`; returns (start, end) of the code
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    if data.len() < 3 {
        return None;
    }
    let mut i = from;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some((i, i + 3));
        }
        i += 1;
    }
    None
}

/// Parameter sets carried in front of an IDR slice
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
}

impl ParameterSets {
    /// Extract the SPS/PPS of an access unit (last one of each wins)
    pub fn extract(data: &[u8]) -> Self {
        let mut sets = ParameterSets::default();
        for nalu in AnnexBNalus::new(data) {
            match nalu.nalu_type() {
                Some(NaluType::Sps) => sets.sps = Some(nalu.to_annexb()),
                Some(NaluType::Pps) => sets.pps = Some(nalu.to_annexb()),
                _ => {}
            }
        }
        sets
    }

    pub fn is_empty(&self) -> bool {
        self.sps.is_none() && self.pps.is_none()
    }
}
