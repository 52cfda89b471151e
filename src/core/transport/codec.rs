//! Codec preference selection and the G.711 codecs used for the audio track.

use std::fmt;

/// An audio codec the local media engine can negotiate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub payload_type: u8,
}

impl CodecCapability {
    pub fn new(mime_type: &str, clock_rate: u32, channels: u16, payload_type: u8) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            clock_rate,
            channels,
            payload_type,
        }
    }

    fn same_codec(&self, mime_type: &str) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime_type)
    }
}

/// Which advertised capability to put first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecSelection {
    /// Codec and clock rate both match
    Exact(usize),
    /// First capability with the same codec at another rate
    SameCodec(usize),
    /// Nothing matches; leave the platform's order alone
    PlatformDefault,
}

impl CodecSelection {
    pub fn index(self) -> Option<usize> {
        match self {
            CodecSelection::Exact(i) | CodecSelection::SameCodec(i) => Some(i),
            CodecSelection::PlatformDefault => None,
        }
    }
}

/// Pick the preferred codec from `capabilities`.
pub fn select_codec(
    capabilities: &[CodecCapability],
    target_mime_type: &str,
    target_clock_rate: u32,
) -> CodecSelection {
    if let Some(i) = capabilities
        .iter()
        .position(|c| c.same_codec(target_mime_type) && c.clock_rate == target_clock_rate)
    {
        return CodecSelection::Exact(i);
    }
    if let Some(i) = capabilities
        .iter()
        .position(|c| c.same_codec(target_mime_type))
    {
        return CodecSelection::SameCodec(i);
    }
    CodecSelection::PlatformDefault
}

/// Reorder `capabilities` so the selected entry comes first.
pub fn preference_order(
    capabilities: &[CodecCapability],
    selection: CodecSelection,
) -> Vec<CodecCapability> {
    let mut ordered = capabilities.to_vec();
    if let Some(i) = selection.index()
        && i < ordered.len()
    {
        let chosen = ordered.remove(i);
        ordered.insert(0, chosen);
    }
    ordered
}

// =============================================================================
// G.711
// =============================================================================

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;
const ALAW_SEGMENT_ENDS: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// G.711 companding laws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711 {
    /// μ-law, `audio/PCMU`
    Pcmu,
    /// A-law, `audio/PCMA`
    Pcma,
}

impl G711 {
    pub const PCMU_MIME: &'static str = "audio/PCMU";
    pub const PCMA_MIME: &'static str = "audio/PCMA";

    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        if mime_type.eq_ignore_ascii_case(Self::PCMU_MIME) {
            Some(G711::Pcmu)
        } else if mime_type.eq_ignore_ascii_case(Self::PCMA_MIME) {
            Some(G711::Pcma)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            G711::Pcmu => Self::PCMU_MIME,
            G711::Pcma => Self::PCMA_MIME,
        }
    }

    /// Static RTP payload type
    pub fn payload_type(self) -> u8 {
        match self {
            G711::Pcmu => 0,
            G711::Pcma => 8,
        }
    }

    pub fn encode(self, samples: &[i16]) -> Vec<u8> {
        match self {
            G711::Pcmu => samples.iter().map(|&s| linear_to_ulaw(s)).collect(),
            G711::Pcma => samples.iter().map(|&s| linear_to_alaw(s)).collect(),
        }
    }

    pub fn decode(self, payload: &[u8]) -> Vec<i16> {
        match self {
            G711::Pcmu => payload.iter().map(|&b| ulaw_to_linear(b)).collect(),
            G711::Pcma => payload.iter().map(|&b| alaw_to_linear(b)).collect(),
        }
    }
}

impl fmt::Display for G711 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };
    magnitude = magnitude.min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn linear_to_alaw(sample: i16) -> u8 {
    let mut pcm = (sample as i32) >> 3;
    let mask: i32 = if pcm >= 0 {
        0xD5
    } else {
        pcm = -pcm - 1;
        0x55
    };

    let segment = ALAW_SEGMENT_ENDS
        .iter()
        .position(|&end| pcm <= end)
        .unwrap_or(ALAW_SEGMENT_ENDS.len());
    if segment >= ALAW_SEGMENT_ENDS.len() {
        return (0x7F ^ mask) as u8;
    }

    let mut value = (segment as i32) << 4;
    if segment < 2 {
        value |= (pcm >> 1) & 0x0F;
    } else {
        value |= (pcm >> segment) & 0x0F;
    }
    (value ^ mask) as u8
}

pub fn alaw_to_linear(byte: u8) -> i16 {
    let value = (byte ^ 0x55) as i32;
    let mut magnitude = (value & 0x0F) << 4;
    let segment = (value & 0x70) >> 4;
    match segment {
        0 => magnitude += 8,
        1 => magnitude += 0x108,
        _ => {
            magnitude += 0x108;
            magnitude <<= segment - 1;
        }
    }
    if value & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}
