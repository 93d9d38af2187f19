//! MJPEG RTP packetization (RFC 2435).
//!
//! Each JPEG frame is split at a fixed fragment size and every fragment is
//! prefixed with an 8-byte JPEG payload header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! When the sender carries its quantization tables in band (Q >= 128,
//! RFC 2435 §3.1.8), the first fragment inserts a quantization table
//! sub-header between the JPEG header and the scan data. The payload
//! proper is the entropy-coded scan only; markers up to and including the
//! SOS header are stripped by [`parse_jpeg`] and reconstructed by the
//! receiver from the payload header fields.

use super::rtp::{INTERLEAVE_PREFIX_SIZE, RTP_HEADER_SIZE, RtpPacket};

/// Static RTP payload type for JPEG video (RFC 3551 Table 5).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

/// Size of the JPEG payload header in bytes.
pub const JPEG_HEADER_SIZE: usize = 8;

/// Largest payload slice carried per fragment; keeps every packet,
/// including the first fragment with its table sub-header, under a
/// 1500-byte MTU.
pub const MAX_FRAGMENT_SIZE: usize = 1300;

/// Bytes per quantization table at 8-bit precision.
const QUANT_TABLE_SIZE: usize = 64;

/// Quantization sub-header plus both tables (RFC 2435 §3.1.8).
const QUANT_BLOCK_SIZE: usize = 4 + 2 * QUANT_TABLE_SIZE;

/// Fixed SSRC stamped into every packet; one sender per server.
const SOURCE_ID: u32 = 0x13F9_7E67;

/// Q value signalling in-band tables on the first fragment.
const Q_TABLES_IN_BAND: u8 = 128;

/// Q value when no tables are carried; receivers synthesize tables of
/// roughly camera-default quality from it (RFC 2435 §4.2).
const Q_DEFAULT_QUALITY: u8 = 0x5E;

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_DQT: u8 = 0xDB;

/// Quantization tables lifted from a JFIF bitstream: two 64-byte 8-bit
/// tables, luminance then chrominance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantTables {
    pub luma: [u8; QUANT_TABLE_SIZE],
    pub chroma: [u8; QUANT_TABLE_SIZE],
}

/// A JFIF bitstream split for streaming.
#[derive(Debug)]
pub struct JpegScan<'a> {
    /// Entropy-coded bytes following the SOS header, through the EOI.
    pub scan: &'a [u8],
    /// Both tables when the bitstream carries them at 8-bit precision.
    pub tables: Option<QuantTables>,
}

/// Walk the JFIF marker structure to find the scan data and the
/// quantization tables.
///
/// Returns `None` when `data` is not a JFIF bitstream or has no SOS
/// segment. Tables at 16-bit precision (rare outside archival JPEG) are
/// skipped; the frame then streams with the default-quality Q value.
pub fn parse_jpeg(data: &[u8]) -> Option<JpegScan<'_>> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != MARKER_SOI {
        return None;
    }

    let mut luma: Option<[u8; QUANT_TABLE_SIZE]> = None;
    let mut chroma: Option<[u8; QUANT_TABLE_SIZE]> = None;
    let mut at = 2usize;

    while at + 4 <= data.len() {
        if data[at] != 0xFF {
            // Lost marker alignment.
            return None;
        }
        let marker = data[at + 1];
        match marker {
            // Fill bytes before a marker.
            0xFF => {
                at += 1;
                continue;
            }
            // Standalone markers with no length field.
            0x01 | MARKER_SOI | 0xD0..=0xD7 => {
                at += 2;
                continue;
            }
            MARKER_EOI => return None,
            _ => {}
        }

        let length = u16::from_be_bytes([data[at + 2], data[at + 3]]) as usize;
        if length < 2 || at + 2 + length > data.len() {
            return None;
        }

        match marker {
            MARKER_SOS => {
                let scan = &data[at + 2 + length..];
                let tables = match (luma, chroma) {
                    (Some(luma), Some(chroma)) => Some(QuantTables { luma, chroma }),
                    _ => None,
                };
                return Some(JpegScan { scan, tables });
            }
            MARKER_DQT => {
                // One DQT segment may hold several tables back to back.
                let mut entry = &data[at + 4..at + 2 + length];
                while entry.len() >= 1 + QUANT_TABLE_SIZE {
                    let precision = entry[0] >> 4;
                    let id = entry[0] & 0x0F;
                    if precision != 0 {
                        break;
                    }
                    let mut table = [0u8; QUANT_TABLE_SIZE];
                    table.copy_from_slice(&entry[1..1 + QUANT_TABLE_SIZE]);
                    match id {
                        0 => luma = Some(table),
                        1 => chroma = Some(table),
                        _ => {}
                    }
                    entry = &entry[1 + QUANT_TABLE_SIZE..];
                }
            }
            _ => {}
        }
        at += 2 + length;
    }

    None
}

/// Pack one fragment of `frame` into `packet`, starting at `offset`.
///
/// Builds the interleaved framing prefix, the RTP header with sequence and
/// timestamp zeroed for the sender to patch, the JPEG payload header, and
/// on fragment 0 with `tables` present the quantization sub-header.
/// Returns the offset of the next fragment, or 0 when this fragment
/// completed the frame.
pub fn pack_fragment(
    packet: &mut RtpPacket,
    frame: &[u8],
    offset: usize,
    tables: Option<&QuantTables>,
    width: u16,
    height: u16,
) -> usize {
    if offset >= frame.len() {
        packet.len = 0;
        packet.last_fragment = true;
        return 0;
    }

    let fragment_len = MAX_FRAGMENT_SIZE.min(frame.len() - offset);
    let last_fragment = offset + fragment_len == frame.len();
    let tables = if offset == 0 { tables } else { None };
    let q = if tables.is_some() {
        Q_TABLES_IN_BAND
    } else {
        Q_DEFAULT_QUALITY
    };

    let rtp_len = RTP_HEADER_SIZE
        + JPEG_HEADER_SIZE
        + tables.map_or(0, |_| QUANT_BLOCK_SIZE)
        + fragment_len;

    packet.write_prefix(rtp_len);

    let buf = &mut packet.buf;
    buf[4] = 2 << 6;
    buf[5] = JPEG_PAYLOAD_TYPE | if last_fragment { 0x80 } else { 0 };
    buf[6..8].fill(0);
    buf[8..12].fill(0);
    buf[12..16].copy_from_slice(&SOURCE_ID.to_be_bytes());

    buf[16] = 0;
    buf[17..20].copy_from_slice(&(offset as u32).to_be_bytes()[1..]);
    buf[20] = 0;
    buf[21] = q;
    buf[22] = (width / 8) as u8;
    buf[23] = (height / 8) as u8;

    let mut payload_at = INTERLEAVE_PREFIX_SIZE + RTP_HEADER_SIZE + JPEG_HEADER_SIZE;
    if let Some(tables) = tables {
        buf[payload_at] = 0;
        buf[payload_at + 1] = 0;
        buf[payload_at + 2..payload_at + 4]
            .copy_from_slice(&(2 * QUANT_TABLE_SIZE as u16).to_be_bytes());
        buf[payload_at + 4..payload_at + 4 + QUANT_TABLE_SIZE].copy_from_slice(&tables.luma);
        buf[payload_at + 4 + QUANT_TABLE_SIZE..payload_at + QUANT_BLOCK_SIZE]
            .copy_from_slice(&tables.chroma);
        payload_at += QUANT_BLOCK_SIZE;
    }
    buf[payload_at..payload_at + fragment_len]
        .copy_from_slice(&frame[offset..offset + fragment_len]);

    packet.len = rtp_len;
    packet.last_fragment = last_fragment;

    if last_fragment { 0 } else { offset + fragment_len }
}
