//! RTP packet scratch buffer and per-session clock state.
//!
//! RTP Fixed Header (RFC 3550 §5.1):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! One [`RtpPacket`] scratch buffer is shared by every session: the
//! packetizer fills it once per fragment with the sequence and timestamp
//! fields zeroed, and each receiving session patches its own values in
//! before sending. The buffer always carries the 4-byte `$`-framing prefix
//! used by interleaved delivery (RFC 2326 §10.12); UDP senders skip it.

/// Size of the fixed RTP header in bytes.
pub const RTP_HEADER_SIZE: usize = 12;

/// Size of the interleaved framing prefix in bytes.
pub const INTERLEAVE_PREFIX_SIZE: usize = 4;

/// Media clock rate for video payloads, in Hz.
pub const RTP_CLOCK_HZ: u32 = 90_000;

/// Channel number for interleaved RTP on the control connection.
const INTERLEAVE_CHANNEL: u8 = 0;

/// Frame gaps above this advance the media clock by the nominal interval
/// instead, so a stall or clock rollover cannot produce a timestamp jump.
const MAX_FRAME_GAP_MS: u64 = 1000;

/// Scratch capacity; covers the largest fragment this library builds.
const SCRATCH_SIZE: usize = 1536;

/// Reusable packet scratch buffer.
///
/// Layout: 4-byte interleave prefix, 12-byte RTP header, payload. `len`
/// counts the RTP bytes only, excluding the prefix.
#[derive(Debug)]
pub struct RtpPacket {
    pub(crate) buf: [u8; SCRATCH_SIZE],
    pub(crate) len: usize,
    pub(crate) last_fragment: bool,
}

impl RtpPacket {
    pub fn new() -> Self {
        RtpPacket {
            buf: [0u8; SCRATCH_SIZE],
            len: 0,
            last_fragment: false,
        }
    }

    /// The RTP packet bytes, without the framing prefix.
    pub fn rtp(&self) -> &[u8] {
        &self.buf[INTERLEAVE_PREFIX_SIZE..INTERLEAVE_PREFIX_SIZE + self.len]
    }

    /// The packet with its `$`-framing prefix, for interleaved delivery.
    pub fn interleaved(&self) -> &[u8] {
        &self.buf[..INTERLEAVE_PREFIX_SIZE + self.len]
    }

    /// RTP byte length of the current fragment.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no fragment.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the current fragment completes its frame.
    pub fn is_last_fragment(&self) -> bool {
        self.last_fragment
    }

    /// Patch a session's sequence number into the header.
    pub fn set_sequence(&mut self, sequence: u16) {
        self.buf[6..8].copy_from_slice(&sequence.to_be_bytes());
    }

    /// Patch a session's media timestamp into the header.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.buf[8..12].copy_from_slice(&timestamp.to_be_bytes());
    }

    /// Write the framing prefix for a fragment of `rtp_len` bytes.
    pub(crate) fn write_prefix(&mut self, rtp_len: usize) {
        self.buf[0] = b'$';
        self.buf[1] = INTERLEAVE_CHANNEL;
        self.buf[2..4].copy_from_slice(&(rtp_len as u16).to_be_bytes());
    }
}

impl Default for RtpPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session RTP sequencing and media clock.
///
/// The sequence number advances by one for every fragment sent. The
/// timestamp advances only when a frame's last fragment goes out, by the
/// wall-clock time elapsed since the previous frame scaled to the 90 kHz
/// media clock, so all fragments of one frame share one timestamp.
#[derive(Debug, Default)]
pub struct RtpClock {
    sequence: u16,
    timestamp: u32,
    prev_frame_ms: Option<u64>,
}

impl RtpClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next fragment will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Media timestamp the next fragment will carry.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Take the sequence number for one fragment and advance it.
    pub fn step_sequence(&mut self) -> u16 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Advance the media clock at a last-fragment boundary.
    ///
    /// The first frame, a clock that ran backwards, and a gap longer than
    /// the rollover-protection bound all advance by `nominal_interval_ms`
    /// instead of the measured gap.
    pub fn advance_frame(&mut self, now_ms: u64, nominal_interval_ms: u64) {
        let delta_ms = match self.prev_frame_ms {
            Some(prev) if now_ms >= prev && now_ms - prev <= MAX_FRAME_GAP_MS => now_ms - prev,
            _ => nominal_interval_ms,
        };
        self.prev_frame_ms = Some(now_ms);
        self.timestamp = self
            .timestamp
            .wrapping_add((u64::from(RTP_CLOCK_HZ) * delta_ms / 1000) as u32);
    }
}
