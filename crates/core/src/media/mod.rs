//! MJPEG packetization and RTP delivery state.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each JPEG frame is split into one or more RTP packets. Every packet
//! carries the 12-byte fixed header containing:
//!
//! - **Sequence number** (16-bit, wrapping) — for reordering and loss detection.
//! - **Timestamp** (32-bit) — 90 kHz media clock, shared by all fragments
//!   of one frame.
//! - **SSRC** (32-bit) — identifies the sender.
//! - **Marker bit** — set on the last fragment of a frame.
//!
//! Fragmentation follows [RFC 2435](https://tools.ietf.org/html/rfc2435):
//! the [`mjpeg`] module strips the JFIF headers down to the entropy-coded
//! scan and prefixes each fragment with the JPEG payload header, carrying
//! the quantization tables in band on the first fragment when the source
//! bitstream provides them.
//!
//! The same packed fragment is delivered to every streaming session;
//! [`rtp::RtpPacket`] exposes the two header fields that differ per
//! session (sequence number and timestamp) as in-place patches, so a frame
//! is packed once per cycle no matter how many sessions watch it.

pub mod mjpeg;
pub mod rtp;
