//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol — receiving
//! and parsing requests, building responses, and generating SDP.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/mjpeg/1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Different methods: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN.
//! - Session header carries a server-assigned ID (RFC 2326 §12.37).
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | Retrieve SDP session description |
//! | SETUP | §10.4 | Negotiate transport (UDP ports or interleaved) |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Destroy session |
//!
//! Requests arrive on non-blocking sockets, so [`request::RecvBuffer`]
//! assembles each message incrementally across however many server cycles
//! its bytes take to arrive; only complete, recognized requests reach the
//! parser.

pub mod request;
pub mod response;
pub mod sdp;

pub use request::{Method, RecvBuffer, RecvOutcome, RtspRequest};
pub use response::RtspResponse;
