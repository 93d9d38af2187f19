use std::io::{self, Read};

use crate::error::{ParseErrorKind, StreamError};

/// Receive buffer size per session; RTSP requests from streaming clients
/// fit comfortably in a few hundred bytes.
pub const RECV_BUFFER_SIZE: usize = 384;

/// Fill level above which a request with no header terminator is rejected.
const MAX_HEADER_BYTES: usize = 380;

/// Shortest prefix worth examining ("PLAY " plus one byte of CRLF).
const MIN_REQUEST_BYTES: usize = 6;

/// RTSP methods this server implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Teardown,
}

impl Method {
    /// Match a method token, with its trailing space, at the start of a
    /// request line.
    fn from_line_start(line: &[u8]) -> Option<Method> {
        const TABLE: [(&[u8], Method); 5] = [
            (b"OPTIONS ", Method::Options),
            (b"DESCRIBE ", Method::Describe),
            (b"SETUP ", Method::Setup),
            (b"PLAY ", Method::Play),
            (b"TEARDOWN ", Method::Teardown),
        ];
        TABLE
            .iter()
            .find(|(token, _)| line.starts_with(token))
            .map(|&(_, method)| method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Teardown => "TEARDOWN",
        }
    }
}

/// Outcome of one receive poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// Nothing conclusive yet; poll again next cycle.
    Continue,
    /// A complete header block is buffered and the method is recognized.
    FullRequest,
    /// Disconnect, unrecognizable request line, or oversized header.
    BadRequest,
}

/// Recognition state for the buffered request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Unknown,
    MethodIdentified,
    Invalid,
}

/// Resumable, non-blocking RTSP request receiver.
///
/// Each poll appends whatever bytes the socket currently has and
/// re-examines the buffer, so a request spread across several TCP
/// segments is assembled over as many cycles as it takes. The buffer is
/// fixed; nothing here allocates.
#[derive(Debug)]
pub struct RecvBuffer {
    buf: [u8; RECV_BUFFER_SIZE],
    fill: usize,
    state: LineState,
    method: Option<Method>,
}

impl RecvBuffer {
    pub fn new() -> Self {
        RecvBuffer {
            buf: [0u8; RECV_BUFFER_SIZE],
            fill: 0,
            state: LineState::Unknown,
            method: None,
        }
    }

    /// Method of the buffered request, once recognized.
    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// The buffered request text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.buf[..self.fill]).ok()
    }

    /// Clear the buffer for the next request on the same connection.
    pub fn reset(&mut self) {
        self.fill = 0;
        self.state = LineState::Unknown;
        self.method = None;
    }

    /// Pull available bytes from `source` and re-evaluate the buffer.
    ///
    /// `Ok(0)` from the socket means the peer closed the connection;
    /// `WouldBlock` means no data arrived this cycle.
    pub fn poll<R: Read>(&mut self, source: &mut R) -> RecvOutcome {
        match source.read(&mut self.buf[self.fill..]) {
            Ok(0) => return RecvOutcome::BadRequest,
            Ok(n) => self.fill += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return RecvOutcome::Continue,
            Err(e) => {
                tracing::debug!(error = %e, "control socket read failed");
                return RecvOutcome::BadRequest;
            }
        }
        self.evaluate()
    }

    fn evaluate(&mut self) -> RecvOutcome {
        if self.fill < MIN_REQUEST_BYTES {
            return RecvOutcome::Continue;
        }

        if self.state == LineState::Unknown {
            self.recognize_method();
        }
        match self.state {
            LineState::Invalid => {
                tracing::warn!("unrecognized request line");
                return RecvOutcome::BadRequest;
            }
            LineState::Unknown => {
                return if self.fill > MAX_HEADER_BYTES {
                    RecvOutcome::BadRequest
                } else {
                    RecvOutcome::Continue
                };
            }
            LineState::MethodIdentified => {}
        }

        let complete = self.buf[..self.fill].windows(4).any(|w| w == b"\r\n\r\n");
        if complete {
            RecvOutcome::FullRequest
        } else if self.fill > MAX_HEADER_BYTES {
            tracing::warn!(fill = self.fill, "request header exceeds size ceiling");
            RecvOutcome::BadRequest
        } else {
            RecvOutcome::Continue
        }
    }

    /// Judge the request line once a complete line is buffered.
    fn recognize_method(&mut self) {
        let data = &self.buf[..self.fill];
        if !data.windows(2).any(|w| w == b"\r\n") {
            return;
        }
        // Tolerate one stray CRLF ahead of the request line.
        let start = if data.starts_with(b"\r\n") { 2 } else { 0 };
        match Method::from_line_start(&data[start..]) {
            Some(method) => {
                self.method = Some(method);
                self.state = LineState::MethodIdentified;
            }
            None => self.state = LineState::Invalid,
        }
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method token as received.
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/mjpeg/1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse an RTSP request from its text representation.
    ///
    /// Expects a complete request: request line, headers, and trailing blank
    /// line. Returns [`StreamError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        // Skip stray blank lines ahead of the request line, matching the
        // tolerance of the receive buffer.
        let request_line = lines
            .find(|line| !line.is_empty())
            .ok_or(StreamError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }
}

/// Extract the path component of a request URI, without its leading slash.
///
/// `rtsp://host:8554/mjpeg/1` and `/mjpeg/1` both yield `mjpeg/1`.
pub fn uri_path(uri: &str) -> &str {
    let path = match uri.strip_prefix("rtsp://") {
        Some(after_scheme) => after_scheme
            .find('/')
            .map(|slash| &after_scheme[slash..])
            .unwrap_or(""),
        None => uri,
    };
    path.trim_start_matches('/')
}

/// Whether a request URI addresses the configured stream path, directly or
/// through the track control segment SETUP appends.
pub fn matches_stream_path(uri: &str, stream_path: &str) -> bool {
    match uri_path(uri).strip_prefix(stream_path) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // --- incremental receive ---

    /// Feeds scripted chunks, then reports `WouldBlock` forever.
    struct ChunkedSocket {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedSocket {
        fn new(chunks: &[&[u8]]) -> Self {
            ChunkedSocket {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            }
        }
    }

    impl Read for ChunkedSocket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        chunk.drain(..n);
                        self.chunks.push_front(chunk);
                    }
                    Ok(n)
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    #[test]
    fn no_data_keeps_waiting() {
        let mut recv = RecvBuffer::new();
        let mut sock = ChunkedSocket::new(&[]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::Continue);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::Continue);
    }

    #[test]
    fn request_assembled_across_segments() {
        let mut recv = RecvBuffer::new();
        let mut sock = ChunkedSocket::new(&[
            b"OPTI",
            b"ONS rtsp://host/mjpeg/1 RTSP/1.0\r\nCSe",
            b"q: 2\r\n\r\n",
        ]);

        assert_eq!(recv.poll(&mut sock), RecvOutcome::Continue);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::Continue);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::FullRequest);
        assert_eq!(recv.method(), Some(Method::Options));

        let request = RtspRequest::parse(recv.as_str().unwrap()).unwrap();
        assert_eq!(request.cseq(), Some("2"));
    }

    #[test]
    fn single_segment_request_completes_immediately() {
        let mut recv = RecvBuffer::new();
        let mut sock =
            ChunkedSocket::new(&[b"TEARDOWN rtsp://host/mjpeg/1 RTSP/1.0\r\nCSeq: 9\r\n\r\n"]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::FullRequest);
        assert_eq!(recv.method(), Some(Method::Teardown));
    }

    #[test]
    fn unknown_method_is_rejected_once_line_is_complete() {
        let mut recv = RecvBuffer::new();
        let mut sock = ChunkedSocket::new(&[b"ANNOUNCE rtsp://host/mjpeg/1 RTSP/1.0\r\n"]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::BadRequest);
    }

    #[test]
    fn disconnect_is_a_bad_request() {
        let mut recv = RecvBuffer::new();
        let mut sock = ChunkedSocket::new(&[b""]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::BadRequest);
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut recv = RecvBuffer::new();
        let filler = [b'a'; 346];
        let mut sock = ChunkedSocket::new(&[
            b"DESCRIBE rtsp://host/mjpeg/1 RTSP/1.0\r\n",
            &filler,
        ]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::Continue);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::BadRequest);
    }

    #[test]
    fn leading_crlf_is_tolerated() {
        let mut recv = RecvBuffer::new();
        let mut sock = ChunkedSocket::new(&[b"\r\nPLAY rtsp://host/mjpeg/1 RTSP/1.0\r\n\r\n"]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::FullRequest);
        assert_eq!(recv.method(), Some(Method::Play));
    }

    #[test]
    fn reset_makes_room_for_the_next_request() {
        let mut recv = RecvBuffer::new();
        let mut sock = ChunkedSocket::new(&[
            b"OPTIONS rtsp://host/mjpeg/1 RTSP/1.0\r\n\r\n",
            b"SETUP rtsp://host/mjpeg/1 RTSP/1.0\r\n\r\n",
        ]);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::FullRequest);
        recv.reset();
        assert_eq!(recv.method(), None);
        assert_eq!(recv.poll(&mut sock), RecvOutcome::FullRequest);
        assert_eq!(recv.method(), Some(Method::Setup));
    }

    // --- request parsing ---

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/mjpeg/1 RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/mjpeg/1");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/mjpeg/1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
        assert!(RtspRequest::parse("\r\n\r\n").is_err());
    }

    #[test]
    fn parse_skips_leading_blank_line() {
        let raw = "\r\nPLAY rtsp://localhost/mjpeg/1 RTSP/1.0\r\nCSeq: 4\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "PLAY");
        assert_eq!(req.cseq(), Some("4"));
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    // --- stream path matching ---

    #[test]
    fn uri_path_strips_scheme_and_host() {
        assert_eq!(uri_path("rtsp://host:8554/mjpeg/1"), "mjpeg/1");
        assert_eq!(uri_path("/mjpeg/1"), "mjpeg/1");
        assert_eq!(uri_path("rtsp://host:8554"), "");
    }

    #[test]
    fn stream_path_accepts_track_suffix() {
        assert!(matches_stream_path("rtsp://h:8554/mjpeg/1", "mjpeg/1"));
        assert!(matches_stream_path(
            "rtsp://h:8554/mjpeg/1/trackID=1",
            "mjpeg/1"
        ));
    }

    #[test]
    fn stream_path_rejects_other_paths() {
        assert!(!matches_stream_path("rtsp://h:8554/other", "mjpeg/1"));
        assert!(!matches_stream_path("rtsp://h:8554/mjpeg/10", "mjpeg/1"));
        assert!(!matches_stream_path("rtsp://h:8554/", "mjpeg/1"));
    }
}
