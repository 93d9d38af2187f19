//! Per-client RTSP session state machine.
//!
//! A session is created when the server loop accepts a control connection
//! and occupies one session-table slot until it reaches a terminal state:
//!
//! ```text
//! accept           -> Connecting
//! PLAY             -> Streaming
//! TEARDOWN         -> Closed     (terminal)
//! protocol or transport failure -> Error (terminal)
//! ```
//!
//! `Closed` and `Error` are terminal; the server loop reaps those slots on
//! its next pass, which drops the control connection and any RTP socket.
//!
//! All I/O is non-blocking. Each server cycle calls `service` once, which
//! pulls whatever bytes the socket has into the resumable request receiver
//! and dispatches complete requests immediately. Media leaves through
//! `send_fragment`, which patches the session's own sequence number and
//! timestamp into the shared scratch packet before sending.

pub mod transport;

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};

use rand::RngExt;

use crate::media::rtp::{RtpClock, RtpPacket};
use crate::protocol::request::{self, Method, RecvBuffer, RecvOutcome, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::StreamInfo;
use transport::{TransportMode, TransportRequest};

/// Advertised keepalive window in the `Session` header (RFC 2326 §12.37).
pub const SESSION_TIMEOUT_SECS: u64 = 60;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Control connection accepted; no media flowing yet.
    Connecting,
    /// PLAY succeeded; this session receives fragments every frame cycle.
    Streaming,
    /// Media delivery suspended.
    Paused,
    /// TEARDOWN completed. Terminal.
    Closed,
    /// Protocol violation or transport failure. Terminal.
    Error,
}

/// One client's RTSP exchange and media delivery state.
pub struct Session {
    control: TcpStream,
    peer: SocketAddr,
    slot: usize,
    state: SessionState,
    recv: RecvBuffer,
    authorized: bool,
    session_id: Option<u32>,
    cseq: u32,
    transport: Option<TransportMode>,
    clock: RtpClock,
}

impl Session {
    /// Adopt an accepted, non-blocking control connection.
    pub(crate) fn new(control: TcpStream, peer: SocketAddr, slot: usize, info: &StreamInfo) -> Self {
        Session {
            control,
            peer,
            slot,
            state: SessionState::Connecting,
            recv: RecvBuffer::new(),
            // With no credential configured, every client is authorized.
            authorized: info.auth_token.is_empty(),
            session_id: None,
            cseq: 0,
            transport: None,
            clock: RtpClock::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Whether the slot should be reaped.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Closed | SessionState::Error)
    }

    /// One protocol-engine pass: pull bytes, dispatch when a request is
    /// complete, transition state.
    pub(crate) fn service(&mut self, info: &StreamInfo) {
        match self.recv.poll(&mut self.control) {
            RecvOutcome::Continue => {}
            RecvOutcome::BadRequest => {
                tracing::warn!(peer = %self.peer, "unrecoverable request, closing session");
                self.send_response(RtspResponse::bad_request().cseq(self.cseq));
                self.state = SessionState::Error;
            }
            RecvOutcome::FullRequest => {
                self.dispatch(info);
                self.recv.reset();
            }
        }
    }

    fn dispatch(&mut self, info: &StreamInfo) {
        let Some(method) = self.recv.method() else {
            self.fail(RtspResponse::bad_request());
            return;
        };
        let request = match self.recv.as_str().map(RtspRequest::parse) {
            Some(Ok(request)) => request,
            _ => {
                tracing::warn!(peer = %self.peer, "malformed request");
                self.fail(RtspResponse::bad_request());
                return;
            }
        };

        tracing::debug!(
            peer = %self.peer,
            method = method.as_str(),
            uri = %request.uri,
            "request"
        );

        if !request::matches_stream_path(&request.uri, &info.suffix) {
            tracing::warn!(peer = %self.peer, uri = %request.uri, "request for unknown stream");
            self.fail(RtspResponse::not_found());
            return;
        }

        let Some(cseq) = request.cseq().and_then(|v| v.trim().parse::<u32>().ok()) else {
            tracing::warn!(peer = %self.peer, "missing or invalid CSeq");
            self.fail(RtspResponse::bad_request());
            return;
        };
        self.cseq = cseq;

        match method {
            Method::Options => self.handle_options(),
            Method::Describe => self.handle_describe(&request, info),
            Method::Setup => self.handle_setup(&request, info),
            Method::Play => self.handle_play(info),
            Method::Teardown => self.handle_teardown(),
        }
    }

    /// Answer a protocol violation and mark the session for teardown.
    fn fail(&mut self, response: RtspResponse) {
        self.send_response(response.cseq(self.cseq));
        self.state = SessionState::Error;
    }

    fn handle_options(&mut self) {
        self.send_response(
            RtspResponse::ok()
                .cseq(self.cseq)
                .add_header("Public", "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN"),
        );
    }

    fn handle_describe(&mut self, request: &RtspRequest, info: &StreamInfo) {
        let accepts_sdp = request
            .get_header("Accept")
            .is_some_and(|accept| accept.contains("application/sdp"));
        if !accepts_sdp {
            tracing::warn!(peer = %self.peer, "DESCRIBE does not accept application/sdp");
            self.fail(RtspResponse::bad_request());
            return;
        }

        if !info.auth_token.is_empty() {
            self.authorized = request
                .get_header("Authorization")
                .is_some_and(|value| value.contains(info.auth_token.as_str()));
            if !self.authorized {
                tracing::info!(peer = %self.peer, "DESCRIBE without valid credentials");
                // The session survives; the client may retry with credentials.
                self.send_response(RtspResponse::unauthorized().cseq(self.cseq));
                return;
            }
        }

        self.send_response(
            RtspResponse::ok()
                .cseq(self.cseq)
                .add_header("Content-Type", "application/sdp")
                .add_header("Content-Base", &info.url)
                .with_body(sdp::generate(info)),
        );
    }

    fn handle_setup(&mut self, request: &RtspRequest, info: &StreamInfo) {
        let Some(header) = request.get_header("Transport") else {
            tracing::warn!(peer = %self.peer, "SETUP without Transport header");
            self.fail(RtspResponse::bad_request());
            return;
        };
        let Some(requested) = TransportRequest::parse(header) else {
            tracing::warn!(peer = %self.peer, transport = header, "unusable Transport header");
            self.fail(RtspResponse::bad_request());
            return;
        };

        // The first SETUP names the session for the rest of the exchange.
        let session_id = *self
            .session_id
            .get_or_insert_with(|| rand::rng().random::<u32>());

        let reply_transport = match requested {
            TransportRequest::Interleaved => {
                self.transport = Some(TransportMode::Interleaved);
                tracing::info!(peer = %self.peer, session_id, "interleaved transport negotiated");
                "RTP/AVP/TCP;unicast;interleaved=0-1".to_string()
            }
            TransportRequest::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let (server_rtp_port, server_rtcp_port) =
                    transport::server_ports_for_slot(info.rtp_port_base, self.slot);
                let socket = match transport::open_rtp_socket(server_rtp_port) {
                    Ok(socket) => socket,
                    Err(e) => {
                        tracing::error!(
                            peer = %self.peer,
                            server_rtp_port,
                            error = %e,
                            "RTP socket bind failed"
                        );
                        self.fail(RtspResponse::internal_error());
                        return;
                    }
                };
                let dest = SocketAddr::new(self.peer.ip(), client_rtp_port);
                tracing::info!(
                    peer = %self.peer,
                    session_id,
                    rtp_dest = %dest,
                    server_rtp_port,
                    "UDP transport negotiated"
                );
                let value = format!(
                    "RTP/AVP;unicast;destination={};source={};client_port={}-{};server_port={}-{}",
                    self.peer.ip(),
                    info.host,
                    client_rtp_port,
                    client_rtcp_port,
                    server_rtp_port,
                    server_rtcp_port,
                );
                self.transport = Some(TransportMode::Udp {
                    socket,
                    dest,
                    server_rtp_port,
                    server_rtcp_port,
                });
                value
            }
        };

        self.send_response(
            RtspResponse::ok()
                .cseq(self.cseq)
                .add_header("Transport", &reply_transport)
                .add_header("Session", &self.session_header_value()),
        );
    }

    fn handle_play(&mut self, info: &StreamInfo) {
        if self.transport.is_none() {
            tracing::warn!(peer = %self.peer, "PLAY before SETUP");
            self.fail(RtspResponse::bad_request());
            return;
        }

        let rtp_info = format!(
            "url={}/trackID=1;seq={};rtptime={}",
            info.url,
            self.clock.sequence(),
            self.clock.timestamp(),
        );
        self.send_response(
            RtspResponse::ok()
                .cseq(self.cseq)
                .add_header("Range", "npt=0.000-")
                .add_header("Session", &self.session_header_value())
                .add_header("RTP-Info", &rtp_info),
        );
        self.state = SessionState::Streaming;
        tracing::info!(
            peer = %self.peer,
            session_id = self.session_id.unwrap_or(0),
            "session streaming"
        );
    }

    fn handle_teardown(&mut self) {
        self.send_response(
            RtspResponse::ok()
                .cseq(self.cseq)
                .add_header("Session", &self.session_header_value()),
        );
        self.state = SessionState::Closed;
        tracing::info!(
            peer = %self.peer,
            session_id = self.session_id.unwrap_or(0),
            "session closed by TEARDOWN"
        );
    }

    /// `Session` header value, e.g. `"1463459521;timeout=60"` (RFC 2326 §12.37).
    fn session_header_value(&self) -> String {
        format!(
            "{};timeout={}",
            self.session_id.unwrap_or(0),
            SESSION_TIMEOUT_SECS
        )
    }

    /// Single-shot, best-effort reply on the non-blocking control socket.
    fn send_response(&mut self, response: RtspResponse) {
        tracing::debug!(peer = %self.peer, status = response.status_code, "response");
        let bytes = response.serialize();
        match self.control.write(bytes.as_bytes()) {
            Ok(n) if n < bytes.len() => {
                tracing::warn!(peer = %self.peer, sent = n, total = bytes.len(), "short response write");
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::warn!(peer = %self.peer, "response send would block, dropped");
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "response send failed");
                self.state = SessionState::Error;
            }
        }
    }

    /// Send the scratch fragment to this session, patching the per-session
    /// sequence number and timestamp in first.
    ///
    /// Sequencing state moves only on a successful send: a fragment dropped
    /// by backpressure leaves the sequence number and media clock untouched.
    pub(crate) fn send_fragment(
        &mut self,
        packet: &mut RtpPacket,
        now_ms: u64,
        nominal_interval_ms: u64,
    ) {
        packet.set_sequence(self.clock.sequence());
        packet.set_timestamp(self.clock.timestamp());

        let result = match &self.transport {
            Some(TransportMode::Udp { socket, dest, .. }) => socket.send_to(packet.rtp(), *dest),
            Some(TransportMode::Interleaved) => self.control.write(packet.interleaved()),
            None => return,
        };

        match result {
            Ok(_) => {
                self.clock.step_sequence();
                if packet.is_last_fragment() {
                    self.clock.advance_frame(now_ms, nominal_interval_ms);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!(peer = %self.peer, "fragment dropped by backpressure");
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "fragment send failed, closing session");
                self.state = SessionState::Error;
            }
        }
    }
}
