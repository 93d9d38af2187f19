use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Base of the per-slot server RTP port range.
pub const SERVER_RTP_PORT_BASE: u16 = 57000;

/// Client-requested transport, parsed from the `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;destination=...;client_port=8000-8001;server_port=57000-57001
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    /// RTP datagrams to the client's port pair.
    Udp {
        /// Client's RTP receive port.
        client_rtp_port: u16,
        /// Client's RTCP receive port (typically `client_rtp_port + 1`).
        client_rtcp_port: u16,
    },
    /// RTP framed with a `$`-prefix on the control connection
    /// (RFC 2326 §10.12).
    Interleaved,
}

impl TransportRequest {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// A `RTP/AVP/TCP` specifier selects interleaved delivery; otherwise
    /// the `client_port=RTP-RTCP` pair is required.
    ///
    /// ## Examples
    ///
    /// ```
    /// use camstream::session::transport::TransportRequest;
    ///
    /// let t = TransportRequest::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(
    ///     t,
    ///     TransportRequest::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 }
    /// );
    ///
    /// let t = TransportRequest::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
    /// assert_eq!(t, TransportRequest::Interleaved);
    ///
    /// assert!(TransportRequest::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        if header.contains("RTP/AVP/TCP") {
            return Some(TransportRequest::Interleaved);
        }
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = ports.split_once('-')?;
                return Some(TransportRequest::Udp {
                    client_rtp_port: rtp.parse().ok()?,
                    client_rtcp_port: rtcp.parse().ok()?,
                });
            }
        }
        None
    }
}

/// Negotiated media transport for one session.
#[derive(Debug)]
pub enum TransportMode {
    /// RTP datagrams from a server-bound socket to the client's RTP port.
    Udp {
        socket: UdpSocket,
        /// `client_ip:client_rtp_port`.
        dest: SocketAddr,
        /// Advertised server RTP port; the bound socket's local port.
        server_rtp_port: u16,
        /// Advertised server RTCP port; never bound, RTCP is not sent.
        server_rtcp_port: u16,
    },
    /// RTP rides the RTSP control connection with `$`-framing.
    Interleaved,
}

/// Server RTP/RTCP ports for a session slot.
///
/// Deterministic so a fixed firewall rule can cover the whole slot table:
/// slot `n` uses `base + 2n` and `base + 2n + 1`.
pub fn server_ports_for_slot(base: u16, slot: usize) -> (u16, u16) {
    let rtp = base + slot as u16 * 2;
    (rtp, rtp + 1)
}

/// Bind the non-blocking RTP sender socket on the advertised server port.
pub fn open_rtp_socket(server_rtp_port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", server_rtp_port))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}
