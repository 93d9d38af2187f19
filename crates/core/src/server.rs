use std::io;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{Result, StreamError};
use crate::media::mjpeg;
use crate::media::rtp::RtpPacket;
use crate::pool::{FrameFormat, FramePool};
use crate::session::Session;
use crate::session::transport::SERVER_RTP_PORT_BASE;

/// Default cap on simultaneous control connections; excess connections
/// are closed at accept.
pub const MAX_SESSIONS: usize = 3;

/// Loop sleep while at least one session is connected.
const BUSY_CYCLE: Duration = Duration::from_millis(5);
/// Loop sleep with an empty session table.
const IDLE_CYCLE: Duration = Duration::from_millis(100);

/// Nominal delivery rates the pacing loop supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameRate {
    Fps5,
    #[default]
    Fps10,
    Fps20,
}

impl FrameRate {
    /// Nominal milliseconds between frames.
    pub fn interval_ms(self) -> u64 {
        match self {
            FrameRate::Fps5 => 200,
            FrameRate::Fps10 => 100,
            FrameRate::Fps20 => 50,
        }
    }
}

/// HTTP Basic credentials required by DESCRIBE when configured.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// The base64 token clients present in the `Authorization` header
    /// (RFC 2617 §2).
    fn token(&self) -> String {
        BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password))
    }
}

/// Stream and listener configuration supplied by the embedder.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address advertised in the stream URL, SDP and transport headers.
    pub host: String,
    /// RTSP listen port.
    pub port: u16,
    /// Path component of the stream URL, e.g. `mjpeg/1`.
    pub suffix: String,
    /// Advertised frame width in pixels.
    pub width: u16,
    /// Advertised frame height in pixels.
    pub height: u16,
    /// Nominal frame delivery rate.
    pub frame_rate: FrameRate,
    /// Base of the per-slot server RTP port range.
    pub rtp_port_base: u16,
    /// When set, DESCRIBE requires these credentials.
    pub credentials: Option<Credentials>,
    /// Concurrent session limit.
    pub max_sessions: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            host: "127.0.0.1".to_string(),
            port: 8554,
            suffix: "mjpeg/1".to_string(),
            width: 640,
            height: 480,
            frame_rate: FrameRate::default(),
            rtp_port_base: SERVER_RTP_PORT_BASE,
            credentials: None,
            max_sessions: MAX_SESSIONS,
        }
    }
}

/// Resolved stream description shared with every session.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Stream path without a leading slash.
    pub suffix: String,
    /// Full stream URL, `rtsp://host:port/suffix`.
    pub url: String,
    /// Advertised address for SDP and transport headers.
    pub host: String,
    pub width: u16,
    pub height: u16,
    /// Base of the per-slot server RTP port range.
    pub rtp_port_base: u16,
    /// Expected Basic token; empty when no credential is configured.
    pub auth_token: String,
}

impl StreamInfo {
    fn from_config(config: &StreamConfig) -> Self {
        StreamInfo {
            suffix: config.suffix.clone(),
            url: format!("rtsp://{}:{}/{}", config.host, config.port, config.suffix),
            host: config.host.clone(),
            width: config.width,
            height: config.height,
            rtp_port_base: config.rtp_port_base,
            auth_token: config
                .credentials
                .as_ref()
                .map(Credentials::token)
                .unwrap_or_default(),
        }
    }
}

/// Counters the server loop publishes for observers.
#[derive(Debug, Default)]
struct ServerStats {
    sessions: AtomicUsize,
    streaming: AtomicUsize,
    /// Outgoing bandwidth gauge in kbit/s, sampled per delivered frame.
    bandwidth_kbps: AtomicU32,
}

/// RTSP/MJPEG streaming server.
///
/// Owns the frame pool handle and spawns a single worker thread that runs
/// the whole server: accepting control connections, driving each session's
/// protocol engine, and fanning frame fragments out to streaming sessions
/// at the configured pace.
pub struct StreamServer {
    pool: FramePool,
    config: StreamConfig,
    running: Arc<AtomicBool>,
    stats: Arc<ServerStats>,
}

impl StreamServer {
    pub fn new(pool: FramePool, config: StreamConfig) -> Self {
        StreamServer {
            pool,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ServerStats::default()),
        }
    }

    /// Bind the control listener and spawn the server loop thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.config.port))?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let info = Arc::new(StreamInfo::from_config(&self.config));
        tracing::info!(url = %info.url, "RTSP server listening");

        let worker = ServerLoop {
            listener,
            pool: self.pool.clone(),
            info,
            running: self.running.clone(),
            stats: self.stats.clone(),
            sessions: (0..self.config.max_sessions.max(1)).map(|_| None).collect(),
            packet: RtpPacket::new(),
            nominal_interval_ms: self.config.frame_rate.interval_ms(),
            epoch: Instant::now(),
            last_frame_ms: 0,
        };
        thread::spawn(move || worker.run());

        Ok(())
    }

    /// Ask the server loop to exit after its current cycle.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stream URL clients should open.
    pub fn url(&self) -> String {
        format!(
            "rtsp://{}:{}/{}",
            self.config.host, self.config.port, self.config.suffix
        )
    }

    /// Number of occupied session slots.
    pub fn session_count(&self) -> usize {
        self.stats.sessions.load(Ordering::Relaxed)
    }

    /// Number of sessions currently receiving media.
    pub fn streaming_count(&self) -> usize {
        self.stats.streaming.load(Ordering::Relaxed)
    }

    /// Most recent outgoing bandwidth estimate in kbit/s.
    pub fn bandwidth_kbps(&self) -> u32 {
        self.stats.bandwidth_kbps.load(Ordering::Relaxed)
    }
}

/// Single-threaded accept/service/pace loop; owns the session table.
struct ServerLoop {
    listener: TcpListener,
    pool: FramePool,
    info: Arc<StreamInfo>,
    running: Arc<AtomicBool>,
    stats: Arc<ServerStats>,
    sessions: Vec<Option<Session>>,
    packet: RtpPacket,
    nominal_interval_ms: u64,
    epoch: Instant,
    last_frame_ms: u64,
}

impl ServerLoop {
    fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.accept_pending();
            self.service_sessions();
            self.stream_frame();

            let idle = self.sessions.iter().all(Option::is_none);
            thread::sleep(if idle { IDLE_CYCLE } else { BUSY_CYCLE });
        }
        tracing::debug!("server loop exited");
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Drain the listener backlog into free session slots.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::warn!(%peer, error = %e, "failed to prepare control socket");
                        continue;
                    }
                    match self.sessions.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
                        Some((slot, entry)) => {
                            tracing::info!(%peer, slot, "client connected");
                            *entry = Some(Session::new(stream, peer, slot, &self.info));
                        }
                        None => {
                            tracing::warn!(%peer, "session table full, connection refused");
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Drive each session's protocol engine and reap terminal sessions.
    fn service_sessions(&mut self) {
        for entry in &mut self.sessions {
            if let Some(session) = entry {
                session.service(&self.info);
                if session.is_terminal() {
                    tracing::info!(
                        peer = %session.peer(),
                        state = ?session.state(),
                        "session reaped"
                    );
                    *entry = None;
                }
            }
        }

        let connected = self.sessions.iter().filter(|s| s.is_some()).count();
        let streaming = self
            .sessions
            .iter()
            .flatten()
            .filter(|s| s.is_streaming())
            .count();
        self.stats.sessions.store(connected, Ordering::Relaxed);
        self.stats.streaming.store(streaming, Ordering::Relaxed);
    }

    /// Deliver the latest frame to every streaming session, paced by the
    /// nominal interval on the wall clock.
    fn stream_frame(&mut self) {
        let streaming = self
            .sessions
            .iter()
            .flatten()
            .filter(|s| s.is_streaming())
            .count();
        if streaming == 0 {
            return;
        }

        let now = self.now_ms();
        if !frame_due(now, self.last_frame_ms, self.nominal_interval_ms) {
            return;
        }
        let Some(frame) = self.pool.borrow_latest() else {
            return;
        };
        self.last_frame_ms = now;

        // JPEG frames stream as their entropy-coded scan with the
        // quantization tables carried on fragment 0; anything the JFIF
        // walk rejects goes out as-is with the default-quality Q.
        let (payload, tables) = match frame.format() {
            FrameFormat::Jpeg => match mjpeg::parse_jpeg(frame.data()) {
                Some(scan) => (scan.scan, scan.tables),
                None => (frame.data(), None),
            },
            _ => (frame.data(), None),
        };
        if payload.is_empty() {
            return;
        }

        let send_start = self.now_ms();
        let mut offset = 0;
        let mut fragments = 0u32;
        loop {
            let next = mjpeg::pack_fragment(
                &mut self.packet,
                payload,
                offset,
                tables.as_ref(),
                self.info.width,
                self.info.height,
            );
            for session in self.sessions.iter_mut().flatten() {
                if session.is_streaming() {
                    session.send_fragment(&mut self.packet, now, self.nominal_interval_ms);
                }
            }
            fragments += 1;
            if next == 0 {
                break;
            }
            offset = next;
        }

        let cost_ms = (self.now_ms() - send_start).max(1);
        let kbps = (payload.len() as u64 * 8 * streaming as u64 / cost_ms) as u32;
        self.stats.bandwidth_kbps.store(kbps, Ordering::Relaxed);
        tracing::trace!(
            frame_bytes = payload.len(),
            fragments,
            streaming,
            kbps,
            "frame delivered"
        );
    }
}

/// Whether the next frame is due: strictly more than the nominal interval
/// has passed since the last delivery, or the millisecond clock ran
/// backwards.
fn frame_due(now_ms: u64, last_ms: u64, interval_ms: u64) -> bool {
    now_ms > last_ms + interval_ms || now_ms < last_ms
}
