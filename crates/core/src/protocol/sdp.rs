//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <sess-id> 1 IN IP4 <addr>                ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:camstream                              ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! m=video 0 RTP/AVP 26                          ← media description
//! a=rtpmap:26 JPEG/90000                        ← codec/clock rate
//! a=control:trackID=1                           ← track control URL
//! ```
//!
//! Address and path fields come from the resolved [`StreamInfo`], so
//! nothing is hardcoded. Payload type 26 is static (RFC 3551 Table 5);
//! the `a=rtpmap` line is redundant for it but harmless, and some players
//! log a warning without one.

use rand::RngExt;

use crate::media::mjpeg::JPEG_PAYLOAD_TYPE;
use crate::server::StreamInfo;

/// Generate an SDP session description for the stream.
///
/// The origin session id is freshly randomized per request; a live source
/// has no persistent session to describe, so no two DESCRIBE responses
/// claim to be the same announcement.
pub fn generate(info: &StreamInfo) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o=- {} 1 IN IP4 {}",
        rand::rng().random::<u32>(),
        info.host
    ));
    sdp.push(format!("s={}", info.suffix));
    sdp.push(format!("c=IN IP4 {}", info.host));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:camstream".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("m=video 0 RTP/AVP {}", JPEG_PAYLOAD_TYPE));
    sdp.push(format!("a=rtpmap:{} JPEG/90000", JPEG_PAYLOAD_TYPE));
    sdp.push("a=control:trackID=1".to_string());

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_info() -> StreamInfo {
        StreamInfo {
            suffix: "mjpeg/1".to_string(),
            url: "rtsp://192.168.1.100:8554/mjpeg/1".to_string(),
            host: "192.168.1.100".to_string(),
            width: 640,
            height: 480,
            rtp_port_base: 57000,
            auth_token: String::new(),
        }
    }

    #[test]
    fn generates_mjpeg_sdp() {
        let sdp = generate(&test_info());

        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("s=mjpeg/1\r\n"));
        assert!(
            sdp.contains("c=IN IP4 192.168.1.100\r\n"),
            "c= must use configured IP, not 0.0.0.0"
        );
        assert!(sdp.contains("t=0 0\r\n"));
        assert!(sdp.contains("a=sendonly\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 26\r\n"));
        assert!(sdp.contains("a=rtpmap:26 JPEG/90000\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));
        assert!(sdp.ends_with("\r\n"), "SDP must end with CRLF");
    }

    #[test]
    fn exactly_one_media_line() {
        let sdp = generate(&test_info());
        assert_eq!(sdp.matches("\r\nm=").count(), 1);
    }

    #[test]
    fn origin_uses_configured_host() {
        let sdp = generate(&test_info());
        let origin = sdp
            .lines()
            .find(|l| l.starts_with("o="))
            .expect("SDP must include origin");
        assert!(origin.ends_with("IN IP4 192.168.1.100"));
    }

    #[test]
    fn session_attributes_precede_media_section() {
        let sdp = generate(&test_info());
        let sendonly_idx = sdp.find("a=sendonly").expect("SDP must include sendonly");
        let m_idx = sdp.find("m=video").expect("SDP must include media section");
        assert!(
            sendonly_idx < m_idx,
            "session-level attrs must precede m= line"
        );

        let control_idx = sdp.find("a=control").expect("SDP must include control");
        assert!(control_idx > m_idx, "media attributes must follow m=video");
    }
}
