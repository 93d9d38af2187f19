/// An RTSP reply under construction (RFC 2326 §7).
///
/// Built by chaining header and body methods, then flattened to wire text
/// with [`serialize`](Self::serialize):
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// Server: camstream/0.1\r\n
/// CSeq: 2\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Every reply opens with the `Server` header. `Content-Length` is added
/// at serialization time when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "camstream/0.1";

/// Realm presented in Basic authentication challenges.
pub const REALM: &str = "camstream";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request, for malformed requests and protocol violations.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 401 Unauthorized, carrying the Basic challenge (RFC 2617 §2).
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
            .add_header("WWW-Authenticate", &format!("Basic realm=\"{REALM}\""))
    }

    /// 404 Not Found, for requests naming a stream this server does not serve.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 500 Internal Server Error, for failures on the server's own side
    /// such as an RTP socket that would not bind.
    pub fn internal_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    /// Echo the request's `CSeq` (RFC 2326 §12.17). Every reply carries one.
    pub fn cseq(self, seq: u32) -> Self {
        self.add_header("CSeq", &seq.to_string())
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Flatten to the RTSP text wire format, appending `Content-Length`
    /// when a body is present (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut text = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            text.push_str(&format!("{name}: {value}\r\n"));
        }
        match &self.body {
            Some(body) => {
                text.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                text.push_str(body);
            }
            None => text.push_str("\r\n"),
        }
        text
    }
}
