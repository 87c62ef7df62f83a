//! HTTP message model shared by the parser and the send path.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::chunked;
use crate::error::ProtocolError;

/// Protocol version of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// Bare `GET /path` request line
    Http09,
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http09 => "HTTP/0.9",
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    /// Whether peers of this version understand `Transfer-Encoding: chunked`.
    pub fn supports_chunked(self) -> bool {
        self >= Version::Http11
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/0.9" => Ok(Version::Http09),
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(ProtocolError::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request line or status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request {
        method: String,
        target: String,
        version: Version,
    },
    Response {
        version: Version,
        status: u16,
        reason: String,
    },
}

/// Ordered header list with case-insensitive lookup.
///
/// Repeated fields are kept as separate entries in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Add an entry, keeping existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every entry of `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove every entry of `name`; returns whether any existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    /// Whether any comma-separated element of `name` equals `token`,
    /// ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a continuation line to the most recent entry.
    pub(crate) fn continue_last(&mut self, more: &str) -> bool {
        match self.entries.last_mut() {
            Some((_, value)) => {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(more);
                true
            }
            None => false,
        }
    }

    pub(crate) fn write_to(&self, dst: &mut BytesMut) {
        for (name, value) in &self.entries {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// How the body of a message is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body
    None,
    /// Exactly this many bytes
    ContentLength(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Everything until the peer closes (responses only)
    CloseDelimited,
}

/// A complete HTTP message, or just its head while the body is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    pub start: StartLine,
    pub headers: Headers,
    /// Buffered body; empty when a body sink received the bytes instead
    pub body: Bytes,
}

impl HttpMessage {
    /// New HTTP/1.1 request.
    pub fn request(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            start: StartLine::Request {
                method: method.into(),
                target: target.into(),
                version: Version::Http11,
            },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// New HTTP/1.1 response with the standard reason phrase.
    pub fn response(status: u16) -> Self {
        Self {
            start: StartLine::Response {
                version: Version::Http11,
                status,
                reason: reason_phrase(status).to_string(),
            },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        match &mut self.start {
            StartLine::Request { version: v, .. } | StartLine::Response { version: v, .. } => {
                *v = version
            }
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    pub fn version(&self) -> Version {
        match &self.start {
            StartLine::Request { version, .. } | StartLine::Response { version, .. } => *version,
        }
    }

    /// Whether the final transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
    }

    /// Declared Content-Length. Repeated headers must agree.
    pub fn content_length(&self) -> Result<Option<u64>, ProtocolError> {
        let mut length = None;
        for value in self.headers.get_all("Content-Length") {
            let parsed = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(ProtocolError::InvalidContentLength(value.to_string()));
                }
                _ => length = Some(parsed),
            }
        }
        Ok(length)
    }

    /// Whether the sender wants the connection kept open afterwards.
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return false;
        }
        match self.version() {
            Version::Http11 => true,
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
            Version::Http09 => false,
        }
    }

    /// Responses that never carry a body, whatever their headers say.
    pub fn is_bodiless_status(&self) -> bool {
        matches!(self.status(), Some(s) if (100..200).contains(&s) || s == 204 || s == 304)
    }

    /// Serialize start line and headers, including the blank line.
    pub fn write_head(&self, dst: &mut BytesMut) {
        match &self.start {
            StartLine::Request {
                method,
                target,
                version,
            } => {
                dst.put_slice(method.as_bytes());
                dst.put_u8(b' ');
                dst.put_slice(target.as_bytes());
                if *version != Version::Http09 {
                    dst.put_u8(b' ');
                    dst.put_slice(version.as_str().as_bytes());
                }
            }
            StartLine::Response {
                version,
                status,
                reason,
            } => {
                dst.put_slice(version.as_str().as_bytes());
                dst.put_slice(format!(" {status} ").as_bytes());
                dst.put_slice(reason.as_bytes());
            }
        }
        dst.put_slice(b"\r\n");
        self.headers.write_to(dst);
        dst.put_slice(b"\r\n");
    }

    /// Serialize the whole message.
    ///
    /// A body is framed by the message's own headers: chunked messages get
    /// the body as a single chunk, otherwise a missing `Content-Length` is
    /// added. Responses without a body and without framing headers get
    /// `Content-Length: 0` so keep-alive peers know where they end.
    pub fn to_bytes(&self) -> Bytes {
        let message = self.with_framing();
        let mut dst = BytesMut::with_capacity(256 + self.body.len());
        message.write_head(&mut dst);
        if message.is_chunked() {
            chunked::encode_chunk(&self.body, &mut dst);
            chunked::encode_last_chunk(None, &mut dst);
        } else {
            dst.put_slice(&self.body);
        }
        dst.freeze()
    }

    /// Serialize only the head `to_bytes` would write, as the answer to a
    /// `HEAD` request.
    pub fn head_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(256);
        self.with_framing().write_head(&mut dst);
        dst.freeze()
    }

    fn with_framing(&self) -> HttpMessage {
        let mut message = self.clone();
        let needs_length = !self.is_chunked()
            && !self.headers.contains("Content-Length")
            && (!self.body.is_empty() || (!self.is_request() && !self.is_bodiless_status()));
        if needs_length {
            message
                .headers
                .set("Content-Length", self.body.len().to_string());
        }
        message
    }
}

/// Standard reason phrase for the status codes this engine produces or
/// commonly sees from UPnP peers.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive_and_ordered() {
        let mut headers = Headers::new();
        headers.append("Host", "x");
        headers.append("Accept", "text/xml");
        headers.append("accept", "*/*");

        assert_eq!(headers.get("HOST"), Some("x"));
        assert_eq!(headers.get_all("Accept").collect::<Vec<_>>(), vec!["text/xml", "*/*"]);

        headers.set("ACCEPT", "none");
        assert_eq!(headers.get_all("accept").collect::<Vec<_>>(), vec!["none"]);
        assert_eq!(headers.len(), 2);
        assert!(headers.remove("host"));
        assert!(!headers.contains("Host"));
    }

    #[test]
    fn test_head_bytes_keep_framing_without_body() {
        let response = HttpMessage::response(200).with_body("hello");
        assert_eq!(&response.head_bytes()[..], b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
        assert!(response.to_bytes().ends_with(b"\r\n\r\nhello"));
    }

    #[test]
    fn test_header_value_outlives_lookup_name() {
        let headers: Headers = [("Content-Type", "text/xml")].into_iter().collect();
        let value = {
            let name = String::from("content-type");
            headers.get(&name)
        };
        assert_eq!(value, Some("text/xml"));
    }

    #[test]
    fn test_keep_alive_rules() {
        let req = HttpMessage::request("GET", "/");
        assert!(req.keep_alive());

        let req = HttpMessage::request("GET", "/").with_header("Connection", "Close");
        assert!(!req.keep_alive());

        let req = HttpMessage::request("GET", "/").with_version(Version::Http10);
        assert!(!req.keep_alive());

        let req = HttpMessage::request("GET", "/")
            .with_version(Version::Http10)
            .with_header("Connection", "Keep-Alive");
        assert!(req.keep_alive());
    }

    #[test]
    fn test_chunked_detection_uses_last_coding() {
        let msg = HttpMessage::response(200).with_header("Transfer-Encoding", "gzip, chunked");
        assert!(msg.is_chunked());

        let msg = HttpMessage::response(200).with_header("Transfer-Encoding", "chunked, gzip");
        assert!(!msg.is_chunked());
    }

    #[test]
    fn test_conflicting_content_lengths() {
        let msg = HttpMessage::response(200)
            .with_header("Content-Length", "10")
            .with_header("Content-Length", "10");
        assert_eq!(msg.content_length(), Ok(Some(10)));

        let msg = HttpMessage::response(200)
            .with_header("Content-Length", "10")
            .with_header("Content-Length", "11");
        assert!(msg.content_length().is_err());

        let msg = HttpMessage::response(200).with_header("Content-Length", "-1");
        assert!(matches!(
            msg.content_length(),
            Err(ProtocolError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let msg = HttpMessage::request("GET", "/desc.xml").with_header("Host", "10.0.0.2:1400");
        assert_eq!(
            &msg.to_bytes()[..],
            b"GET /desc.xml HTTP/1.1\r\nHost: 10.0.0.2:1400\r\n\r\n"
        );
    }

    #[test]
    fn test_response_serialization_adds_length() {
        let msg = HttpMessage::response(200).with_body(&b"hello"[..]);
        assert_eq!(
            &msg.to_bytes()[..],
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"
        );

        let msg = HttpMessage::response(204);
        assert_eq!(&msg.to_bytes()[..], b"HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn test_chunked_serialization() {
        let msg = HttpMessage::response(200)
            .with_header("Transfer-Encoding", "chunked")
            .with_body(&b"abc"[..]);
        assert_eq!(
            &msg.to_bytes()[..],
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn test_http09_request_line() {
        let msg = HttpMessage::request("GET", "/").with_version(Version::Http09);
        let mut dst = BytesMut::new();
        msg.write_head(&mut dst);
        assert_eq!(&dst[..], b"GET /\r\n\r\n");
    }
}
