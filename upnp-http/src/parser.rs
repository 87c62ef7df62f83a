//! Incremental HTTP/1.x message parser.
//!
//! The parser does no I/O. It is handed the unconsumed receive window and
//! answers with a [`Progress`]: how many bytes it used and how many more it
//! needs before it can make the next decision. That answer maps one to one
//! onto the transport's [`Flow`](upnp_transport::Flow), which is how the
//! chunked and header state machines steer the size of every raw read.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::config::HttpConfig;
use crate::error::ProtocolError;
use crate::message::{Framing, Headers, HttpMessage};
use crate::parse::{find_head_end, find_line_end, parse_start_line, ChunkLine, HeaderLine};

/// Smallest buffer that can hold a header terminator.
const HEAD_MIN: usize = 4;

/// Smallest chunk-size line, `0\r\n`.
const CHUNK_LINE_MIN: usize = 3;

/// Destination for a message body supplied by the application instead of
/// the internal buffer.
pub trait BodySink: io::Write + Send {}

impl<T: io::Write + Send> BodySink for T {}

/// Position inside a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Not inside a chunked body
    NoChunk,
    /// Expecting a chunk-size line
    StartChunk,
    /// Inside chunk data
    DataChunk,
    /// Expecting the CRLF that follows chunk data
    FinChunkCRLF,
    /// Reading trailer fields after the last chunk
    StartFooterChunk,
}

/// Per-message parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingHeaders,
    NormalBody,
    ChunkedBody,
    CloseDelimitedBody,
    /// The last message disabled keep-alive; nothing else may arrive
    Closed,
}

/// Something the parser completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// A head was parsed; `has_body` says whether body bytes follow
    Headers { head: HttpMessage, has_body: bool },
    /// A whole message was received
    Message(HttpMessage),
}

/// Outcome of one parse step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes used from the front of the input
    pub consumed: usize,
    /// Minimum number of further bytes needed for the next step
    pub wanted: usize,
}

impl Progress {
    fn new(consumed: usize, wanted: usize) -> Self {
        Self { consumed, wanted }
    }

    fn need(wanted: usize) -> Self {
        Self::new(0, wanted)
    }
}

/// Methods of the requests sent on a connection, oldest first.
///
/// Each final response pops one entry; a response to `HEAD` has no body
/// whatever its headers declare.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    methods: Arc<Mutex<VecDeque<String>>>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, method: &str) {
        self.methods.lock().push_back(method.to_string());
    }

    fn pop(&self) -> Option<String> {
        self.methods.lock().pop_front()
    }
}

/// Size limits applied while parsing.
#[derive(Debug, Clone)]
pub struct ParserLimits {
    pub max_header_bytes: usize,
    pub max_chunk_line: usize,
    pub header_scan_step: usize,
    pub max_buffered_body: u64,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for ParserLimits {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_header_bytes: config.max_header_bytes,
            max_chunk_line: config.max_chunk_line,
            header_scan_step: config.header_scan_step.max(1),
            max_buffered_body: config.max_buffered_body,
        }
    }
}

enum BodyTarget {
    Buffer(BytesMut),
    Sink(Box<dyn BodySink>),
}

/// Incremental parser for a sequence of messages on one connection.
pub struct MessageParser {
    limits: ParserLimits,
    state: ParserState,
    chunk: ChunkState,
    head: Option<HttpMessage>,
    keep_alive: bool,
    body: BodyTarget,
    body_len: u64,
    /// Bytes left in the fixed-length body or in the current chunk
    remaining: u64,
    trailer_len: usize,
    requests: RequestLog,
}

impl MessageParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self::with_request_log(limits, RequestLog::new())
    }

    /// Parser that consults `requests` to decide which responses answer a
    /// `HEAD` request.
    pub fn with_request_log(limits: ParserLimits, requests: RequestLog) -> Self {
        Self {
            limits,
            state: ParserState::AwaitingHeaders,
            chunk: ChunkState::NoChunk,
            head: None,
            keep_alive: true,
            body: BodyTarget::Buffer(BytesMut::new()),
            body_len: 0,
            remaining: 0,
            trailer_len: 0,
            requests,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn chunk_state(&self) -> ChunkState {
        self.chunk
    }

    pub fn request_log(&self) -> &RequestLog {
        &self.requests
    }

    /// Route the body of the current message into `sink`.
    ///
    /// Only valid between the `Headers` event of a message with a body and
    /// its first body byte; returns whether the sink was installed.
    pub fn attach_sink(&mut self, sink: Box<dyn BodySink>) -> bool {
        let in_body = matches!(
            self.state,
            ParserState::NormalBody | ParserState::ChunkedBody | ParserState::CloseDelimitedBody
        );
        if !in_body || self.body_len > 0 {
            return false;
        }
        self.body = BodyTarget::Sink(sink);
        true
    }

    /// Run one parse step over `data`, appending completed items to `events`.
    pub fn parse(
        &mut self,
        data: &[u8],
        events: &mut Vec<ParseEvent>,
    ) -> Result<Progress, ProtocolError> {
        match self.state {
            ParserState::AwaitingHeaders => self.parse_head(data, events),
            ParserState::NormalBody => self.parse_fixed(data, events),
            ParserState::ChunkedBody => self.parse_chunked(data, events),
            ParserState::CloseDelimitedBody => {
                self.write_body(data)?;
                Ok(Progress::new(data.len(), usize::MAX))
            }
            ParserState::Closed if data.is_empty() => Ok(Progress::need(1)),
            ParserState::Closed => Err(ProtocolError::UnexpectedData { bytes: data.len() }),
        }
    }

    /// The peer closed its side. Completes a close-delimited body; any
    /// other partially received message is reported as truncated.
    pub fn end_of_input(&mut self, events: &mut Vec<ParseEvent>) -> Result<(), ProtocolError> {
        match self.state {
            ParserState::AwaitingHeaders | ParserState::Closed => Ok(()),
            ParserState::CloseDelimitedBody => {
                self.finish(events)?;
                Ok(())
            }
            ParserState::NormalBody | ParserState::ChunkedBody => Err(ProtocolError::Truncated),
        }
    }

    fn parse_head(
        &mut self,
        data: &[u8],
        events: &mut Vec<ParseEvent>,
    ) -> Result<Progress, ProtocolError> {
        // stray CRLF between messages
        if data.starts_with(b"\r\n") {
            return Ok(Progress::new(2, HEAD_MIN));
        }
        if data.len() < HEAD_MIN {
            return Ok(Progress::need(HEAD_MIN - data.len()));
        }

        let limit = self.limits.max_header_bytes;
        let scan = &data[..data.len().min(limit)];

        // an HTTP/0.9 request is a single line with no header block
        if let Some(line_end) = find_line_end(scan) {
            let line = &data[..line_end];
            if is_simple_request(line) {
                let head = HttpMessage {
                    start: parse_start_line(line)?,
                    headers: Headers::new(),
                    body: Default::default(),
                };
                let wanted = self.begin_message(head, events)?;
                return Ok(Progress::new(line_end + 2, wanted));
            }
        }

        let Some(end) = find_head_end(scan) else {
            if data.len() >= limit {
                return Err(ProtocolError::HeaderTooLarge { limit });
            }
            return Ok(Progress::need(self.limits.header_scan_step));
        };

        let head = parse_head_block(&data[..end])?;
        let wanted = self.begin_message(head, events)?;
        Ok(Progress::new(end + HEAD_MIN, wanted))
    }

    fn begin_message(
        &mut self,
        head: HttpMessage,
        events: &mut Vec<ParseEvent>,
    ) -> Result<usize, ProtocolError> {
        if let Some(status) = head.status() {
            if (100..200).contains(&status) {
                tracing::debug!("Discarding interim {} response", status);
                return Ok(HEAD_MIN);
            }
        }

        let framing = self.framing_for(&head)?;
        tracing::debug!(
            start = ?head.start,
            ?framing,
            "Parsed message head"
        );

        self.keep_alive = head.keep_alive();
        self.body = BodyTarget::Buffer(BytesMut::new());
        self.body_len = 0;
        self.remaining = 0;
        self.trailer_len = 0;
        self.chunk = ChunkState::NoChunk;

        events.push(ParseEvent::Headers {
            head: head.clone(),
            has_body: framing != Framing::None,
        });
        self.head = Some(head);

        match framing {
            Framing::None => self.finish(events),
            Framing::ContentLength(length) => {
                self.state = ParserState::NormalBody;
                self.remaining = length;
                Ok(clamp(length))
            }
            Framing::Chunked => {
                self.state = ParserState::ChunkedBody;
                self.chunk = ChunkState::StartChunk;
                Ok(CHUNK_LINE_MIN)
            }
            Framing::CloseDelimited => {
                self.state = ParserState::CloseDelimitedBody;
                Ok(usize::MAX)
            }
        }
    }

    fn framing_for(&self, head: &HttpMessage) -> Result<Framing, ProtocolError> {
        if head.status().is_some() {
            let method = self.requests.pop();
            let answers_head = method
                .as_deref()
                .is_some_and(|m| m.eq_ignore_ascii_case("HEAD"));
            if answers_head || head.is_bodiless_status() {
                return Ok(Framing::None);
            }
        }

        if head.is_chunked() {
            return Ok(Framing::Chunked);
        }
        Ok(match head.content_length()? {
            Some(0) => Framing::None,
            Some(length) => Framing::ContentLength(length),
            None if head.is_request() => Framing::None,
            None => Framing::CloseDelimited,
        })
    }

    fn parse_fixed(
        &mut self,
        data: &[u8],
        events: &mut Vec<ParseEvent>,
    ) -> Result<Progress, ProtocolError> {
        let n = take_len(self.remaining, data.len());
        self.write_body(&data[..n])?;
        self.remaining -= n as u64;

        if self.remaining == 0 {
            let wanted = self.finish(events)?;
            Ok(Progress::new(n, wanted))
        } else {
            Ok(Progress::new(n, clamp(self.remaining)))
        }
    }

    fn parse_chunked(
        &mut self,
        data: &[u8],
        events: &mut Vec<ParseEvent>,
    ) -> Result<Progress, ProtocolError> {
        match self.chunk {
            ChunkState::NoChunk | ChunkState::StartChunk => {
                let limit = self.limits.max_chunk_line;
                let scan = &data[..data.len().min(limit)];
                let Some(p) = find_line_end(scan) else {
                    if data.len() >= limit {
                        return Err(ProtocolError::ChunkLineTooLong { limit });
                    }
                    return Ok(Progress::need(1));
                };

                let line = ChunkLine::parse(&data[..p])?;
                tracing::trace!(size = line.chunk_size, "chunk size line");
                if line.chunk_size == 0 {
                    self.chunk = ChunkState::StartFooterChunk;
                    Ok(Progress::new(p + 2, 2))
                } else {
                    self.chunk = ChunkState::DataChunk;
                    self.remaining = line.chunk_size;
                    Ok(Progress::new(p + 2, clamp(line.chunk_size)))
                }
            }
            ChunkState::DataChunk => {
                let n = take_len(self.remaining, data.len());
                self.write_body(&data[..n])?;
                self.remaining -= n as u64;
                if self.remaining == 0 {
                    self.chunk = ChunkState::FinChunkCRLF;
                    Ok(Progress::new(n, 2))
                } else {
                    Ok(Progress::new(n, clamp(self.remaining)))
                }
            }
            ChunkState::FinChunkCRLF => {
                if data.first() != Some(&b'\r') {
                    return Err(ProtocolError::InvalidChunkTerminator);
                }
                match data.get(1) {
                    None => Ok(Progress::need(1)),
                    Some(b'\n') => {
                        self.chunk = ChunkState::StartChunk;
                        Ok(Progress::new(2, CHUNK_LINE_MIN))
                    }
                    Some(_) => Err(ProtocolError::InvalidChunkTerminator),
                }
            }
            ChunkState::StartFooterChunk => {
                let limit = self.limits.max_header_bytes;
                let budget = limit.saturating_sub(self.trailer_len);
                let scan = &data[..data.len().min(budget)];
                match find_line_end(scan) {
                    None if data.len() >= budget => Err(ProtocolError::TrailerTooLarge { limit }),
                    None => Ok(Progress::need(1)),
                    Some(0) => {
                        let wanted = self.finish(events)?;
                        Ok(Progress::new(2, wanted))
                    }
                    Some(p) => {
                        let field = HeaderLine::parse(&data[..p])?;
                        if let Some(head) = self.head.as_mut() {
                            head.headers.append(field.name, field.value);
                        }
                        self.trailer_len += p + 2;
                        Ok(Progress::new(p + 2, 2))
                    }
                }
            }
        }
    }

    fn write_body(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.is_empty() {
            return Ok(());
        }
        self.body_len += data.len() as u64;
        match &mut self.body {
            BodyTarget::Buffer(buf) => {
                if self.body_len > self.limits.max_buffered_body {
                    return Err(ProtocolError::BodyTooLarge {
                        limit: self.limits.max_buffered_body,
                    });
                }
                buf.extend_from_slice(data);
            }
            BodyTarget::Sink(sink) => sink
                .write_all(data)
                .map_err(|e| ProtocolError::SinkFailed(e.to_string()))?,
        }
        Ok(())
    }

    /// Publish the current message and reset for the next one. Returns the
    /// read size wanted next.
    fn finish(&mut self, events: &mut Vec<ParseEvent>) -> Result<usize, ProtocolError> {
        let body = std::mem::replace(&mut self.body, BodyTarget::Buffer(BytesMut::new()));
        let head = self.head.take();

        self.chunk = ChunkState::NoChunk;
        self.remaining = 0;
        self.trailer_len = 0;
        self.state = if self.keep_alive {
            ParserState::AwaitingHeaders
        } else {
            ParserState::Closed
        };

        let Some(mut message) = head else {
            return Ok(HEAD_MIN);
        };
        match body {
            BodyTarget::Buffer(buf) => message.body = buf.freeze(),
            BodyTarget::Sink(mut sink) => sink
                .flush()
                .map_err(|e| ProtocolError::SinkFailed(e.to_string()))?,
        }

        tracing::debug!(
            body_len = self.body_len,
            keep_alive = self.keep_alive,
            "Message complete"
        );
        events.push(ParseEvent::Message(message));

        Ok(if self.keep_alive { HEAD_MIN } else { 1 })
    }
}

impl fmt::Debug for MessageParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageParser")
            .field("state", &self.state)
            .field("chunk", &self.chunk)
            .field("body_len", &self.body_len)
            .field("remaining", &self.remaining)
            .finish()
    }
}

/// Parse the header block, without its terminating blank line.
fn parse_head_block(block: &[u8]) -> Result<HttpMessage, ProtocolError> {
    let mut lines = block.split(|b| *b == b'\n').map(strip_cr);
    let start = parse_start_line(lines.next().unwrap_or_default())?;

    let mut headers = Headers::new();
    for line in lines {
        if let [b' ' | b'\t', ..] = line {
            // obsolete line folding
            let more = String::from_utf8_lossy(line);
            if !headers.continue_last(more.trim()) {
                return Err(ProtocolError::InvalidHeaderLine(more.into_owned()));
            }
            continue;
        }
        let field = HeaderLine::parse(line)?;
        headers.append(field.name, field.value);
    }

    Ok(HttpMessage {
        start,
        headers,
        body: Default::default(),
    })
}

/// A request line without a version token.
fn is_simple_request(line: &[u8]) -> bool {
    !line.starts_with(b"HTTP/") && line.split(|b| *b == b' ').filter(|p| !p.is_empty()).count() == 2
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn take_len(remaining: u64, available: usize) -> usize {
    usize::try_from(remaining).map_or(available, |r| r.min(available))
}

fn clamp(wanted: u64) -> usize {
    usize::try_from(wanted).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Version;

    /// Feed `pieces` one at a time, running parse steps over the buffered
    /// bytes the way the transport's delivery loop does.
    fn feed(parser: &mut MessageParser, pieces: &[&[u8]]) -> Result<Vec<ParseEvent>, ProtocolError> {
        let mut buffered = Vec::new();
        let mut events = Vec::new();
        for piece in pieces {
            buffered.extend_from_slice(piece);
            while !buffered.is_empty() {
                let progress = parser.parse(&buffered, &mut events)?;
                if progress.consumed == 0 {
                    break;
                }
                buffered.drain(..progress.consumed);
            }
        }
        Ok(events)
    }

    fn messages(events: Vec<ParseEvent>) -> Vec<HttpMessage> {
        events
            .into_iter()
            .filter_map(|e| match e {
                ParseEvent::Message(m) => Some(m),
                ParseEvent::Headers { .. } => None,
            })
            .collect()
    }

    fn parser() -> MessageParser {
        MessageParser::new(ParserLimits::default())
    }

    #[test]
    fn test_http09_request_completes_on_its_line() {
        let mut p = parser();
        let events = feed(&mut p, &[b"GET /ind", b"ex.html\r\n"]).unwrap();
        assert!(matches!(&events[0], ParseEvent::Headers { has_body: false, .. }));

        let messages = messages(events);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].target(), Some("/index.html"));
        assert_eq!(messages[0].version(), Version::Http09);
        assert!(messages[0].headers.is_empty());

        // no keep-alive for HTTP/0.9
        let mut events = Vec::new();
        assert!(matches!(
            p.parse(b"GET /again\r\n", &mut events),
            Err(ProtocolError::UnexpectedData { .. })
        ));
    }

    #[test]
    fn test_request_without_body() {
        let mut p = parser();
        let events = feed(&mut p, &[b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"]).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ParseEvent::Headers { has_body: false, .. }));

        let msgs = messages(events);
        assert_eq!(msgs[0].method(), Some("GET"));
        assert_eq!(msgs[0].headers.get("host"), Some("x"));
        assert!(msgs[0].body.is_empty());
        assert_eq!(p.state(), ParserState::AwaitingHeaders);
    }

    #[test]
    fn test_incomplete_head_narrows_read() {
        let mut p = parser();
        let mut events = Vec::new();
        assert_eq!(p.parse(b"GE", &mut events).unwrap(), Progress::need(2));
        assert_eq!(
            p.parse(b"GET / HTTP/1.1\r\n", &mut events).unwrap(),
            Progress::need(1)
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_scan_step_is_configurable() {
        let limits = ParserLimits {
            header_scan_step: 64,
            ..Default::default()
        };
        let mut p = MessageParser::new(limits);
        let mut events = Vec::new();
        assert_eq!(
            p.parse(b"GET / HTTP/1.1\r\n", &mut events).unwrap(),
            Progress::need(64)
        );
    }

    #[test]
    fn test_content_length_body_across_reads() {
        let mut p = parser();
        let msgs = messages(
            feed(
                &mut p,
                &[b"POST /ctl HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123", b"456", b"789"],
            )
            .unwrap(),
        );
        assert_eq!(msgs.len(), 1);
        assert_eq!(&msgs[0].body[..], b"0123456789");
    }

    #[test]
    fn test_content_length_wants_remaining() {
        let mut p = parser();
        let mut events = Vec::new();
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";
        assert_eq!(
            p.parse(head, &mut events).unwrap(),
            Progress::new(head.len(), 100)
        );
        assert_eq!(p.parse(b"abc", &mut events).unwrap(), Progress::new(3, 97));
    }

    #[test]
    fn test_chunked_body_with_extension_and_trailer() {
        let mut p = parser();
        let msgs = messages(
            feed(
                &mut p,
                &[b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4;name=v\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\n"],
            )
            .unwrap(),
        );
        assert_eq!(&msgs[0].body[..], b"Wikipedia");
        assert_eq!(msgs[0].headers.get("x-trailer"), Some("yes"));
        assert_eq!(p.chunk_state(), ChunkState::NoChunk);
    }

    #[test]
    fn test_chunk_states_track_position() {
        let mut p = parser();
        feed(
            &mut p,
            &[b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"],
        )
        .unwrap();
        assert_eq!(p.chunk_state(), ChunkState::StartChunk);

        feed(&mut p, &[b"a\r\n01234"]).unwrap();
        assert_eq!(p.chunk_state(), ChunkState::DataChunk);

        feed(&mut p, &[b"56789"]).unwrap();
        assert_eq!(p.chunk_state(), ChunkState::FinChunkCRLF);

        feed(&mut p, &[b"\r\n"]).unwrap();
        assert_eq!(p.chunk_state(), ChunkState::StartChunk);

        feed(&mut p, &[b"0\r\n"]).unwrap();
        assert_eq!(p.chunk_state(), ChunkState::StartFooterChunk);
    }

    #[test]
    fn test_bad_chunk_terminator() {
        let mut p = parser();
        let result = feed(
            &mut p,
            &[b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcXY"],
        );
        assert_eq!(result, Err(ProtocolError::InvalidChunkTerminator));
    }

    #[test]
    fn test_bad_chunk_size() {
        let mut p = parser();
        let result = feed(
            &mut p,
            &[b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"],
        );
        assert!(matches!(result, Err(ProtocolError::InvalidChunkSize(_))));
    }

    #[test]
    fn test_interim_response_is_discarded() {
        let mut p = parser();
        let events = feed(
            &mut p,
            &[b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"],
        )
        .unwrap();
        let msgs = messages(events);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].status(), Some(200));
    }

    #[test]
    fn test_bodiless_responses() {
        let mut p = parser();
        let msgs = messages(
            feed(
                &mut p,
                &[b"HTTP/1.1 304 Not Modified\r\nContent-Length: 50\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n"],
            )
            .unwrap(),
        );
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.body.is_empty()));
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut p = parser();
        p.request_log().push("HEAD");
        p.request_log().push("GET");
        let msgs = messages(
            feed(
                &mut p,
                &[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"],
            )
            .unwrap(),
        );
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].body.is_empty());
        assert_eq!(&msgs[1].body[..], b"hello");
    }

    #[test]
    fn test_close_delimited_response() {
        let mut p = parser();
        let mut events = feed(&mut p, &[b"HTTP/1.0 200 OK\r\n\r\nsome ", b"bytes"]).unwrap();
        assert_eq!(p.state(), ParserState::CloseDelimitedBody);

        p.end_of_input(&mut events).unwrap();
        let msgs = messages(events);
        assert_eq!(&msgs[0].body[..], b"some bytes");
        assert_eq!(p.state(), ParserState::Closed);
    }

    #[test]
    fn test_truncated_body() {
        let mut p = parser();
        let mut events = feed(&mut p, &[b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nabc"]).unwrap();
        assert_eq!(p.end_of_input(&mut events), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_data_after_connection_close() {
        let mut p = parser();
        let result = feed(
            &mut p,
            &[b"GET / HTTP/1.1\r\nConnection: close\r\n\r\nGET / HTTP/1.1\r\n\r\n"],
        );
        assert!(matches!(result, Err(ProtocolError::UnexpectedData { .. })));
    }

    #[test]
    fn test_header_too_large() {
        let limits = ParserLimits {
            max_header_bytes: 32,
            ..Default::default()
        };
        let mut p = MessageParser::new(limits);
        let result = feed(&mut p, &[b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaa\r\n\r\n"]);
        assert_eq!(result, Err(ProtocolError::HeaderTooLarge { limit: 32 }));
    }

    #[test]
    fn test_buffered_body_cap() {
        let limits = ParserLimits {
            max_buffered_body: 4,
            ..Default::default()
        };
        let mut p = MessageParser::new(limits);
        let result = feed(&mut p, &[b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n12345"]);
        assert_eq!(result, Err(ProtocolError::BodyTooLarge { limit: 4 }));
    }

    #[test]
    fn test_sink_receives_body() {
        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl io::Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = Shared::default();
        let mut p = parser();
        let mut events = Vec::new();
        let head = b"POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\n";
        p.parse(head, &mut events).unwrap();
        assert!(p.attach_sink(Box::new(sink.clone())));

        let events = feed(&mut p, &[b"abc", b"def"]).unwrap();
        let msgs = messages(events);
        assert!(msgs[0].body.is_empty());
        assert_eq!(&sink.0.lock()[..], b"abcdef");
    }

    #[test]
    fn test_leading_crlf_is_skipped() {
        let mut p = parser();
        let msgs = messages(feed(&mut p, &[b"\r\nGET / HTTP/1.1\r\n\r\n"]).unwrap());
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_folded_header() {
        let mut p = parser();
        let msgs = messages(
            feed(&mut p, &[b"GET / HTTP/1.1\r\nX-Long: one\r\n two\r\n\r\n"]).unwrap(),
        );
        assert_eq!(msgs[0].headers.get("X-Long"), Some("one two"));
    }
}
