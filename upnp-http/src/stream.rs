//! Streamed bodies: job description and the frame generator the send pump
//! drives.
//!
//! A [`StreamSendJob`] is turned into a [`PreparedStream`] once the source
//! length is known. The prepared stream yields the wire frames one at a
//! time: the head, then one frame per source slice (chunk-wrapped on
//! HTTP/1.1, with multipart part headers folded in front of each part's
//! first slice), then the closing delimiter and chunked terminator.

use std::fmt;
use std::io::{self, SeekFrom};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::chunked;
use crate::config::HttpConfig;
use crate::message::{HttpMessage, Version};
use crate::range::{resolve_ranges, ByteRange, Multipart, RangeSpec};

/// Identifier of a queued message or stream job.
pub type JobId = u64;

/// A seekable byte source for a streamed body.
pub trait StreamSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> StreamSource for T {}

/// How a stream job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Every byte and the terminator were written
    Completed,
    /// Stopped by `close_stream`
    Cancelled,
    /// The connection went down first
    Disconnected,
    /// The source could not be read; the connection was closed
    Failed(String),
}

/// What the automatic response head answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    pub method: String,
    pub version: Version,
    pub keep_alive: bool,
}

impl PeerRequest {
    pub fn from_request(request: &HttpMessage) -> Self {
        Self {
            method: request.method().unwrap_or("GET").to_string(),
            version: request.version(),
            keep_alive: request.keep_alive(),
        }
    }

    pub(crate) fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

/// One streamed body waiting in a connection's job queue.
pub struct StreamSendJob {
    source: Box<dyn StreamSource>,
    content_type: String,
    ranges: Option<Vec<ByteRange>>,
    head: Option<HttpMessage>,
    peer: Option<PeerRequest>,
}

impl StreamSendJob {
    /// Stream all of `source` as a response body.
    pub fn new<S: StreamSource + 'static>(source: S, content_type: impl Into<String>) -> Self {
        Self {
            source: Box::new(source),
            content_type: content_type.into(),
            ranges: None,
            head: None,
            peer: None,
        }
    }

    /// Serve only `ranges` (206, or 416 when none overlaps the source).
    pub fn with_ranges(mut self, ranges: Option<Vec<ByteRange>>) -> Self {
        self.ranges = ranges;
        self
    }

    /// Send `head` instead of an automatic response head. Framing headers
    /// are added to it as needed.
    pub fn with_head(mut self, head: HttpMessage) -> Self {
        self.head = Some(head);
        self
    }

    /// Shape the automatic response for `peer`: its version picks the
    /// framing, a `HEAD` gets no body and a closing request closes after.
    pub fn answering(mut self, peer: PeerRequest) -> Self {
        self.peer = Some(peer);
        self
    }

    pub(crate) fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Whether this job writes a response.
    pub fn is_response(&self) -> bool {
        self.head.as_ref().map_or(true, |h| !h.is_request())
    }

    /// Measure the source and build the head and framing.
    pub async fn prepare(mut self, config: &HttpConfig) -> io::Result<PreparedStream> {
        let total = self.source.seek(SeekFrom::End(0)).await?;
        self.source.seek(SeekFrom::Start(0)).await?;

        let plan = match self.head.take() {
            Some(head) => explicit_plan(head, &self.content_type, total)?,
            None => automatic_plan(
                self.peer.as_ref(),
                config.default_version,
                &self.content_type,
                self.ranges.as_deref(),
                total,
            ),
        };

        tracing::debug!(
            total,
            parts = plan.ranges.len(),
            chunked = plan.chunked,
            multipart = plan.multipart.is_some(),
            "Prepared stream"
        );

        Ok(PreparedStream {
            source: self.source,
            head: plan.head,
            ranges: plan.ranges,
            range_index: 0,
            multipart: plan.multipart,
            chunked: plan.chunked,
            close_after: plan.close_after,
            buf: vec![0; config.stream_slice_size.max(1)],
            stage: if plan.body { Stage::Head } else { Stage::HeadOnly },
        })
    }
}

impl fmt::Debug for StreamSendJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSendJob")
            .field("content_type", &self.content_type)
            .field("ranges", &self.ranges)
            .field("head", &self.head.as_ref().map(|h| &h.start))
            .finish()
    }
}

struct Plan {
    head: HttpMessage,
    ranges: Vec<RangeSpec>,
    multipart: Option<Multipart>,
    chunked: bool,
    body: bool,
    close_after: bool,
}

fn automatic_plan(
    peer: Option<&PeerRequest>,
    default_version: Version,
    content_type: &str,
    requested: Option<&[ByteRange]>,
    total: u64,
) -> Plan {
    let version = match peer {
        Some(p) if p.version < Version::Http11 => Version::Http10,
        _ => default_version,
    };
    let keep_alive = peer.map_or(true, |p| p.keep_alive);
    let head_only = peer.is_some_and(PeerRequest::is_head);
    let chunked_ok = version.supports_chunked();

    let resolved = requested.map(|r| resolve_ranges(r, total));
    let (mut head, ranges, multipart, chunked, body) = match resolved {
        Some(Err(_)) => {
            let head = HttpMessage::response(416)
                .with_version(version)
                .with_header("Content-Range", format!("bytes */{total}"))
                .with_header("Content-Length", "0");
            (head, Vec::new(), None, false, false)
        }
        Some(Ok(ranges)) if ranges.len() == 1 => {
            let range = ranges[0];
            let head = HttpMessage::response(206)
                .with_version(version)
                .with_header("Content-Type", content_type)
                .with_header("Accept-Ranges", "bytes")
                .with_header("Content-Range", range.content_range(total))
                .with_header("Content-Length", range.length.to_string());
            (head, ranges, None, false, true)
        }
        Some(Ok(ranges)) => {
            let multipart = Multipart::new(content_type, total);
            let mut head = HttpMessage::response(206)
                .with_version(version)
                .with_header("Content-Type", multipart.content_type_header())
                .with_header("Accept-Ranges", "bytes");
            if chunked_ok {
                head.headers.append("Transfer-Encoding", "chunked");
            } else {
                head.headers
                    .append("Content-Length", multipart.body_len(&ranges).to_string());
            }
            (head, ranges, Some(multipart), chunked_ok, true)
        }
        None => {
            let mut head = HttpMessage::response(200)
                .with_version(version)
                .with_header("Content-Type", content_type)
                .with_header("Accept-Ranges", "bytes");
            if chunked_ok {
                head.headers.append("Transfer-Encoding", "chunked");
            } else {
                head.headers.append("Content-Length", total.to_string());
            }
            let ranges = RangeSpec::clamped(0, total, total).into_iter().collect();
            (head, ranges, None, chunked_ok, true)
        }
    };

    if !keep_alive {
        head.headers.append("Connection", "close");
    } else if version == Version::Http10 {
        head.headers.append("Connection", "keep-alive");
    }

    Plan {
        head,
        ranges,
        multipart,
        chunked,
        body: body && !head_only,
        close_after: !keep_alive,
    }
}

fn explicit_plan(mut head: HttpMessage, content_type: &str, total: u64) -> io::Result<Plan> {
    if !content_type.is_empty() && !head.headers.contains("Content-Type") {
        head.headers.append("Content-Type", content_type);
    }
    let close_after = !head.is_request() && !head.keep_alive();

    if head.is_bodiless_status() {
        return Ok(Plan {
            head,
            ranges: Vec::new(),
            multipart: None,
            chunked: false,
            body: false,
            close_after,
        });
    }

    // a declared length is honoured exactly; a short source fails in next_frame
    let declared = head
        .content_length()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let (chunked, length) = match declared {
        _ if head.is_chunked() => (true, total),
        Some(length) => (false, length),
        None if head.version().supports_chunked() => {
            head.headers.append("Transfer-Encoding", "chunked");
            (true, total)
        }
        None => {
            head.headers.append("Content-Length", total.to_string());
            (false, total)
        }
    };

    Ok(Plan {
        ranges: (length > 0).then(|| RangeSpec::new(0, length)).into_iter().collect(),
        head,
        multipart: None,
        chunked,
        body: true,
        close_after,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Head,
    HeadOnly,
    Body,
    Closing,
    Done,
}

/// A stream job with its source measured and its framing fixed.
pub struct PreparedStream {
    source: Box<dyn StreamSource>,
    head: HttpMessage,
    ranges: Vec<RangeSpec>,
    range_index: usize,
    multipart: Option<Multipart>,
    chunked: bool,
    close_after: bool,
    buf: Vec<u8>,
    stage: Stage,
}

impl PreparedStream {
    pub fn head(&self) -> &HttpMessage {
        &self.head
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Whether the connection has to close once this stream is written.
    pub fn closes_connection(&self) -> bool {
        self.close_after
    }

    /// Whether any frame has been produced yet.
    pub fn started(&self) -> bool {
        !matches!(self.stage, Stage::Head | Stage::HeadOnly)
    }

    /// Frame that ends the body early and leaves the connection usable,
    /// if the framing allows one.
    pub fn cancel_frame(&self) -> Option<Bytes> {
        if self.chunked && self.stage != Stage::Done {
            Some(Bytes::from_static(chunked::LAST_CHUNK))
        } else {
            None
        }
    }

    /// Produce the next wire frame, or `None` when the stream is done.
    pub async fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self.stage {
                Stage::Head | Stage::HeadOnly => {
                    self.stage = if self.stage == Stage::Head {
                        Stage::Body
                    } else {
                        Stage::Done
                    };
                    let mut dst = BytesMut::with_capacity(256);
                    self.head.write_head(&mut dst);
                    return Ok(Some(dst.freeze()));
                }
                Stage::Body => {
                    let index = self.range_index;
                    let Some(range) = self.ranges.get_mut(index) else {
                        self.stage = Stage::Closing;
                        continue;
                    };

                    let mut prefix = BytesMut::new();
                    if range.remaining == range.length {
                        if let Some(multipart) = &self.multipart {
                            prefix.put_slice(multipart.part_header(index, range).as_bytes());
                        }
                        self.source.seek(SeekFrom::Start(range.position)).await?;
                    }

                    let want = usize::try_from(range.remaining)
                        .map_or(self.buf.len(), |r| r.min(self.buf.len()));
                    let n = self.source.read(&mut self.buf[..want]).await?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "stream source ended with {} bytes of range {} unsent",
                                range.remaining, index
                            ),
                        ));
                    }
                    range.remaining -= n as u64;
                    if range.remaining == 0 {
                        self.range_index += 1;
                    }

                    prefix.put_slice(&self.buf[..n]);
                    return Ok(Some(self.frame(&prefix)));
                }
                Stage::Closing => {
                    self.stage = Stage::Done;
                    let mut dst = BytesMut::new();
                    match (&self.multipart, self.chunked) {
                        (Some(multipart), true) => {
                            chunked::encode_chunk(multipart.closing().as_bytes(), &mut dst);
                            dst.put_slice(chunked::LAST_CHUNK);
                        }
                        (Some(multipart), false) => dst.put_slice(multipart.closing().as_bytes()),
                        (None, true) => dst.put_slice(chunked::LAST_CHUNK),
                        (None, false) => continue,
                    }
                    return Ok(Some(dst.freeze()));
                }
                Stage::Done => return Ok(None),
            }
        }
    }

    fn frame(&self, payload: &[u8]) -> Bytes {
        if self.chunked {
            let mut dst = BytesMut::with_capacity(payload.len() + 16);
            chunked::encode_chunk(payload, &mut dst);
            dst.freeze()
        } else {
            Bytes::copy_from_slice(payload)
        }
    }
}

impl fmt::Debug for PreparedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStream")
            .field("head", &self.head.start)
            .field("ranges", &self.ranges)
            .field("range_index", &self.range_index)
            .field("chunked", &self.chunked)
            .field("stage", &self.stage)
            .finish()
    }
}
