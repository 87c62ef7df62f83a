//! Byte ranges: `Range` header parsing, resolution against a resource
//! length, and `multipart/byteranges` framing.

use crate::error::RangeError;
use crate::message::HttpMessage;

/// One range as requested by the client, before the resource length is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-last`, both inclusive
    FromTo(u64, u64),
    /// `first-`
    From(u64),
    /// `-count`: the final `count` bytes
    Suffix(u64),
}

impl ByteRange {
    /// Clamp against a resource of `total` bytes. `None` when the range does
    /// not overlap the resource.
    pub fn resolve(&self, total: u64) -> Option<RangeSpec> {
        match *self {
            ByteRange::FromTo(first, last) if last < first => None,
            ByteRange::FromTo(first, last) => {
                RangeSpec::clamped(first, (last - first).saturating_add(1), total)
            }
            ByteRange::From(first) => RangeSpec::clamped(first, total.saturating_sub(first), total),
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(count) => {
                let first = total.saturating_sub(count);
                RangeSpec::clamped(first, total - first, total)
            }
        }
    }
}

/// A resolved range being streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    /// Offset of the first byte in the source
    pub position: u64,
    /// Number of bytes served
    pub length: u64,
    /// Bytes of this range not yet sent
    pub remaining: u64,
}

impl RangeSpec {
    pub fn new(position: u64, length: u64) -> Self {
        Self {
            position,
            length,
            remaining: length,
        }
    }

    /// `[position, position+length)` cut down to a resource of `total`
    /// bytes; `None` when nothing is left.
    pub fn clamped(position: u64, length: u64, total: u64) -> Option<Self> {
        if position >= total || length == 0 {
            return None;
        }
        Some(Self::new(position, length.min(total - position)))
    }

    /// Offset of the last byte, inclusive. An empty range reports its
    /// position.
    pub fn last(&self) -> u64 {
        self.position.saturating_add(self.length.saturating_sub(1))
    }

    /// Value for `Content-Range`, e.g. `bytes 100-199/1000`.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.position, self.last(), total)
    }
}

/// Parse one `Range` header value such as `bytes=0-499, -500`.
pub fn parse_range_header(value: &str) -> Result<Vec<ByteRange>, RangeError> {
    let (unit, set) = value
        .trim()
        .split_once('=')
        .ok_or_else(|| RangeError::Malformed(value.to_string()))?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(RangeError::UnsupportedUnit(unit.trim().to_string()));
    }

    let mut ranges = Vec::new();
    for spec in set.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        ranges.push(parse_range_spec(spec)?);
    }
    if ranges.is_empty() {
        return Err(RangeError::Malformed(value.to_string()));
    }
    Ok(ranges)
}

/// Parse every `Range` header of a request, in order. Repeated headers are
/// treated as one comma-separated list.
pub fn parse_range_headers<'a>(
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<ByteRange>, RangeError> {
    let mut ranges = Vec::new();
    for value in values {
        ranges.extend(parse_range_header(value)?);
    }
    Ok(ranges)
}

/// Ranges requested by `request`, or `None` when it has no `Range` header.
pub fn requested_ranges(request: &HttpMessage) -> Result<Option<Vec<ByteRange>>, RangeError> {
    if !request.headers.contains("Range") {
        return Ok(None);
    }
    parse_range_headers(request.headers.get_all("Range")).map(Some)
}

fn parse_range_spec(spec: &str) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(spec.to_string());
    let number = |s: &str| s.trim().parse::<u64>().map_err(|_| malformed());

    let (first, last) = spec.split_once('-').ok_or_else(malformed)?;
    match (first.trim().is_empty(), last.trim().is_empty()) {
        (true, true) => Err(malformed()),
        (true, false) => Ok(ByteRange::Suffix(number(last)?)),
        (false, true) => Ok(ByteRange::From(number(first)?)),
        (false, false) => {
            let (first, last) = (number(first)?, number(last)?);
            if last < first {
                return Err(malformed());
            }
            Ok(ByteRange::FromTo(first, last))
        }
    }
}

/// Resolve requested ranges against a resource of `total` bytes, dropping
/// the ones that miss it. Fails when none remain.
pub fn resolve_ranges(requested: &[ByteRange], total: u64) -> Result<Vec<RangeSpec>, RangeError> {
    let resolved: Vec<RangeSpec> = requested.iter().filter_map(|r| r.resolve(total)).collect();
    if resolved.is_empty() {
        return Err(RangeError::Unsatisfiable { total });
    }
    Ok(resolved)
}

/// Framing for a `multipart/byteranges` body.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
    content_type: String,
    total: u64,
}

impl Multipart {
    /// New framing with a freshly generated boundary.
    pub fn new(content_type: impl Into<String>, total: u64) -> Self {
        Self::with_boundary(uuid::Uuid::new_v4().simple().to_string(), content_type, total)
    }

    pub fn with_boundary(
        boundary: impl Into<String>,
        content_type: impl Into<String>,
        total: u64,
    ) -> Self {
        Self {
            boundary: boundary.into(),
            content_type: content_type.into(),
            total,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the response's `Content-Type` header.
    pub fn content_type_header(&self) -> String {
        format!("multipart/byteranges; boundary={}", self.boundary)
    }

    /// Header block written before the part at `index`. Every part but the
    /// first is separated from the previous one by CRLF.
    pub fn part_header(&self, index: usize, range: &RangeSpec) -> String {
        format!(
            "{}--{}\r\nContent-Type: {}\r\nContent-range: {}\r\n\r\n",
            if index == 0 { "" } else { "\r\n" },
            self.boundary,
            self.content_type,
            range.content_range(self.total)
        )
    }

    /// Closing delimiter written after the last part.
    pub fn closing(&self) -> String {
        format!("\r\n--{}--\r\n", self.boundary)
    }

    /// Exact body length for `ranges`, used for `Content-Length` framing.
    pub fn body_len(&self, ranges: &[RangeSpec]) -> u64 {
        let framing: u64 = ranges
            .iter()
            .enumerate()
            .map(|(i, r)| self.part_header(i, r).len() as u64)
            .sum();
        let data: u64 = ranges.iter().map(|r| r.length).sum();
        framing + data + self.closing().len() as u64
    }
}
