use atoi::FromRadix10Checked;

use crate::error::ProtocolError;
use crate::message::{StartLine, Version};

/// Parse a request line (`GET / HTTP/1.1`, or `GET /` for HTTP/0.9) or a
/// status line (`HTTP/1.1 200 OK`).
pub fn parse_start_line(line: &[u8]) -> Result<StartLine, ProtocolError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::InvalidStartLine(String::from_utf8_lossy(line).into_owned()))?;
    let invalid = || ProtocolError::InvalidStartLine(text.to_string());

    if text.starts_with("HTTP/") {
        return parse_status_line(text);
    }

    let mut parts = text.split(' ').filter(|p| !p.is_empty());
    let method = parts.next().ok_or_else(invalid)?;
    let target = parts.next().ok_or_else(invalid)?;
    let version = match parts.next() {
        Some(v) => v.parse::<Version>()?,
        None => Version::Http09,
    };
    if parts.next().is_some() || !method.bytes().all(is_token_byte) {
        return Err(invalid());
    }

    Ok(StartLine::Request {
        method: method.to_string(),
        target: target.to_string(),
        version,
    })
}

fn parse_status_line(text: &str) -> Result<StartLine, ProtocolError> {
    let invalid = || ProtocolError::InvalidStartLine(text.to_string());

    let (version, rest) = text.split_once(' ').ok_or_else(invalid)?;
    let version = version.parse::<Version>()?;
    if version == Version::Http09 {
        return Err(ProtocolError::InvalidVersion(version.to_string()));
    }

    let (status, len) = u16::from_radix_10_checked(rest.as_bytes());
    let status = match status {
        Some(status) if len == 3 && (100..=999).contains(&status) => status,
        _ => return Err(invalid()),
    };
    let reason = match rest.as_bytes().get(3) {
        None => "",
        Some(b' ') => rest[4..].trim(),
        Some(_) => return Err(invalid()),
    };

    Ok(StartLine::Response {
        version,
        status,
        reason: reason.to_string(),
    })
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
