use crate::error::ProtocolError;

/// One `Name: Value` line.
#[derive(Debug, PartialEq, Eq)]
pub struct HeaderLine<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> HeaderLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<HeaderLine<'a>, ProtocolError> {
        let invalid = || ProtocolError::InvalidHeaderLine(String::from_utf8_lossy(buf).into_owned());

        let line = std::str::from_utf8(buf).map_err(|_| invalid())?;
        let Some(p) = memchr::memchr(b':', line.as_bytes()) else {
            return Err(invalid());
        };

        let name = &line[..p];
        // no whitespace allowed between the field name and the colon
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(invalid());
        }

        Ok(HeaderLine {
            name,
            value: line[p + 1..].trim(),
        })
    }
}
