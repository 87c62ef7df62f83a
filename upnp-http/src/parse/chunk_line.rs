use atoi::FromRadix16Checked;

use crate::error::ProtocolError;

/// A chunk-size line, `<hex>[;extension]`.
#[derive(Debug, PartialEq, Eq)]
pub struct ChunkLine<'a> {
    pub chunk_size: u64,
    pub extension: Option<&'a [u8]>,
}

impl<'a> ChunkLine<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<ChunkLine<'a>, ProtocolError> {
        let invalid = || ProtocolError::InvalidChunkSize(String::from_utf8_lossy(buf).into_owned());

        let (chunk_size, offset) = u64::from_radix_16_checked(buf);
        let Some(chunk_size) = chunk_size else {
            return Err(invalid());
        };
        if offset == 0 {
            return Err(invalid());
        }

        let rest = &buf[offset..];
        let rest_trimmed = trim_ascii_start(rest);
        match rest_trimmed.first() {
            None => Ok(ChunkLine {
                chunk_size,
                extension: None,
            }),
            Some(b';') => Ok(ChunkLine {
                chunk_size,
                extension: Some(&rest_trimmed[1..]),
            }),
            Some(_) => Err(invalid()),
        }
    }
}

fn trim_ascii_start(mut buf: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = buf {
        buf = rest;
    }
    buf
}
