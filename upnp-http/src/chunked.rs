//! Chunked transfer-coding writer.

use bytes::{BufMut, BytesMut};

use crate::message::Headers;

/// The terminator written after the last chunk when there are no trailers.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Append `<hex-length>CRLF<data>CRLF`. Empty input writes nothing, since a
/// zero-length chunk would end the body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    if data.is_empty() {
        return;
    }
    dst.reserve(data.len() + 20);
    dst.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Append the last chunk, optional trailer fields and the final CRLF.
pub fn encode_last_chunk(trailers: Option<&Headers>, dst: &mut BytesMut) {
    match trailers {
        Some(trailers) if !trailers.is_empty() => {
            dst.put_slice(b"0\r\n");
            trailers.write_to(dst);
            dst.put_slice(b"\r\n");
        }
        _ => dst.put_slice(LAST_CHUNK),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_framing() {
        let mut dst = BytesMut::new();
        encode_chunk(&[b'x'; 26], &mut dst);
        assert!(dst.starts_with(b"1a\r\n"));
        assert!(dst.ends_with(b"x\r\n"));
        assert_eq!(dst.len(), 4 + 26 + 2);
    }

    #[test]
    fn test_empty_chunk_is_skipped() {
        let mut dst = BytesMut::new();
        encode_chunk(b"", &mut dst);
        assert!(dst.is_empty());
    }

    #[test]
    fn test_last_chunk_with_trailers() {
        let mut dst = BytesMut::new();
        let trailers: Headers = [("X-Checksum", "abc")].into_iter().collect();
        encode_last_chunk(Some(&trailers), &mut dst);
        assert_eq!(&dst[..], b"0\r\nX-Checksum: abc\r\n\r\n");

        let mut dst = BytesMut::new();
        encode_last_chunk(None, &mut dst);
        assert_eq!(&dst[..], LAST_CHUNK);
    }
}
