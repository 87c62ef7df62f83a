//! Line-level parsers for the HTTP head and chunked framing.
//!
//! Every parser takes one line with its CRLF already stripped.

mod chunk_line;
mod header_line;
mod start_line;

pub use chunk_line::ChunkLine;
pub use header_line::HeaderLine;
pub use start_line::parse_start_line;

use memchr::memmem;

/// Offset of the `CRLF CRLF` that ends a header block.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n\r\n")
}

/// Offset of the first CRLF.
pub fn find_line_end(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nrest"), Some(23));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: x\r\n\r"), None);
        assert_eq!(find_line_end(b"a;ext\r\n"), Some(5));
        assert_eq!(find_line_end(b"a\r"), None);
    }
}
