//! End-to-end tests for HTTP connections.
//!
//! Each test wires an [`HttpConnection`] to one end of an in-memory duplex
//! stream. The other end is either driven with raw bytes or wrapped in a
//! second connection acting as the control point.

use std::io::Cursor;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

use upnp_http::chunked::LAST_CHUNK;
use upnp_http::{
    requested_ranges, HttpConfig, HttpConnection, HttpEvent, HttpMessage, StreamOutcome,
};
use upnp_transport::{DisconnectReason, TransportSocket};

// ============================================================================
// Test Helpers
// ============================================================================

fn connection(stream: DuplexStream, config: HttpConfig) -> (HttpConnection, UnboundedReceiver<HttpEvent>) {
    let socket = TransportSocket::adopt_stream(stream, None, config.transport.clone()).unwrap();
    let conn = HttpConnection::new(socket, config).unwrap();
    let (_, events) = conn.subscribe_channel();
    conn.begin_receiving().unwrap();
    (conn, events)
}

/// Server connection plus the raw peer end.
fn raw_peer(capacity: usize) -> (HttpConnection, UnboundedReceiver<HttpEvent>, DuplexStream) {
    let (local, remote) = tokio::io::duplex(capacity);
    let (conn, events) = connection(local, HttpConfig::default());
    (conn, events, remote)
}

async fn next_event(events: &mut UnboundedReceiver<HttpEvent>) -> HttpEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Event channel closed")
}

async fn next_message(events: &mut UnboundedReceiver<HttpEvent>) -> HttpMessage {
    loop {
        if let HttpEvent::MessageReceived(message) = next_event(events).await {
            return message;
        }
    }
}

async fn next_stream_done(events: &mut UnboundedReceiver<HttpEvent>) -> (u64, StreamOutcome) {
    loop {
        if let HttpEvent::StreamDone { job, outcome } = next_event(events).await {
            return (job, outcome);
        }
    }
}

/// Read from `remote` until the buffered bytes end with `suffix`.
async fn read_until(remote: &mut DuplexStream, buf: &mut Vec<u8>, suffix: &[u8]) {
    let mut scratch = [0u8; 4096];
    while !buf.ends_with(suffix) {
        let n = timeout(Duration::from_secs(2), remote.read(&mut scratch))
            .await
            .expect("Timeout reading from connection")
            .unwrap();
        assert!(n > 0, "connection closed before {:?}", String::from_utf8_lossy(suffix));
        buf.extend_from_slice(&scratch[..n]);
    }
}

/// Read from `remote` until a complete head has arrived.
async fn read_head(remote: &mut DuplexStream, buf: &mut Vec<u8>) {
    let mut scratch = [0u8; 64];
    while find(buf, b"\r\n\r\n").is_none() {
        let n = timeout(Duration::from_secs(2), remote.read(&mut scratch))
            .await
            .expect("Timeout reading head")
            .unwrap();
        assert!(n > 0, "connection closed before the head");
        buf.extend_from_slice(&scratch[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ============================================================================
// Receiving
// ============================================================================

#[tokio::test]
async fn test_request_split_across_reads() {
    let (_conn, mut events, mut remote) = raw_peer(1024);

    remote.write_all(b"GET / HTTP/1.1\r\nHo").await.unwrap();
    sleep(Duration::from_millis(20)).await;
    remote.write_all(b"st: x\r\n\r\n").await.unwrap();

    let head = match next_event(&mut events).await {
        HttpEvent::HeadersReceived(head) => head,
        other => panic!("Expected HeadersReceived, got {other:?}"),
    };
    assert_eq!(head.method(), Some("GET"));

    let request = next_message(&mut events).await;
    assert_eq!(request.target(), Some("/"));
    assert_eq!(request.headers.get("host"), Some("x"));
    assert!(request.body.is_empty());
}

#[tokio::test]
async fn test_chunk_data_split_across_reads() {
    let (_conn, mut events, mut remote) = raw_peer(1024);

    remote
        .write_all(b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\na\r\n01234")
        .await
        .unwrap();
    sleep(Duration::from_millis(20)).await;
    remote.write_all(b"56789\r\n0\r\n\r\n").await.unwrap();

    let request = next_message(&mut events).await;
    assert_eq!(&request.body[..], b"0123456789");
}

#[tokio::test]
async fn test_protocol_error_closes_connection() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    remote
        .write_all(b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n")
        .await
        .unwrap();

    loop {
        if let HttpEvent::ConnectionClosed(reason) = next_event(&mut events).await {
            assert!(matches!(reason, DisconnectReason::Aborted(_)));
            break;
        }
    }
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_body_sink_receives_body() {
    let (conn, mut events, mut remote) = raw_peer(1024);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();

    struct ChannelSink(tokio::sync::mpsc::UnboundedSender<Vec<u8>>);
    impl std::io::Write for ChannelSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.0.send(buf.to_vec());
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    conn.set_body_sink_provider(move |_head| {
        Some(Box::new(ChannelSink(tx.clone())) as Box<dyn upnp_http::BodySink>)
    });
    remote
        .write_all(b"POST /notify HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();

    let message = next_message(&mut events).await;
    assert!(message.body.is_empty());

    let mut received = Vec::new();
    while let Ok(piece) = rx.try_recv() {
        received.extend(piece);
    }
    assert_eq!(received, b"hello");
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_chunked_stream_then_second_request() {
    let (conn, mut events, mut remote) = raw_peer(64 * 1024);

    remote.write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    next_message(&mut events).await;
    let job = conn
        .send_streamed_body(Cursor::new(vec![b'a'; 10_000]), None, "audio/mpeg")
        .unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, LAST_CHUNK).await;
    assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(find(&wire, b"Transfer-Encoding: chunked\r\n").is_some());

    let body_start = find(&wire, b"\r\n\r\n").unwrap() + 4;
    let body = &wire[body_start..];
    let mut expected = Vec::new();
    for size in [4096usize, 4096, 1808] {
        expected.extend_from_slice(format!("{size:x}\r\n").as_bytes());
        expected.extend(std::iter::repeat(b'a').take(size));
        expected.extend_from_slice(b"\r\n");
    }
    expected.extend_from_slice(LAST_CHUNK);
    assert_eq!(body, &expected[..]);

    assert_eq!(next_stream_done(&mut events).await, (job, StreamOutcome::Completed));

    // the connection is still usable
    remote.write_all(b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let second = next_message(&mut events).await;
    assert_eq!(second.target(), Some("/b"));
    conn.send_message(HttpMessage::response(204)).unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"\r\n\r\n").await;
    assert!(wire.starts_with(b"HTTP/1.1 204 No Content\r\n"));
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_http10_peer_gets_content_length() {
    let (conn, mut events, mut remote) = raw_peer(64 * 1024);

    remote
        .write_all(b"GET /a HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();
    next_message(&mut events).await;
    conn.send_streamed_body(Cursor::new(vec![b'z'; 5000]), None, "audio/wav")
        .unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, &[b'z'; 16]).await;
    while wire.len() < find(&wire, b"\r\n\r\n").unwrap() + 4 + 5000 {
        let mut scratch = [0u8; 4096];
        let n = remote.read(&mut scratch).await.unwrap();
        wire.extend_from_slice(&scratch[..n]);
    }
    assert!(wire.starts_with(b"HTTP/1.0 200 OK\r\n"));
    assert!(find(&wire, b"Content-Length: 5000\r\n").is_some());
    assert!(find(&wire, b"Connection: keep-alive\r\n").is_some());
    assert!(find(&wire, b"Transfer-Encoding").is_none());
}

#[tokio::test]
async fn test_multipart_ranges_between_connections() {
    let (server_end, client_end) = tokio::io::duplex(64 * 1024);
    let (server, mut server_events) = connection(server_end, HttpConfig::default());
    let (client, mut client_events) = connection(client_end, HttpConfig::default());

    client
        .send_message(
            HttpMessage::request("GET", "/track.flac")
                .with_header("Host", "renderer")
                .with_header("Range", "bytes=100-199,300-399"),
        )
        .unwrap();

    let request = next_message(&mut server_events).await;
    let ranges = requested_ranges(&request).unwrap();
    let source: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    server
        .send_streamed_body(Cursor::new(source.clone()), ranges, "audio/flac")
        .unwrap();

    let response = next_message(&mut client_events).await;
    assert_eq!(response.status(), Some(206));
    let content_type = response.headers.get("Content-Type").unwrap();
    let boundary = content_type
        .strip_prefix("multipart/byteranges; boundary=")
        .unwrap();

    let body = &response.body[..];
    let first = format!("--{boundary}\r\nContent-Type: audio/flac\r\nContent-range: bytes 100-199/1000\r\n\r\n");
    let second = format!("\r\n--{boundary}\r\nContent-Type: audio/flac\r\nContent-range: bytes 300-399/1000\r\n\r\n");
    let closing = format!("\r\n--{boundary}--\r\n");

    let mut expected = Vec::new();
    expected.extend_from_slice(first.as_bytes());
    expected.extend_from_slice(&source[100..200]);
    expected.extend_from_slice(second.as_bytes());
    expected.extend_from_slice(&source[300..400]);
    expected.extend_from_slice(closing.as_bytes());
    assert_eq!(body, &expected[..]);
}

#[tokio::test]
async fn test_unsatisfiable_range_gets_416() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    remote
        .write_all(b"GET /a HTTP/1.1\r\nRange: bytes=5000-\r\n\r\n")
        .await
        .unwrap();
    let request = next_message(&mut events).await;
    conn.send_streamed_body(Cursor::new(vec![0u8; 1000]), requested_ranges(&request).unwrap(), "audio/mpeg")
        .unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"\r\n\r\n").await;
    assert!(wire.starts_with(b"HTTP/1.1 416 "));
    assert!(find(&wire, b"Content-Range: bytes */1000\r\n").is_some());
}

#[tokio::test]
async fn test_head_response_has_no_body() {
    let (server_end, client_end) = tokio::io::duplex(64 * 1024);
    let (server, mut server_events) = connection(server_end, HttpConfig::default());
    let (client, mut client_events) = connection(client_end, HttpConfig::default());

    client
        .send_message(HttpMessage::request("HEAD", "/track.mp3").with_header("Host", "r"))
        .unwrap();
    next_message(&mut server_events).await;
    server
        .send_streamed_body(Cursor::new(vec![1u8; 3000]), None, "audio/mpeg")
        .unwrap();

    let response = next_message(&mut client_events).await;
    assert_eq!(response.status(), Some(200));
    assert!(response.is_chunked());
    assert!(response.body.is_empty());

    // a following exchange parses cleanly
    client
        .send_message(HttpMessage::request("GET", "/track.mp3").with_header("Host", "r"))
        .unwrap();
    next_message(&mut server_events).await;
    server
        .send_streamed_body(Cursor::new(vec![1u8; 3000]), None, "audio/mpeg")
        .unwrap();
    let response = next_message(&mut client_events).await;
    assert_eq!(response.body.len(), 3000);
}

#[tokio::test]
async fn test_plain_reply_to_head_is_head_only() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    remote.write_all(b"HEAD /desc.xml HTTP/1.1\r\nHost: d\r\n\r\n").await.unwrap();
    next_message(&mut events).await;
    conn.send_message(HttpMessage::response(200).with_body("hello"))
        .unwrap();

    remote.write_all(b"GET /desc.xml HTTP/1.1\r\nHost: d\r\n\r\n").await.unwrap();
    next_message(&mut events).await;
    conn.send_message(HttpMessage::response(200).with_body("world"))
        .unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"world").await;
    let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
    let mut expected = head.to_vec();
    expected.extend_from_slice(head);
    expected.extend_from_slice(b"world");
    assert_eq!(wire, expected);
}

#[tokio::test]
async fn test_streamed_message_honours_declared_length() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    remote.write_all(b"GET /a HTTP/1.1\r\n\r\n").await.unwrap();
    next_message(&mut events).await;
    conn.send_streamed_message(
        HttpMessage::response(200).with_header("Content-Length", "5"),
        Cursor::new(b"0123456789".to_vec()),
    )
    .unwrap();
    let (_, outcome) = next_stream_done(&mut events).await;
    assert_eq!(outcome, StreamOutcome::Completed);

    remote.write_all(b"GET /b HTTP/1.1\r\n\r\n").await.unwrap();
    next_message(&mut events).await;
    conn.send_message(HttpMessage::response(204)).unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"204 No Content\r\n\r\n").await;
    assert_eq!(
        wire,
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n01234HTTP/1.1 204 No Content\r\n\r\n".to_vec()
    );
}

// ============================================================================
// Cancellation and close
// ============================================================================

#[tokio::test]
async fn test_close_queued_stream() {
    let (conn, mut events, mut remote) = raw_peer(64);

    let first = conn
        .send_streamed_body(Cursor::new(vec![b'a'; 2000]), None, "audio/mpeg")
        .unwrap();
    let second = conn
        .send_streamed_body(Cursor::new(vec![b'b'; 2000]), None, "audio/mpeg")
        .unwrap();

    assert!(conn.close_stream(second));
    assert_eq!(next_stream_done(&mut events).await, (second, StreamOutcome::Cancelled));
    assert!(!conn.close_stream(second));

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, LAST_CHUNK).await;
    assert_eq!(next_stream_done(&mut events).await, (first, StreamOutcome::Completed));
    assert!(find(&wire, b"bbbb").is_none());
}

#[tokio::test]
async fn test_close_active_chunked_stream() {
    let (conn, mut events, mut remote) = raw_peer(64);

    let job = conn
        .send_streamed_body(Cursor::new(vec![b'a'; 100_000]), None, "audio/mpeg")
        .unwrap();

    // the head is on the wire and the pump is blocked on the first slice
    let mut wire = Vec::new();
    read_head(&mut remote, &mut wire).await;
    assert!(conn.close_stream(job));

    read_until(&mut remote, &mut wire, LAST_CHUNK).await;
    assert_eq!(next_stream_done(&mut events).await, (job, StreamOutcome::Cancelled));
    assert!(wire.len() < 100_000);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_request_without_keep_alive_closes_after_response() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    remote.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
    next_message(&mut events).await;
    conn.send_message(HttpMessage::response(200).with_body("hi")).unwrap();

    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"hi").await;
    assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));

    loop {
        if let HttpEvent::ConnectionClosed(reason) = next_event(&mut events).await {
            assert_eq!(reason, DisconnectReason::Closed);
            break;
        }
    }
    assert!(conn.is_closed());
    assert!(conn.send_message(HttpMessage::response(200)).is_err());
}

#[tokio::test]
async fn test_response_with_connection_close_closes() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    conn.send_message(HttpMessage::request("GET", "/desc.xml").with_header("Host", "d"))
        .unwrap();
    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"\r\n\r\n").await;

    remote
        .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok")
        .await
        .unwrap();

    let response = next_message(&mut events).await;
    assert_eq!(&response.body[..], b"ok");
    loop {
        if let HttpEvent::ConnectionClosed(_) = next_event(&mut events).await {
            break;
        }
    }
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_close_delimited_response_completes_on_peer_close() {
    let (conn, mut events, mut remote) = raw_peer(1024);

    conn.send_message(HttpMessage::request("GET", "/legacy").with_version(upnp_http::Version::Http10))
        .unwrap();
    let mut wire = Vec::new();
    read_until(&mut remote, &mut wire, b"\r\n\r\n").await;

    remote
        .write_all(b"HTTP/1.0 200 OK\r\nContent-Type: text/xml\r\n\r\n<root/>")
        .await
        .unwrap();
    drop(remote);

    let response = next_message(&mut events).await;
    assert_eq!(&response.body[..], b"<root/>");
}

#[tokio::test]
async fn test_pending_streams_report_disconnect() {
    let (conn, mut events, remote) = raw_peer(64);

    let first = conn
        .send_streamed_body(Cursor::new(vec![b'a'; 100_000]), None, "audio/mpeg")
        .unwrap();
    let second = conn
        .send_streamed_body(Cursor::new(vec![b'b'; 100_000]), None, "audio/mpeg")
        .unwrap();
    sleep(Duration::from_millis(20)).await;
    drop(remote);

    let mut outcomes = Vec::new();
    let mut closed = false;
    while outcomes.len() < 2 || !closed {
        match next_event(&mut events).await {
            HttpEvent::StreamDone { job, outcome } => outcomes.push((job, outcome)),
            HttpEvent::ConnectionClosed(_) => closed = true,
            _ => {}
        }
    }
    outcomes.sort_by_key(|(job, _)| *job);
    assert_eq!(
        outcomes,
        vec![
            (first, StreamOutcome::Disconnected),
            (second, StreamOutcome::Disconnected),
        ]
    );
}

#[tokio::test]
async fn test_diagnostics_events() {
    let (local, mut remote) = tokio::io::duplex(1024);
    let (conn, mut events) = connection(local, HttpConfig::default().with_diagnostics(true));

    remote.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let mut raw = Vec::new();
    loop {
        match next_event(&mut events).await {
            HttpEvent::RawReceived(bytes) => raw.extend_from_slice(&bytes),
            HttpEvent::PacketParsed(message) => {
                assert_eq!(message.target(), Some("/"));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(raw, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

    conn.send_message(HttpMessage::response(204)).unwrap();
    let mut sent = false;
    let mut packet = false;
    while !(sent && packet) {
        match next_event(&mut events).await {
            HttpEvent::RawSent(bytes) => {
                assert!(bytes.starts_with(b"HTTP/1.1 204"));
                sent = true;
            }
            HttpEvent::PacketSent(message) => {
                assert_eq!(message.status(), Some(204));
                packet = true;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_scripted_peer_exchange() {
    let mock = tokio_test::io::Builder::new()
        .read(b"SUBSCRIBE /evt HTTP/1.1\r\nHost: d\r\nCALLBACK: <http://x/>\r\n\r\n")
        .write(b"HTTP/1.1 200 OK\r\nSID: uuid:1\r\nContent-Length: 0\r\n\r\n")
        .build();
    let (conn, mut events) = {
        let config = HttpConfig::default();
        let socket = TransportSocket::adopt_stream(mock, None, config.transport.clone()).unwrap();
        let conn = HttpConnection::new(socket, config).unwrap();
        let (_, events) = conn.subscribe_channel();
        conn.begin_receiving().unwrap();
        (conn, events)
    };

    let request = next_message(&mut events).await;
    assert_eq!(request.method(), Some("SUBSCRIBE"));
    assert_eq!(request.headers.get("callback"), Some("<http://x/>"));
    conn.send_message(HttpMessage::response(200).with_header("SID", "uuid:1"))
        .unwrap();

    loop {
        if let HttpEvent::ConnectionClosed(reason) = next_event(&mut events).await {
            assert_eq!(reason, DisconnectReason::PeerClosed);
            break;
        }
    }
}
