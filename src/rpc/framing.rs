//! Content-Length message framing.
//!
//! This module implements the header+content envelope used by the
//! Language Server Protocol over any duplex byte stream.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! Content-Type: application/vscode-jsonrpc; charset=utf8\r\n   (optional)
//! \r\n
//! <message-body>
//! ```
//!
//! Header lines are decoded one byte per character and must end in CRLF.
//! Header names are case-insensitive. The reader never consumes bytes past
//! the end of the current frame.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::FramingError;

/// Default maximum message size (100MB) to prevent OOM from malicious/buggy peers.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 100 * 1024 * 1024;

/// `Content-Type` assumed when the header is absent.
pub const DEFAULT_CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf8";

/// Longest header line accepted, CRLF included.
const MAX_HEADER_LINE: u64 = 8 * 1024;

/// One correctly framed message.
///
/// Framing succeeded, so the next frame boundary is known even when the
/// content itself is unusable.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Content parsed as JSON.
    Json(Value),
    /// Content could not be decoded or parsed. Scoped to this message only.
    Unparsable(String),
}

#[derive(Debug, Default)]
struct FrameHeaders {
    content_length: Option<usize>,
    charset: Option<String>,
}

/// Reads Content-Length framed JSON messages from a buffered stream.
///
/// Each call to [`FrameReader::read_frame`] yields the next message in
/// receipt order; the sequence is not restartable.
pub struct FrameReader<R> {
    reader: R,
    max_content_length: usize,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }

    /// Override the maximum accepted `Content-Length`.
    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }

    /// Read the next framed message.
    ///
    /// # Protocol
    ///
    /// 1. Read CRLF-terminated header lines until an empty line
    /// 2. Extract Content-Length (required) and the Content-Type charset
    /// 3. Read exactly Content-Length bytes and parse them as JSON
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] if:
    /// - The stream closes inside a header block or content block
    /// - Content-Length is missing, unparsable, or above the configured limit
    /// - A header line is malformed
    ///
    /// Invalid JSON or an unsupported charset is not an error here; it is
    /// reported as [`Frame::Unparsable`].
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        let Some(headers) = self.read_headers().await? else {
            return Ok(None);
        };

        let size = headers
            .content_length
            .ok_or(FramingError::MissingContentLength)?;

        if size > self.max_content_length {
            return Err(FramingError::MessageTooLarge {
                size,
                max: self.max_content_length,
            });
        }

        let mut body = Vec::with_capacity(size);
        (&mut self.reader)
            .take(size as u64)
            .read_to_end(&mut body)
            .await?;

        if body.len() < size {
            return Err(FramingError::TruncatedContent {
                expected: size,
                received: body.len(),
            });
        }

        Ok(Some(decode_content(body, headers.charset.as_deref())))
    }

    /// Read the header block. `None` means clean EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<FrameHeaders>, FramingError> {
        let mut headers = FrameHeaders::default();
        let mut first_line = true;

        loop {
            let mut line = Vec::new();
            let bytes_read = (&mut self.reader)
                .take(MAX_HEADER_LINE)
                .read_until(b'\n', &mut line)
                .await?;

            if bytes_read == 0 {
                if first_line {
                    return Ok(None);
                }
                return Err(FramingError::TruncatedHeader);
            }
            first_line = false;

            let Some(content) = line.strip_suffix(b"\r\n") else {
                if line.ends_with(b"\n") || line.len() as u64 >= MAX_HEADER_LINE {
                    return Err(FramingError::MalformedHeader(decode_header_bytes(&line)));
                }
                return Err(FramingError::TruncatedHeader);
            };

            // Empty line signals end of headers
            if content.is_empty() {
                return Ok(Some(headers));
            }

            let text = decode_header_bytes(content);
            let Some((name, value)) = text.split_once(':') else {
                return Err(FramingError::MalformedHeader(text));
            };
            let name = name.trim();
            let value = value.trim();

            if name.eq_ignore_ascii_case("Content-Length") {
                headers.content_length = Some(parse_content_length(value)?);
            } else if name.eq_ignore_ascii_case("Content-Type") {
                headers.charset = parse_charset(value);
            } else {
                tracing::debug!("Ignoring unknown header {:?}", name);
            }
        }
    }
}

/// Decode header bytes with a fixed single-byte-per-character mapping.
fn decode_header_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Parse a `Content-Length` value: ASCII digits only, no sign.
fn parse_content_length(value: &str) -> Result<usize, FramingError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FramingError::InvalidContentLength(value.to_string()));
    }
    value
        .parse()
        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))
}

/// Extract the `charset` parameter from a `Content-Type` value.
fn parse_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn is_utf8_charset(charset: &str) -> bool {
    charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8")
}

fn decode_content(body: Vec<u8>, charset: Option<&str>) -> Frame {
    if let Some(charset) = charset {
        if !is_utf8_charset(charset) {
            return Frame::Unparsable(format!("Unsupported charset: {}", charset));
        }
    }

    let text = match String::from_utf8(body) {
        Ok(text) => text,
        Err(e) => return Frame::Unparsable(format!("Content is not valid UTF-8: {}", e)),
    };

    match serde_json::from_str(&text) {
        Ok(value) => Frame::Json(value),
        Err(e) => Frame::Unparsable(format!("Content is not valid JSON: {}", e)),
    }
}

/// Serialize a message into one complete frame (header + content).
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode_frame<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Writes Content-Length framed JSON messages.
///
/// Each frame is emitted with a single `write_all`, so a writer guarded by a
/// mutex never interleaves one message's header with another's content.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one framed message and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, the write, or the flush fails.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, value: &T) -> std::io::Result<()> {
        let frame = encode_frame(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }

    /// Close the write side of the stream.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::BufReader;
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn read_one(input: &[u8]) -> Result<Option<Frame>, FramingError> {
        let mut reader = FrameReader::new(input);
        timeout(TEST_TIMEOUT, reader.read_frame())
            .await
            .expect("Test timed out")
    }

    #[tokio::test]
    async fn test_decode_initialize_request() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
        let raw = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);

        let frame = read_one(raw.as_bytes()).await.unwrap().unwrap();

        assert_eq!(
            frame,
            Frame::Json(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        );
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(BufReader::new(server));

        let value = json!({"nested": {"list": [1, 2.5, null, "ü"]}, "flag": true});
        writer.write_frame(&value).await.expect("Write failed");

        let received = timeout(TEST_TIMEOUT, reader.read_frame())
            .await
            .expect("Test timed out")
            .expect("Read failed");

        assert_eq!(received, Some(Frame::Json(value)));
    }

    #[tokio::test]
    async fn test_roundtrip_edge_values() {
        let mut deep = json!("bottom");
        for depth in 0..100 {
            deep = if depth % 2 == 0 { json!([deep]) } else { json!({"d": deep}) };
        }

        let values = vec![
            json!({}),
            json!([]),
            json!(""),
            json!(i64::MAX),
            json!(i64::MIN),
            json!(u64::MAX),
            json!("quote \" backslash \\ slash / tab \t newline \n return \r"),
            json!("\u{0000}\u{0001}\u{001f}\u{007f}\u{2028}\u{2029}"),
            json!({"formula": "🦀 Mg𝐎 𝔸", "surrogates": "\u{1F600}\u{10FFFF}"}),
            json!("Content-Length: 3\r\n\r\n{}"),
            json!({"": null, "nested": [{}, [], [[]], {"a": {}}]}),
            deep,
        ];

        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(BufReader::new(server));

        for value in values {
            writer.write_frame(&value).await.expect("Write failed");
            let received = timeout(TEST_TIMEOUT, reader.read_frame())
                .await
                .expect("Test timed out")
                .expect("Read failed");
            assert_eq!(received, Some(Frame::Json(value)));
        }
    }

    #[test]
    fn test_encode_uses_byte_length() {
        let frame = encode_frame(&json!("é")).unwrap();
        // "é" serializes to 4 bytes: quote, two UTF-8 bytes, quote
        assert_eq!(frame, b"Content-Length: 4\r\n\r\n\"\xc3\xa9\"".to_vec());
    }

    #[tokio::test]
    async fn test_clean_eof_yields_none() {
        assert!(read_one(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_headers_is_framing_error() {
        let result = read_one(b"Content-Length: 10").await;
        assert!(matches!(result, Err(FramingError::TruncatedHeader)));

        let result = read_one(b"Content-Length: 10\r\n").await;
        assert!(matches!(result, Err(FramingError::TruncatedHeader)));
    }

    #[tokio::test]
    async fn test_truncated_content_is_framing_error() {
        let result = read_one(b"Content-Length: 10\r\n\r\n{\"a\":").await;
        match result {
            Err(FramingError::TruncatedContent { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 5);
            }
            other => panic!("Expected TruncatedContent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let result = read_one(b"Content-Type: application/json\r\n\r\n{}").await;
        assert!(matches!(result, Err(FramingError::MissingContentLength)));

        let result = read_one(b"\r\n").await;
        assert!(matches!(result, Err(FramingError::MissingContentLength)));
    }

    #[tokio::test]
    async fn test_invalid_content_length_values() {
        for value in ["abc", "-5", "+5", "12abc", "", "1 2"] {
            let raw = format!("Content-Length: {}\r\n\r\n", value);
            let result = read_one(raw.as_bytes()).await;
            assert!(
                matches!(result, Err(FramingError::InvalidContentLength(_))),
                "Expected InvalidContentLength for {:?}, got {:?}",
                value,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_bare_lf_header_is_malformed() {
        let result = read_one(b"Content-Length: 2\n\n{}").await;
        assert!(matches!(result, Err(FramingError::MalformedHeader(_))));
    }

    #[tokio::test]
    async fn test_header_without_colon_is_malformed() {
        let result = read_one(b"Content-Length 2\r\n\r\n{}").await;
        assert!(matches!(result, Err(FramingError::MalformedHeader(_))));
    }

    #[tokio::test]
    async fn test_case_insensitive_header_and_content_type() {
        let raw = b"content-length: 2\r\nCONTENT-TYPE: application/vscode-jsonrpc; charset=UTF-8\r\n\r\n{}";
        let frame = read_one(raw).await.unwrap().unwrap();
        assert_eq!(frame, Frame::Json(json!({})));
    }

    #[tokio::test]
    async fn test_unknown_headers_ignored() {
        let raw = b"X-Trace: abc\r\nContent-Length: 4\r\n\r\nnull";
        let frame = read_one(raw).await.unwrap().unwrap();
        assert_eq!(frame, Frame::Json(Value::Null));
    }

    #[tokio::test]
    async fn test_invalid_json_is_scoped_to_message() {
        let raw = b"Content-Length: 3\r\n\r\n{{{Content-Length: 2\r\n\r\n[]";
        let mut reader = FrameReader::new(&raw[..]);

        let first = reader.read_frame().await.unwrap().unwrap();
        assert!(matches!(first, Frame::Unparsable(_)));

        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second, Frame::Json(json!([])));

        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_charset_is_unparsable() {
        let raw = b"Content-Length: 2\r\nContent-Type: application/json; charset=latin1\r\n\r\n{}";
        let frame = read_one(raw).await.unwrap().unwrap();
        match frame {
            Frame::Unparsable(reason) => assert!(reason.contains("latin1")),
            other => panic!("Expected Unparsable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_unparsable() {
        let raw = b"Content-Length: 2\r\n\r\n\xff\xfe";
        let frame = read_one(raw).await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Unparsable(_)));
    }

    #[tokio::test]
    async fn test_rejects_oversized_message() {
        let raw = b"Content-Length: 100\r\n\r\n";
        let mut reader = FrameReader::new(&raw[..]).with_max_content_length(10);
        let result = reader.read_frame().await;
        match result {
            Err(FramingError::MessageTooLarge { size, max }) => {
                assert_eq!(size, 100);
                assert_eq!(max, 10);
            }
            other => panic!("Expected MessageTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_does_not_read_past_frame_boundary() {
        let raw = b"Content-Length: 2\r\n\r\n{}trailing";
        let mut reader = FrameReader::new(&raw[..]);

        reader.read_frame().await.unwrap().unwrap();

        let mut rest = Vec::new();
        reader.reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"trailing");
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let (client, server) = tokio::io::duplex(256);
        let writer = Arc::new(Mutex::new(FrameWriter::new(client)));

        let mut tasks = Vec::new();
        for sender in 0..4 {
            let writer = Arc::clone(&writer);
            tasks.push(tokio::spawn(async move {
                for seq in 0..25 {
                    let value = json!({"sender": sender, "seq": seq, "pad": "x".repeat(100)});
                    writer.lock().await.write_frame(&value).await.unwrap();
                }
            }));
        }

        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(BufReader::new(server));
            let mut count = 0;
            while count < 100 {
                match reader.read_frame().await.unwrap() {
                    Some(Frame::Json(value)) => {
                        assert_eq!(value["pad"].as_str().unwrap().len(), 100);
                        count += 1;
                    }
                    other => panic!("Unexpected frame: {:?}", other),
                }
            }
            count
        });

        for task in tasks {
            task.await.unwrap();
        }
        let count = timeout(TEST_TIMEOUT, reader_task)
            .await
            .expect("Test timed out")
            .unwrap();
        assert_eq!(count, 100);
    }

    #[test]
    fn test_parse_charset() {
        assert_eq!(
            parse_charset("application/vscode-jsonrpc; charset=utf8"),
            Some("utf8".to_string())
        );
        assert_eq!(
            parse_charset("application/json; Charset=\"UTF-8\""),
            Some("UTF-8".to_string())
        );
        assert_eq!(parse_charset("application/json"), None);
    }
}
