//! Newline-delimited JSON framing for stream transports
//!
//! Used on `tcp://` and `unix://` connections. WebSocket connections carry
//! the same JSON text one message per frame and only need
//! [`encode_request`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Request, Response};

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Serialize a request to its JSON text form
pub fn encode_request(request: &Request) -> Result<String, CodecError> {
    let text = serde_json::to_string(request)?;
    check_size(text.len())?;
    Ok(text)
}

/// Codec for Request (encoding) and raw response text (decoding)
///
/// Responses are handed up undecoded so the caller can check the tag
/// against the outstanding request before interpreting the body.
#[derive(Debug, Default)]
pub struct ClientCodec {
    lines: LineSplitter,
}

impl ClientCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ClientCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.lines.decode(src)
    }
}

impl Encoder<Request> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = encode_request(&item)?;
        put_line(text.as_bytes(), dst);
        Ok(())
    }
}

/// Codec for the server side: decodes requests, encodes responses
///
/// Raw text can be encoded as well, for servers that build their answers
/// by hand.
#[derive(Debug, Default)]
pub struct ServerCodec {
    lines: LineSplitter,
}

impl ServerCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ServerCodec {
    type Item = Request;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode(src)? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = serde_json::to_string(&item)?;
        check_size(text.len())?;
        put_line(text.as_bytes(), dst);
        Ok(())
    }
}

impl Encoder<String> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        check_size(item.len())?;
        put_line(item.trim_end_matches(['\r', '\n']).as_bytes(), dst);
        Ok(())
    }
}

fn check_size(size: usize) -> Result<(), CodecError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

fn put_line(data: &[u8], dst: &mut BytesMut) {
    dst.reserve(data.len() + 1);
    dst.put_slice(data);
    dst.put_u8(b'\n');
}

/// Splits newline-terminated messages off a buffer
///
/// Remembers how much of a partial line has already been searched so each
/// read only scans the new bytes.
#[derive(Debug, Default)]
struct LineSplitter {
    next_index: usize,
}

impl LineSplitter {
    /// Decode one message, skipping blank lines
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        loop {
            let start = self.next_index.min(src.len());
            let Some(offset) = src[start..].iter().position(|b| *b == b'\n') else {
                // No terminator yet; refuse to buffer past the size limit
                self.next_index = src.len();
                check_size(src.len())?;
                return Ok(None);
            };

            let pos = start + offset;
            self.next_index = 0;
            check_size(pos)?;
            let line = src.split_to(pos);
            src.advance(1);

            let line = match line.strip_suffix(b"\r") {
                Some(stripped) => stripped,
                None => &line[..],
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let text = std::str::from_utf8(line).map_err(|_| CodecError::InvalidUtf8)?;
            return Ok(Some(text.to_string()));
        }
    }
}
