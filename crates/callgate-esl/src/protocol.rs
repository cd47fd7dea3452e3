//! Event socket wire framing
//!
//! Every message is a block of `Key: Value` lines closed by an empty line.
//! When the block carries `Content-Length`, exactly that many body bytes
//! follow. Event bodies in plain format are themselves header blocks whose
//! values are percent-encoded.

use bytes::{Buf, BytesMut};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

use crate::errors::{EslError, Result};

/// Header map of a frame or an event body
pub type Headers = HashMap<String, String>;

/// Content types the switch sends
pub mod content_type {
    pub const AUTH_REQUEST: &str = "auth/request";
    pub const COMMAND_REPLY: &str = "command/reply";
    pub const API_RESPONSE: &str = "api/response";
    pub const EVENT_PLAIN: &str = "text/event-plain";
    pub const DISCONNECT_NOTICE: &str = "text/disconnect-notice";
}

pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_REPLY_TEXT: &str = "Reply-Text";

/// Upper bound on a single header block; anything larger is a broken peer
const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    AuthRequest,
    CommandReply,
    ApiResponse,
    Event,
    DisconnectNotice,
    Other(String),
}

/// One decoded message from the socket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub headers: Headers,
    pub body: Option<String>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_TYPE)
    }

    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }

    pub fn kind(&self) -> FrameKind {
        match self.content_type() {
            Some(content_type::AUTH_REQUEST) => FrameKind::AuthRequest,
            Some(content_type::COMMAND_REPLY) => FrameKind::CommandReply,
            Some(content_type::API_RESPONSE) => FrameKind::ApiResponse,
            Some(content_type::EVENT_PLAIN) => FrameKind::Event,
            Some(content_type::DISCONNECT_NOTICE) => FrameKind::DisconnectNotice,
            Some(other) => FrameKind::Other(other.to_string()),
            None => FrameKind::Other(String::new()),
        }
    }

    /// Text a command resolved to: the body for `api/response`, the
    /// `Reply-Text` header for `command/reply`.
    pub fn reply_body(&self) -> String {
        match self.kind() {
            FrameKind::CommandReply => self.reply_text().unwrap_or_default().trim().to_string(),
            _ => self
                .body
                .as_deref()
                .or_else(|| self.reply_text())
                .unwrap_or_default()
                .trim()
                .to_string(),
        }
    }

    /// `command/reply` carrying `+OK`
    pub fn is_ok_reply(&self) -> bool {
        self.reply_text().is_some_and(|t| t.starts_with("+OK"))
    }
}

/// Streaming decoder over a growable read buffer
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Buffer for `AsyncReadExt::read_buf`
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    /// Incomplete frames stay buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        // stray separators between frames
        let leading = self.buf.iter().take_while(|b| **b == b'\n' || **b == b'\r').count();
        self.buf.advance(leading);

        let Some(header_end) = find_header_end(&self.buf) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return Err(EslError::Protocol(format!(
                    "header block exceeds {} bytes",
                    MAX_HEADER_BYTES
                )));
            }
            return Ok(None);
        };

        let header_text = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
        let headers = parse_header_block(&header_text, false);

        let body_len = match headers.get(HEADER_CONTENT_LENGTH) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                EslError::Protocol(format!("bad Content-Length {:?}: {}", raw, e))
            })?,
            None => 0,
        };

        let body_start = header_end + 2;
        if self.buf.len() < body_start + body_len {
            return Ok(None);
        }

        self.buf.advance(body_start);
        let body = if body_len > 0 {
            let raw = self.buf.split_to(body_len);
            Some(String::from_utf8_lossy(&raw).into_owned())
        } else {
            None
        };

        Ok(Some(Frame { headers, body }))
    }
}

/// Offset of the first `\n\n`
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Parse `Key: Value` lines up to the first empty line
fn parse_header_block(text: &str, decode_values: bool) -> Headers {
    let mut headers = Headers::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim_start();
        let value = if decode_values {
            percent_decode_str(value).decode_utf8_lossy().into_owned()
        } else {
            value.to_string()
        };
        headers.insert(key.trim().to_string(), value);
    }
    headers
}

/// Decode a `text/event-plain` body into its header map
pub fn parse_event_body(body: &str) -> Headers {
    parse_header_block(body, true)
}

/// Serialize one command line. Embedded newlines would split the command
/// into several, so they are refused.
pub fn encode_command(line: &str) -> Result<BytesMut> {
    if line.contains('\n') || line.contains('\r') {
        return Err(EslError::Protocol("command contains a line break".to_string()));
    }
    let mut out = BytesMut::with_capacity(line.len() + 2);
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\n\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_auth_request() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"Content-Type: auth/request\n\n");
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind(), FrameKind::AuthRequest);
        assert!(frame.body.is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_waits_for_full_body() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"Content-Type: api/response\nContent-Length: 13\n\n+OK abc");
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(b"-123\n\nContent-Type: command/reply\n");
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.kind(), FrameKind::ApiResponse);
        assert_eq!(frame.body.as_deref(), Some("+OK abc-123\n\n"));
        assert_eq!(frame.reply_body(), "+OK abc-123");

        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(b"Reply-Text: +OK accepted\n\n");
        let reply = decoder.next_frame().unwrap().unwrap();
        assert!(reply.is_ok_reply());
        assert_eq!(reply.reply_body(), "+OK accepted");
    }

    #[test]
    fn test_split_inside_header_separator() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"Content-Type: command/reply\nReply-Text: -ERR invalid\n");
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.extend(b"\n");
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(!frame.is_ok_reply());
    }

    #[test]
    fn test_bad_content_length() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"Content-Type: api/response\nContent-Length: lots\n\n");
        assert!(matches!(decoder.next_frame(), Err(EslError::Protocol(_))));
    }

    #[test]
    fn test_event_body_values_are_percent_decoded() {
        let body = "Event-Name: CHANNEL_HANGUP_COMPLETE\n\
                    Unique-ID: 6f1c2a\n\
                    variable_sip_term_status: 486\n\
                    Caller-Caller-ID-Name: Jane%20Doe\n\
                    variable_originate_disposition: USER_BUSY\n\n";
        let headers = parse_event_body(body);
        assert_eq!(headers["Event-Name"], "CHANNEL_HANGUP_COMPLETE");
        assert_eq!(headers["Caller-Caller-ID-Name"], "Jane Doe");
        assert_eq!(headers["variable_sip_term_status"], "486");
    }

    #[test]
    fn test_encode_command_rejects_line_breaks() {
        assert_eq!(&encode_command("api version").unwrap()[..], b"api version\n\n");
        assert!(encode_command("api uuid_kill x\n\nexit").is_err());
    }
}
