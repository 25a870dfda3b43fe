//! STOMP 1.2 frame codec.
//!
//! Frames are `COMMAND\nheader:value\n...\n\nBODY\0`. Bodies with a
//! `content-length` header are binary-safe (Darwin Push Port sends gzip);
//! others end at the first NUL. Bare EOLs between frames are heart-beats.

use std::fmt;

use bytes::Bytes;

/// Upper bound on a single frame, headers and body included.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Error decoding a STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown STOMP command: {0:?}")]
    UnknownCommand(String),

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("frame body not NUL-terminated")]
    MissingTerminator,

    #[error("frame is not valid UTF-8 in its headers")]
    InvalidUtf8,

    #[error("frame exceeds {MAX_FRAME_BYTES} bytes ({0} buffered)")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED frames carry headers verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(b':');
                push_escaped(&mut out, value);
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied (leading
    /// heart-beat EOLs included), or `None` if `buf` does not yet hold a
    /// complete frame.
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let start = leading_eols(buf);
        let mut pos = start;

        let Some((command_line, next)) = next_line(buf, pos)? else {
            return Ok(None);
        };
        let command_str = std::str::from_utf8(command_line).map_err(|_| FrameError::InvalidUtf8)?;
        let command = Command::parse(command_str)
            .ok_or_else(|| FrameError::UnknownCommand(command_str.to_string()))?;
        pos = next;

        let mut headers = Vec::new();
        loop {
            let Some((line, next)) = next_line(buf, pos)? else {
                return Ok(None);
            };
            pos = next;
            if line.is_empty() {
                break;
            }
            let line = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body_start = pos;
        let (body_end, consumed) = match content_length {
            Some(len) => {
                if len > MAX_FRAME_BYTES {
                    return Err(FrameError::TooLarge(len));
                }
                let end = body_start + len;
                if buf.len() <= end {
                    return Ok(None);
                }
                if buf[end] != 0 {
                    return Err(FrameError::MissingTerminator);
                }
                (end, end + 1)
            }
            None => match buf[body_start..].iter().position(|&b| b == 0) {
                Some(offset) => (body_start + offset, body_start + offset + 1),
                None if buf.len() > MAX_FRAME_BYTES => {
                    return Err(FrameError::TooLarge(buf.len()));
                }
                None => return Ok(None),
            },
        };

        let frame = Frame {
            command,
            headers,
            body: Bytes::copy_from_slice(&buf[body_start..body_end]),
        };
        Ok(Some((frame, consumed)))
    }
}

/// Count heart-beat EOLs (`\n` or `\r\n`) at the front of `buf`.
pub fn leading_eols(buf: &[u8]) -> usize {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            b'\n' => i += 1,
            b'\r' if buf.get(i + 1) == Some(&b'\n') => i += 2,
            _ => break,
        }
    }
    i
}

/// Next line from `pos`, without its EOL, plus the offset after the EOL.
fn next_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>, FrameError> {
    match buf[pos..].iter().position(|&b| b == b'\n') {
        Some(offset) => {
            let mut line = &buf[pos..pos + offset];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            Ok(Some((line, pos + offset + 1)))
        }
        None if buf.len() > MAX_FRAME_BYTES => Err(FrameError::TooLarge(buf.len())),
        None => Ok(None),
    }
}

fn push_escaped(out: &mut Vec<u8>, s: &str) {
    for b in s.bytes() {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b':' => out.extend_from_slice(b"\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(s: &str) -> Result<String, FrameError> {
    if !s.contains('\\') {
        return Ok(s.to_string());
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::MalformedHeader(s.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_without_content_length() {
        let raw = b"MESSAGE\ndestination:/topic/TD_ALL_SIG_AREA\nmessage-id:1\n\n[{}]\0";
        let (frame, used) = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/topic/TD_ALL_SIG_AREA"));
        assert_eq!(&frame.body[..], b"[{}]");
    }

    #[test]
    fn content_length_body_may_contain_nul() {
        let mut raw = b"MESSAGE\ncontent-length:5\n\n".to_vec();
        raw.extend_from_slice(&[0x1f, 0x8b, 0x00, 0x08, 0x00]);
        raw.push(0);
        let (frame, used) = Frame::parse(&raw).unwrap().unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(&frame.body[..], &[0x1f, 0x8b, 0x00, 0x08, 0x00]);
    }

    #[test]
    fn incomplete_frames_wait_for_more() {
        assert_eq!(Frame::parse(b"").unwrap(), None);
        assert_eq!(Frame::parse(b"MESSAGE\ndest").unwrap(), None);
        assert_eq!(Frame::parse(b"MESSAGE\n\nbody without nul").unwrap(), None);
        assert_eq!(
            Frame::parse(b"MESSAGE\ncontent-length:10\n\nshort").unwrap(),
            None
        );
    }

    #[test]
    fn heartbeats_are_skipped() {
        let raw = b"\n\r\n\nRECEIPT\nreceipt-id:7\n\n\0";
        let (frame, used) = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Receipt);
        assert_eq!(used, raw.len());
        assert_eq!(leading_eols(b"\n\n\r\nX"), 4);
    }

    #[test]
    fn crlf_line_endings() {
        let raw = b"CONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
        let (frame, _) = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
    }

    #[test]
    fn header_escaping_round_trips() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/queue/a:b")
            .header("note", "line1\nline2\\end")
            .with_body(&b"hello"[..]);
        let encoded = frame.encode();
        let (decoded, used) = Frame::parse(&encoded).unwrap().unwrap();
        assert_eq!(used, encoded.len());
        assert_eq!(decoded.get("destination"), Some("/queue/a:b"));
        assert_eq!(decoded.get("note"), Some("line1\nline2\\end"));
        assert_eq!(decoded.get("content-length"), Some("5"));
        assert_eq!(&decoded.body[..], b"hello");
    }

    #[test]
    fn connect_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("passcode", "a:b");
        let encoded = String::from_utf8(frame.encode()).unwrap();
        assert!(encoded.contains("passcode:a:b\n"));
    }

    #[test]
    fn repeated_header_keeps_first() {
        let raw = b"MESSAGE\nfoo:1\nfoo:2\n\n\0";
        let (frame, _) = Frame::parse(raw).unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(matches!(
            Frame::parse(b"BOGUS\n\n\0"),
            Err(FrameError::UnknownCommand(_))
        ));
        assert!(matches!(
            Frame::parse(b"MESSAGE\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::parse(b"MESSAGE\ncontent-length:abc\n\n\0"),
            Err(FrameError::InvalidContentLength(_))
        ));
        assert!(matches!(
            Frame::parse(b"MESSAGE\ncontent-length:2\n\nabc"),
            Err(FrameError::MissingTerminator)
        ));
        assert!(matches!(
            Frame::parse(b"MESSAGE\nbad:esc\\x\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut raw = Frame::new(Command::Receipt).header("receipt-id", "1").encode();
        raw.extend(Frame::new(Command::Receipt).header("receipt-id", "2").encode());
        let (first, used) = Frame::parse(&raw).unwrap().unwrap();
        let (second, _) = Frame::parse(&raw[used..]).unwrap().unwrap();
        assert_eq!(first.get("receipt-id"), Some("1"));
        assert_eq!(second.get("receipt-id"), Some("2"));
    }
}
