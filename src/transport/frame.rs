//! STOMP 1.2 frame codec
//!
//! A frame is a command line, `name:value` header lines, a blank line, the
//! body and a terminating NUL byte. A bare EOL between frames is a heart-beat.
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every command except
//! CONNECT and CONNECTED. When a `content-length` header is present the body is
//! read by length, otherwise up to the first NUL.

use std::fmt;
use std::str::FromStr;

use crate::utils::FrameError;

/// Largest frame the decoder buffers before giving up on the stream.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

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
    Begin,
    Commit,
    Abort,
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
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header. Repeated names are kept; lookups return the first.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.body).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Serialize to wire bytes. A `content-length` header is always computed
    /// from the body; any caller-supplied one is ignored.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.command.escapes_headers();
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            if name == "content-length" {
                continue;
            }
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    Heartbeat,
}

/// Incremental decoder. Feed bytes with [`FrameDecoder::extend`] and pull
/// complete units with [`FrameDecoder::next_frame`].
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns `Ok(None)` until a whole frame or heart-beat is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Decoded>, FrameError> {
        match self.buf.as_slice() {
            [] | [b'\r'] => return Ok(None),
            [b'\n', ..] => {
                self.buf.drain(..1);
                return Ok(Some(Decoded::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                self.buf.drain(..2);
                return Ok(Some(Decoded::Heartbeat));
            }
            _ => {}
        }

        let mut pos = 0;
        let Some((command_line, next)) = read_line(&self.buf, pos) else {
            return self.incomplete();
        };
        let command: Command = as_utf8(command_line)?.parse()?;
        pos = next;

        let mut headers = Vec::new();
        loop {
            let Some((line, next)) = read_line(&self.buf, pos) else {
                return self.incomplete();
            };
            pos = next;
            if line.is_empty() {
                break;
            }
            let line = as_utf8(line)?;
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MissingSeparator(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
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
        let body_end = match content_length {
            Some(len) => {
                let body_end = body_start
                    .checked_add(len)
                    .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
                if body_end >= self.max_frame {
                    return Err(FrameError::FrameTooLarge(self.max_frame));
                }
                if self.buf.len() <= body_end {
                    return Ok(None);
                }
                if self.buf[body_end] != 0 {
                    return Err(FrameError::MissingNul);
                }
                body_end
            }
            None => match self.buf[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => return self.incomplete(),
            },
        };

        let body = self.buf[body_start..body_end].to_vec();
        self.buf.drain(..=body_end);

        Ok(Some(Decoded::Frame(Frame {
            command,
            headers,
            body,
        })))
    }

    /// No complete frame yet; fail once the partial frame outgrows the limit.
    fn incomplete(&self) -> Result<Option<Decoded>, FrameError> {
        if self.buf.len() > self.max_frame {
            Err(FrameError::FrameTooLarge(self.max_frame))
        } else {
            Ok(None)
        }
    }
}

/// Returns the line starting at `from` without its EOL, and the offset just past it.
fn read_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let nl = buf[from..].iter().position(|b| *b == b'\n')? + from;
    let line = &buf[from..nl];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, nl + 1))
}

fn as_utf8(bytes: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8)
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::InvalidEscape('\\')),
        }
    }
    Ok(out)
}
