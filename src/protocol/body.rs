use super::request::ParseError;
use super::status::StatusCode;
use crate::io::{ReceiveError, Receiver};
use bytes::Bytes;

/// Field terminator used by request and response bodies
pub const DELIM: u8 = 0x03;

/// Serializer for delimiter-terminated body fields
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a response body with its status code field
    pub fn with_status(status: StatusCode) -> Self {
        let mut writer = Self::new();
        writer.number(status.as_u16());
        writer
    }

    pub fn field(&mut self, value: impl AsRef<[u8]>) -> &mut Self {
        let value = value.as_ref();
        debug_assert!(!value.contains(&DELIM), "field contains the delimiter");
        self.buf.extend_from_slice(value);
        self.buf.push(DELIM);
        self
    }

    pub fn number<N: itoa::Integer>(&mut self, n: N) -> &mut Self {
        let mut num_buf = itoa::Buffer::new();
        self.field(num_buf.format(n))
    }

    pub fn hex(&mut self, n: u64) -> &mut Self {
        self.field(format!("{n:x}"))
    }

    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Tokenizer over a complete body.
///
/// Each accessor consumes exactly one field up to and including its
/// delimiter. The body must end right after the last expected field,
/// which [`FieldReader::finish`] checks.
pub struct FieldReader<'a> {
    receiver: Receiver<&'a [u8]>,
    body_len: usize,
    scratch: Vec<u8>,
}

impl<'a> FieldReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            receiver: Receiver::new(body),
            body_len: body.len(),
            scratch: Vec::new(),
        }
    }

    /// Next field as UTF-8, at most `max_len` bytes
    pub fn text(&mut self, name: &'static str, max_len: usize) -> Result<String, ParseError> {
        self.scratch.clear();
        self.scratch.resize(max_len, 0);

        let n = match self.receiver.read_until(DELIM, &mut self.scratch) {
            Ok(n) => n,
            Err(ReceiveError::TooSmall) => return Err(ParseError::FieldTooLong(name, max_len)),
            Err(ReceiveError::Eof) | Err(ReceiveError::Io(_)) => {
                return Err(ParseError::MissingField(name))
            }
        };

        if n == 0 {
            return Err(ParseError::EmptyField(name));
        }

        std::str::from_utf8(&self.scratch[..n])
            .map(str::to_owned)
            .map_err(|_| ParseError::InvalidUtf8(name))
    }

    /// Next field bounded only by the body itself
    pub fn long_text(&mut self, name: &'static str) -> Result<String, ParseError> {
        self.text(name, self.body_len)
    }

    /// `0` or `1`
    pub fn flag(&mut self, name: &'static str) -> Result<bool, ParseError> {
        match self.text(name, 1)?.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(ParseError::InvalidValue(name)),
        }
    }

    /// Hex-encoded, non-zero 64-bit value
    pub fn hex(&mut self, name: &'static str) -> Result<u64, ParseError> {
        let text = self.text(name, 16)?;
        match u64::from_str_radix(&text, 16) {
            Ok(0) | Err(_) => Err(ParseError::InvalidValue(name)),
            Ok(value) => Ok(value),
        }
    }

    /// Fail if anything follows the last consumed field
    pub fn finish(self) -> Result<(), ParseError> {
        if self.receiver.buffered() > 0 || !self.receiver.get_ref().is_empty() {
            return Err(ParseError::TrailingData);
        }
        Ok(())
    }
}
