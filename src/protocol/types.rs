//! RESP Reply Types
//!
//! This module defines the values a RESP2/RESP3 peer can send back.
//!
//! ## Protocol Format
//!
//! Each reply starts with a type prefix byte:
//! - `+` Status, `-` Error, `:` Integer, `$` Bulk String, `*` Array (RESP2)
//! - `_` Null, `,` Double, `#` Boolean, `(` Big Number, `=` Verbatim String,
//!   `!` Blob Error, `%` Map, `~` Set, `>` Push (RESP3)
//!
//! All lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Boolean: `#f\r\n`
//! Verbatim: `=15\r\ntxt:Some string\r\n`
//! Map: `%1\r\n+key\r\n:1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const NULL: u8 = b'_';
    pub const DOUBLE: u8 = b',';
    pub const BOOLEAN: u8 = b'#';
    pub const BIG_NUMBER: u8 = b'(';
    pub const VERBATIM: u8 = b'=';
    pub const BLOB_ERROR: u8 = b'!';
    pub const MAP: u8 = b'%';
    pub const SET: u8 = b'~';
    pub const PUSH: u8 = b'>';
    pub const ATTRIBUTE: u8 = b'|';
}

/// A materialized reply.
///
/// Containers own their elements and nest to any depth. Maps keep their
/// entries in the order the keys arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyValue {
    /// `_`, `$-1` or `*-1`.
    Null,

    /// `#t` / `#f`.
    Boolean(bool),

    /// `:<integer>`.
    Integer(i64),

    /// `,<double>`, including `inf`, `-inf` and `nan`.
    Double(f64),

    /// `(<digits>`, kept as text.
    BigNumber(String),

    /// A bulk or verbatim string whose payload is valid UTF-8.
    /// Verbatim strings have their 4-byte format tag stripped.
    Text(String),

    /// A bulk or verbatim string whose payload is not valid UTF-8.
    Binary(Bytes),

    /// `+<status>`.
    Status(String),

    /// `-<error>` or `!<len>`, parsed through the reader's [`ErrorParser`].
    Error(CommandError),

    /// `*<count>`.
    Array(Vec<ReplyValue>),

    /// `~<count>`.
    Set(Vec<ReplyValue>),

    /// `%<count>`, in wire order.
    Map(Vec<(ReplyValue, ReplyValue)>),

    /// `><count>`, an out-of-band message such as a pub/sub event.
    Push(Vec<ReplyValue>),
}

impl ReplyValue {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        ReplyValue::Text(s.into())
    }

    /// Creates a status value.
    pub fn status(s: impl Into<String>) -> Self {
        ReplyValue::Status(s.into())
    }

    /// Creates a binary value.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        ReplyValue::Binary(data.into())
    }

    /// Returns true if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, ReplyValue::Null)
    }

    /// Returns true if this value is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, ReplyValue::Error(_))
    }

    /// Returns true for out-of-band push messages.
    pub fn is_push(&self) -> bool {
        matches!(self, ReplyValue::Push(_))
    }

    /// Attempts to extract text from Status, Text or BigNumber.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ReplyValue::Status(s) | ReplyValue::Text(s) | ReplyValue::BigNumber(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Attempts to extract the raw payload of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ReplyValue::Text(s) => Some(s.as_bytes()),
            ReplyValue::Binary(b) => Some(b.as_ref()),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ReplyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract the inner boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ReplyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract the elements of an Array, Set or Push.
    pub fn as_array(&self) -> Option<&[ReplyValue]> {
        match self {
            ReplyValue::Array(items) | ReplyValue::Set(items) | ReplyValue::Push(items) => {
                Some(items.as_slice())
            }
            _ => None,
        }
    }

    /// Attempts to extract the entries of a Map.
    pub fn as_map(&self) -> Option<&[(ReplyValue, ReplyValue)]> {
        match self {
            ReplyValue::Map(entries) => Some(entries.as_slice()),
            _ => None,
        }
    }

    /// Consumes self and returns the elements of an Array, Set or Push.
    pub fn into_array(self) -> Option<Vec<ReplyValue>> {
        match self {
            ReplyValue::Array(items) | ReplyValue::Set(items) | ReplyValue::Push(items) => {
                Some(items)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ReplyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyValue::Null => write!(f, "(nil)"),
            ReplyValue::Boolean(b) => write!(f, "({})", b),
            ReplyValue::Integer(n) => write!(f, "(integer) {}", n),
            ReplyValue::Double(d) => write!(f, "(double) {}", d),
            ReplyValue::BigNumber(n) => write!(f, "(big number) {}", n),
            ReplyValue::Text(s) => write!(f, "\"{}\"", s),
            ReplyValue::Binary(data) => write!(f, "(binary data, {} bytes)", data.len()),
            ReplyValue::Status(s) => write!(f, "{}", s),
            ReplyValue::Error(err) => write!(f, "(error) {}", err),
            ReplyValue::Array(items) | ReplyValue::Set(items) | ReplyValue::Push(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
            ReplyValue::Map(entries) => {
                if entries.is_empty() {
                    return write!(f, "(empty hash)");
                }
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}# {} => {}", i + 1, k, v)?;
                }
                Ok(())
            }
        }
    }
}

/// A structured error reply: the leading code word plus the full message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    code: String,
    message: String,
}

impl CommandError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Splits an error line into its code (the first word) and message.
    ///
    /// `"WRONGTYPE Operation against a key"` has code `WRONGTYPE`; the
    /// message is the whole line, trimmed.
    pub fn parse(line: &str) -> Self {
        let message = line.trim();
        let code = message.split_whitespace().next().unwrap_or_default();
        Self::new(code, message)
    }

    /// The error code, e.g. `ERR`, `WRONGTYPE`, `MOVED`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The full error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CommandError {}

/// Hook that turns an error reply line into a [`CommandError`].
///
/// The reply reader calls it for every `-` and `!` reply, so callers can map
/// codes onto their own error hierarchy.
pub trait ErrorParser: Send + Sync {
    fn parse(&self, line: &str) -> CommandError;
}

/// The stock [`ErrorParser`], backed by [`CommandError::parse`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorParser;

impl ErrorParser for DefaultErrorParser {
    fn parse(&self, line: &str) -> CommandError {
        CommandError::parse(line)
    }
}
