//! Streaming RESP Reply Reader
//!
//! The reader owns a byte buffer that the transport fills, and turns it into
//! [`ReplyValue`]s one complete reply at a time.
//!
//! ## How the Reader Works
//!
//! Nested replies are rebuilt with an explicit task stack instead of
//! recursion. Each open aggregate (array, set, push, map) is a [`Frame`] that
//! records how many child slots it still expects. Items are consumed from
//! the buffer one at a time:
//!
//! 1. A scalar item is attached to the frame on top of the stack.
//! 2. A non-empty aggregate header pushes a new frame.
//! 3. When a frame has all its children it is popped, turned into a value,
//!    and attached to the frame below it, cascading upwards.
//! 4. When the stack is empty the value is a complete top-level reply.
//!
//! When the buffer runs out in the middle of an item, nothing is consumed
//! and `get_reply` returns `Ok(None)`. The frames already on the stack stay
//! where they are, so the next call resumes after more bytes are fed, no
//! matter where the input was split.

use crate::protocol::types::{
    prefix, DefaultErrorParser, ErrorParser, ReplyValue, CRLF,
};
use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Errors that can occur while reading replies.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// A valid RESP3 type this reader does not materialize
    #[error("unsupported reply type: {0:#04x}")]
    UnsupportedType(u8),

    /// Invalid integer or length line
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid double line
    #[error("invalid double: {0}")]
    InvalidDouble(String),

    /// Boolean line other than `t` or `f`
    #[error("invalid boolean: {0}")]
    InvalidBoolean(String),

    /// Null line with content
    #[error("invalid null: {0}")]
    InvalidNull(String),

    /// Big number line that is not a signed digit string
    #[error("invalid big number: {0}")]
    InvalidBigNumber(String),

    /// Bulk length outside `-1..=MAX_BULK_LENGTH`
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Aggregate count outside `-1..=MAX_AGGREGATE_ELEMENTS`
    #[error("invalid aggregate length: {0}")]
    InvalidAggregateLength(i64),

    /// Verbatim string without its `xxx:` format tag
    #[error("verbatim string is missing its format tag")]
    InvalidVerbatim,

    /// Aggregates nested deeper than `MAX_NESTING_DEPTH`
    #[error("reply nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Framing violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

/// Result type for reader operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_LENGTH: i64 = 512 * 1024 * 1024;

/// Maximum number of elements an aggregate may announce
pub const MAX_AGGREGATE_ELEMENTS: i64 = u32::MAX as i64;

/// Maximum number of aggregates open at once while reading one reply.
///
/// Dropping, cloning and formatting a [`ReplyValue`] recurse once per level,
/// so deeper replies are rejected before they are built.
pub const MAX_NESTING_DEPTH: usize = 512;

/// Upper bound on slots reserved up front for an aggregate.
const MAX_PREALLOC: usize = 1024;

/// Length of the verbatim format tag, e.g. `txt:`.
const VERBATIM_TAG_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    Array,
    Set,
    Push,
    Map,
}

#[derive(Debug)]
enum Node {
    Sequence(Vec<ReplyValue>),
    Map {
        entries: Vec<(ReplyValue, ReplyValue)>,
        key: Option<ReplyValue>,
    },
}

/// An aggregate under construction.
#[derive(Debug)]
struct Frame {
    kind: Aggregate,
    slots: usize,
    filled: usize,
    node: Node,
}

impl Frame {
    fn new(kind: Aggregate, slots: usize) -> Self {
        let node = match kind {
            Aggregate::Map => Node::Map {
                entries: Vec::with_capacity((slots / 2).min(MAX_PREALLOC)),
                key: None,
            },
            _ => Node::Sequence(Vec::with_capacity(slots.min(MAX_PREALLOC))),
        };
        Self {
            kind,
            slots,
            filled: 0,
            node,
        }
    }

    /// Places `child` in the next slot. Map children alternate key, value:
    /// an even ordinal is held as the pending key, an odd one completes the
    /// entry with it.
    fn attach(&mut self, child: ReplyValue) {
        match &mut self.node {
            Node::Sequence(items) => items.push(child),
            Node::Map { entries, key } => {
                debug_assert_eq!(key.is_some(), self.filled % 2 == 1);
                match key.take() {
                    Some(k) => entries.push((k, child)),
                    None => *key = Some(child),
                }
            }
        }
        self.filled += 1;
    }

    fn is_full(&self) -> bool {
        self.filled >= self.slots
    }

    fn into_value(self) -> ReplyValue {
        match (self.kind, self.node) {
            (Aggregate::Map, Node::Map { entries, .. }) => ReplyValue::Map(entries),
            (Aggregate::Set, Node::Sequence(items)) => ReplyValue::Set(items),
            (Aggregate::Push, Node::Sequence(items)) => ReplyValue::Push(items),
            (_, Node::Sequence(items)) => ReplyValue::Array(items),
            (_, Node::Map { entries, .. }) => ReplyValue::Map(entries),
        }
    }

    fn empty(kind: Aggregate) -> ReplyValue {
        Frame::new(kind, 0).into_value()
    }
}

/// One decoded wire item.
enum Item {
    Value(ReplyValue),
    Open(Frame),
}

/// Incremental reply reader.
///
/// # Example
///
/// ```
/// use respwire::protocol::{ReplyReader, ReplyValue};
///
/// let mut reader = ReplyReader::new();
/// reader.feed(b"*2\r\n:1\r\n");
/// assert_eq!(reader.get_reply().unwrap(), None);
///
/// reader.feed(b"#f\r\n");
/// assert_eq!(
///     reader.get_reply().unwrap(),
///     Some(ReplyValue::Array(vec![ReplyValue::Integer(1), ReplyValue::Boolean(false)]))
/// );
/// ```
pub struct ReplyReader {
    buf: BytesMut,
    stack: Vec<Frame>,
    error_parser: Arc<dyn ErrorParser>,
}

impl ReplyReader {
    /// Creates a reader with the default error parser.
    pub fn new() -> Self {
        Self::with_error_parser(Arc::new(DefaultErrorParser))
    }

    /// Creates a reader that hands error lines to `error_parser`.
    pub fn with_error_parser(error_parser: Arc<dyn ErrorParser>) -> Self {
        Self {
            buf: BytesMut::with_capacity(16 * 1024),
            stack: Vec::new(),
            error_parser,
        }
    }

    /// Appends raw bytes received from the peer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a reply.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// True while a nested reply is half built.
    pub fn has_partial_reply(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Drops all buffered bytes and partial state.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stack.clear();
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Consumes `expected` if the buffer holds exactly those bytes.
    pub(crate) fn take_exact(&mut self, expected: &[u8]) -> bool {
        if self.stack.is_empty() && &self.buf[..] == expected {
            self.buf.advance(expected.len());
            true
        } else {
            false
        }
    }

    /// Attempts to materialize the next complete reply from buffered bytes.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` - A complete top-level reply
    /// - `Ok(None)` - More bytes are needed; partial state is kept
    /// - `Err(e)` - The stream is not valid RESP; the reader is reset
    pub fn get_reply(&mut self) -> ParseResult<Option<ReplyValue>> {
        loop {
            let (item, consumed) = match self.next_item() {
                Ok(Some(parsed)) => parsed,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };

            let value = match item {
                Item::Open(frame) => {
                    if self.stack.len() >= MAX_NESTING_DEPTH {
                        self.reset();
                        return Err(ParseError::NestingTooDeep(MAX_NESTING_DEPTH));
                    }
                    self.buf.advance(consumed);
                    self.stack.push(frame);
                    continue;
                }
                Item::Value(value) => {
                    self.buf.advance(consumed);
                    value
                }
            };

            if let Some(reply) = self.complete(value) {
                trace!(remaining = self.buf.len(), "Reply complete");
                return Ok(Some(reply));
            }
        }
    }

    /// Attaches a finished value to its parent, closing every frame it fills.
    /// Returns the top-level reply once the stack drains.
    fn complete(&mut self, mut value: ReplyValue) -> Option<ReplyValue> {
        while let Some(mut parent) = self.stack.pop() {
            parent.attach(value);
            if !parent.is_full() {
                self.stack.push(parent);
                return None;
            }
            value = parent.into_value();
        }
        Some(value)
    }

    /// Decodes the item at the front of the buffer without consuming it.
    fn next_item(&self) -> ParseResult<Option<(Item, usize)>> {
        let buf = &self.buf[..];
        let Some(&type_byte) = buf.first() else {
            return Ok(None);
        };

        match type_byte {
            prefix::STATUS
            | prefix::ERROR
            | prefix::INTEGER
            | prefix::BULK_STRING
            | prefix::ARRAY
            | prefix::NULL
            | prefix::DOUBLE
            | prefix::BOOLEAN
            | prefix::BIG_NUMBER
            | prefix::VERBATIM
            | prefix::BLOB_ERROR
            | prefix::MAP
            | prefix::SET
            | prefix::PUSH => {}
            prefix::ATTRIBUTE => return Err(ParseError::UnsupportedType(type_byte)),
            other => return Err(ParseError::UnknownPrefix(other)),
        }

        let Some(line_len) = find_crlf(&buf[1..]) else {
            return Ok(None);
        };
        let line = &buf[1..1 + line_len];
        let header_len = 1 + line_len + 2;

        let item = match type_byte {
            prefix::STATUS => Item::Value(ReplyValue::Status(lossy(line))),
            prefix::ERROR => Item::Value(ReplyValue::Error(self.error_parser.parse(&lossy(line)))),
            prefix::INTEGER => Item::Value(ReplyValue::Integer(parse_integer(line)?)),
            prefix::NULL => {
                if !line.is_empty() {
                    return Err(ParseError::InvalidNull(lossy(line)));
                }
                Item::Value(ReplyValue::Null)
            }
            prefix::DOUBLE => Item::Value(ReplyValue::Double(parse_double(line)?)),
            prefix::BOOLEAN => match line {
                b"t" => Item::Value(ReplyValue::Boolean(true)),
                b"f" => Item::Value(ReplyValue::Boolean(false)),
                _ => return Err(ParseError::InvalidBoolean(lossy(line))),
            },
            prefix::BIG_NUMBER => Item::Value(ReplyValue::BigNumber(parse_big_number(line)?)),
            prefix::BULK_STRING | prefix::VERBATIM | prefix::BLOB_ERROR => {
                return self.bulk_item(type_byte, line, header_len);
            }
            _ => return aggregate_item(type_byte, line, header_len),
        };

        Ok(Some((item, header_len)))
    }

    /// Decodes `$`, `=` and `!` items: `<prefix><len>\r\n<payload>\r\n`.
    fn bulk_item(
        &self,
        type_byte: u8,
        line: &[u8],
        header_len: usize,
    ) -> ParseResult<Option<(Item, usize)>> {
        let len = parse_integer(line)?;
        if len == -1 && type_byte == prefix::BULK_STRING {
            return Ok(Some((Item::Value(ReplyValue::Null), header_len)));
        }
        if !(0..=MAX_BULK_LENGTH).contains(&len) {
            return Err(ParseError::InvalidBulkLength(len));
        }

        let len = len as usize;
        let total = header_len + len + 2;
        if self.buf.len() < total {
            return Ok(None);
        }
        if &self.buf[header_len + len..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let payload = &self.buf[header_len..header_len + len];
        let value = match type_byte {
            prefix::VERBATIM => {
                if len < VERBATIM_TAG_LEN || payload[VERBATIM_TAG_LEN - 1] != b':' {
                    return Err(ParseError::InvalidVerbatim);
                }
                string_value(&payload[VERBATIM_TAG_LEN..])
            }
            prefix::BLOB_ERROR => ReplyValue::Error(self.error_parser.parse(&lossy(payload))),
            _ => string_value(payload),
        };

        Ok(Some((Item::Value(value), total)))
    }
}

impl Default for ReplyReader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReplyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyReader")
            .field("buffered", &self.buf.len())
            .field("depth", &self.stack.len())
            .finish()
    }
}

/// Decodes `*`, `~`, `>` and `%` headers.
fn aggregate_item(type_byte: u8, line: &[u8], header_len: usize) -> ParseResult<Option<(Item, usize)>> {
    let count = parse_integer(line)?;
    if count == -1 {
        return Ok(Some((Item::Value(ReplyValue::Null), header_len)));
    }
    if !(0..=MAX_AGGREGATE_ELEMENTS).contains(&count) {
        return Err(ParseError::InvalidAggregateLength(count));
    }

    let kind = match type_byte {
        prefix::SET => Aggregate::Set,
        prefix::PUSH => Aggregate::Push,
        prefix::MAP => Aggregate::Map,
        _ => Aggregate::Array,
    };
    // A map header counts entries; each entry is a key slot and a value slot.
    let slots = match kind {
        Aggregate::Map => count as usize * 2,
        _ => count as usize,
    };

    let item = if slots == 0 {
        Item::Value(Frame::empty(kind))
    } else {
        Item::Open(Frame::new(kind, slots))
    };
    Ok(Some((item, header_len)))
}

/// Bulk payloads are text when they are valid UTF-8, raw bytes otherwise.
fn string_value(payload: &[u8]) -> ReplyValue {
    match std::str::from_utf8(payload) {
        Ok(s) => ReplyValue::Text(s.to_owned()),
        Err(_) => ReplyValue::Binary(Bytes::copy_from_slice(payload)),
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

fn parse_integer(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(lossy(line)))
}

fn parse_double(line: &[u8]) -> ParseResult<f64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| ParseError::InvalidDouble(lossy(line)))
}

fn parse_big_number(line: &[u8]) -> ParseResult<String> {
    let digits = match line.first() {
        Some(b'-') | Some(b'+') => &line[1..],
        _ => line,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::InvalidBigNumber(lossy(line)));
    }
    Ok(lossy(line))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
