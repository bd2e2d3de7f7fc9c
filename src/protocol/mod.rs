//! RESP Protocol Implementation
//!
//! Client-side halves of the Redis Serialization Protocol (RESP2 and RESP3).
//!
//! ## Modules
//!
//! - `types`: The `ReplyValue` tree, `CommandError` and the error parser hook
//! - `reader`: Streaming reader that rebuilds replies from partial input
//! - `command`: Serializes commands as arrays of bulk strings
//!
//! ## Example
//!
//! ```
//! use respwire::protocol::{encode_command, ReplyReader, ReplyValue};
//! use bytes::BytesMut;
//!
//! // Outgoing
//! let mut out = BytesMut::new();
//! encode_command(&["GET", "name"], &mut out);
//! assert_eq!(&out[..], b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
//!
//! // Incoming
//! let mut reader = ReplyReader::new();
//! reader.feed(b"$4\r\nAriz\r\n");
//! assert_eq!(reader.get_reply().unwrap(), Some(ReplyValue::text("Ariz")));
//! ```

pub mod command;
pub mod reader;
pub mod types;

pub use command::{encode_command, encoded_len};
pub use reader::{ParseError, ParseResult, ReplyReader};
pub use types::{CommandError, DefaultErrorParser, ErrorParser, ReplyValue};
