//! Command Serialization
//!
//! Commands go out as a RESP array of bulk strings:
//!
//! ```text
//! *<argc>\r\n
//! $<len(arg0)>\r\n<arg0>\r\n
//! ...
//! ```
//!
//! Arguments are raw bytes, so any payload (including CRLF and NUL) is safe.

use crate::protocol::types::{prefix, CRLF};
use bytes::{BufMut, BytesMut};

/// The inline liveness probe used by round-trip measurement.
pub const PING_INLINE: &[u8] = b"PING\r\n";

/// The exact reply expected for [`PING_INLINE`].
pub const PONG_REPLY: &[u8] = b"+PONG\r\n";

/// Appends one command, framed as an array of bulk strings, to `out`.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.reserve(encoded_len(args));
    out.put_u8(prefix::ARRAY);
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(CRLF);
    for arg in args {
        let arg = arg.as_ref();
        out.put_u8(prefix::BULK_STRING);
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(arg);
        out.extend_from_slice(CRLF);
    }
}

/// Number of bytes [`encode_command`] will append for `args`.
pub fn encoded_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    let header = 1 + digits(args.len()) + 2;
    args.iter().fold(header, |total, arg| {
        let len = arg.as_ref().len();
        total + 1 + digits(len) + 2 + len + 2
    })
}

fn digits(mut value: usize) -> usize {
    let mut count = 1;
    while value >= 10 {
        value /= 10;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_command() {
        let mut buf = BytesMut::new();
        encode_command(&["GET", "key"], &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn test_encodes_binary_arguments() {
        let mut buf = BytesMut::new();
        let args: [&[u8]; 3] = [b"SET", b"k", b"a\r\n\x00b"];
        encode_command(&args, &mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\na\r\n\x00b\r\n");
    }

    #[test]
    fn test_encodes_empty_argument() {
        let mut buf = BytesMut::new();
        encode_command(&["ECHO", ""], &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n");
    }

    #[test]
    fn test_appends_to_existing_buffer() {
        let mut buf = BytesMut::new();
        encode_command(&["PING"], &mut buf);
        encode_command(&["PING"], &mut buf);
        assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_encoded_len_matches_output() {
        let long = vec![b'x'; 12_345];
        let args: Vec<&[u8]> = vec![b"SET", b"key:with:ten", &long];
        let mut buf = BytesMut::new();
        encode_command(&args, &mut buf);
        assert_eq!(buf.len(), encoded_len(&args));
    }

    #[test]
    fn test_frames_m_bulk_strings_in_one_array() {
        let args: Vec<String> = (0..12).map(|i| format!("arg{}", i)).collect();
        let mut buf = BytesMut::new();
        encode_command(&args, &mut buf);

        assert!(buf.starts_with(b"*12\r\n"));
        let bulk_headers = buf
            .windows(2)
            .filter(|w| w[0] == b'$' && w[1].is_ascii_digit())
            .count();
        assert_eq!(bulk_headers, 12);
    }
}
