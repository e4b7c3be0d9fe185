//! Request Frame Parser
//!
//! Requests arrive as length-prefixed frames on a byte stream:
//!
//! ```text
//! +--------+------+-----+------+-----+------+-----+-----+------+
//! | len:u32| nstr | len | str1 | len | str2 | ... | len | strn |
//! +--------+------+-----+------+-----+------+-----+-----+------+
//! ```
//!
//! The outer length excludes its own four bytes. All integers are
//! little-endian. A frame body is a counted list of byte strings; the first
//! is the command name, the rest its arguments.
//!
//! The parser works incrementally against the connection's incoming buffer:
//!
//! - `Ok(Some(len))` from [`frame_len`]: a complete frame of `len` body
//!   bytes is buffered
//! - `Ok(None)`: the frame is still incomplete, read more
//! - `Err(_)`: the peer violated the protocol and the connection must close
//!
//! Oversize frames, an argument count above the limit, truncated bodies,
//! and trailing bytes after the last argument are all protocol violations.

use bytes::Bytes;
use thiserror::Error;

/// Size of the frame length prefix.
pub const HEADER_SIZE: usize = 4;

/// Maximum frame body size: 32 MiB.
pub const MAX_MSG: usize = 32 << 20;

/// Maximum number of strings in one request.
pub const MAX_ARGS: usize = 200_000;

/// Protocol violations. Any of these closes the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The length prefix exceeds the frame size limit.
    #[error("frame of {0} bytes exceeds the {MAX_MSG} byte limit")]
    TooLarge(usize),

    /// The request declares more strings than allowed.
    #[error("request declares {0} strings, limit is {MAX_ARGS}")]
    TooManyArgs(usize),

    /// The body ends in the middle of a length field or string.
    #[error("request body is truncated")]
    Truncated,

    /// Bytes remain after the last declared string.
    #[error("{0} trailing bytes after the last argument")]
    TrailingBytes(usize),
}

/// Checks whether `buf` starts with a complete frame.
///
/// Returns the body length on success, `None` when more bytes are needed,
/// and an error when the length prefix itself is invalid.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, FrameError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[..HEADER_SIZE]);
    let len = u32::from_le_bytes(raw) as usize;
    if len > MAX_MSG {
        return Err(FrameError::TooLarge(len));
    }
    if buf.len() < HEADER_SIZE + len {
        return Ok(None);
    }
    Ok(Some(len))
}

/// Parses a complete frame body into its command strings.
pub fn parse_request(body: &[u8]) -> Result<Vec<Bytes>, FrameError> {
    let mut cur = body;
    let nstr = read_u32(&mut cur)? as usize;
    if nstr > MAX_ARGS {
        return Err(FrameError::TooManyArgs(nstr));
    }
    let mut out = Vec::with_capacity(nstr);
    while out.len() < nstr {
        let len = read_u32(&mut cur)? as usize;
        if cur.len() < len {
            return Err(FrameError::Truncated);
        }
        out.push(Bytes::copy_from_slice(&cur[..len]));
        cur = &cur[len..];
    }
    if !cur.is_empty() {
        return Err(FrameError::TrailingBytes(cur.len()));
    }
    Ok(out)
}

fn read_u32(cur: &mut &[u8]) -> Result<u32, FrameError> {
    if cur.len() < 4 {
        return Err(FrameError::Truncated);
    }
    let (head, rest) = cur.split_at(4);
    let mut raw = [0u8; 4];
    raw.copy_from_slice(head);
    *cur = rest;
    Ok(u32::from_le_bytes(raw))
}

/// Encodes a request frame. The inverse of [`parse_request`] plus the
/// length prefix; clients and tests use it, the server only decodes.
pub fn encode_request(args: &[&[u8]]) -> Vec<u8> {
    let body_len: usize = 4 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
    let mut out = Vec::with_capacity(HEADER_SIZE + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        out.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        out.extend_from_slice(arg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = encode_request(&[b"set", b"key", b"value"]);
        let len = frame_len(&frame).unwrap().unwrap();
        assert_eq!(HEADER_SIZE + len, frame.len());

        let cmd = parse_request(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(cmd, vec![&b"set"[..], b"key", b"value"]);
    }

    #[test]
    fn test_empty_argument_roundtrip() {
        let frame = encode_request(&[b"zquery", b"z", b"0", b"", b"0", b"10"]);
        let cmd = parse_request(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(cmd[3], &b""[..]);
        assert_eq!(cmd.len(), 6);
    }

    #[test]
    fn test_binary_safe_arguments() {
        let frame = encode_request(&[b"set", b"k\x00ey", b"v\xffal"]);
        let cmd = parse_request(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(cmd[1], &b"k\x00ey"[..]);
        assert_eq!(cmd[2], &b"v\xffal"[..]);
    }

    #[test]
    fn test_incomplete_header() {
        assert_eq!(frame_len(b""), Ok(None));
        assert_eq!(frame_len(&[5, 0]), Ok(None));
    }

    #[test]
    fn test_incomplete_body() {
        let mut frame = encode_request(&[b"get", b"key"]);
        frame.pop();
        assert_eq!(frame_len(&frame), Ok(None));
    }

    #[test]
    fn test_pipelined_frames() {
        let mut stream = encode_request(&[b"get", b"a"]);
        stream.extend_from_slice(&encode_request(&[b"get", b"b"]));

        let len = frame_len(&stream).unwrap().unwrap();
        let first = parse_request(&stream[HEADER_SIZE..HEADER_SIZE + len]).unwrap();
        assert_eq!(first[1], &b"a"[..]);

        let rest = &stream[HEADER_SIZE + len..];
        let len = frame_len(rest).unwrap().unwrap();
        let second = parse_request(&rest[HEADER_SIZE..HEADER_SIZE + len]).unwrap();
        assert_eq!(second[1], &b"b"[..]);
    }

    #[test]
    fn test_oversize_frame() {
        let bytes = ((MAX_MSG + 1) as u32).to_le_bytes();
        assert_eq!(frame_len(&bytes), Err(FrameError::TooLarge(MAX_MSG + 1)));
    }

    #[test]
    fn test_frame_at_limit_is_incomplete_not_error() {
        let bytes = (MAX_MSG as u32).to_le_bytes();
        assert_eq!(frame_len(&bytes), Ok(None));
    }

    #[test]
    fn test_too_many_args() {
        let mut body = Vec::new();
        body.extend_from_slice(&(MAX_ARGS as u32 + 1).to_le_bytes());
        assert_eq!(
            parse_request(&body),
            Err(FrameError::TooManyArgs(MAX_ARGS + 1))
        );
    }

    #[test]
    fn test_truncated_body() {
        // declares two strings but contains only one
        let mut body = Vec::new();
        body.extend_from_slice(&2u32.to_le_bytes());
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(b"get");
        assert_eq!(parse_request(&body), Err(FrameError::Truncated));
    }

    #[test]
    fn test_string_length_past_end() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&100u32.to_le_bytes());
        body.extend_from_slice(b"short");
        assert_eq!(parse_request(&body), Err(FrameError::Truncated));
    }

    #[test]
    fn test_trailing_garbage() {
        let mut frame = encode_request(&[b"get", b"key"]);
        frame.extend_from_slice(b"junk");
        // patch the outer length so the junk lands inside the frame
        let len = (frame.len() - HEADER_SIZE) as u32;
        frame[..4].copy_from_slice(&len.to_le_bytes());

        let body_len = frame_len(&frame).unwrap().unwrap();
        assert_eq!(
            parse_request(&frame[HEADER_SIZE..HEADER_SIZE + body_len]),
            Err(FrameError::TrailingBytes(4))
        );
    }
}
