//! Response Wire Format
//!
//! Responses are length-prefixed frames carrying one tagged value tree.
//! Every multi-byte integer and double on the wire is little-endian.
//!
//! ## Value encoding
//!
//! ```text
//! nil:    tag 0
//! error:  tag 1 | code:u32 | len:u32 | message bytes
//! string: tag 2 | len:u32 | bytes
//! int:    tag 3 | i64
//! double: tag 4 | f64 (IEEE-754)
//! array:  tag 5 | n:u32 | n tagged values
//! ```
//!
//! The command layer streams values directly into the connection's outgoing
//! buffer through [`ReplyWriter`]; nothing is built in an intermediate tree.
//! Arrays whose length is unknown up front (range queries) are opened with
//! [`ReplyWriter::begin_arr`], which leaves a placeholder that
//! [`ReplyWriter::end_arr`] patches once the element count is known.
//!
//! [`Reply`] is the parsed form of a value tree. The server never parses its
//! own responses; clients and the test suite do.

use crate::buffer::ByteBuf;
use bytes::Bytes;
use thiserror::Error;

/// Type tags, one byte each, leading every serialized value.
pub mod tag {
    pub const NIL: u8 = 0;
    pub const ERR: u8 = 1;
    pub const STR: u8 = 2;
    pub const INT: u8 = 3;
    pub const DBL: u8 = 4;
    pub const ARR: u8 = 5;
}

/// Error codes carried inside an error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Unrecognized command name or arity.
    Unknown = 1,
    /// The response would exceed the maximum frame size.
    TooBig = 2,
    /// The key holds a value of the wrong type for this command.
    BadType = 3,
    /// An argument failed to parse.
    BadArg = 4,
}

/// Streams tagged values into an outgoing buffer.
pub struct ReplyWriter<'a> {
    out: &'a mut ByteBuf,
}

/// Handle returned by [`ReplyWriter::begin_arr`], consumed by
/// [`ReplyWriter::end_arr`] to back-fill the element count.
#[must_use]
pub struct ArrHandle(usize);

impl<'a> ReplyWriter<'a> {
    pub fn new(out: &'a mut ByteBuf) -> Self {
        Self { out }
    }

    pub fn nil(&mut self) {
        self.out.append(&[tag::NIL]);
    }

    pub fn err(&mut self, code: ErrorCode, message: &str) {
        self.out.append(&[tag::ERR]);
        self.out.append(&(code as u32).to_le_bytes());
        self.out.append(&(message.len() as u32).to_le_bytes());
        self.out.append(message.as_bytes());
    }

    pub fn str(&mut self, s: &[u8]) {
        self.out.append(&[tag::STR]);
        self.out.append(&(s.len() as u32).to_le_bytes());
        self.out.append(s);
    }

    pub fn int(&mut self, value: i64) {
        self.out.append(&[tag::INT]);
        self.out.append(&value.to_le_bytes());
    }

    pub fn dbl(&mut self, value: f64) {
        self.out.append(&[tag::DBL]);
        self.out.append(&value.to_le_bytes());
    }

    /// An array whose length is known up front.
    pub fn arr(&mut self, n: u32) {
        self.out.append(&[tag::ARR]);
        self.out.append(&n.to_le_bytes());
    }

    /// Opens an array with a placeholder length.
    pub fn begin_arr(&mut self) -> ArrHandle {
        self.out.append(&[tag::ARR]);
        self.out.append(&0u32.to_le_bytes());
        ArrHandle(self.out.len() - 4)
    }

    /// Patches the element count into an array opened by
    /// [`begin_arr`](Self::begin_arr).
    pub fn end_arr(&mut self, handle: ArrHandle, n: u32) {
        self.out.patch_u32(handle.0, n);
    }
}

/// Errors from parsing a serialized value tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// The buffer ends before the value does.
    #[error("truncated reply")]
    Truncated,

    /// The leading byte is not a known tag.
    #[error("unknown tag: {0:#04x}")]
    UnknownTag(u8),

    /// An error value carried a non-UTF-8 message.
    #[error("invalid UTF-8 in error message")]
    BadMessage,
}

/// A parsed response value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Err { code: u32, message: String },
    Str(Bytes),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Reply>),
}

impl Reply {
    /// Parses one value tree from the front of `buf`, returning the value
    /// and the number of bytes it occupied.
    pub fn parse(buf: &[u8]) -> Result<(Reply, usize), ReplyError> {
        let (&tag, rest) = buf.split_first().ok_or(ReplyError::Truncated)?;
        match tag {
            tag::NIL => Ok((Reply::Nil, 1)),
            tag::ERR => {
                let code = read_u32(rest, 0)?;
                let len = read_u32(rest, 4)? as usize;
                let bytes = rest.get(8..8 + len).ok_or(ReplyError::Truncated)?;
                let message = std::str::from_utf8(bytes)
                    .map_err(|_| ReplyError::BadMessage)?
                    .to_string();
                Ok((Reply::Err { code, message }, 1 + 8 + len))
            }
            tag::STR => {
                let len = read_u32(rest, 0)? as usize;
                let bytes = rest.get(4..4 + len).ok_or(ReplyError::Truncated)?;
                Ok((Reply::Str(Bytes::copy_from_slice(bytes)), 1 + 4 + len))
            }
            tag::INT => {
                let bytes = rest.get(..8).ok_or(ReplyError::Truncated)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok((Reply::Int(i64::from_le_bytes(raw)), 9))
            }
            tag::DBL => {
                let bytes = rest.get(..8).ok_or(ReplyError::Truncated)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok((Reply::Dbl(f64::from_le_bytes(raw)), 9))
            }
            tag::ARR => {
                let n = read_u32(rest, 0)?;
                let mut consumed = 5;
                let mut elements = Vec::with_capacity(n.min(1024) as usize);
                for _ in 0..n {
                    let (value, used) = Reply::parse(&buf[consumed..])?;
                    elements.push(value);
                    consumed += used;
                }
                Ok((Reply::Arr(elements), consumed))
            }
            other => Err(ReplyError::UnknownTag(other)),
        }
    }
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, ReplyError> {
    let bytes = buf.get(at..at + 4).ok_or(ReplyError::Truncated)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(f: impl FnOnce(&mut ReplyWriter)) -> Vec<u8> {
        let mut buf = ByteBuf::with_capacity(64);
        let mut writer = ReplyWriter::new(&mut buf);
        f(&mut writer);
        buf.data().to_vec()
    }

    #[test]
    fn test_nil_roundtrip() {
        let bytes = write(|w| w.nil());
        assert_eq!(bytes, [tag::NIL]);
        assert_eq!(Reply::parse(&bytes).unwrap(), (Reply::Nil, 1));
    }

    #[test]
    fn test_err_roundtrip() {
        let bytes = write(|w| w.err(ErrorCode::BadType, "expect zset"));
        let (value, consumed) = Reply::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            value,
            Reply::Err {
                code: 3,
                message: "expect zset".to_string()
            }
        );
    }

    #[test]
    fn test_str_roundtrip() {
        let bytes = write(|w| w.str(b"hello"));
        assert_eq!(&bytes[..5], &[tag::STR, 5, 0, 0, 0]);
        let (value, consumed) = Reply::parse(&bytes).unwrap();
        assert_eq!(value, Reply::Str(Bytes::from_static(b"hello")));
        assert_eq!(consumed, 10);
    }

    #[test]
    fn test_int_is_little_endian() {
        let bytes = write(|w| w.int(-2));
        assert_eq!(bytes[0], tag::INT);
        assert_eq!(&bytes[1..], &(-2i64).to_le_bytes());
        assert_eq!(Reply::parse(&bytes).unwrap().0, Reply::Int(-2));
    }

    #[test]
    fn test_dbl_roundtrip() {
        let bytes = write(|w| w.dbl(1.25));
        assert_eq!(Reply::parse(&bytes).unwrap().0, Reply::Dbl(1.25));
    }

    #[test]
    fn test_fixed_arr_roundtrip() {
        let bytes = write(|w| {
            w.arr(2);
            w.str(b"a");
            w.int(1);
        });
        let (value, consumed) = Reply::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            value,
            Reply::Arr(vec![Reply::Str(Bytes::from_static(b"a")), Reply::Int(1)])
        );
    }

    #[test]
    fn test_backpatched_arr() {
        let bytes = write(|w| {
            let handle = w.begin_arr();
            let mut n = 0;
            for name in [&b"alpha"[..], b"beta", b"gamma"] {
                w.str(name);
                n += 1;
            }
            w.end_arr(handle, n);
        });
        let (value, _) = Reply::parse(&bytes).unwrap();
        match value {
            Reply::Arr(items) => assert_eq!(items.len(), 3),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_backpatched_arr() {
        let bytes = write(|w| {
            let handle = w.begin_arr();
            w.end_arr(handle, 0);
        });
        assert_eq!(Reply::parse(&bytes).unwrap().0, Reply::Arr(vec![]));
    }

    #[test]
    fn test_nested_arr_roundtrip() {
        let bytes = write(|w| {
            w.arr(2);
            w.int(1);
            w.arr(2);
            w.int(2);
            w.int(3);
        });
        assert_eq!(
            Reply::parse(&bytes).unwrap().0,
            Reply::Arr(vec![
                Reply::Int(1),
                Reply::Arr(vec![Reply::Int(2), Reply::Int(3)]),
            ])
        );
    }

    #[test]
    fn test_truncated_values() {
        assert_eq!(Reply::parse(&[]), Err(ReplyError::Truncated));
        assert_eq!(Reply::parse(&[tag::INT, 1, 2]), Err(ReplyError::Truncated));
        assert_eq!(
            Reply::parse(&[tag::STR, 5, 0, 0, 0, b'h', b'i']),
            Err(ReplyError::Truncated)
        );
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(Reply::parse(&[42]), Err(ReplyError::UnknownTag(42)));
    }
}
