//! Encoding and decoding of the wire primitives: fixed-width integers and
//! length-prefixed strings.
//!
//! All integers on the wire are 4 bytes, little-endian. A string is encoded
//! as its length followed by that many bytes of UTF-8, without a trailing
//! NUL. Decoding is lazy: the `try_get_*` functions consume from a
//! [`Buf`] and report [`DecodeError::ShortRead`] when the buffer does not
//! (yet) hold enough bytes, leaving the caller free to retry once more data
//! has arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Width of a wire integer in bytes.
pub const INT_LEN: usize = size_of::<u32>();

/// Packet id used for all server-to-client text messages.
pub const SERVER_TEXT_PACKET_ID: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("not enough bytes in the buffer")]
    ShortRead,
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

pub fn put_int(buf: &mut impl BufMut, value: u32) {
    buf.put_u32_le(value);
}

pub fn put_string(buf: &mut impl BufMut, s: &str) {
    put_int(buf, s.len() as u32);
    buf.put_slice(s.as_bytes());
}

pub fn try_get_int(buf: &mut impl Buf) -> Result<u32, DecodeError> {
    buf.try_get_u32_le().map_err(|_| DecodeError::ShortRead)
}

pub fn try_get_string(buf: &mut impl Buf) -> Result<String, DecodeError> {
    let len = try_get_int(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::ShortRead);
    }

    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
}

/// Encode a complete server-to-client text packet: packet id, then the
/// length-prefixed message.
///
/// NB: server-to-client packets are *not* wrapped in an outer total-length
///  frame - the client reads `(id, string)` directly. Client-to-server
///  packets do carry the outer frame; the asymmetry is part of the protocol.
pub fn server_text_packet(message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 * INT_LEN + message.len());
    put_int(&mut buf, SERVER_TEXT_PACKET_ID);
    put_string(&mut buf, message);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, vec![0, 0, 0, 0])]
    #[case(1, vec![1, 0, 0, 0])]
    #[case(0x0D, vec![0x0D, 0, 0, 0])]
    #[case(0x01020304, vec![4, 3, 2, 1])]
    #[case(u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF])]
    fn test_int_round_trip(#[case] value: u32, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        put_int(&mut buf, value);
        assert_eq!(&buf[..], &expected[..]);

        let mut read: &[u8] = &buf;
        assert_eq!(try_get_int(&mut read), Ok(value));
        assert!(read.is_empty());
    }

    #[rstest]
    #[case::empty("", vec![0, 0, 0, 0])]
    #[case::ascii("hi", vec![2, 0, 0, 0, b'h', b'i'])]
    #[case::umlaut("ä", vec![2, 0, 0, 0, 0xc3, 0xa4])]
    fn test_string_round_trip(#[case] s: &str, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        put_string(&mut buf, s);
        assert_eq!(&buf[..], &expected[..]);

        let mut read: &[u8] = &buf;
        assert_eq!(try_get_string(&mut read).as_deref(), Ok(s));
        assert!(read.is_empty());
    }

    #[test]
    fn test_string_preserves_trailing_bytes() {
        let mut read: &[u8] = b"\x01\x00\x00\x00abc";
        assert_eq!(try_get_string(&mut read).as_deref(), Ok("a"));
        assert_eq!(read, b"bc");
    }

    #[test]
    fn test_int_short_read_at_every_truncation() {
        let mut buf = BytesMut::new();
        put_int(&mut buf, 12345);

        for truncated in 0..INT_LEN {
            let mut read: &[u8] = &buf[..truncated];
            assert_eq!(try_get_int(&mut read), Err(DecodeError::ShortRead));
        }
    }

    #[test]
    fn test_string_short_read_at_every_truncation() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "hello");

        for truncated in 0..buf.len() {
            let mut read: &[u8] = &buf[..truncated];
            assert_eq!(try_get_string(&mut read), Err(DecodeError::ShortRead));
        }
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut read: &[u8] = b"\x02\x00\x00\x00\xc0\xaf";
        assert_eq!(try_get_string(&mut read), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn test_server_text_packet_layout() {
        let packet = server_text_packet("ok");
        assert_eq!(&packet[..], b"\x00\x00\x00\x00\x02\x00\x00\x00ok");
    }
}
