//! Client wire framing.
//!
//! A frame is a 4-byte big-endian length followed by that many payload
//! bytes. The first frame on a connection is the session key; every later
//! frame is an opaque body for the session's logic service. Server pushes
//! use the same framing.

use tokio_util::codec::LengthDelimitedCodec;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Codec for one client connection.
pub fn client_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn test_frame_layout() {
        let mut codec = client_codec(DEFAULT_MAX_FRAME_LENGTH);
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"hi"), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = client_codec(DEFAULT_MAX_FRAME_LENGTH);
        let mut buf = BytesMut::new();
        buf.put_u32(5);
        buf.put_slice(b"hel");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(b"lo");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"hello");
    }

    #[test]
    fn test_oversize_frame_is_an_error() {
        let mut codec = client_codec(8);
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        buf.put_slice(&[0; 9]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
