//! Length-prefixed framing over a raw byte stream.
//!
//! Wire format: `[len:4 big-endian][payload:len]`, no trailing delimiter.
//! The encoder produces a single contiguous buffer so a frame goes out in
//! one write. The decoder is a streaming parser: feed it whatever chunks
//! the socket hands you and it yields complete payloads in wire order,
//! each exactly once.

use bytes::{Buf, Bytes, BytesMut};

use crate::{ProtoError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Frame a payload for transmission.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtoError::Oversize(payload.len()))?;

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

/// Streaming frame parser.
///
/// Holds an internal buffer of not-yet-consumed stream bytes. Each call to
/// [`push`](Self::push) appends a chunk and drains every complete frame,
/// returning their payloads in order. The length header is peeked without
/// consuming, so a partial frame stays buffered until the rest arrives.
///
/// A header announcing more than `max_frame` bytes fails with
/// [`ProtoError::FrameTooLarge`] *before* any allocation for the payload.
/// After that the decoder is poisoned: the stream offset can no longer be
/// trusted and the caller must drop the connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
    /// Length announced by the header that violated the cap, if any.
    poisoned: Option<usize>,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
            poisoned: None,
        }
    }

    /// Feed a chunk of stream bytes, returning all completed payloads.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        if let Some(len) = self.poisoned {
            return Err(ProtoError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }

        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        loop {
            if self.buf.len() < LENGTH_PREFIX {
                break;
            }

            let len =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

            if len > self.max_frame {
                self.poisoned = Some(len);
                return Err(ProtoError::FrameTooLarge {
                    len,
                    max: self.max_frame,
                });
            }

            if self.buf.len() < LENGTH_PREFIX + len {
                break;
            }

            self.buf.advance(LENGTH_PREFIX);
            payloads.push(self.buf.split_to(len).freeze());
        }

        Ok(payloads)
    }

    /// Bytes currently buffered waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_MAX_FRAME;

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(DEFAULT_MAX_FRAME)
    }

    #[test]
    fn encode_decode_roundtrip() {
        let payload = b"hello world";
        let framed = encode(payload).unwrap();
        assert_eq!(framed.len(), LENGTH_PREFIX + payload.len());

        let mut dec = decoder();
        let out = dec.push(&framed).unwrap();
        assert_eq!(out, vec![Bytes::from_static(payload)]);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let framed = encode(b"").unwrap();
        assert_eq!(&framed[..], &[0, 0, 0, 0]);

        let mut dec = decoder();
        let out = dec.push(&framed).unwrap();
        assert_eq!(out, vec![Bytes::new()]);
    }

    #[test]
    fn split_across_three_reads() {
        // An encoded frame split 1 byte / 3 bytes / remainder must decode
        // to the single original payload.
        let framed = encode(b"fragmented payload").unwrap();

        let mut dec = decoder();
        assert!(dec.push(&framed[..1]).unwrap().is_empty());
        assert!(dec.push(&framed[1..4]).unwrap().is_empty());
        let out = dec.push(&framed[4..]).unwrap();
        assert_eq!(out, vec![Bytes::from_static(b"fragmented payload")]);
    }

    #[test]
    fn byte_at_a_time() {
        let framed = encode(b"drip").unwrap();
        let mut dec = decoder();
        let mut seen = Vec::new();
        for b in framed.iter() {
            seen.extend(dec.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(seen, vec![Bytes::from_static(b"drip")]);
    }

    #[test]
    fn multiple_frames_one_chunk() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(b"first").unwrap());
        wire.extend_from_slice(&encode(b"second").unwrap());
        wire.extend_from_slice(&encode(b"third").unwrap());

        let mut dec = decoder();
        let out = dec.push(&wire).unwrap();
        assert_eq!(
            out,
            vec![
                Bytes::from_static(b"first"),
                Bytes::from_static(b"second"),
                Bytes::from_static(b"third"),
            ]
        );
    }

    #[test]
    fn frame_boundary_straddles_chunks() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(b"alpha").unwrap());
        wire.extend_from_slice(&encode(b"beta").unwrap());

        // Split in the middle of the second frame's header.
        let cut = encode(b"alpha").unwrap().len() + 2;
        let mut dec = decoder();
        let first = dec.push(&wire[..cut]).unwrap();
        assert_eq!(first, vec![Bytes::from_static(b"alpha")]);
        let second = dec.push(&wire[cut..]).unwrap();
        assert_eq!(second, vec![Bytes::from_static(b"beta")]);
    }

    #[test]
    fn oversized_header_rejected_before_payload() {
        let mut dec = FrameDecoder::new(1024);
        // Header announces 1 MiB against a 1 KiB cap; no payload bytes sent.
        let header = (1024u32 * 1024).to_be_bytes();
        let err = dec.push(&header).unwrap_err();
        assert!(matches!(
            err,
            ProtoError::FrameTooLarge { len, max: 1024 } if len == 1024 * 1024
        ));
    }

    #[test]
    fn poisoned_decoder_stays_poisoned() {
        let mut dec = FrameDecoder::new(16);
        assert!(dec.push(&1024u32.to_be_bytes()).is_err());
        // Even a well-formed frame is rejected afterwards.
        let framed = encode(b"ok").unwrap();
        assert!(dec.push(&framed).is_err());
    }

    #[test]
    fn payload_at_exactly_max_is_accepted() {
        let payload = vec![0xA5u8; 64];
        let framed = encode(&payload).unwrap();
        let mut dec = FrameDecoder::new(64);
        let out = dec.push(&framed).unwrap();
        assert_eq!(out[0].as_ref(), payload.as_slice());
    }
}
