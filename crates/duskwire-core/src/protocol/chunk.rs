//! Encrypted chunk framing over the per-session stream cipher.
//!
//! Every chunk travels as two back-to-back encrypted frames:
//!
//! 1. a **length frame** whose plaintext is two big-endian bytes giving the
//!    plaintext length `L` of the body frame, sealed separately so the
//!    reader can size its next exact-length pull, and
//! 2. a **body frame**: `version(1) ‖ channel(4 BE) ‖ request_id(8 BE) ‖
//!    payload[L-13]`.
//!
//! Channel 0 is the control channel carrying JSON; all other channels carry
//! opaque binary (file transfer).

use super::{validate_version, PROTOCOL_VERSION};
use crate::crypto::{EncryptStream, StreamTag};
use crate::error::{Error, Result};

/// Fixed chunk-header size: version + channel + request id.
pub const CHUNK_HEADER_BYTES: usize = 13;

/// Largest payload placed in a single chunk. Bulk file traffic is cut to
/// this size; the u16 length field ceiling is never approached.
pub const MAX_CHUNK_PAYLOAD: usize = 32 * 1024;

/// A decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Logical stream selector. 0 = control, nonzero = file transfer.
    pub channel: u32,
    /// Sender-assigned monotonic request id.
    pub request_id: u64,
    /// Application payload.
    pub payload: Vec<u8>,
}

/// Seal a chunk into its two ciphertext frames (length, body).
pub fn encode(
    stream: &mut EncryptStream,
    channel: u32,
    request_id: u64,
    payload: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    if payload.len() > MAX_CHUNK_PAYLOAD {
        return Err(Error::Malformed(format!(
            "chunk payload {} exceeds maximum {}",
            payload.len(),
            MAX_CHUNK_PAYLOAD
        )));
    }

    let body_len = CHUNK_HEADER_BYTES + payload.len();
    let mut body = Vec::with_capacity(body_len);
    body.push(PROTOCOL_VERSION);
    body.extend_from_slice(&channel.to_be_bytes());
    body.extend_from_slice(&request_id.to_be_bytes());
    body.extend_from_slice(payload);

    let len_bytes = (body_len as u16).to_be_bytes();
    let length_frame = stream.push(&len_bytes, StreamTag::Message)?;
    let body_frame = stream.push(&body, StreamTag::Message)?;

    Ok((length_frame, body_frame))
}

/// Parse a decrypted length frame into the body-frame plaintext length.
pub fn decode_length(plain: &[u8]) -> Result<usize> {
    let bytes: [u8; 2] = plain
        .try_into()
        .map_err(|_| Error::Malformed("length frame must be 2 bytes".into()))?;
    let len = u16::from_be_bytes(bytes) as usize;

    if len < CHUNK_HEADER_BYTES {
        return Err(Error::Malformed(format!(
            "chunk length {} below header size",
            len
        )));
    }
    Ok(len)
}

/// Parse a decrypted body frame into a [`Chunk`].
pub fn decode_body(plain: &[u8]) -> Result<Chunk> {
    if plain.len() < CHUNK_HEADER_BYTES {
        return Err(Error::Malformed("chunk body below header size".into()));
    }

    validate_version(plain[0])?;

    let channel = u32::from_be_bytes(
        plain[1..5]
            .try_into()
            .map_err(|_| Error::Malformed("invalid channel field".into()))?,
    );
    let request_id = u64::from_be_bytes(
        plain[5..13]
            .try_into()
            .map_err(|_| Error::Malformed("invalid request-id field".into()))?,
    );

    Ok(Chunk {
        channel,
        request_id,
        payload: plain[CHUNK_HEADER_BYTES..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DecryptStream, StreamHeader, StreamKey, STREAM_ABYTES};

    fn stream_pair() -> (EncryptStream, DecryptStream) {
        let key = StreamKey::generate();
        let header = StreamHeader::generate();
        (
            EncryptStream::new(&key, header),
            DecryptStream::new(&key, header),
        )
    }

    #[test]
    fn chunk_roundtrip_through_cipher() {
        let (mut tx, mut rx) = stream_pair();

        let (len_frame, body_frame) =
            encode(&mut tx, 7, 42, b"file bytes").expect("encode");

        let (len_plain, _) = rx.pull(&len_frame).expect("pull len");
        let body_len = decode_length(&len_plain).expect("decode len");
        assert_eq!(body_len, CHUNK_HEADER_BYTES + 10);
        assert_eq!(body_frame.len(), body_len + STREAM_ABYTES);

        let (body_plain, _) = rx.pull(&body_frame).expect("pull body");
        assert_eq!(body_plain.len(), body_len);
        assert_eq!(body_plain[0], PROTOCOL_VERSION);

        let chunk = decode_body(&body_plain).expect("decode body");
        assert_eq!(chunk.channel, 7);
        assert_eq!(chunk.request_id, 42);
        assert_eq!(chunk.payload, b"file bytes");
    }

    #[test]
    fn empty_payload_chunk() {
        let (mut tx, mut rx) = stream_pair();

        let (len_frame, body_frame) = encode(&mut tx, 0, 1, b"").expect("encode");
        let (len_plain, _) = rx.pull(&len_frame).expect("pull");
        assert_eq!(decode_length(&len_plain).expect("len"), CHUNK_HEADER_BYTES);

        let (body_plain, _) = rx.pull(&body_frame).expect("pull");
        let chunk = decode_body(&body_plain).expect("decode");
        assert!(chunk.payload.is_empty());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let (mut tx, _) = stream_pair();
        let too_big = vec![0u8; MAX_CHUNK_PAYLOAD + 1];
        assert!(encode(&mut tx, 1, 1, &too_big).is_err());
    }

    #[test]
    fn body_version_mismatch_is_rejected() {
        let mut body = vec![0x02u8];
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u64.to_be_bytes());
        assert!(matches!(decode_body(&body), Err(Error::Malformed(_))));
    }

    #[test]
    fn undersized_length_is_rejected() {
        assert!(decode_length(&(5u16).to_be_bytes()).is_err());
        assert!(decode_length(&[1u8]).is_err());
    }
}
