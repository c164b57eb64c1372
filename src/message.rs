//! Wire framing and the tagged consensus message sum type.
//!
//! Frames are length-prefixed: a `byteorder::LittleEndian` `u32` length
//! ahead of the body. There is no transport-level encryption at this layer,
//! so the frame is just `[u32 len][body]`.

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ValidatorError;

/// Default ceiling on a single frame's declared length, one mebibyte.
/// `split_frame` rejects a declared length beyond this before ever
/// allocating a buffer for it.
pub const DEFAULT_MAX_MESSAGE_LEN: u32 = 1024 * 1024;

/// A decoded consensus message, tagged by phase. `Prepare` and `Commit` are
/// leader-bound: they are present in the sum type so the wire format
/// round-trips, but a validator receiving one through the broadcast relay
/// maps it to a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusMessage {
    /// Leader announces a new block proposal for a view.
    Announce(Envelope),
    /// Leader-bound: validators never act on a received `Prepare`.
    Prepare(Envelope),
    /// Leader reports the aggregated prepare-phase signature.
    Prepared(Envelope),
    /// Leader-bound: validators never act on a received `Commit`.
    Commit(Envelope),
    /// Leader reports the aggregated commit-phase signature.
    Committed(Envelope),
}

impl ConsensusMessage {
    /// The envelope common to every message kind.
    pub fn envelope(&self) -> &Envelope {
        match self {
            Self::Announce(e)
            | Self::Prepare(e)
            | Self::Prepared(e)
            | Self::Commit(e)
            | Self::Committed(e) => e,
        }
    }

    fn tag(&self) -> MessageTag {
        match self {
            Self::Announce(_) => MessageTag::Announce,
            Self::Prepare(_) => MessageTag::Prepare,
            Self::Prepared(_) => MessageTag::Prepared,
            Self::Commit(_) => MessageTag::Commit,
            Self::Committed(_) => MessageTag::Committed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageTag {
    Announce = 1,
    Prepare = 2,
    Prepared = 3,
    Commit = 4,
    Committed = 5,
}

impl MessageTag {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Announce),
            2 => Some(Self::Prepare),
            3 => Some(Self::Prepared),
            4 => Some(Self::Commit),
            5 => Some(Self::Committed),
            _ => None,
        }
    }
}

/// Fields common to every consensus message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// View this message pertains to.
    pub view_id: u64,
    /// Hash of the block under agreement.
    pub block_hash: [u8; 32],
    /// Compressed BLS public key of the sender.
    pub sender_pubkey: Vec<u8>,
    /// Phase-specific payload; see the handler that consumes it.
    pub payload: Vec<u8>,
    /// Signature over [`Envelope::signing_bytes`], under `sender_pubkey`.
    pub signature: Vec<u8>,
}

impl Envelope {
    /// The canonical byte string a message's signature is computed over:
    /// everything except the signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 32 + self.payload.len());
        out.extend_from_slice(&self.view_id.to_le_bytes());
        out.extend_from_slice(&self.block_hash);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Decodes a single length-prefixed wire frame into a [`ConsensusMessage`].
///
/// Decoding failure is never fatal: callers are expected to log and discard
/// on `Err`.
pub fn decode_frame(mut buf: Bytes) -> Result<ConsensusMessage, ValidatorError> {
    if buf.remaining() < 1 {
        return Err(ValidatorError::Codec("empty frame".into()));
    }
    let tag = MessageTag::from_u8(buf.get_u8())
        .ok_or_else(|| ValidatorError::Codec("unknown message tag".into()))?;

    if buf.remaining() < 8 + 32 {
        return Err(ValidatorError::Codec("frame too short for envelope header".into()));
    }
    let view_id = buf.get_u64_le();
    let mut block_hash = [0u8; 32];
    buf.copy_to_slice(&mut block_hash);

    let sender_pubkey = read_length_prefixed(&mut buf)?;
    let payload = read_length_prefixed(&mut buf)?;
    let signature = read_length_prefixed(&mut buf)?;

    let envelope = Envelope {
        view_id,
        block_hash,
        sender_pubkey,
        payload,
        signature,
    };

    Ok(match tag {
        MessageTag::Announce => ConsensusMessage::Announce(envelope),
        MessageTag::Prepare => ConsensusMessage::Prepare(envelope),
        MessageTag::Prepared => ConsensusMessage::Prepared(envelope),
        MessageTag::Commit => ConsensusMessage::Commit(envelope),
        MessageTag::Committed => ConsensusMessage::Committed(envelope),
    })
}

fn read_length_prefixed(buf: &mut Bytes) -> Result<Vec<u8>, ValidatorError> {
    if buf.remaining() < 4 {
        return Err(ValidatorError::Codec("frame truncated before length prefix".into()));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(ValidatorError::Codec("frame truncated before declared field".into()));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Encodes a [`ConsensusMessage`] as a length-prefixed wire frame suitable
/// for the outbound transport adapter.
pub fn encode_frame(msg: &ConsensusMessage) -> BytesMut {
    let envelope = msg.envelope();
    let mut body = BytesMut::new();
    body.put_u8(msg.tag() as u8);
    body.put_u64_le(envelope.view_id);
    body.put_slice(&envelope.block_hash);
    put_length_prefixed(&mut body, &envelope.sender_pubkey);
    put_length_prefixed(&mut body, &envelope.payload);
    put_length_prefixed(&mut body, &envelope.signature);

    let mut framed = BytesMut::with_capacity(4 + body.len());
    let mut len_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut len_bytes, body.len() as u32);
    framed.put_slice(&len_bytes);
    framed.put_slice(&body);
    framed
}

fn put_length_prefixed(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u32_le(field.len() as u32);
    buf.put_slice(field);
}

/// Strips the outer `[u32 len]` prefix from a raw wire buffer and returns
/// the body, or `None` if the buffer doesn't yet contain a full frame. This
/// is the only entry point callers outside this module should use to turn
/// raw transport bytes into something [`decode_frame`] accepts.
///
/// `max_message_len` guards the framing level: a declared length beyond the
/// configured ceiling is rejected before any buffer is allocated for it,
/// rather than being treated as "not enough data yet".
pub fn split_frame(buf: &mut BytesMut, max_message_len: u32) -> Result<Option<Bytes>, ValidatorError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = LittleEndian::read_u32(buf);
    if len > max_message_len {
        return Err(ValidatorError::Codec(format!(
            "declared frame length {} exceeds max_message_len {}",
            len, max_message_len
        )));
    }
    let len = len as usize;
    if buf.len() < 4 + len {
        return Ok(None);
    }
    buf.advance(4);
    Ok(Some(buf.split_to(len).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope {
            view_id: 7,
            block_hash: [9u8; 32],
            sender_pubkey: vec![1, 2, 3],
            payload: vec![4, 5, 6, 7],
            signature: vec![8; 48],
        }
    }

    #[test]
    fn round_trips_every_tag() {
        let variants = vec![
            ConsensusMessage::Announce(sample_envelope()),
            ConsensusMessage::Prepare(sample_envelope()),
            ConsensusMessage::Prepared(sample_envelope()),
            ConsensusMessage::Commit(sample_envelope()),
            ConsensusMessage::Committed(sample_envelope()),
        ];
        for msg in variants {
            let mut framed = encode_frame(&msg);
            let body = split_frame(&mut framed, DEFAULT_MAX_MESSAGE_LEN)
                .expect("not rejected")
                .expect("full frame");
            let decoded = decode_frame(body).expect("decodes");
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut framed = encode_frame(&ConsensusMessage::Announce(sample_envelope()));
        let mut body = split_frame(&mut framed, DEFAULT_MAX_MESSAGE_LEN)
            .unwrap()
            .unwrap()
            .to_vec();
        body[0] = 0xff;
        let err = decode_frame(Bytes::from(body)).unwrap_err();
        assert!(matches!(err, ValidatorError::Codec(_)));
    }

    #[test]
    fn split_frame_waits_for_more_data_when_incomplete() {
        let mut framed = encode_frame(&ConsensusMessage::Announce(sample_envelope()));
        framed.truncate(framed.len() - 1);
        let result = split_frame(&mut framed, DEFAULT_MAX_MESSAGE_LEN).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn split_frame_rejects_oversized_declared_length() {
        let mut framed = encode_frame(&ConsensusMessage::Announce(sample_envelope()));
        let err = split_frame(&mut framed, 4).unwrap_err();
        assert!(matches!(err, ValidatorError::Codec(_)));
    }

    #[test]
    fn rejects_truncated_frame() {
        let err = decode_frame(Bytes::from_static(&[1u8, 2, 3])).unwrap_err();
        assert!(matches!(err, ValidatorError::Codec(_)));
    }
}
