//! The verification pipeline's external collaborators: header checking and
//! optional full-block verification.
//!
//! Both are modeled as narrow traits injected behind `Arc<dyn _>`, so the
//! validator holds capability handles rather than ambient singletons.

use crate::error::ValidatorError;

/// A decoded block header, opaque to this crate beyond what `ChainReader`
/// needs to validate it. Full block decoding is delegated elsewhere; this
/// crate only carries the bytes far enough to hand them to the collaborator.
pub type Header = Vec<u8>;

/// Delegate for header validation and chain queries.
pub trait ChainReader: Send + Sync {
    /// Validates `header`. `seal_check` is `false` during consensus, since
    /// the commit seal is attached only after finalization.
    fn verify_header(&self, header: &Header, seal_check: bool) -> Result<(), ValidatorError>;
}

/// Optional delegate for full-block verification, invoked after header
/// verification succeeds in the announce phase.
pub trait BlockVerifier: Send + Sync {
    /// Validates the full decoded block body.
    fn verify_block(&self, block: &[u8]) -> Result<(), ValidatorError>;
}

/// Decodes the length-prefixed, self-describing block payload carried by an
/// `Announce` message into a header and the remaining body. Full block
/// decoding is an external concern; this crate only peels off the header so
/// it can be handed off to [`ChainReader`].
///
/// The wire shape assumed here is `[u32 header_len][header][body]`.
pub fn decode_block(encoded: &[u8]) -> Result<(Header, &[u8]), ValidatorError> {
    if encoded.len() < 4 {
        return Err(ValidatorError::Codec("block too short for header length prefix".into()));
    }
    let header_len = u32::from_le_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
    let rest = &encoded[4..];
    if rest.len() < header_len {
        return Err(ValidatorError::Codec("block truncated before declared header".into()));
    }
    let (header, body) = rest.split_at(header_len);
    Ok((header.to_vec(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_block_splits_header_and_body() {
        let header = vec![1, 2, 3];
        let body = vec![4, 5, 6, 7, 8];
        let mut encoded = (header.len() as u32).to_le_bytes().to_vec();
        encoded.extend_from_slice(&header);
        encoded.extend_from_slice(&body);

        let (decoded_header, decoded_body) = decode_block(&encoded).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_body, body.as_slice());
    }

    #[test]
    fn decode_block_rejects_truncated_header() {
        let encoded = vec![10, 0, 0, 0, 1, 2];
        assert!(decode_block(&encoded).is_err());
    }
}
