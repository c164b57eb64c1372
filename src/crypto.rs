//! BLS aggregate-signature primitives and the roster subset bitmap.
//!
//! Signatures live on the `min_sig` BLS12-381 variant: 48-byte compressed
//! signatures in G1, 96-byte compressed public keys in G2. Aggregate
//! signatures on the wire are always exactly 48 bytes.

use blst::min_sig::{AggregatePublicKey, AggregateSignature, PublicKey, Signature};
use blst::BLST_ERROR;

use crate::error::ValidatorError;

/// Domain separation tag for all signatures verified by this crate.
const DST: &[u8] = b"SHARD-BFT-BLS-SIGNATURE-V1";

/// Length in bytes of a compressed aggregate signature on the wire.
pub const AGGREGATE_SIGNATURE_LEN: usize = 48;

/// A validator's BLS public key, kept in its wire (compressed) form plus a
/// lazily-parsed handle. The roster is read-mostly, so callers are expected
/// to parse once at load time via [`RosterKey::parse`].
#[derive(Clone)]
pub struct RosterKey {
    bytes: Vec<u8>,
    key: PublicKey,
}

impl RosterKey {
    /// Parses a compressed public key from its wire bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ValidatorError> {
        let key = PublicKey::from_bytes(bytes)
            .map_err(|_| ValidatorError::Codec("malformed BLS public key".into()))?;
        Ok(Self {
            bytes: bytes.to_vec(),
            key,
        })
    }

    /// The compressed wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The parsed key, for signature verification.
    pub fn key(&self) -> &PublicKey {
        &self.key
    }
}

impl PartialEq for RosterKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl std::fmt::Debug for RosterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RosterKey({})", hex_prefix(&self.bytes))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// This validator's own signing key, used to produce its `Prepare` and
/// `Commit` votes.
pub struct SigningKey {
    secret: blst::min_sig::SecretKey,
    public: RosterKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("secret", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

impl SigningKey {
    /// Builds a signing key from 32 bytes of key material (e.g. derived
    /// from a seed by the host process; key derivation itself is out of
    /// this crate's scope).
    pub fn from_key_material(ikm: &[u8]) -> Result<Self, ValidatorError> {
        let secret = blst::min_sig::SecretKey::key_gen(ikm, &[])
            .map_err(|_| ValidatorError::Codec("invalid BLS key material".into()))?;
        let public_bytes = secret.sk_to_pk().to_bytes();
        let public = RosterKey::parse(&public_bytes)?;
        Ok(Self { secret, public })
    }

    /// This key's public half, as it appears in the roster.
    pub fn public(&self) -> &RosterKey {
        &self.public
    }

    /// Signs `message` and returns the 48-byte compressed signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.secret.sign(message, DST, &[]).to_bytes().to_vec()
    }
}

/// Subset mask over the roster: bit *i* set means roster member *i*
/// contributed to the aggregate signature being checked.
///
/// The byte length of a mask is always the roster size rounded up to a byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    bits: bit_vec::BitVec,
}

impl Mask {
    /// Number of bytes a mask over `roster_len` members occupies on the wire.
    pub fn byte_len(roster_len: usize) -> usize {
        (roster_len + 7) / 8
    }

    /// Builds a mask from its wire bytes, validating the length against the
    /// roster size.
    pub fn from_bytes(bytes: &[u8], roster_len: usize) -> Result<Self, ValidatorError> {
        if bytes.len() != Self::byte_len(roster_len) {
            return Err(ValidatorError::Codec(format!(
                "bitmap length {} does not match roster size {}",
                bytes.len(),
                roster_len
            )));
        }
        let mut bits = bit_vec::BitVec::from_elem(roster_len, false);
        for i in 0..roster_len {
            let byte = bytes[i / 8];
            if byte & (1 << (i % 8)) != 0 {
                bits.set(i, true);
            }
        }
        Ok(Self { bits })
    }

    /// Serializes the mask back to its wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::byte_len(self.bits.len())];
        for (i, bit) in self.bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }

    /// Indices of roster members whose bit is set, in ascending order.
    pub fn members(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, bit)| if bit { Some(i) } else { None })
            .collect()
    }

    /// Number of members set in the mask.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    /// A mask with no members set, used as a placeholder before any
    /// aggregate signature has been verified.
    pub fn empty() -> Self {
        Self {
            bits: bit_vec::BitVec::new(),
        }
    }
}

/// Computes the aggregate public key of the roster members selected by
/// `mask`.
pub fn aggregate_public_key(roster: &[RosterKey], mask: &Mask) -> Result<PublicKey, ValidatorError> {
    let members = mask.members();
    if members.is_empty() {
        return Err(ValidatorError::Verify("empty signer mask".into()));
    }
    let keys: Vec<&PublicKey> = members
        .iter()
        .map(|&i| {
            roster
                .get(i)
                .map(|k| &k.key)
                .ok_or_else(|| ValidatorError::Verify(format!("mask bit {} out of roster range", i)))
        })
        .collect::<Result<_, _>>()?;
    let agg = AggregatePublicKey::aggregate(&keys, true)
        .map_err(|_| ValidatorError::Verify("failed to aggregate public keys".into()))?;
    Ok(agg.to_public_key())
}

/// Parses a 48-byte compressed aggregate signature.
pub fn parse_signature(bytes: &[u8]) -> Result<Signature, ValidatorError> {
    if bytes.len() != AGGREGATE_SIGNATURE_LEN {
        return Err(ValidatorError::Codec(format!(
            "aggregate signature must be {} bytes, got {}",
            AGGREGATE_SIGNATURE_LEN,
            bytes.len()
        )));
    }
    Signature::from_bytes(bytes).map_err(|_| ValidatorError::Codec("malformed aggregate signature".into()))
}

/// Verifies a single signature (e.g. the leader's per-message signature, or
/// this validator's own outbound prepare/commit signature) against one
/// public key over `message`.
pub fn verify_single(sig: &Signature, key: &PublicKey, message: &[u8]) -> bool {
    sig.verify(true, message, DST, &[], key, true) == BLST_ERROR::BLST_SUCCESS
}

/// Verifies that `sig` is a valid aggregate signature of `aggregate_key`
/// over `message`.
pub fn verify_aggregate(sig: &Signature, aggregate_key: &PublicKey, message: &[u8]) -> bool {
    sig.verify(true, message, DST, &[], aggregate_key, true) == BLST_ERROR::BLST_SUCCESS
}

/// Aggregates a set of individual signatures (not required by the validator
/// path itself, but kept alongside the other primitives in this module since
/// it is the natural counterpart of [`aggregate_public_key`] and is exercised
/// by the round-trip tests that construct fixtures).
pub fn aggregate_signatures(sigs: &[&Signature]) -> Result<Signature, ValidatorError> {
    let agg = AggregateSignature::aggregate(sigs, true)
        .map_err(|_| ValidatorError::Verify("failed to aggregate signatures".into()))?;
    Ok(agg.to_signature())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_round_trip_byte_aligned() {
        let bytes = vec![0b0000_0101];
        let mask = Mask::from_bytes(&bytes, 5).unwrap();
        assert_eq!(mask.members(), vec![0, 2]);
        assert_eq!(mask.to_bytes(), bytes);
    }

    #[test]
    fn mask_byte_len_rounds_up() {
        assert_eq!(Mask::byte_len(1), 1);
        assert_eq!(Mask::byte_len(8), 1);
        assert_eq!(Mask::byte_len(9), 2);
        assert_eq!(Mask::byte_len(16), 2);
        assert_eq!(Mask::byte_len(17), 3);
    }

    #[test]
    fn mask_rejects_wrong_length() {
        let err = Mask::from_bytes(&[0u8; 2], 5).unwrap_err();
        assert!(matches!(err, ValidatorError::Codec(_)));
    }
}
