//! Shared fixtures for the validator handling scenario tests.
//!
//! Integration tests link against the library compiled without `cfg(test)`,
//! so only `pub` items are reachable from here; these doubles live in the
//! test crate rather than inside the library itself.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use shard_validator::chain::{ChainConsumer, FinalizedBlock, OnConsensusDone, VerifiedBlockSender};
use shard_validator::crypto::{self, Mask, RosterKey, SigningKey};
use shard_validator::error::ValidatorError;
use shard_validator::fault::NoFaults;
use shard_validator::message::{encode_frame, split_frame, ConsensusMessage, Envelope, DEFAULT_MAX_MESSAGE_LEN};
use shard_validator::transport::{OutboundAdapter, ShardTransport};
use shard_validator::validator::{Validator, ValidatorConfig};
use shard_validator::verify::{ChainReader, Header};

/// A `ChainReader` double that accepts every header.
pub struct AlwaysOk;

impl ChainReader for AlwaysOk {
    fn verify_header(&self, _header: &Header, _seal_check: bool) -> Result<(), ValidatorError> {
        Ok(())
    }
}

/// Records every frame handed to the outbound transport.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl ShardTransport for RecordingTransport {
    fn broadcast(&self, framed: Vec<u8>) {
        self.sent.lock().unwrap().push(framed);
    }
}

/// Records every block delivered via `on_consensus_done`.
#[derive(Default)]
pub struct RecordingConsumer {
    pub delivered: Mutex<Vec<FinalizedBlock>>,
}

impl OnConsensusDone for RecordingConsumer {
    fn on_consensus_done(&self, block: &FinalizedBlock) {
        self.delivered.lock().unwrap().push(block.clone());
    }
}

/// A roster of BLS keys plus a leader key, all derived deterministically so
/// tests are reproducible without relying on `rand`.
pub struct Fixture {
    pub leader: SigningKey,
    pub members: Vec<SigningKey>,
    pub public_keys: Vec<RosterKey>,
}

static SEED_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_seed() -> [u8; 32] {
    let n = SEED_COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut seed = [0u8; 32];
    seed[0..4].copy_from_slice(&n.to_le_bytes());
    seed[31] = 0xAB; // keep the material non-zero regardless of n
    seed
}

impl Fixture {
    /// Builds a leader key plus `roster_len` distinct roster member keys.
    pub fn new(roster_len: usize) -> Self {
        let leader = SigningKey::from_key_material(&next_seed()).expect("leader key");
        let members: Vec<SigningKey> = (0..roster_len)
            .map(|_| SigningKey::from_key_material(&next_seed()).expect("member key"))
            .collect();
        let public_keys = members.iter().map(|k| k.public().clone()).collect();
        Self {
            leader,
            members,
            public_keys,
        }
    }

    pub fn roster_len(&self) -> usize {
        self.members.len()
    }

    /// Aggregates the signatures of `subset` indices over `message`, and
    /// returns `(aggregate_signature_bytes, bitmap_bytes)`.
    pub fn aggregate_subset(&self, subset: &[usize], message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let sig_bytes: Vec<Vec<u8>> = subset.iter().map(|&i| self.members[i].sign(message)).collect();
        let sigs = sig_bytes
            .iter()
            .map(|b| crypto::parse_signature(b).expect("valid signature"))
            .collect::<Vec<_>>();
        let sig_refs: Vec<&_> = sigs.iter().collect();
        let aggregate = crypto::aggregate_signatures(&sig_refs).expect("aggregation succeeds");

        let byte_len = Mask::byte_len(self.roster_len());
        let mut bitmap = vec![0u8; byte_len];
        for &i in subset {
            bitmap[i / 8] |= 1 << (i % 8);
        }
        (aggregate.to_bytes().to_vec(), bitmap)
    }
}

/// Builds a validator wired to the given collaborators, with the conventional
/// fixture leader/roster and an `AlwaysOk` chain reader / `NoFaults` fault
/// model.
pub struct Harness {
    pub validator: Validator,
    pub transport: Arc<RecordingTransport>,
    pub consumer: Arc<RecordingConsumer>,
    pub sender: tokio::sync::mpsc::Sender<FinalizedBlock>,
    pub receiver: tokio::sync::mpsc::Receiver<FinalizedBlock>,
}

pub fn build_harness(fixture: &Fixture, initial_view_id: u64, channel_capacity: usize) -> Harness {
    let self_signing_key = SigningKey::from_key_material(&next_seed()).expect("self key");
    let transport = Arc::new(RecordingTransport::default());
    let consumer = Arc::new(RecordingConsumer::default());
    let (sender, receiver) = tokio::sync::mpsc::channel(channel_capacity);

    let validator = Validator::new(ValidatorConfig {
        self_address: b"validator-under-test".to_vec(),
        shard_id: 1,
        leader_pubkey: fixture.leader.public().clone(),
        public_keys: fixture.public_keys.clone(),
        signing_key: self_signing_key,
        initial_view_id,
        chain_reader: Arc::new(AlwaysOk),
        block_verifier: None,
        fault_model: Arc::new(NoFaults),
        outbound: OutboundAdapter::new(transport.clone()),
        chain_consumer: ChainConsumer {
            on_consensus_done: consumer.clone(),
            verified_new_block: VerifiedBlockSender::new(sender.clone()),
        },
    });

    Harness {
        validator,
        transport,
        consumer,
        sender,
        receiver,
    }
}

/// Builds the `[u32 header_len][header][body]` block encoding `verify::decode_block` expects.
pub fn encode_block(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = (header.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(header);
    out.extend_from_slice(body);
    out
}

fn signing_bytes(view_id: u64, block_hash: &[u8; 32], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 32 + payload.len());
    out.extend_from_slice(&view_id.to_le_bytes());
    out.extend_from_slice(block_hash);
    out.extend_from_slice(payload);
    out
}

/// Builds a leader-signed envelope for `view_id`/`block_hash`/`payload`.
pub fn leader_envelope(
    leader: &SigningKey,
    view_id: u64,
    block_hash: [u8; 32],
    payload: Vec<u8>,
) -> Envelope {
    let signature = leader.sign(&signing_bytes(view_id, &block_hash, &payload));
    Envelope {
        view_id,
        block_hash,
        sender_pubkey: leader.public().as_bytes().to_vec(),
        payload,
        signature,
    }
}

/// Builds an envelope "signed" by an arbitrary key, for forged-leader tests.
pub fn impostor_envelope(
    impostor: &SigningKey,
    view_id: u64,
    block_hash: [u8; 32],
    payload: Vec<u8>,
) -> Envelope {
    let signature = impostor.sign(&signing_bytes(view_id, &block_hash, &payload));
    Envelope {
        view_id,
        block_hash,
        sender_pubkey: impostor.public().as_bytes().to_vec(),
        payload,
        signature,
    }
}

/// Encodes `msg` exactly as the outbound transport would, then strips the
/// frame back down to the body `Validator::process` expects.
pub fn frame_body(msg: &ConsensusMessage) -> Bytes {
    let mut framed = encode_frame(msg);
    split_frame(&mut framed, DEFAULT_MAX_MESSAGE_LEN)
        .expect("under the default max message length")
        .expect("a full frame was just encoded")
}
