//! The validator state machine, its dispatch entry point, the authenticity
//! check, and the commit finalizer / catch-up drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use log::{trace, warn};

use crate::buffer::BlockBuffer;
use crate::chain::{ChainConsumer, FinalizedBlock};
use crate::crypto::{self, Mask, RosterKey, SigningKey};
use crate::error::ValidatorError;
use crate::fault::{FaultContext, FaultModel};
use crate::message::{decode_frame, ConsensusMessage, Envelope};
use crate::state::Phase;
use crate::transport::OutboundAdapter;
use crate::verify::{decode_block, BlockVerifier, ChainReader};

/// Read-mostly roster data: the current leader and the shard's validator
/// public keys, indexed by bitmap position.
struct Roster {
    leader_pubkey: RosterKey,
    public_keys: Vec<RosterKey>,
}

/// Everything that must be mutated under a single exclusive lock:
/// `view_id`, `state`, the current block, both aggregate signature pairs,
/// and the pending-block buffer.
struct ViewState {
    view_id: u64,
    phase: Phase,
    block_hash: Option<[u8; 32]>,
    block: Option<Vec<u8>>,
    aggregated_prepare_sig: Option<Vec<u8>>,
    prepare_bitmap: Option<Mask>,
    aggregated_commit_sig: Option<Vec<u8>>,
    commit_bitmap: Option<Mask>,
    blocks_received: BlockBuffer,
}

/// Configuration a validator is constructed with: the roster, this
/// validator's own signing key, its collaborators, and the capacities/
/// capability handles those collaborators need, pulled out of a config
/// struct rather than hardcoded.
pub struct ValidatorConfig {
    /// This validator's chain address, for attribution in its own
    /// `Prepare`/`Commit` messages.
    pub self_address: Vec<u8>,
    /// Shard this validator participates in.
    pub shard_id: u64,
    /// Current leader's BLS public key.
    pub leader_pubkey: RosterKey,
    /// Ordered roster of shard validators' public keys.
    pub public_keys: Vec<RosterKey>,
    /// This validator's own signing key.
    pub signing_key: SigningKey,
    /// The view this validator starts observing from.
    pub initial_view_id: u64,
    /// Header/block verification collaborators.
    pub chain_reader: Arc<dyn ChainReader>,
    /// Optional full-block verifier.
    pub block_verifier: Option<Arc<dyn BlockVerifier>>,
    /// Fault-injection capability; bind [`crate::fault::NoFaults`] in production.
    pub fault_model: Arc<dyn FaultModel>,
    /// Outbound transport for this validator's own votes.
    pub outbound: OutboundAdapter,
    /// Chain consumer hooks.
    pub chain_consumer: ChainConsumer,
}

impl std::fmt::Debug for ValidatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorConfig")
            .field("self_address", &self.self_address)
            .field("shard_id", &self.shard_id)
            .field("leader_pubkey", &self.leader_pubkey)
            .field("public_keys", &self.public_keys)
            .field("signing_key", &self.signing_key)
            .field("initial_view_id", &self.initial_view_id)
            .field("chain_reader", &"<dyn ChainReader>")
            .field("block_verifier", &self.block_verifier.is_some())
            .field("fault_model", &"<dyn FaultModel>")
            .field("outbound", &self.outbound)
            .field("chain_consumer", &self.chain_consumer)
            .finish()
    }
}

/// The validator-side consensus message handler: a single long-lived
/// instance per shard.
pub struct Validator {
    self_address: Vec<u8>,
    shard_id: u64,
    roster: RwLock<Roster>,
    view: Mutex<ViewState>,
    current_view_hint: AtomicU64,
    signing_key: SigningKey,
    chain_reader: Arc<dyn ChainReader>,
    block_verifier: Option<Arc<dyn BlockVerifier>>,
    fault_model: Arc<dyn FaultModel>,
    outbound: OutboundAdapter,
    chain_consumer: ChainConsumer,
}

impl Validator {
    /// Builds a validator context from its configuration.
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            self_address: config.self_address,
            shard_id: config.shard_id,
            roster: RwLock::new(Roster {
                leader_pubkey: config.leader_pubkey,
                public_keys: config.public_keys,
            }),
            view: Mutex::new(ViewState {
                view_id: config.initial_view_id,
                phase: Phase::Finished,
                block_hash: None,
                block: None,
                aggregated_prepare_sig: None,
                prepare_bitmap: None,
                aggregated_commit_sig: None,
                commit_bitmap: None,
                blocks_received: BlockBuffer::new(),
            }),
            current_view_hint: AtomicU64::new(config.initial_view_id),
            signing_key: config.signing_key,
            chain_reader: config.chain_reader,
            block_verifier: config.block_verifier,
            fault_model: config.fault_model,
            outbound: config.outbound,
            chain_consumer: config.chain_consumer,
        }
    }

    /// This validator's chain address.
    pub fn self_address(&self) -> &[u8] {
        &self.self_address
    }

    /// The shard this validator participates in.
    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    /// The current view, for diagnostics and tests. Reading this never
    /// blocks on the per-view mutex.
    pub fn current_view(&self) -> u64 {
        self.current_view_hint.load(Ordering::SeqCst)
    }

    /// The current phase, for tests and diagnostics.
    pub fn current_phase(&self) -> Phase {
        self.view.lock().unwrap().phase
    }

    /// Whether the pending-block buffer is empty, for tests.
    pub fn blocks_received_is_empty(&self) -> bool {
        self.view.lock().unwrap().blocks_received.is_empty()
    }

    /// Replaces the expected leader key. View-change itself is an external
    /// protocol this crate does not drive; this entry point exists for the
    /// external view-change driver to call once it selects a new leader.
    pub fn set_leader_pubkey(&self, leader_pubkey: RosterKey) {
        self.roster.write().unwrap().leader_pubkey = leader_pubkey;
    }

    /// Replaces the validator roster wholesale, for use on an epoch change.
    pub fn set_public_keys(&self, public_keys: Vec<RosterKey>) {
        self.roster.write().unwrap().public_keys = public_keys;
    }

    /// Decodes a raw wire frame and dispatches it to the matching handler.
    /// Decoding failure and leader-bound tags are both non-fatal: logged
    /// and discarded.
    pub fn process(&self, payload: Bytes) {
        let msg = match decode_frame(payload) {
            Ok(msg) => msg,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };

        match msg {
            ConsensusMessage::Announce(envelope) => self.handle_announce(envelope),
            ConsensusMessage::Prepared(envelope) => self.handle_prepared(envelope),
            ConsensusMessage::Committed(envelope) => self.handle_committed(envelope),
            ConsensusMessage::Prepare(_) | ConsensusMessage::Commit(_) => {
                warn!("dropping leader-bound message received via broadcast relay");
            }
        }
    }

    /// Message authenticity and freshness check against the current
    /// expected leader.
    fn check_consensus_message(
        &self,
        envelope: &Envelope,
        leader_pubkey: &RosterKey,
        current_view: u64,
    ) -> Result<(), ValidatorError> {
        if envelope.sender_pubkey != leader_pubkey.as_bytes() {
            return Err(ValidatorError::Auth("sender is not the current leader".into()));
        }
        if envelope.view_id != current_view {
            return Err(ValidatorError::Auth(format!(
                "view mismatch: message view {} != current view {}",
                envelope.view_id, current_view
            )));
        }
        let signature = crypto::parse_signature(&envelope.signature)?;
        if !crypto::verify_single(&signature, leader_pubkey.key(), &envelope.signing_bytes()) {
            return Err(ValidatorError::Auth("leader signature does not verify".into()));
        }
        Ok(())
    }

    fn fault_check(&self, message_kind: &'static str, view_id: u64) -> Result<(), ValidatorError> {
        let context = FaultContext { message_kind, view_id };
        if self.fault_model.should_drop(context) {
            return Err(ValidatorError::AttackInjection(format!(
                "fault model dropped {} for view {}",
                message_kind, view_id
            )));
        }
        Ok(())
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message)
    }

    /// Leader -> validator `Announce` handler.
    fn handle_announce(&self, envelope: Envelope) {
        if let Err(err) = self.fault_check("Announce", envelope.view_id) {
            err.log_and_drop();
            return;
        }

        let roster = self.roster.read().unwrap();
        let mut view = self.view.lock().unwrap();

        // The buffer write happens before verification, so a lagging
        // validator can still catch up later even if this Announce fails
        // verification right now.
        view.blocks_received
            .insert(envelope.view_id, envelope.payload.clone(), view.phase);
        view.block_hash = Some(envelope.block_hash);
        view.block = Some(envelope.payload.clone());

        let current_view = view.view_id;
        if let Err(err) = self.check_consensus_message(&envelope, &roster.leader_pubkey, current_view) {
            err.log_and_drop();
            return;
        }

        let (header, _body) = match decode_block(&envelope.payload) {
            Ok(v) => v,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };

        if let Err(err) = self.chain_reader.verify_header(&header, false) {
            err.log_and_drop();
            return;
        }

        if let Some(block_verifier) = &self.block_verifier {
            if let Err(err) = block_verifier.verify_block(&envelope.payload) {
                err.log_and_drop();
                return;
            }
        }

        let prepare_signature = self.sign(&envelope.block_hash);
        let prepare_msg = ConsensusMessage::Prepare(Envelope {
            view_id: envelope.view_id,
            block_hash: envelope.block_hash,
            sender_pubkey: self.signing_key.public().as_bytes().to_vec(),
            payload: Vec::new(),
            signature: prepare_signature,
        });
        self.outbound.send_to_shard(&prepare_msg);

        view.phase = Phase::PrepareDone;
        trace!("view {} advanced to PrepareDone", envelope.view_id);
    }

    /// Leader -> validator `Prepared` handler.
    fn handle_prepared(&self, envelope: Envelope) {
        if let Err(err) = self.fault_check("Prepared", envelope.view_id) {
            err.log_and_drop();
            return;
        }

        let roster = self.roster.read().unwrap();

        if envelope.payload.len() < crypto::AGGREGATE_SIGNATURE_LEN {
            ValidatorError::Codec("prepared payload shorter than one aggregate signature".into())
                .log_and_drop();
            return;
        }
        let (sig_bytes, bitmap_bytes) = envelope.payload.split_at(crypto::AGGREGATE_SIGNATURE_LEN);
        let mask = match Mask::from_bytes(bitmap_bytes, roster.public_keys.len()) {
            Ok(mask) => mask,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };

        let current_view = self.current_view_hint.load(Ordering::SeqCst);
        if let Err(err) = self.check_consensus_message(&envelope, &roster.leader_pubkey, current_view) {
            err.log_and_drop();
            return;
        }

        let mut view = self.view.lock().unwrap();
        if view.view_id != envelope.view_id {
            ValidatorError::Auth("view advanced before the lock was acquired".into()).log_and_drop();
            return;
        }

        let signature = match crypto::parse_signature(sig_bytes) {
            Ok(sig) => sig,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };
        let aggregate_key = match crypto::aggregate_public_key(&roster.public_keys, &mask) {
            Ok(key) => key,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };
        if !crypto::verify_aggregate(&signature, &aggregate_key, &envelope.block_hash) {
            ValidatorError::Verify("prepare aggregate signature does not verify".into()).log_and_drop();
            return;
        }

        view.aggregated_prepare_sig = Some(sig_bytes.to_vec());
        view.prepare_bitmap = Some(mask.clone());

        let commit_payload = [sig_bytes, &mask.to_bytes()[..]].concat();
        let commit_signature = self.sign(&commit_payload);
        let commit_msg = ConsensusMessage::Commit(Envelope {
            view_id: envelope.view_id,
            block_hash: envelope.block_hash,
            sender_pubkey: self.signing_key.public().as_bytes().to_vec(),
            payload: commit_payload,
            signature: commit_signature,
        });
        self.outbound.send_to_shard(&commit_msg);

        view.phase = Phase::CommitDone;
        trace!("view {} advanced to CommitDone", envelope.view_id);
    }

    /// Leader -> validator `Committed` handler, followed by the catch-up
    /// drain.
    fn handle_committed(&self, envelope: Envelope) {
        if let Err(err) = self.fault_check("Committed", envelope.view_id) {
            err.log_and_drop();
            return;
        }

        let roster = self.roster.read().unwrap();

        if envelope.payload.len() < crypto::AGGREGATE_SIGNATURE_LEN {
            ValidatorError::Codec("committed payload shorter than one aggregate signature".into())
                .log_and_drop();
            return;
        }
        let (sig_bytes, bitmap_bytes) = envelope.payload.split_at(crypto::AGGREGATE_SIGNATURE_LEN);
        let commit_mask = match Mask::from_bytes(bitmap_bytes, roster.public_keys.len()) {
            Ok(mask) => mask,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };

        let current_view = self.current_view_hint.load(Ordering::SeqCst);
        if let Err(err) = self.check_consensus_message(&envelope, &roster.leader_pubkey, current_view) {
            err.log_and_drop();
            return;
        }

        let mut view = self.view.lock().unwrap();
        if view.view_id != envelope.view_id {
            ValidatorError::Auth("view advanced before the lock was acquired".into()).log_and_drop();
            return;
        }

        let (prepare_sig, prepare_bitmap) = match (&view.aggregated_prepare_sig, &view.prepare_bitmap) {
            (Some(sig), Some(bitmap)) => (sig.clone(), bitmap.clone()),
            _ => {
                ValidatorError::Verify("no prepare evidence recorded for this view".into()).log_and_drop();
                return;
            }
        };

        let signature = match crypto::parse_signature(sig_bytes) {
            Ok(sig) => sig,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };
        let aggregate_key = match crypto::aggregate_public_key(&roster.public_keys, &commit_mask) {
            Ok(key) => key,
            Err(err) => {
                err.log_and_drop();
                return;
            }
        };
        let bound_message = [prepare_sig.as_slice(), &prepare_bitmap.to_bytes()[..]].concat();
        if !crypto::verify_aggregate(&signature, &aggregate_key, &bound_message) {
            ValidatorError::Verify("commit aggregate signature does not verify".into()).log_and_drop();
            return;
        }

        view.aggregated_commit_sig = Some(sig_bytes.to_vec());
        view.commit_bitmap = Some(commit_mask);
        view.phase = Phase::CommittedDone;
        trace!("view {} reached CommittedDone", envelope.view_id);

        self.catch_up_drain(&mut view);
    }

    /// Repeatedly consumes buffered blocks for the view that has just
    /// become current.
    ///
    /// The same prepare/commit signature pair verified for the triggering
    /// view is attached to every block drained in this call, even though it
    /// was computed over that view's block hash, not the buffered blocks'.
    /// A correctness follow-up would need to buffer each block's own
    /// signature pair alongside it instead of carrying one pair across a
    /// whole drain; this preserves the protocol's current observed
    /// behavior rather than silently changing it.
    fn catch_up_drain(&self, view: &mut ViewState) {
        loop {
            let view_id = view.view_id;
            let entry = match view.blocks_received.remove(view_id) {
                Some(entry) => entry,
                None => break,
            };

            view.block_hash = None;
            view.view_id = view_id + 1;
            self.current_view_hint.store(view.view_id, Ordering::SeqCst);

            let (header, _body) = match decode_block(&entry.encoded_block) {
                Ok(v) => v,
                Err(err) => {
                    err.log_and_drop();
                    break;
                }
            };
            if let Err(err) = self.chain_reader.verify_header(&header, false) {
                err.log_and_drop();
                break;
            }

            let finalized = FinalizedBlock {
                view_id,
                encoded_block: entry.encoded_block,
                prepare_sig: view.aggregated_prepare_sig.clone().unwrap_or_default(),
                prepare_bitmap: view.prepare_bitmap.clone().unwrap_or_else(Mask::empty),
                commit_sig: view.aggregated_commit_sig.clone().unwrap_or_default(),
                commit_bitmap: view.commit_bitmap.clone().unwrap_or_else(Mask::empty),
            };

            self.chain_consumer.on_consensus_done.on_consensus_done(&finalized);
            self.chain_consumer.verified_new_block.try_deliver(finalized);
        }

        // The view that triggered this drain (and every view drained past
        // it) is now finalized: transient per-view fields are cleared and
        // the phase resets for the next `Announce`.
        view.block = None;
        view.block_hash = None;
        view.aggregated_prepare_sig = None;
        view.prepare_bitmap = None;
        view.aggregated_commit_sig = None;
        view.commit_bitmap = None;
        view.phase = Phase::Finished;
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("shard_id", &self.shard_id)
            .field("current_view", &self.current_view())
            .finish()
    }
}
