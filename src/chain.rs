//! Chain consumer hooks: a synchronous `on_consensus_done` notification
//! plus a bounded, non-blocking channel of finalized blocks.

use std::sync::Arc;

use crate::crypto::Mask;

/// A finalized block with both aggregate signature pairs attached.
#[derive(Debug, Clone)]
pub struct FinalizedBlock {
    /// The view this block was committed for.
    pub view_id: u64,
    /// Encoded block bytes.
    pub encoded_block: Vec<u8>,
    /// The aggregate prepare signature attached to the block.
    pub prepare_sig: Vec<u8>,
    /// The prepare-phase signer mask.
    pub prepare_bitmap: Mask,
    /// The aggregate commit signature attached to the block.
    pub commit_sig: Vec<u8>,
    /// The commit-phase signer mask.
    pub commit_bitmap: Mask,
}

/// Synchronous notification that a block has been finalized.
pub trait OnConsensusDone: Send + Sync {
    /// Called exactly once per view that reaches `CommittedDone`.
    fn on_consensus_done(&self, block: &FinalizedBlock);
}

/// Non-blocking delivery of finalized blocks to an independent chain-apply
/// task, via a bounded `tokio` channel: if the receiver cannot accept right
/// now, the send is dropped rather than blocking.
#[derive(Clone)]
pub struct VerifiedBlockSender {
    inner: tokio::sync::mpsc::Sender<FinalizedBlock>,
}

impl VerifiedBlockSender {
    /// Wraps a `tokio::sync::mpsc::Sender`.
    pub fn new(inner: tokio::sync::mpsc::Sender<FinalizedBlock>) -> Self {
        Self { inner }
    }

    /// Attempts to deliver `block` without blocking. If the receiver cannot
    /// accept right now, the block is still considered committed and the
    /// send is silently dropped.
    pub fn try_deliver(&self, block: FinalizedBlock) {
        if let Err(err) = self.inner.try_send(block) {
            log::warn!("verified-block channel could not accept a finalized block: {}", err);
        }
    }
}

impl std::fmt::Debug for VerifiedBlockSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedBlockSender").finish()
    }
}

/// Bundles the two chain consumer hooks a validator is constructed with.
#[derive(Clone)]
pub struct ChainConsumer {
    /// Synchronous finalize notification.
    pub on_consensus_done: Arc<dyn OnConsensusDone>,
    /// Non-blocking finalized-block channel.
    pub verified_new_block: VerifiedBlockSender,
}

impl std::fmt::Debug for ChainConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainConsumer").finish()
    }
}
