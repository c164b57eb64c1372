//! The outbound transport adapter.
//!
//! `send_to_shard` wraps a message in its length-prefixed frame and hands it
//! to an injected `ShardTransport`. Broadcast is best-effort: no delivery
//! acknowledgement is expected at this layer.

use std::sync::Arc;

use crate::message::ConsensusMessage;

/// Capability for handing a framed message to the host's network stack.
/// Implementations are expected to be cheap to clone/share and non-blocking
/// enough not to stall the caller's critical section for long: a blocking
/// network send is an acceptable suspension point, but should not be held
/// under the context lock any longer than necessary.
pub trait ShardTransport: Send + Sync {
    /// Best-effort broadcast of a framed message to the shard group.
    fn broadcast(&self, framed: Vec<u8>);
}

/// Sends a validator's own `Prepare`/`Commit` messages to the shard group.
pub struct OutboundAdapter {
    transport: Arc<dyn ShardTransport>,
}

impl OutboundAdapter {
    /// Wraps a transport handle.
    pub fn new(transport: Arc<dyn ShardTransport>) -> Self {
        Self { transport }
    }

    /// Frames `msg` and broadcasts it to the shard group.
    pub fn send_to_shard(&self, msg: &ConsensusMessage) {
        let framed = crate::message::encode_frame(msg);
        self.transport.broadcast(framed.to_vec());
    }
}

impl std::fmt::Debug for OutboundAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundAdapter").finish()
    }
}
