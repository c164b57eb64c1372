//! The fault-injection hook.
//!
//! Modeled as a capability injected at validator construction rather than a
//! process-wide singleton, so production code binds [`NoFaults`] and tests
//! bind a programmable double.

/// Decides whether an incoming message should be dropped before any other
/// processing, to simulate a faulty or Byzantine validator in tests.
pub trait FaultModel: Send + Sync {
    /// Returns `true` if the message currently being handled should be
    /// silently dropped.
    fn should_drop(&self, context: FaultContext<'_>) -> bool;
}

/// What the fault model is being asked to judge.
#[derive(Debug, Clone, Copy)]
pub struct FaultContext<'a> {
    /// Kind of message currently being handled, for logging/matching.
    pub message_kind: &'a str,
    /// View the message claims to be for.
    pub view_id: u64,
}

/// The production no-op fault model: never drops anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultModel for NoFaults {
    fn should_drop(&self, _context: FaultContext<'_>) -> bool {
        false
    }
}
