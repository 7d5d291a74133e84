//! §4.K pipeline registers: four 1-deep, flushable, ready/valid queues wired between stages.
//!
//! No direct teacher analogue exists (the reference core is single-cycle and has no pipeline
//! registers at all); this is grounded on the *discipline* the reference applies everywhere else
//! in the workspace when it has to stage state across a boundary with backpressure — e.g. the
//! request/response latching in `red-planet-core/src/bus.rs`'s documentation of ready/valid
//! semantics — generalized here into one small reusable type instead of one ad hoc boolean/Option
//! pair per stage boundary.

/// A single-slot, flushable pipe-mode queue between two adjacent pipeline stages.
///
/// `enq.ready = empty() || deq_fire` each cycle: a producer may push into an empty register, or
/// into one that is being drained this same cycle (pipe-through). [`Self::flush`] clears the slot
/// immediately, dropping whatever it held.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegister<T> {
    slot: Option<T>,
}

impl<T> PipelineRegister<T> {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// `true` if the downstream stage has something to consume this cycle.
    pub fn is_valid(&self) -> bool {
        self.slot.is_some()
    }

    /// `true` if a producer may push into this register this cycle (it is currently empty).
    /// Callers that also drain the same cycle should push only after draining, matching the
    /// pipe-mode `enq.ready = empty || deq.fire` rule.
    pub fn is_ready(&self) -> bool {
        self.slot.is_none()
    }

    /// Peek at the buffered value without consuming it.
    pub fn peek(&self) -> Option<&T> {
        self.slot.as_ref()
    }

    /// Push a value into an empty register. Panics if occupied; callers must check
    /// [`Self::is_ready`] (or drain via [`Self::take`]) first.
    pub fn push(&mut self, value: T) {
        debug_assert!(self.slot.is_none(), "pipeline register overwritten without drain");
        self.slot = Some(value);
    }

    /// Drain the register, leaving it empty.
    pub fn take(&mut self) -> Option<T> {
        self.slot.take()
    }

    /// Clear the register immediately, discarding any buffered value. Used on a branch/exception
    /// redirect or a debug PC-set (§4.K).
    pub fn flush(&mut self) {
        self.slot = None;
    }
}
