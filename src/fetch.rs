//! §4.F Fetch: the IDLE → REQUEST_SENT → RESPONSE_READY state machine against the instruction
//! port, including the `dropResponse` squash mechanic used on a redirect.
//!
//! No reference-crate analogue exists for the state machine itself (the reference core fetches
//! and executes one instruction per host call with no latency to hide); the request/response
//! shape it drives is `crate::bus::Bus`, itself grounded on `red-planet-core/src/bus.rs`.

use crate::bus::{Bus, BusRequest};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct PendingFetch {
    pc: u32,
    drop: bool,
}

/// A fetched instruction word together with the PC it was fetched from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FetchedWord {
    pub pc: u32,
    pub word: u32,
}

#[derive(Debug, Clone)]
pub struct FetchStage {
    pc: u32,
    pending: Option<PendingFetch>,
    buffered: Option<FetchedWord>,
}

impl FetchStage {
    pub fn new(reset_vector: u32) -> Self {
        Self {
            pc: reset_vector,
            pending: None,
            buffered: None,
        }
    }

    pub fn program_counter(&self) -> u32 {
        self.pc
    }

    /// `true` once a fetched word is ready for Decode to consume.
    pub fn has_buffered(&self) -> bool {
        self.buffered.is_some()
    }

    /// Take the buffered word, if any, freeing the slot for the next fetch.
    pub fn take(&mut self) -> Option<FetchedWord> {
        self.buffered.take()
    }

    /// Redirect Fetch to `target` immediately: drops any buffered word, marks an in-flight
    /// request's response for drop, and starts fetching from `target` next cycle. Used uniformly
    /// for debug PC-set, exception redirects (to `mtvec`), and branch/jump redirects — the
    /// priority among these is the caller's responsibility (§4.F step 2 / §4.N).
    pub fn redirect(&mut self, target: u32) {
        self.pc = target;
        self.buffered = None;
        if let Some(pending) = &mut self.pending {
            pending.drop = true;
        }
    }

    /// Advance Fetch by one cycle. `halted` suppresses issuing new requests (§4.M). `predict`
    /// computes the PC to advance to after issuing the current request — the static not-taken
    /// baseline is `|pc| pc + 4`; the optional predictor (§4.L) may instead return a taken target.
    pub fn step(&mut self, bus: &mut impl Bus, halted: bool, predict: impl FnOnce(u32) -> u32) {
        if !halted && self.pending.is_none() && self.buffered.is_none() {
            let request_pc = self.pc;
            if bus.try_issue(BusRequest::read(request_pc)) {
                self.pending = Some(PendingFetch {
                    pc: request_pc,
                    drop: false,
                });
                self.pc = predict(request_pc);
            }
        }
        bus.tick();

        if self.pending.is_some() {
            if let Some(response) = bus.poll_response() {
                let pending = self.pending.take().unwrap();
                if !pending.drop {
                    let word = u32::from_le_bytes(response.data_read);
                    self.buffered = Some(FetchedWord { pc: pending.pc, word });
                }
            }
        }
    }
}
