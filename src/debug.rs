//! §4.M Debug module: halt/resume/step, breakpoints, watchpoints, GPR/memory peek-poke, exposed
//! as a plain in-process `DebugCommand → DebugResponse` request/response pair fed to
//! `Core::debug_step`, rather than the gdbstub/TCP wire protocol the reference CLI builds on top
//! of an equivalent surface (out of scope per §1's "CLI front-ends").
//!
//! The command set is grounded on the *shape* of the reference CLI's gdbstub command handlers
//! (`red-planet-cli/src/gdb/{breakpoints,step,resume,registers}.rs`) — halt/resume/step, register
//! read/write, breakpoint add/remove — re-expressed here as an enum match instead of a `gdbstub`
//! trait implementation, since the wire transport itself is out of scope.

use std::collections::HashSet;

use crate::bus::Bus;
use crate::error::DebugError;
use crate::registers::{Registers, Specifier};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DebugCommand {
    Halt,
    Resume,
    /// Resume for exactly one committed instruction, then re-halt.
    Step,
    /// Valid only while halted: one-shot PC override.
    SetPc(u32),
    /// Register index is a raw, unvalidated `u8` (as a host/debugger would send it); `handle`
    /// checks it against `0..32` and reports `DebugError::RegisterOutOfRange` if it doesn't fit.
    ReadRegister(u8),
    WriteRegister(u8, u32),
    ReadMemoryByte(u32),
    WriteMemoryByte(u32, u8),
    AddBreakpoint(u32),
    RemoveBreakpoint(u32),
    AddWatchpoint(u32),
    RemoveWatchpoint(u32),
    Status,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DebugResponse {
    Ack,
    Register(u32),
    MemoryByte(u8),
    Status { halted: bool, pc: u32 },
    Err(DebugError),
}

/// Holds halt/resume/step/breakpoint/watchpoint state. Owned by [`crate::core::Core`] and
/// consulted once per cycle for the fetch-suppress and hazard-stall signals, and driven
/// out-of-band by [`crate::core::Core::debug_step`] for host-issued commands.
#[derive(Debug, Clone)]
pub struct DebugModule {
    hart_id: u32,
    halted: bool,
    /// Set by `Step`: re-assert halt the next time an instruction commits.
    single_step_pending: bool,
    /// One-shot PC override set by `SetPc`, consumed by the core driver on the next cycle.
    pc_override: Option<u32>,
    breakpoints: HashSet<u32>,
    watchpoints: HashSet<u32>,
}

impl DebugModule {
    /// A hart starts halted at boot, per §4.M ("holds the hart at boot").
    pub fn new(hart_id: u32) -> Self {
        Self {
            hart_id,
            halted: true,
            single_step_pending: false,
            pc_override: None,
            breakpoints: HashSet::new(),
            watchpoints: HashSet::new(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Assert halt directly, bypassing the command protocol. Used by the core driver when the
    /// hazard unit reports a watchpoint hit (§4.J/§4.M: "assert halt via the hazard unit").
    pub fn assert_halt(&mut self) {
        self.halted = true;
    }

    /// Consume the one-shot PC override set by `SetPc`, if any.
    pub fn take_pc_override(&mut self) -> Option<u32> {
        self.pc_override.take()
    }

    /// `true` if `store_addr` matches a watchpoint; the hazard unit stalls fetch on this signal
    /// and the core driver asserts halt in the same cycle (§4.J/§4.M).
    pub fn watchpoint_hit(&self, store_addr: u32) -> bool {
        self.watchpoints.contains(&store_addr)
    }

    /// Called by the core driver once an instruction commits at Writeback: checks breakpoints,
    /// re-asserts halt after a single step, and clears the step latch.
    pub fn on_commit(&mut self, committed_pc: u32) {
        if self.breakpoints.contains(&committed_pc) {
            self.halted = true;
        }
        if self.single_step_pending {
            self.single_step_pending = false;
            self.halted = true;
        }
    }

    /// Handle one host-issued command. `registers` and `bus` give Debug the same register-file and
    /// data-path access the pipeline has; register/PC writes are only honored while halted, per
    /// §4.M ("writes take priority over Writeback commit while halted").
    pub fn handle(
        &mut self,
        command: DebugCommand,
        hart_id: u32,
        registers: &mut Registers,
        bus: &mut impl Bus,
        current_pc: u32,
    ) -> DebugResponse {
        if hart_id != self.hart_id {
            return DebugResponse::Err(DebugError::WrongHart {
                given: hart_id,
                expected: self.hart_id,
            });
        }

        match command {
            DebugCommand::Halt => {
                self.halted = true;
                DebugResponse::Ack
            }
            DebugCommand::Resume => {
                self.halted = false;
                DebugResponse::Ack
            }
            DebugCommand::Step => {
                self.halted = false;
                self.single_step_pending = true;
                DebugResponse::Ack
            }
            DebugCommand::SetPc(target) => {
                if !self.halted {
                    return DebugResponse::Err(DebugError::NotHalted);
                }
                self.pc_override = Some(target);
                DebugResponse::Ack
            }
            DebugCommand::ReadRegister(index) => match Specifier::new(index) {
                Some(specifier) => DebugResponse::Register(registers.read(specifier)),
                None => DebugResponse::Err(DebugError::RegisterOutOfRange(index)),
            },
            DebugCommand::WriteRegister(index, value) => {
                if !self.halted {
                    return DebugResponse::Err(DebugError::NotHalted);
                }
                match Specifier::new(index) {
                    Some(specifier) => {
                        registers.write(specifier, value);
                        DebugResponse::Ack
                    }
                    None => DebugResponse::Err(DebugError::RegisterOutOfRange(index)),
                }
            }
            DebugCommand::ReadMemoryByte(address) => DebugResponse::MemoryByte(read_byte(bus, address)),
            DebugCommand::WriteMemoryByte(address, value) => {
                write_byte(bus, address, value);
                DebugResponse::Ack
            }
            DebugCommand::AddBreakpoint(address) => {
                self.breakpoints.insert(address);
                DebugResponse::Ack
            }
            DebugCommand::RemoveBreakpoint(address) => {
                self.breakpoints.remove(&address);
                DebugResponse::Ack
            }
            DebugCommand::AddWatchpoint(address) => {
                self.watchpoints.insert(address);
                DebugResponse::Ack
            }
            DebugCommand::RemoveWatchpoint(address) => {
                self.watchpoints.remove(&address);
                DebugResponse::Ack
            }
            DebugCommand::Status => DebugResponse::Status {
                halted: self.halted,
                pc: current_pc,
            },
        }
    }
}

fn read_byte(bus: &mut impl Bus, address: u32) -> u8 {
    use crate::bus::BusRequest;
    bus.try_issue(BusRequest::read(address));
    loop {
        bus.tick();
        if let Some(response) = bus.poll_response() {
            return response.data_read[(address & 0b11) as usize];
        }
    }
}

fn write_byte(bus: &mut impl Bus, address: u32, value: u8) {
    use crate::bus::BusRequest;
    let offset = (address & 0b11) as usize;
    let mut data = [0u8; 4];
    let mut mask = [false; 4];
    data[offset] = value;
    mask[offset] = true;
    bus.try_issue(BusRequest::write(address & !0b11, data, mask));
    loop {
        bus.tick();
        if bus.poll_response().is_some() {
            return;
        }
    }
}
