//! §4.J Hazard unit: a pure combinational function of Decode's requested operands against the
//! destinations in flight at Execute/Memory/Writeback, plus a debug watchpoint line.
//!
//! No direct teacher analogue (the reference core is single-cycle); grounded on the *shape* of the
//! `RegHazard`/`CsrHazard` broadcasts already produced by `execute.rs`, which in turn mirror the
//! `(rd, regWrite)` style the reference `core/mod.rs` uses when threading write-enable information
//! between a decoded instruction and the register file.

use crate::execute::{CsrHazard, RegHazard};
use crate::registers::Specifier;

/// What Decode is asking for this cycle: which registers/CSR it will read, if any.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HazardQuery {
    pub rs1: Specifier,
    pub rs2: Specifier,
    pub uses_rs2: bool,
    pub csr_addr: u16,
    pub is_csr_op: bool,
}

/// The in-flight write broadcasts from each downstream stage, sampled at the start of the cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct InFlightWrites {
    pub execute_reg: Option<RegHazard>,
    pub memory_reg: Option<RegHazard>,
    pub writeback_reg: Option<RegHazard>,
    pub execute_csr: Option<CsrHazard>,
    pub memory_csr: Option<CsrHazard>,
    pub writeback_csr: Option<CsrHazard>,
}

/// Evaluate the stall condition for one cycle: RAW on a GPR, a same-CSR race, or a debug
/// watchpoint hit. Load-use is not distinguished from any other RAW hazard since this core has no
/// forwarding network beyond the Writeback→Execute bypass (§4.G); every producer still in
/// Execute/Memory must be waited out.
pub fn stall(query: HazardQuery, in_flight: InFlightWrites, watchpoint_hit: bool) -> bool {
    if watchpoint_hit {
        return true;
    }

    let reg_hazards = [
        in_flight.execute_reg,
        in_flight.memory_reg,
        in_flight.writeback_reg,
    ];
    for hazard in reg_hazards.into_iter().flatten() {
        if !hazard.reg_write || hazard.rd.is_zero() {
            continue;
        }
        if hazard.rd == query.rs1 || (query.uses_rs2 && hazard.rd == query.rs2) {
            return true;
        }
    }

    if query.is_csr_op {
        let csr_hazards = [in_flight.execute_csr, in_flight.memory_csr, in_flight.writeback_csr];
        for hazard in csr_hazards.into_iter().flatten() {
            if hazard.csr_write && hazard.csr_addr == query.csr_addr {
                return true;
            }
        }
    }

    false
}
