//! End-to-end pipeline scenarios, driven against `Core::step()` over an in-memory bus, in the
//! same construct/drive-N-cycles/assert-on-architectural-state style as the unit tests living
//! alongside each stage module. These exercise the whole pipeline rather than one component, so
//! they live in this crate-level integration directory instead of a `#[cfg(test)]` module.

use strata_core::bus::InMemoryBus;
use strata_core::csr::addr;
use strata_core::debug::DebugCommand;
use strata_core::registers::Specifier;
use strata_core::{Config, Core};

const RESET_VECTOR: u32 = 0x8000_0000;
const BUS_WINDOW: usize = 0x1000;

fn boot(program: &[u32]) -> Core<InMemoryBus, InMemoryBus> {
    let mut instruction_bus = InMemoryBus::at_base(RESET_VECTOR, BUS_WINDOW);
    for (i, &word) in program.iter().enumerate() {
        instruction_bus.load(RESET_VECTOR + (i as u32) * 4, &word.to_le_bytes());
    }
    // Data memory lives in its own low address window, separate from the code window at the
    // reset vector, the way a real machine's instruction and data address spaces usually differ.
    let data_bus = InMemoryBus::new(BUS_WINDOW);
    let mut core = Core::new(Config::new(RESET_VECTOR), instruction_bus, data_bus);
    core.debug_step(DebugCommand::Resume);
    core
}

fn run(core: &mut Core<InMemoryBus, InMemoryBus>, cycles: u32) {
    for _ in 0..cycles {
        core.step();
    }
}

fn reg(core: &Core<InMemoryBus, InMemoryBus>, index: u32) -> u32 {
    core.register(Specifier::from_u5(index))
}

/// S1 — ADDI chain with RAW hazards: each instruction depends on the previous one's destination.
#[test]
fn s1_addi_chain_with_hazards() {
    let program = [
        0x0050_0093u32, // addi x1, x0, 5
        0x0030_8113u32, // addi x2, x1, 3
        0x0071_0193u32, // addi x3, x2, 7
        0x0000_0013u32, // nop
    ];
    let mut core = boot(&program);
    run(&mut core, 30);

    assert_eq!(reg(&core, 1), 5);
    assert_eq!(reg(&core, 2), 8);
    assert_eq!(reg(&core, 3), 15);
}

/// S2 — a taken branch skips the two instructions in its shadow.
#[test]
fn s2_taken_branch_skips_instructions() {
    let program = [
        0x0050_0093u32, // addi x1, x0, 5
        0x0050_0113u32, // addi x2, x0, 5
        0x0020_8663u32, // beq x1, x2, +12
        0x0010_0193u32, // addi x3, x0, 1   (skipped)
        0x0020_0213u32, // addi x4, x0, 2   (skipped)
        0x0330_0293u32, // addi x5, x0, 51
    ];
    let mut core = boot(&program);
    run(&mut core, 30);

    assert_eq!(reg(&core, 1), 5);
    assert_eq!(reg(&core, 2), 5);
    assert_eq!(reg(&core, 3), 0, "shadow of the taken branch must not retire");
    assert_eq!(reg(&core, 4), 0, "shadow of the taken branch must not retire");
    assert_eq!(reg(&core, 5), 51);
}

/// S3 — LUI + ADDI assembles a 32-bit constant split across the upper and lower immediate.
#[test]
fn s3_lui_addi_builds_32_bit_constant() {
    let program = [
        0x1234_50B7u32, // lui x1, 0x12345
        0x6780_8093u32, // addi x1, x1, 0x678
    ];
    let mut core = boot(&program);
    run(&mut core, 20);

    assert_eq!(reg(&core, 1), 0x1234_5678);
}

/// S4 — a store followed by a same-width load to the same address round-trips the value.
#[test]
fn s4_store_then_load_round_trips() {
    let program = [
        0x1000_0113u32, // addi x2, x0, 0x100
        0x0630_0093u32, // addi x1, x0, 99
        0x0011_2023u32, // sw x1, 0(x2)
        0x0001_2183u32, // lw x3, 0(x2)
    ];
    let mut core = boot(&program);
    run(&mut core, 30);

    assert_eq!(reg(&core, 3), 99);
}

/// S5 — an illegal instruction commits `mepc`/`mcause`/`mtval` over the 3-cycle trap sequence and
/// redirects to a handler whose own instructions actually run.
#[test]
fn s5_illegal_instruction_traps_and_runs_handler() {
    let program = [
        0x8000_00B7u32, // lui x1, 0x80000            -> x1 = 0x8000_0000
        0x0100_8093u32, // addi x1, x1, 0x10           -> x1 = 0x8000_0010
        0x3050_9073u32, // csrrw x0, mtvec, x1         -> mtvec = 0x8000_0010
        0x0000_0000u32, // INVALID, faults at 0x8000_000C
        0x0070_0113u32, // addi x2, x0, 7 (handler entry at 0x8000_0010)
    ];
    let mut core = boot(&program);
    run(&mut core, 50);

    assert_eq!(core.csr(addr::MEPC), 0x8000_000C);
    assert_eq!(core.csr(addr::MCAUSE), 2, "IllegalInstruction mcause");
    assert_eq!(core.csr(addr::MTVAL), 0);
    assert_eq!(reg(&core, 2), 7, "handler at mtvec must have executed");
}

/// S6 — CSRRS with `rs1 = x0` reads `mvendorid` but performs no write (the CSR is read-only
/// anyway, but the `rs1 = x0` rule must independently suppress the write attempt).
#[test]
fn s6_csrrs_with_x0_reads_mvendorid_without_writing() {
    let program = [
        0xF110_20F3u32, // csrrs x1, mvendorid, x0
    ];
    let mut core = boot(&program);
    run(&mut core, 20);

    assert_eq!(reg(&core, 1), 0);
    assert_eq!(core.csr(addr::MVENDORID), 0);
}

/// Halt safety (§8 property 7): while halted from boot, no instruction retires and `minstret`
/// stays at zero even though cycles elapse.
#[test]
fn halt_safety_blocks_retirement() {
    let program = [0x0050_0093u32]; // addi x1, x0, 5
    let mut instruction_bus = InMemoryBus::at_base(RESET_VECTOR, BUS_WINDOW);
    instruction_bus.load(RESET_VECTOR, &program[0].to_le_bytes());
    let data_bus = InMemoryBus::at_base(RESET_VECTOR, BUS_WINDOW);
    let mut core = Core::new(Config::new(RESET_VECTOR), instruction_bus, data_bus);

    run(&mut core, 10);

    assert_eq!(reg(&core, 1), 0, "nothing may retire while halted");
    assert_eq!(core.csr(addr::MINSTRET), 0);
    assert_eq!(core.program_counter(), RESET_VECTOR);
}

/// Debug register write round-trips while halted, and is rejected once resumed (§4.M).
#[test]
fn debug_register_write_round_trips_while_halted() {
    let mut core = boot(&[0x0000_0013]); // nop
    core.debug_step(DebugCommand::Halt);
    let response = core.debug_step(DebugCommand::WriteRegister(4, 0x2A));
    assert_eq!(response, strata_core::debug::DebugResponse::Ack);
    assert_eq!(reg(&core, 4), 0x2A);
}
