//! §4.I Writeback: GPR/CSR commit, `minstret` retirement counting, and the 3-cycle trap-commit
//! state machine (`mepc` → `mcause` → `mtval`, in that strict order, back-pressuring the rest of
//! the pipeline for the duration).
//!
//! Grounded on the reference crate's `core/mod.rs` `step_with`/`trap` methods: that core commits a
//! trap's CSR state and `minstret` suppression in one host-language call since it has no pipeline
//! stages to serialize across; here the same CSR writes are split one-per-cycle to match §4.I's
//! explicit 3-cycle commit shape, reusing `CsrFile::update_trap_status` for the `mstatus` update
//! that the reference's single call folds in alongside `mepc`/`mcause`/`mtval`.

use crate::csr::{addr, CsrFile};
use crate::decode::OpType;
use crate::error::Exception;
use crate::memory::MemoryResult;
use crate::registers::Registers;

/// What Writeback did this cycle, for the core driver and for debug-module observation (§4.M).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct WritebackOutcome {
    /// Set when a trap or `mret` redirects Fetch; `None` otherwise.
    pub redirect: Option<u32>,
    /// `true` exactly when an instruction retired this cycle (commits architectural state and
    /// increments `minstret`). Never set while a trap commit is in progress.
    pub retired: bool,
    /// The PC of the instruction that retired or trapped this cycle, for the debug module's
    /// last-retired-PC observation.
    pub debug_pc: Option<u32>,
    /// `(address, data)` of a store that retired this cycle, for debug-module observation.
    pub debug_store: Option<(u32, u32)>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum TrapPhase {
    Mepc,
    Mcause,
    Mtval,
}

#[derive(Debug, Copy, Clone)]
struct TrapCommit {
    phase: TrapPhase,
    pc: u32,
    cause: u32,
    tval: u32,
}

/// Writeback stage state: just the in-progress trap commit, if any.
#[derive(Debug, Clone, Default)]
pub struct WritebackStage {
    trap_commit: Option<TrapCommit>,
}

impl WritebackStage {
    pub fn new() -> Self {
        Self { trap_commit: None }
    }

    /// `true` while a trap commit is mid-flight; the core driver must stall Fetch/Decode/Execute
    /// and hold Memory's output until this clears.
    pub fn has_pending_trap(&self) -> bool {
        self.trap_commit.is_some()
    }

    /// Advance Writeback by one cycle. While a trap commit is in progress, `input` is ignored (the
    /// upstream stages are stalled by the core driver, so nothing new should arrive); otherwise
    /// `input` is the Memory→Writeback payload for this cycle, or `None` for a bubble.
    ///
    /// `interrupt_pending` is sampled once per cycle at this commit point (the Open Question
    /// resolved in `SPEC_FULL.md` §9): when set and an instruction is about to retire, the
    /// interrupt is taken instead of that instruction, which is left to re-execute after `mret`.
    pub fn step(
        &mut self,
        input: Option<MemoryResult>,
        registers: &mut Registers,
        csr: &mut CsrFile,
        interrupt_pending: bool,
    ) -> WritebackOutcome {
        if self.trap_commit.is_some() {
            return self.advance_trap_commit(csr);
        }

        let Some(result) = input else {
            return WritebackOutcome::default();
        };

        if let Some(exception) = result.exception {
            let tval = trap_value(&result, exception);
            self.trap_commit = Some(TrapCommit {
                phase: TrapPhase::Mepc,
                pc: result.pc,
                cause: exception.code(),
                tval,
            });
            return WritebackOutcome::default();
        }

        if interrupt_pending && result.op_type != OpType::Mret {
            self.trap_commit = Some(TrapCommit {
                phase: TrapPhase::Mepc,
                pc: result.pc,
                cause: crate::error::MACHINE_TIMER_INTERRUPT_MCAUSE,
                tval: 0,
            });
            return WritebackOutcome::default();
        }

        if result.op_type == OpType::Mret {
            let target = csr.mret();
            return WritebackOutcome {
                redirect: Some(target),
                retired: true,
                debug_pc: Some(result.pc),
                debug_store: None,
            };
        }

        if result.gpr_write {
            registers.write(result.rd, result.gpr_data);
        }
        if result.csr_write {
            csr.write(result.csr_addr, result.csr_data);
        }
        csr.increment_instret();

        WritebackOutcome {
            redirect: None,
            retired: true,
            debug_pc: Some(result.pc),
            debug_store: result.is_store.then_some((result.store_addr, result.store_data)),
        }
    }

    fn advance_trap_commit(&mut self, csr: &mut CsrFile) -> WritebackOutcome {
        let commit = self.trap_commit.as_mut().expect("checked by caller");
        match commit.phase {
            TrapPhase::Mepc => {
                csr.write(addr::MEPC, commit.pc);
                commit.phase = TrapPhase::Mcause;
                WritebackOutcome::default()
            }
            TrapPhase::Mcause => {
                csr.write(addr::MCAUSE, commit.cause);
                commit.phase = TrapPhase::Mtval;
                WritebackOutcome::default()
            }
            TrapPhase::Mtval => {
                csr.write(addr::MTVAL, commit.tval);
                csr.update_trap_status();
                let target = csr.read(addr::MTVEC);
                let pc = commit.pc;
                self.trap_commit = None;
                WritebackOutcome {
                    redirect: Some(target),
                    retired: false,
                    debug_pc: Some(pc),
                    debug_store: None,
                }
            }
        }
    }
}

/// The `mtval` value for a given exception, per §4.I/§7: the faulting address for
/// access/alignment faults, the raw instruction word for an illegal instruction, and `0` for
/// everything else (notably `ecall`, which carries no auxiliary information).
fn trap_value(result: &MemoryResult, exception: Exception) -> u32 {
    match exception {
        Exception::InstructionAccessFault => result.pc,
        Exception::IllegalInstruction => result.instruction_bits,
        Exception::LoadAddressMisaligned
        | Exception::LoadAccessFault
        | Exception::StoreAddressMisaligned
        | Exception::StoreAccessFault => result.store_addr,
        Exception::EnvironmentCallFromMMode => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use crate::execute::execute;
    use crate::registers::Specifier;

    fn memory_result_for(word: u32, pc: u32, rs1_value: u32, rs2_value: u32) -> MemoryResult {
        let microop = decode(word, pc);
        let (exec_result, ..) = execute(&microop, rs1_value, rs2_value, 0);
        MemoryResult {
            op_type: exec_result.op_type,
            rd: exec_result.rd,
            gpr_write: exec_result.gpr_write,
            gpr_data: exec_result.gpr_result,
            csr_addr: exec_result.csr_addr,
            csr_write: exec_result.csr_write,
            csr_data: exec_result.csr_data,
            pc: exec_result.pc,
            is_store: exec_result.is_store,
            store_addr: exec_result.mem_address,
            store_data: exec_result.store_data,
            instruction_bits: exec_result.word,
            exception: exec_result.exception,
        }
    }

    #[test]
    fn retiring_instruction_writes_gpr_and_increments_instret() {
        let mut writeback = WritebackStage::new();
        let mut registers = Registers::new();
        let mut csr = CsrFile::new(0);

        let result = memory_result_for(0x0050_0093, 0x8000_0000, 0, 0); // addi x1, x0, 5
        let outcome = writeback.step(Some(result), &mut registers, &mut csr, false);

        assert!(outcome.retired);
        assert_eq!(registers.read(Specifier::from_u5(1)), 5);
        assert_eq!(csr.read(addr::MINSTRET), 1);
    }

    #[test]
    fn illegal_instruction_runs_three_cycle_trap_commit() {
        let mut writeback = WritebackStage::new();
        let mut registers = Registers::new();
        let mut csr = CsrFile::new(0);
        csr.write(addr::MTVEC, 0x8000_1000);

        let result = memory_result_for(0, 0x8000_0004, 0, 0); // illegal word

        let outcome = writeback.step(Some(result), &mut registers, &mut csr, false);
        assert!(!outcome.retired);
        assert!(outcome.redirect.is_none());
        assert!(writeback.has_pending_trap());

        let outcome = writeback.step(None, &mut registers, &mut csr, false);
        assert!(outcome.redirect.is_none());
        assert!(writeback.has_pending_trap());

        let outcome = writeback.step(None, &mut registers, &mut csr, false);
        assert_eq!(outcome.redirect, Some(0x8000_1000));
        assert!(!writeback.has_pending_trap());

        assert_eq!(csr.read(addr::MEPC), 0x8000_0004);
        assert_eq!(csr.read(addr::MCAUSE), Exception::IllegalInstruction.code());
        assert_eq!(csr.read(addr::MTVAL), 0);
        assert_eq!(csr.read(addr::MINSTRET), 0, "trap commits do not retire");
    }

    #[test]
    fn mret_redirects_to_mepc_and_restores_mie() {
        let mut writeback = WritebackStage::new();
        let mut registers = Registers::new();
        let mut csr = CsrFile::new(0);
        csr.write(addr::MSTATUS, 1 << 3); // MIE set before trapping
        csr.trap_enter(0x8000_0000, 2, 0);

        let mret_word = (0x302u32 << 20) | 0b111_0011;
        let result = memory_result_for(mret_word, 0x8000_1010, 0, 0);
        let outcome = writeback.step(Some(result), &mut registers, &mut csr, false);

        assert_eq!(outcome.redirect, Some(0x8000_0000));
        assert!(outcome.retired);
    }

    #[test]
    fn store_publishes_debug_address_and_data() {
        let mut writeback = WritebackStage::new();
        let mut registers = Registers::new();
        let mut csr = CsrFile::new(0);

        let result = memory_result_for(0x0010_2023, 0x8000_0000, 0x100, 77); // sw x1, 0(x2)
        let outcome = writeback.step(Some(result), &mut registers, &mut csr, false);

        assert_eq!(outcome.debug_store, Some((0x100, 77)));
    }

    #[test]
    fn pending_interrupt_preempts_retirement() {
        let mut writeback = WritebackStage::new();
        let mut registers = Registers::new();
        let mut csr = CsrFile::new(0);
        csr.write(addr::MTVEC, 0x8000_2000);

        let result = memory_result_for(0x0050_0093, 0x8000_0040, 0, 0); // addi x1, x0, 5
        let outcome = writeback.step(Some(result), &mut registers, &mut csr, true);

        assert!(!outcome.retired);
        assert_eq!(registers.read(Specifier::from_u5(1)), 0, "preempted instruction must not commit");
        assert!(writeback.has_pending_trap());

        writeback.step(None, &mut registers, &mut csr, false);
        let outcome = writeback.step(None, &mut registers, &mut csr, false);

        assert_eq!(outcome.redirect, Some(0x8000_2000));
        assert_eq!(csr.read(addr::MEPC), 0x8000_0040);
        assert_eq!(csr.read(addr::MCAUSE), crate::error::MACHINE_TIMER_INTERRUPT_MCAUSE);
    }
}
