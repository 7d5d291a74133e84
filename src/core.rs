//! The top-level `Core`: owns every stage, the CSR/register files, the four pipeline registers
//! (§4.K), and drives one clock edge per [`Core::step`] call.
//!
//! Grounded on the reference crate's `core/mod.rs` in spirit only — that `Core` executes one whole
//! instruction per host call against an in-process `Allocator`-backed model with no pipeline
//! registers to wire up. This driver is new code built to SPEC_FULL.md §4/§5's explicit pipeline
//! and two-phase eval→commit discipline, reusing the register file, CSR file, and per-instruction
//! semantics that *are* ported from the reference crate (`registers.rs`, `csr.rs`, `execute.rs`).
//!
//! Per-cycle ordering trick: stages are driven **Writeback → Memory → Execute → Decode → Fetch**
//! (back-to-front) within one `step()` call. Because each stage checks whether its *downstream*
//! pipeline register is empty before pushing into it, and downstream stages have already run this
//! same call, a producer that is about to be drained this cycle is already seen as "ready" by its
//! upstream neighbor — exactly the §4.K pipe-mode rule `enq.ready = empty ∨ deq.fire`, realized
//! without a separate next/current register swap. All *stall/flush decisions*, by contrast, are
//! still computed once at the top of the cycle from state as of the previous cycle's end, matching
//! §5's two-phase eval→commit requirement that decisions not observe this cycle's own writes.

use log::trace;

use crate::bus::Bus;
use crate::config::Config;
use crate::csr::CsrFile;
use crate::debug::{DebugCommand, DebugModule, DebugResponse};
use crate::decode::{decode, OpType};
use crate::execute::{self, CsrHazard, RegHazard};
use crate::fetch::FetchStage;
use crate::hazard::{self, HazardQuery, InFlightWrites};
use crate::memory::MemoryStage;
use crate::pipeline_register::PipelineRegister;
use crate::predictor::Predictor;
use crate::registers::Registers;
use crate::writeback::WritebackStage;

/// A complete RV32IM_Zicsr, machine-mode-only, 5-stage in-order pipeline core.
///
/// Generic over the instruction-port and data-port bus implementations, matching §6's "two
/// identically-shaped external memory ports".
pub struct Core<IB: Bus, DB: Bus> {
    config: Config,
    cycle: u64,

    registers: Registers,
    csr: CsrFile,
    debug: DebugModule,
    predictor: Predictor,

    fetch: FetchStage,
    memory_stage: MemoryStage,
    writeback_stage: WritebackStage,

    if_id: PipelineRegister<crate::fetch::FetchedWord>,
    id_ex: PipelineRegister<crate::decode::Microop>,
    ex_mem: PipelineRegister<execute::ExecuteResult>,
    mem_wb: PipelineRegister<crate::memory::MemoryResult>,

    instruction_bus: IB,
    data_bus: DB,

    /// Set when an exception redirect was already issued to Fetch at the point Memory detected
    /// it; consumed so Writeback's own (later) redirect signal for the same trap does not
    /// clobber the PC progress Fetch has made in the meantime. See the module docs.
    trap_redirect_already_issued: bool,
}

impl<IB: Bus, DB: Bus> Core<IB, DB> {
    pub fn new(config: Config, instruction_bus: IB, data_bus: DB) -> Self {
        Self {
            cycle: 0,
            registers: Registers::new(),
            csr: CsrFile::new(config.hart_id),
            debug: DebugModule::new(config.hart_id),
            predictor: Predictor::new(config.enable_predictor),
            fetch: FetchStage::new(config.reset_vector),
            memory_stage: MemoryStage::new(),
            writeback_stage: WritebackStage::new(),
            if_id: PipelineRegister::new(),
            id_ex: PipelineRegister::new(),
            ex_mem: PipelineRegister::new(),
            mem_wb: PipelineRegister::new(),
            instruction_bus,
            data_bus,
            trap_redirect_already_issued: false,
            config,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn program_counter(&self) -> u32 {
        self.fetch.program_counter()
    }

    pub fn register(&self, specifier: crate::registers::Specifier) -> u32 {
        self.registers.read(specifier)
    }

    pub fn csr(&self, address: u16) -> u32 {
        self.csr.read(address)
    }

    /// Latch the external machine-timer-interrupt line into `mip.MTIP` (§6).
    pub fn set_timer_interrupt_pending(&mut self, pending: bool) {
        self.csr.set_mtip(pending);
    }

    /// Handle one host-issued debug command (§4.M), independent of `step`.
    pub fn debug_step(&mut self, command: DebugCommand) -> DebugResponse {
        let pc = self.fetch.program_counter();
        self.debug
            .handle(command, self.config.hart_id, &mut self.registers, &mut self.data_bus, pc)
    }

    /// Advance the core by one clock edge.
    pub fn step(&mut self) {
        trace!(cycle = self.cycle; "core step");
        self.cycle += 1;

        let writeback_busy = self.writeback_stage.has_pending_trap();
        if writeback_busy {
            let exception_redirect_issued = self.step_writeback_only();
            self.apply_debug_pc_override(exception_redirect_issued);
            return;
        }

        let halted = self.debug.is_halted();

        // --- Phase 0: sample hazard/stall decisions from state as of the end of last cycle. ---
        let decoded_waiting = self.if_id.peek().map(|fetched| decode(fetched.word, fetched.pc));
        let query = decoded_waiting.map(|microop| HazardQuery {
            rs1: microop.rs1,
            rs2: microop.rs2,
            uses_rs2: microop.uses_rs2,
            csr_addr: microop.csr_addr,
            is_csr_op: microop.is_csr_op,
        });
        let in_flight = InFlightWrites {
            execute_reg: self.id_ex.peek().map(|m| RegHazard {
                rd: m.rd,
                reg_write: m.reg_write,
            }),
            memory_reg: self.ex_mem.peek().map(|e| RegHazard {
                rd: e.rd,
                reg_write: e.gpr_write,
            }),
            writeback_reg: self.mem_wb.peek().map(|r| RegHazard {
                rd: r.rd,
                reg_write: r.gpr_write,
            }),
            execute_csr: self.id_ex.peek().map(|m| CsrHazard {
                csr_addr: m.csr_addr,
                csr_write: m.is_csr_op,
            }),
            memory_csr: self.ex_mem.peek().map(|e| CsrHazard {
                csr_addr: e.csr_addr,
                csr_write: e.csr_write,
            }),
            writeback_csr: self.mem_wb.peek().map(|r| CsrHazard {
                csr_addr: r.csr_addr,
                csr_write: r.csr_write,
            }),
        };
        let watchpoint_hit = self
            .mem_wb
            .peek()
            .is_some_and(|r| r.is_store && self.debug.watchpoint_hit(r.store_addr));
        if watchpoint_hit {
            self.debug.assert_halt();
        }
        let stall = query
            .map(|q| hazard::stall(q, in_flight, watchpoint_hit))
            .unwrap_or(watchpoint_hit);

        let interrupt_pending = self.csr.mie_bit() && self.csr.mtie() && self.csr.mtip();

        // Tracks whether an exception or branch redirect (§4.N priority: exception > branch >
        // debug-set-PC > sequential) fired this cycle, so a pending debug Set-PC is only applied
        // when nothing outranks it.
        let mut redirect_issued = false;

        // --- Phase 1: Writeback. ---
        let wb_input = self.mem_wb.take();
        let wb_outcome = self
            .writeback_stage
            .step(wb_input, &mut self.registers, &mut self.csr, interrupt_pending);
        if let Some(pc) = wb_outcome.debug_pc {
            self.debug.on_commit(pc);
        }
        self.csr.increment_cycle();

        if let Some(target) = wb_outcome.redirect {
            if self.trap_redirect_already_issued {
                self.trap_redirect_already_issued = false;
            } else {
                self.fetch.redirect(target);
                self.if_id.flush();
                self.id_ex.flush();
            }
            self.ex_mem.flush();
            redirect_issued = true;
        }

        // --- Phase 2: Memory. ---
        if self.memory_stage.has_pending() {
            if let Some(result) = self.memory_stage.step(&mut self.data_bus) {
                redirect_issued |= self.handle_memory_completion(result);
            }
        } else if let Some(exec_result) = self.ex_mem.peek().copied() {
            match self.memory_stage.accept(exec_result, self.config.support_misaligned_memory_access) {
                Some(result) => {
                    self.ex_mem.take();
                    redirect_issued |= self.handle_memory_completion(result);
                }
                None => {
                    self.ex_mem.take();
                    if let Some(result) = self.memory_stage.step(&mut self.data_bus) {
                        redirect_issued |= self.handle_memory_completion(result);
                    }
                }
            }
        }

        // --- Phase 3: Execute. ---
        // Gated on `ex_mem_ready` alone: `stall` reflects a hazard between `if_id` and `id_ex`
        // (Phase 4's concern) and must not also block `id_ex` from draining, or a producer stuck
        // in `id_ex` would never retire and the hazard against it would never clear.
        let ex_mem_ready = self.ex_mem.is_ready();
        if ex_mem_ready {
            if let Some(microop) = self.id_ex.take() {
                let rs1_value = self.registers.read(microop.rs1);
                let rs2_value = self.registers.read(microop.rs2);
                let csr_read_value = self.csr.read(microop.csr_addr);
                let (result, redirect, _reg_hazard, _csr_hazard) =
                    execute::execute(&microop, rs1_value, rs2_value, csr_read_value);
                self.ex_mem.push(result);

                if let Some(redirect) = redirect {
                    self.predictor.update(microop.pc, redirect.is_branch, redirect.target);
                    self.fetch.redirect(redirect.target);
                    self.if_id.flush();
                    redirect_issued = true;
                }
                if microop.op_type == OpType::Mret {
                    // The real mepc target only becomes known once Writeback performs the CSR
                    // side effect via `CsrFile::mret`; nothing to redirect here yet.
                }
            }
        }

        // --- Phase 4: Decode (a pure combinational step into id_ex). ---
        if !stall && self.id_ex.is_ready() {
            if let Some(fetched) = self.if_id.take() {
                let microop = decode(fetched.word, fetched.pc);
                self.id_ex.push(microop);
            }
        }

        // --- Phase 5: Fetch. ---
        if !halted {
            let predictor = &self.predictor;
            self.fetch
                .step(&mut self.instruction_bus, halted, |pc| predictor.predict(pc).target);
        }
        if self.if_id.is_ready() {
            if let Some(fetched) = self.fetch.take() {
                self.if_id.push(fetched);
            }
        }

        self.apply_debug_pc_override(redirect_issued);
    }

    /// While a trap commit is mid-flight, everything upstream of Writeback is frozen: no new
    /// fetches, no stage advances. Only Writeback's own 3-cycle state machine (and the free-
    /// running `mcycle` counter) progresses. Returns whether an exception redirect fired this
    /// cycle, so the caller knows whether a pending debug Set-PC is outranked (§4.N priority:
    /// exception > branch > debug-set-PC > sequential).
    fn step_writeback_only(&mut self) -> bool {
        let wb_outcome = self
            .writeback_stage
            .step(None, &mut self.registers, &mut self.csr, false);
        if let Some(pc) = wb_outcome.debug_pc {
            self.debug.on_commit(pc);
        }
        self.csr.increment_cycle();
        if let Some(target) = wb_outcome.redirect {
            if !self.trap_redirect_already_issued {
                self.fetch.redirect(target);
                self.if_id.flush();
                self.id_ex.flush();
                self.ex_mem.flush();
            }
            self.trap_redirect_already_issued = false;
            return true;
        }
        false
    }

    /// Apply a pending debug `SetPc` override, if any, unless a higher-priority redirect
    /// (exception or branch) already fired this cycle. The override is always consumed here
    /// either way — it is one-shot, so a cycle that outranks it must still discard it rather
    /// than let it leak into a later, unrelated cycle.
    fn apply_debug_pc_override(&mut self, higher_priority_redirect_issued: bool) {
        if let Some(target) = self.debug.take_pc_override() {
            if !higher_priority_redirect_issued {
                self.fetch.redirect(target);
                self.if_id.flush();
                self.id_ex.flush();
                self.ex_mem.flush();
            }
        }
    }

    /// Returns `true` if this completion issued an exception redirect this cycle.
    fn handle_memory_completion(&mut self, result: crate::memory::MemoryResult) -> bool {
        let has_exception = result.exception.is_some();
        self.mem_wb.push(result);
        if has_exception {
            // §4.N: the exception redirect reaches Fetch with a 1-cycle pipe, independent of
            // Writeback's slower 3-cycle CSR commit — issue it the moment Memory resolves the
            // fault rather than waiting for `mtval` to actually land in the CSR file.
            let target = self.csr.read(crate::csr::addr::MTVEC);
            self.fetch.redirect(target);
            self.if_id.flush();
            self.id_ex.flush();
            self.trap_redirect_already_issued = true;
        }
        has_exception
    }
}
