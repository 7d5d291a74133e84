//! §4.G Execute: ALU dispatch, branch resolution, address calculation, CSR ops.
//!
//! A pure function of `(microop, rs1_value, rs2_value, csr_read_value)` producing the
//! Execute→Memory payload plus an optional branch redirect, kept single-cycle per §4.G (no
//! multi-cycle multiply/divide unit is added — see `alu.rs`). Grounded on the per-instruction
//! bodies of the reference crate's `core/execute.rs` `Executor` methods, collapsed into one
//! dispatch over `OpType` instead of one method per RISC-V mnemonic, and on its `csr_op` helper
//! for the "x0/zero-immediate suppresses the write" CSRRS/CSRRC rule.

use crate::alu::{self, AluOp};
use crate::csr::CsrFile;
use crate::decode::{BranchFunc, Microop, OpType};
use crate::error::Exception;
use crate::registers::Specifier;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExecuteResult {
    pub op_type: OpType,
    pub rd: Specifier,
    pub gpr_write: bool,
    pub gpr_result: u32,
    pub csr_addr: u16,
    pub csr_write: bool,
    pub csr_data: u32,
    pub mem_address: u32,
    pub mem_width: crate::decode::MemWidth,
    pub mem_unsigned: bool,
    pub store_data: u32,
    pub pc: u32,
    pub is_store: bool,
    pub is_load: bool,
    /// Set for `INVALID`/`ecall` microops; Memory may additionally set this for an access fault.
    pub exception: Option<Exception>,
    pub word: u32,
}

/// Non-`None` when Execute wants to redirect Fetch this cycle (taken branch, `jal`, `jalr`,
/// `mret`, or a propagated exception target).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Redirect {
    pub target: u32,
    /// `true` for a taken conditional branch, which only needs to flush the two youngest queues
    /// (§4.K); `jal`/`jalr`/`mret` are unconditional but flush identically from the pipeline's
    /// point of view, so this core does not distinguish them downstream.
    pub is_branch: bool,
}

/// Hazard broadcast: which GPR, if any, this stage will write when it reaches Writeback.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegHazard {
    pub rd: Specifier,
    pub reg_write: bool,
}

/// Hazard broadcast for the CSR this stage will write, if any.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CsrHazard {
    pub csr_addr: u16,
    pub csr_write: bool,
}

fn base_result(microop: &Microop) -> ExecuteResult {
    ExecuteResult {
        op_type: microop.op_type,
        rd: microop.rd,
        gpr_write: false,
        gpr_result: 0,
        csr_addr: microop.csr_addr,
        csr_write: false,
        csr_data: 0,
        mem_address: 0,
        mem_width: microop.mem_width,
        mem_unsigned: microop.mem_unsigned,
        store_data: 0,
        pc: microop.pc,
        is_store: false,
        is_load: false,
        exception: None,
        word: microop.word,
    }
}

/// Run Execute for one microop. Returns the Execute→Memory payload, an optional branch/jump
/// redirect, and the (GPR, CSR) hazard broadcasts for this cycle.
pub fn execute(
    microop: &Microop,
    rs1_value: u32,
    rs2_value: u32,
    csr_read_value: u32,
) -> (ExecuteResult, Option<Redirect>, RegHazard, CsrHazard) {
    let mut result = base_result(microop);
    let mut redirect = None;

    match microop.op_type {
        OpType::Nop => {}
        OpType::Alu => {
            let operand_b = if microop.has_imm {
                microop.imm as u32
            } else {
                rs2_value
            };
            result.gpr_result = alu::eval(microop.alu_op, rs1_value, operand_b);
            result.gpr_write = microop.reg_write;
        }
        OpType::Lui => {
            result.gpr_result = microop.imm as u32;
            result.gpr_write = microop.reg_write;
        }
        OpType::Auipc => {
            result.gpr_result = microop.pc.wrapping_add(microop.imm as u32);
            result.gpr_write = microop.reg_write;
        }
        OpType::Load => {
            result.mem_address = rs1_value.wrapping_add(microop.imm as u32);
            result.is_load = true;
            result.gpr_write = microop.reg_write;
        }
        OpType::Store => {
            result.mem_address = rs1_value.wrapping_add(microop.imm as u32);
            result.store_data = rs2_value;
            result.is_store = true;
        }
        OpType::Branch => {
            let taken = eval_branch(microop.branch_func, rs1_value, rs2_value);
            if taken {
                let target = microop.pc.wrapping_add(microop.imm as u32);
                redirect = Some(Redirect {
                    target,
                    is_branch: true,
                });
            }
        }
        OpType::Jal => {
            result.gpr_result = microop.pc.wrapping_add(4);
            result.gpr_write = microop.reg_write;
            redirect = Some(Redirect {
                target: microop.pc.wrapping_add(microop.imm as u32),
                is_branch: false,
            });
        }
        OpType::Jalr => {
            result.gpr_result = microop.pc.wrapping_add(4);
            result.gpr_write = microop.reg_write;
            let target = rs1_value.wrapping_add(microop.imm as u32) & !1;
            redirect = Some(Redirect {
                target,
                is_branch: false,
            });
        }
        OpType::CsrRw | OpType::CsrRs | OpType::CsrRc => {
            csr_op(microop, rs1_value, csr_read_value, &mut result);
        }
        OpType::Mret => {
            // The actual `mepc` redirect target is only known to the CSR file (whose `mret()`
            // also performs the MIE/MPIE update); Writeback resolves the target since it owns
            // CSR commit. Execute only signals that a redirect is coming; the pipeline driver in
            // `core.rs` special-cases `Mret` to read `mepc` directly rather than going through
            // this `Redirect`, since the real target requires the CSR write side effect.
        }
        OpType::Invalid => {
            result.exception = Some(if microop.is_ecall {
                Exception::EnvironmentCallFromMMode
            } else {
                Exception::IllegalInstruction
            });
        }
    }

    let reg_hazard = RegHazard {
        rd: microop.rd,
        reg_write: result.gpr_write,
    };
    let csr_hazard = CsrHazard {
        csr_addr: microop.csr_addr,
        csr_write: result.csr_write,
    };
    (result, redirect, reg_hazard, csr_hazard)
}

fn eval_branch(func: BranchFunc, a: u32, b: u32) -> bool {
    match func {
        BranchFunc::Beq => a == b,
        BranchFunc::Bne => a != b,
        BranchFunc::Blt => (a as i32) < (b as i32),
        BranchFunc::Bge => (a as i32) >= (b as i32),
        BranchFunc::Bltu => a < b,
        BranchFunc::Bgeu => a >= b,
    }
}

/// CSRRW/CSRRS/CSRRC (register or immediate form): compute the pre-image (returned to `rd`) and
/// the post-image (written if the write is not suppressed). Grounded on the reference crate's
/// `csr_op` helper in `core/execute.rs`, which gates CSRRS/CSRRC writes on `rs1 == x0` (or, for the
/// immediate forms, a zero 5-bit immediate) being the *source operand*, not on the runtime value
/// happening to read as zero, while CSRRW always writes.
fn csr_op(microop: &Microop, rs1_value: u32, csr_read_value: u32, result: &mut ExecuteResult) {
    result.gpr_result = csr_read_value;
    result.gpr_write = microop.reg_write;

    let operand = if microop.has_imm {
        microop.csr_imm
    } else {
        rs1_value
    };
    let new_value = match microop.op_type {
        OpType::CsrRw => operand,
        OpType::CsrRs => csr_read_value | operand,
        OpType::CsrRc => csr_read_value & !operand,
        _ => unreachable!("csr_op only called for CSR op types"),
    };

    let source_is_zero = if microop.has_imm {
        microop.csr_imm == 0
    } else {
        microop.rs1.is_zero()
    };
    let suppressed = matches!(microop.op_type, OpType::CsrRs | OpType::CsrRc) && source_is_zero;
    let writable = !CsrFile::is_read_only(microop.csr_addr);

    result.csr_write = writable && !suppressed;
    result.csr_data = new_value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;

    #[test]
    fn addi_computes_sum() {
        let microop = decode(0x0050_0093, 0x8000_0000); // addi x1, x0, 5
        let (result, redirect, _, _) = execute(&microop, 0, 0, 0);
        assert_eq!(result.gpr_result, 5);
        assert!(result.gpr_write);
        assert!(redirect.is_none());
    }

    #[test]
    fn taken_branch_emits_redirect() {
        let microop = decode(0x0020_8663, 0x8000_0000); // beq x1, x2, +12
        let (_, redirect, _, _) = execute(&microop, 5, 5, 0);
        let redirect = redirect.expect("branch is taken");
        assert_eq!(redirect.target, 0x8000_000C);
    }

    #[test]
    fn not_taken_branch_has_no_redirect() {
        let microop = decode(0x0020_8663, 0x8000_0000);
        let (_, redirect, _, _) = execute(&microop, 5, 6, 0);
        assert!(redirect.is_none());
    }

    #[test]
    fn jalr_clears_bit_zero() {
        let microop = decode(0x0010_0067, 0x8000_0000); // jalr x0, 0(x2) approx shape
        let (_, redirect, _, _) = execute(&microop, 0x8000_0003, 0, 0);
        let redirect = redirect.unwrap();
        assert_eq!(redirect.target & 1, 0);
    }

    #[test]
    fn csrrs_with_x0_suppresses_write() {
        // csrrs x1, 0xF11, x0
        let word = (0xF11 << 20) | (0b010 << 12) | (1 << 7) | 0b111_0011;
        let microop = decode(word, 0);
        let (result, _, _, csr_hazard) = execute(&microop, 0, 0, 0);
        assert_eq!(result.gpr_result, 0);
        assert!(!result.csr_write);
        assert!(!csr_hazard.csr_write);
    }

    #[test]
    fn csrrw_always_writes() {
        // csrrw x1, mtvec(0x305), x2
        let word = (0x305 << 20) | (2 << 15) | (0b001 << 12) | (1 << 7) | 0b111_0011;
        let microop = decode(word, 0);
        let (result, _, _, _) = execute(&microop, 0x8000_1000, 0, 0x1234);
        assert_eq!(result.gpr_result, 0x1234);
        assert!(result.csr_write);
        assert_eq!(result.csr_data, 0x8000_1000);
    }

    #[test]
    fn illegal_instruction_carries_exception() {
        let microop = decode(0, 0x8000_0000);
        let (result, _, _, _) = execute(&microop, 0, 0, 0);
        assert_eq!(result.exception, Some(Exception::IllegalInstruction));
    }

    #[test]
    fn ecall_carries_environment_call_exception() {
        let microop = decode(0x0000_0073, 0x8000_0000);
        let (result, _, _, _) = execute(&microop, 0, 0, 0);
        assert_eq!(result.exception, Some(Exception::EnvironmentCallFromMMode));
    }
}
