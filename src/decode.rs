//! §4.E Decoder: a pure function `(word, pc) -> Microop`. Unsupported or malformed encodings
//! become `opType = INVALID` rather than an `Err`, so Writeback's trap machinery handles them
//! uniformly; see `SPEC_FULL.md` §4.E.
//!
//! The opcode dispatch and bit-extraction helpers are grounded on the reference decoder
//! (`instruction.rs`): `opcode()`, `funct3()`, `funct7()`, `rd()`, `rs1()`, `rs2()`, `shamt()`,
//! `csr()`, and the R-type ADD/SUB and SRL/SRA funct7-bit-5 distinction.

use crate::alu::AluOp;
use crate::immediate::{self, Format};
use crate::registers::Specifier;

/// The closed set of micro-operation kinds this core can execute.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpType {
    Nop,
    Alu,
    Load,
    Store,
    Branch,
    Jal,
    Jalr,
    Lui,
    Auipc,
    CsrRw,
    CsrRs,
    CsrRc,
    Mret,
    Invalid,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchFunc {
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemWidth {
    Byte,
    Half,
    Word,
}

/// Decode→Execute payload. All fields are populated regardless of `op_type` (unused fields for a
/// given `op_type` simply carry a default value); this keeps `Microop` a plain `Copy` struct that
/// can sit in a [`crate::pipeline_register::PipelineRegister`] without an enum-of-structs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Microop {
    pub op_type: OpType,
    pub alu_op: AluOp,
    pub rd: Specifier,
    pub rs1: Specifier,
    pub rs2: Specifier,
    pub uses_rs2: bool,
    pub has_imm: bool,
    pub imm: i32,
    pub mem_width: MemWidth,
    pub mem_unsigned: bool,
    pub branch_func: BranchFunc,
    pub reg_write: bool,
    pub pc: u32,
    pub csr_addr: u16,
    pub csr_imm: u32,
    pub is_csr_op: bool,
    pub is_ecall: bool,
    pub is_mret: bool,
    pub is_invalid: bool,
    /// The raw instruction word, carried through for `mtval` on an illegal-instruction trap.
    pub word: u32,
}

impl Microop {
    fn invalid(word: u32, pc: u32) -> Self {
        Self {
            op_type: OpType::Invalid,
            alu_op: AluOp::Add,
            rd: Specifier::X0,
            rs1: Specifier::X0,
            rs2: Specifier::X0,
            uses_rs2: false,
            has_imm: false,
            imm: 0,
            mem_width: MemWidth::Word,
            mem_unsigned: false,
            branch_func: BranchFunc::Beq,
            reg_write: false,
            pc,
            csr_addr: 0,
            csr_imm: 0,
            is_csr_op: false,
            is_ecall: false,
            is_mret: false,
            is_invalid: true,
            word,
        }
    }

    /// A microop with no architectural effect, used for bubbles and fetched-all-zero-word
    /// handling upstream of Decode.
    pub fn nop(pc: u32) -> Self {
        Self {
            op_type: OpType::Nop,
            ..Self::invalid(0x0000_0013, pc)
        }
    }
}

fn opcode(word: u32) -> u32 {
    word & 0b111_1111
}
fn rd(word: u32) -> Specifier {
    Specifier::from_u5((word >> 7) & 0b1_1111)
}
fn funct3(word: u32) -> u32 {
    (word >> 12) & 0b111
}
fn rs1(word: u32) -> Specifier {
    Specifier::from_u5((word >> 15) & 0b1_1111)
}
fn rs2(word: u32) -> Specifier {
    Specifier::from_u5((word >> 20) & 0b1_1111)
}
fn funct7(word: u32) -> u32 {
    (word >> 25) & 0b111_1111
}
fn shamt(word: u32) -> u32 {
    (word >> 20) & 0b1_1111
}
fn csr_addr(word: u32) -> u16 {
    (word >> 20) as u16
}

/// Decode `word`, fetched from `pc`, into a [`Microop`]. Never fails: unrecognized encodings
/// (including the all-zero word) decode to `op_type = Invalid`.
pub fn decode(word: u32, pc: u32) -> Microop {
    match opcode(word) {
        // OP-IMM
        0b001_0011 => decode_op_imm(word, pc),
        // OP
        0b011_0011 => decode_op(word, pc),
        // LOAD
        0b000_0011 => decode_load(word, pc),
        // STORE
        0b010_0011 => decode_store(word, pc),
        // BRANCH
        0b110_0011 => decode_branch(word, pc),
        // LUI
        0b011_0111 => base(word, pc, OpType::Lui, true, Some(Specifier::X0), None, false),
        // AUIPC
        0b001_0111 => base(word, pc, OpType::Auipc, true, Some(Specifier::X0), None, false),
        // JAL
        0b110_1111 => base(word, pc, OpType::Jal, true, Some(Specifier::X0), None, false),
        // JALR
        0b110_0111 if funct3(word) == 0 => {
            base(word, pc, OpType::Jalr, true, Some(rs1(word)), None, false)
        }
        // SYSTEM
        0b111_0011 => decode_system(word, pc),
        _ => Microop::invalid(word, pc),
    }
}

fn base(
    word: u32,
    pc: u32,
    op_type: OpType,
    has_imm: bool,
    rs1_used: Option<Specifier>,
    rs2_used: Option<Specifier>,
    uses_rs2: bool,
) -> Microop {
    let rd = rd(word);
    Microop {
        op_type,
        alu_op: AluOp::Add,
        rd,
        rs1: rs1_used.unwrap_or(Specifier::X0),
        rs2: rs2_used.unwrap_or(Specifier::X0),
        uses_rs2,
        has_imm,
        imm: match op_type {
            OpType::Lui | OpType::Auipc => immediate::extract(word, Format::U),
            OpType::Jal => immediate::extract(word, Format::J),
            _ => immediate::extract(word, Format::I),
        },
        mem_width: MemWidth::Word,
        mem_unsigned: false,
        branch_func: BranchFunc::Beq,
        reg_write: !rd.is_zero(),
        pc,
        csr_addr: 0,
        csr_imm: 0,
        is_csr_op: false,
        is_ecall: false,
        is_mret: false,
        is_invalid: false,
        word,
    }
}

fn decode_op_imm(word: u32, pc: u32) -> Microop {
    let f3 = funct3(word);
    let alu_op = match f3 {
        0b000 => AluOp::Add,
        0b010 => AluOp::Slt,
        0b011 => AluOp::Sltu,
        0b100 => AluOp::Xor,
        0b110 => AluOp::Or,
        0b111 => AluOp::And,
        0b001 => AluOp::Sll,
        0b101 => {
            if funct7(word) & 0b0100000 != 0 {
                AluOp::Sra
            } else {
                AluOp::Srl
            }
        }
        _ => unreachable!("funct3 is a 3-bit field"),
    };
    let is_shift = matches!(f3, 0b001 | 0b101);
    let mut microop = base(word, pc, OpType::Alu, true, Some(rs1(word)), None, false);
    microop.alu_op = alu_op;
    if is_shift {
        microop.imm = shamt(word) as i32;
    }
    microop
}

fn decode_op(word: u32, pc: u32) -> Microop {
    let f3 = funct3(word);
    let f7 = funct7(word);
    let alu_op = match (f7, f3) {
        (0b0000000, 0b000) => AluOp::Add,
        (0b0100000, 0b000) => AluOp::Sub,
        (0b0000000, 0b001) => AluOp::Sll,
        (0b0000000, 0b010) => AluOp::Slt,
        (0b0000000, 0b011) => AluOp::Sltu,
        (0b0000000, 0b100) => AluOp::Xor,
        (0b0000000, 0b101) => AluOp::Srl,
        (0b0100000, 0b101) => AluOp::Sra,
        (0b0000000, 0b110) => AluOp::Or,
        (0b0000000, 0b111) => AluOp::And,
        (0b0000001, 0b000) => AluOp::Mul,
        (0b0000001, 0b001) => AluOp::Mulh,
        (0b0000001, 0b010) => AluOp::Mulhsu,
        (0b0000001, 0b011) => AluOp::Mulhu,
        (0b0000001, 0b100) => AluOp::Div,
        (0b0000001, 0b101) => AluOp::Divu,
        (0b0000001, 0b110) => AluOp::Rem,
        (0b0000001, 0b111) => AluOp::Remu,
        _ => return Microop::invalid(word, pc),
    };
    let mut microop = base(
        word,
        pc,
        OpType::Alu,
        false,
        Some(rs1(word)),
        Some(rs2(word)),
        true,
    );
    microop.alu_op = alu_op;
    microop
}

fn decode_load(word: u32, pc: u32) -> Microop {
    let f3 = funct3(word);
    let (mem_width, mem_unsigned) = match f3 {
        0b000 => (MemWidth::Byte, false),
        0b001 => (MemWidth::Half, false),
        0b010 => (MemWidth::Word, false),
        0b100 => (MemWidth::Byte, true),
        0b101 => (MemWidth::Half, true),
        _ => return Microop::invalid(word, pc),
    };
    let mut microop = base(word, pc, OpType::Load, true, Some(rs1(word)), None, false);
    microop.mem_width = mem_width;
    microop.mem_unsigned = mem_unsigned;
    microop
}

fn decode_store(word: u32, pc: u32) -> Microop {
    let f3 = funct3(word);
    let mem_width = match f3 {
        0b000 => MemWidth::Byte,
        0b001 => MemWidth::Half,
        0b010 => MemWidth::Word,
        _ => return Microop::invalid(word, pc),
    };
    let rd = rd(word); // low bits of the S-immediate, not a destination register
    let imm = {
        let upper = ((word as i32) >> 25) << 5;
        let lower = (u8::from(rd) as u32 & 0x1f) as i32;
        upper | lower
    };
    Microop {
        op_type: OpType::Store,
        alu_op: AluOp::Add,
        rd: Specifier::X0,
        rs1: rs1(word),
        rs2: rs2(word),
        uses_rs2: true,
        has_imm: true,
        imm,
        mem_width,
        mem_unsigned: false,
        branch_func: BranchFunc::Beq,
        reg_write: false,
        pc,
        csr_addr: 0,
        csr_imm: 0,
        is_csr_op: false,
        is_ecall: false,
        is_mret: false,
        is_invalid: false,
        word,
    }
}

fn decode_branch(word: u32, pc: u32) -> Microop {
    let f3 = funct3(word);
    let branch_func = match f3 {
        0b000 => BranchFunc::Beq,
        0b001 => BranchFunc::Bne,
        0b100 => BranchFunc::Blt,
        0b101 => BranchFunc::Bge,
        0b110 => BranchFunc::Bltu,
        0b111 => BranchFunc::Bgeu,
        _ => return Microop::invalid(word, pc),
    };
    Microop {
        op_type: OpType::Branch,
        alu_op: AluOp::Add,
        rd: Specifier::X0,
        rs1: rs1(word),
        rs2: rs2(word),
        uses_rs2: true,
        has_imm: true,
        imm: immediate::extract(word, Format::B),
        mem_width: MemWidth::Word,
        mem_unsigned: false,
        branch_func,
        reg_write: false,
        pc,
        csr_addr: 0,
        csr_imm: 0,
        is_csr_op: false,
        is_ecall: false,
        is_mret: false,
        is_invalid: false,
        word,
    }
}

const MRET_IMM: u32 = 0x302;

fn decode_system(word: u32, pc: u32) -> Microop {
    let f3 = funct3(word);
    if f3 == 0 {
        let imm12 = word >> 20;
        return if imm12 == 0 {
            // ECALL: decoded as an INVALID-shaped op that Writeback turns into an
            // EnvironmentCallFromMMode trap rather than IllegalInstruction; see execute.rs.
            let mut microop = Microop::invalid(word, pc);
            microop.is_ecall = true;
            microop
        } else if imm12 == MRET_IMM {
            Microop {
                is_mret: true,
                ..base(word, pc, OpType::Mret, false, None, None, false)
            }
        } else {
            Microop::invalid(word, pc)
        };
    }
    let op_type = match f3 & 0b011 {
        0b01 => OpType::CsrRw,
        0b10 => OpType::CsrRs,
        0b11 => OpType::CsrRc,
        _ => return Microop::invalid(word, pc),
    };
    let is_immediate_form = f3 & 0b100 != 0;
    let rd = rd(word);
    let rs1_field = rs1(word);
    Microop {
        op_type,
        alu_op: AluOp::Add,
        rd,
        rs1: rs1_field,
        rs2: Specifier::X0,
        uses_rs2: false,
        has_imm: is_immediate_form,
        imm: 0,
        mem_width: MemWidth::Word,
        mem_unsigned: false,
        branch_func: BranchFunc::Beq,
        reg_write: !rd.is_zero(),
        pc,
        csr_addr: csr_addr(word),
        csr_imm: u8::from(rs1_field) as u32,
        is_csr_op: true,
        is_ecall: false,
        is_mret: false,
        is_invalid: false,
        word,
    }
}
