//! # Thumb Instruction Decoding
//!
//! Thumb opcodes are 16 bits; bits 15-6 already pin down the format, so the
//! decoder uses them directly as a 10-bit index into a 1024-entry table:
//!
//! ```text
//! index = opcode >> 6
//! ```
//!
//! The 19 Thumb formats map onto the table through the masks in
//! [`classify`]; the handful of encodings ARMv4T leaves unallocated (and the
//! hi-register operations with both H flags clear) resolve to
//! [`ThumbInstruction::Undefined`].

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// A Thumb format resolved at decode time. As on the ARM side, operand
/// fields are re-extracted from the raw halfword by the handler.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ThumbInstruction {
    /// Format 1: LSL/LSR/ASR by immediate.
    MoveShiftedRegister,
    /// Format 2: ADD/SUB with register or 3-bit immediate.
    AddSubtract,
    /// Format 3: MOV/CMP/ADD/SUB with 8-bit immediate.
    MoveCompareAddSubtractImmediate,
    /// Format 4: the 16 register-to-register ALU operations.
    AluOperations,
    /// Format 5: ADD/CMP/MOV on high registers, and BX.
    HiRegisterOpsBx,
    /// Format 6: LDR Rd, [PC, #imm].
    PcRelativeLoad,
    /// Format 7: LDR/STR/LDRB/STRB with register offset.
    LoadStoreRegisterOffset,
    /// Format 8: LDRH/STRH/LDRSB/LDRSH with register offset.
    LoadStoreSignExtended,
    /// Format 9: LDR/STR/LDRB/STRB with 5-bit immediate offset.
    LoadStoreImmediateOffset,
    /// Format 10: LDRH/STRH with immediate offset.
    LoadStoreHalfword,
    /// Format 11: LDR/STR relative to SP.
    SpRelativeLoadStore,
    /// Format 12: ADD Rd, PC/SP, #imm.
    LoadAddress,
    /// Format 13: ADD SP, #±imm.
    AddSpOffset,
    /// Format 14: PUSH/POP, optionally with LR/PC.
    PushPop,
    /// Format 15: LDMIA/STMIA.
    MultipleLoadStore,
    /// Format 16: conditional branch.
    ConditionalBranch,
    /// Format 17: SWI.
    SoftwareInterrupt,
    /// Format 18: unconditional branch.
    UnconditionalBranch,
    /// Format 19: the two-halfword BL sequence.
    LongBranchLink,
    /// Unallocated encodings.
    Undefined,
}

impl std::fmt::Display for ThumbInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MoveShiftedRegister => f.write_str("LSL/LSR/ASR imm"),
            Self::AddSubtract => f.write_str("ADD/SUB"),
            Self::MoveCompareAddSubtractImmediate => f.write_str("MOV/CMP/ADD/SUB imm"),
            Self::AluOperations => f.write_str("ALU op"),
            Self::HiRegisterOpsBx => f.write_str("hi-reg op/BX"),
            Self::PcRelativeLoad => f.write_str("LDR pc-rel"),
            Self::LoadStoreRegisterOffset => f.write_str("LDR/STR reg"),
            Self::LoadStoreSignExtended => f.write_str("LDRH/STRH/LDRS reg"),
            Self::LoadStoreImmediateOffset => f.write_str("LDR/STR imm"),
            Self::LoadStoreHalfword => f.write_str("LDRH/STRH imm"),
            Self::SpRelativeLoadStore => f.write_str("LDR/STR sp-rel"),
            Self::LoadAddress => f.write_str("ADD pc/sp"),
            Self::AddSpOffset => f.write_str("ADD SP"),
            Self::PushPop => f.write_str("PUSH/POP"),
            Self::MultipleLoadStore => f.write_str("LDMIA/STMIA"),
            Self::ConditionalBranch => f.write_str("B cond"),
            Self::SoftwareInterrupt => f.write_str("SWI"),
            Self::UnconditionalBranch => f.write_str("B"),
            Self::LongBranchLink => f.write_str("BL"),
            Self::Undefined => f.write_str("UNDEFINED"),
        }
    }
}

/// Maps a fetched halfword to its decode-table index (bits 15-6).
pub(crate) fn decode_index(opcode: u16) -> usize {
    usize::from(opcode >> 6)
}

/// The 1024-entry Thumb dispatch table, built once on first use.
pub(crate) static THUMB_DECODE_TABLE: LazyLock<[ThumbInstruction; 1024]> =
    LazyLock::new(|| std::array::from_fn(classify));

fn classify(index: usize) -> ThumbInstruction {
    let is_add_subtract = (index & 0x3e0) == 0x060;
    let is_move_shifted_register = (index & 0x380) == 0x000 && !is_add_subtract;
    let is_move_compare_add_subtract_immediate = (index & 0x380) == 0x080;
    let is_alu_operations = (index & 0x3f0) == 0x100;
    let is_high_reg_ops = (index & 0x3f0) == 0x110;
    let is_pc_relative_load = (index & 0x3e0) == 0x120;
    let is_load_store_register_offset = (index & 0x3c8) == 0x140;
    let is_load_store_sign_extended = (index & 0x3c8) == 0x148;
    let is_load_store_immediate_offset = (index & 0x380) == 0x180;
    let is_load_store_halfword = (index & 0x3c0) == 0x200;
    let is_sp_relative_load_store = (index & 0x3c0) == 0x240;
    let is_load_address = (index & 0x3c0) == 0x280;
    let is_add_sp_offset = (index & 0x3fc) == 0x2c0;
    let is_push_pop = (index & 0x3d8) == 0x2d0;
    let is_multiple_load_store = (index & 0x3c0) == 0x300;
    let is_software_interrupt = (index & 0x3fc) == 0x37c;
    let is_conditional_branch = (index & 0x3c0) == 0x340 && !is_software_interrupt;
    let is_unconditional_branch = (index & 0x3e0) == 0x380;
    let is_long_branch_link = (index & 0x3c0) == 0x3c0;

    if is_move_shifted_register {
        ThumbInstruction::MoveShiftedRegister
    } else if is_add_subtract {
        ThumbInstruction::AddSubtract
    } else if is_move_compare_add_subtract_immediate {
        ThumbInstruction::MoveCompareAddSubtractImmediate
    } else if is_alu_operations {
        ThumbInstruction::AluOperations
    } else if is_high_reg_ops {
        // Index bits 3-2 are the operation, bits 1-0 the H flags.
        let operation = (index >> 2) & 0x3;
        let h1 = (index & 0x2) != 0;
        let h2 = (index & 0x1) != 0;
        let is_bx = operation == 0x3;

        // ADD/CMP/MOV need at least one high register; BX rejects H1.
        if (!is_bx && !h1 && !h2) || (is_bx && h1) {
            ThumbInstruction::Undefined
        } else {
            ThumbInstruction::HiRegisterOpsBx
        }
    } else if is_pc_relative_load {
        ThumbInstruction::PcRelativeLoad
    } else if is_load_store_register_offset {
        ThumbInstruction::LoadStoreRegisterOffset
    } else if is_load_store_sign_extended {
        ThumbInstruction::LoadStoreSignExtended
    } else if is_load_store_immediate_offset {
        ThumbInstruction::LoadStoreImmediateOffset
    } else if is_load_store_halfword {
        ThumbInstruction::LoadStoreHalfword
    } else if is_sp_relative_load_store {
        ThumbInstruction::SpRelativeLoadStore
    } else if is_load_address {
        ThumbInstruction::LoadAddress
    } else if is_add_sp_offset {
        ThumbInstruction::AddSpOffset
    } else if is_push_pop {
        ThumbInstruction::PushPop
    } else if is_multiple_load_store {
        ThumbInstruction::MultipleLoadStore
    } else if is_conditional_branch {
        ThumbInstruction::ConditionalBranch
    } else if is_software_interrupt {
        ThumbInstruction::SoftwareInterrupt
    } else if is_unconditional_branch {
        ThumbInstruction::UnconditionalBranch
    } else if is_long_branch_link {
        ThumbInstruction::LongBranchLink
    } else {
        ThumbInstruction::Undefined
    }
}

/// Resolves a fetched halfword through the dispatch table.
pub(crate) fn decode(opcode: u16) -> ThumbInstruction {
    THUMB_DECODE_TABLE[decode_index(opcode)]
}
