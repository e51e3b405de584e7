//! # ARM Instruction Decoding
//!
//! The decoder hashes each 32-bit opcode into a 12-bit index built from the
//! class bits:
//!
//! ```text
//! 31    28 27      20 19                8 7    4 3   0
//! ┌───────┬──────────┬───────────────────┬──────┬─────┐
//! │ Cond  │ ########## ...................│ #### │ ....│
//! └───────┴──────────┴───────────────────┴──────┴─────┘
//!           bits 27-20 ───────┐    ┌────── bits 7-4
//!                             ▼    ▼
//!                  index = [27:20] ‖ [7:4]  (4096 entries)
//! ```
//!
//! A flat table maps every index to an instruction class once, at first use.
//! Unassigned slots hold [`ArmInstruction::Undefined`], so a malformed
//! opcode raises the emulated undefined-instruction exception instead of
//! faulting the host.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// The 16 data-processing operations, from bits 24-21 of the opcode
/// (bits 8-5 of the decode index).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ArmAluOp {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl From<usize> for ArmAluOp {
    fn from(alu_op_code: usize) -> Self {
        match alu_op_code {
            0x0 => Self::And,
            0x1 => Self::Eor,
            0x2 => Self::Sub,
            0x3 => Self::Rsb,
            0x4 => Self::Add,
            0x5 => Self::Adc,
            0x6 => Self::Sbc,
            0x7 => Self::Rsc,
            0x8 => Self::Tst,
            0x9 => Self::Teq,
            0xA => Self::Cmp,
            0xB => Self::Cmn,
            0xC => Self::Orr,
            0xD => Self::Mov,
            0xE => Self::Bic,
            0xF => Self::Mvn,
            _ => unreachable!(),
        }
    }
}

impl std::fmt::Display for ArmAluOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Eor => f.write_str("EOR"),
            Self::Sub => f.write_str("SUB"),
            Self::Rsb => f.write_str("RSB"),
            Self::Add => f.write_str("ADD"),
            Self::Adc => f.write_str("ADC"),
            Self::Sbc => f.write_str("SBC"),
            Self::Rsc => f.write_str("RSC"),
            Self::Tst => f.write_str("TST"),
            Self::Teq => f.write_str("TEQ"),
            Self::Cmp => f.write_str("CMP"),
            Self::Cmn => f.write_str("CMN"),
            Self::Orr => f.write_str("ORR"),
            Self::Mov => f.write_str("MOV"),
            Self::Bic => f.write_str("BIC"),
            Self::Mvn => f.write_str("MVN"),
        }
    }
}

/// An ARM opcode family resolved at decode time.
///
/// Fine-grained fields (registers, offsets, addressing bits) are extracted
/// from the raw word by the handler itself, so one table entry covers every
/// operand combination of the family.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ArmInstruction {
    /// AND..MVN with the barrel-shifted second operand.
    DataProcessing(ArmAluOp),
    /// MRS: PSR to register.
    Mrs,
    /// MSR: register or rotated immediate to PSR.
    Msr,
    /// MUL/MLA, 32x32 -> 32.
    Multiply,
    /// UMULL/UMLAL/SMULL/SMLAL, 32x32 -> 64.
    MultiplyLong,
    /// LDR/STR word or byte.
    SingleDataTransfer,
    /// LDRH/STRH/LDRSB/LDRSH.
    HalfwordSignedDataTransfer,
    /// LDM/STM.
    BlockDataTransfer,
    /// B.
    Branch,
    /// BL.
    BranchLink,
    /// BX, with optional ARM/Thumb switch.
    BranchAndExchange,
    /// SWP/SWPB.
    SingleDataSwap,
    /// SWI.
    SoftwareInterrupt,
    /// Anything else, including the coprocessor space this system lacks.
    Undefined,
}

impl std::fmt::Display for ArmInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataProcessing(op) => write!(f, "{op}"),
            Self::Mrs => f.write_str("MRS"),
            Self::Msr => f.write_str("MSR"),
            Self::Multiply => f.write_str("MUL/MLA"),
            Self::MultiplyLong => f.write_str("MULL/MLAL"),
            Self::SingleDataTransfer => f.write_str("LDR/STR"),
            Self::HalfwordSignedDataTransfer => f.write_str("LDRH/STRH/LDRS"),
            Self::BlockDataTransfer => f.write_str("LDM/STM"),
            Self::Branch => f.write_str("B"),
            Self::BranchLink => f.write_str("BL"),
            Self::BranchAndExchange => f.write_str("BX"),
            Self::SingleDataSwap => f.write_str("SWP"),
            Self::SoftwareInterrupt => f.write_str("SWI"),
            Self::Undefined => f.write_str("UNDEFINED"),
        }
    }
}

/// Maps a fetched opcode word to its decode-table index: bits 27-20
/// concatenated with bits 7-4.
pub(crate) fn decode_index(opcode: u32) -> usize {
    (((opcode >> 16) & 0xff0) | ((opcode >> 4) & 0xf)) as usize
}

/// The 4096-entry ARM dispatch table, built once on first use. Every slot
/// is populated; gaps resolve to [`ArmInstruction::Undefined`].
pub(crate) static ARM_DECODE_TABLE: LazyLock<[ArmInstruction; 4096]> =
    LazyLock::new(|| std::array::from_fn(classify));

fn classify(index: usize) -> ArmInstruction {
    let is_branch_exchange = index == 0x121;
    let is_branch = (index & 0xe00) == 0xa00;
    let is_branch_link = (index & 0x100) == 0x100;
    let is_data_proc_immediate = (index & 0xe00) == 0x200;
    let is_data_proc_register = (index & 0xe00) == 0x000;
    // Bits 7 and 4 both set in a register-operand data-processing slot mean
    // multiply/swap/halfword territory, not a shift encoding.
    let is_data_proc_invalid_shift = (index & 0x009) == 0x009;
    // TST/TEQ/CMP/CMN without S is the PSR transfer space.
    let is_data_proc_invalid_test = (index & 0x190) == 0x100;
    let is_mrs = (index & 0xfbf) == 0x100;
    let is_msr_immediate = (index & 0xfb0) == 0x320;
    let is_msr_register = (index & 0xfbf) == 0x120;
    let is_mul = (index & 0xfcf) == 0x009;
    let is_mull = (index & 0xf8f) == 0x089;
    let is_single_data_transfer = (index & 0xc00) == 0x400;
    let is_invalid_single_data_transfer = (index & 0xe01) == 0x601;
    let is_halfword_signed_data_transfer = (index & 0xe09) == 0x009;
    let is_halfword_signed_data_transfer_swap = (index & 0xe0f) == 0x009;
    let is_block_data_transfer = (index & 0xe00) == 0x800;
    let is_swap = (index & 0xfbf) == 0x109;
    let is_swi = (index & 0xf00) == 0xf00;

    if is_branch_exchange {
        ArmInstruction::BranchAndExchange
    } else if is_branch {
        if is_branch_link {
            ArmInstruction::BranchLink
        } else {
            ArmInstruction::Branch
        }
    } else if !is_data_proc_invalid_test
        && (is_data_proc_immediate || (is_data_proc_register && !is_data_proc_invalid_shift))
    {
        ArmInstruction::DataProcessing(ArmAluOp::from((index >> 5) & 0xf))
    } else if is_msr_immediate || is_msr_register {
        ArmInstruction::Msr
    } else if is_mrs {
        ArmInstruction::Mrs
    } else if is_mul {
        ArmInstruction::Multiply
    } else if is_mull {
        ArmInstruction::MultiplyLong
    } else if is_single_data_transfer && !is_invalid_single_data_transfer {
        ArmInstruction::SingleDataTransfer
    } else if is_halfword_signed_data_transfer && !is_halfword_signed_data_transfer_swap {
        ArmInstruction::HalfwordSignedDataTransfer
    } else if is_block_data_transfer {
        ArmInstruction::BlockDataTransfer
    } else if is_swap {
        ArmInstruction::SingleDataSwap
    } else if is_swi {
        ArmInstruction::SoftwareInterrupt
    } else {
        ArmInstruction::Undefined
    }
}

/// Resolves a fetched opcode word through the dispatch table.
pub(crate) fn decode(opcode: u32) -> ArmInstruction {
    ARM_DECODE_TABLE[decode_index(opcode)]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn index_packs_class_bits() {
        // MOV R0, #5: bits 27-20 are 0x3A, bits 7-4 are 0x0.
        assert_eq!(decode_index(0xE3A0_0005), 0x3A0);
        // BX R1: bits 27-20 are 0x12, bits 7-4 are 0x1. The condition
        // field never reaches the index.
        assert_eq!(decode_index(0xE12F_FF11), 0x121);
        assert_eq!(decode_index(0x012F_FF11), 0x121);
    }

    #[test]
    fn decode_branch_and_exchange() {
        // BX R1
        assert_eq!(decode(0xE12F_FF11), ArmInstruction::BranchAndExchange);
    }

    #[test]
    fn decode_branches() {
        assert_eq!(decode(0xEA00_00FF), ArmInstruction::Branch);
        assert_eq!(decode(0xEB00_00FF), ArmInstruction::BranchLink);
        assert_eq!(decode(0x0AFF_FFF7), ArmInstruction::Branch); // BEQ, negative offset
    }

    #[test]
    fn decode_data_processing() {
        // MOV R0, #5
        assert_eq!(
            decode(0xE3A0_0005),
            ArmInstruction::DataProcessing(ArmAluOp::Mov)
        );
        // ADDS R0, R1, #1
        assert_eq!(
            decode(0xE291_0001),
            ArmInstruction::DataProcessing(ArmAluOp::Add)
        );
        // CMP R1, R2 (register operand, S implicit)
        assert_eq!(
            decode(0xE151_0002),
            ArmInstruction::DataProcessing(ArmAluOp::Cmp)
        );
        // ANDS R3, R4, R5, LSL R6 (shift by register)
        assert_eq!(
            decode(0xE014_3615),
            ArmInstruction::DataProcessing(ArmAluOp::And)
        );
    }

    #[test]
    fn decode_psr_transfer() {
        // MRS R0, CPSR
        assert_eq!(decode(0xE10F_0000), ArmInstruction::Mrs);
        // MRS R0, SPSR
        assert_eq!(decode(0xE14F_0000), ArmInstruction::Mrs);
        // MSR CPSR, R0
        assert_eq!(decode(0xE129_F000), ArmInstruction::Msr);
        // MSR CPSR_flg, #0xF0000000
        assert_eq!(decode(0xE328_F4F0), ArmInstruction::Msr);
        // MSR SPSR, R14
        assert_eq!(decode(0xE169_F00E), ArmInstruction::Msr);
    }

    #[test]
    fn decode_multiplies() {
        // MUL R0, R1, R2
        assert_eq!(decode(0xE000_0291), ArmInstruction::Multiply);
        // MLAS R0, R1, R2, R3
        assert_eq!(decode(0xE030_3291), ArmInstruction::Multiply);
        // UMULL R0, R1, R2, R3
        assert_eq!(decode(0xE081_0392), ArmInstruction::MultiplyLong);
        // SMLAL R0, R1, R2, R3
        assert_eq!(decode(0xE0E1_0392), ArmInstruction::MultiplyLong);
    }

    #[test]
    fn decode_data_transfers() {
        // LDR R5, [R1, -R12]
        assert_eq!(decode(0xE751_500C), ArmInstruction::SingleDataTransfer);
        // STRB R0, [R1], #1
        assert_eq!(decode(0xE4C1_0001), ArmInstruction::SingleDataTransfer);
        // STRH R0, [R1]
        assert_eq!(
            decode(0xE1C1_00B0),
            ArmInstruction::HalfwordSignedDataTransfer
        );
        // LDRSB R0, [R1, R2]
        assert_eq!(
            decode(0xE191_00D2),
            ArmInstruction::HalfwordSignedDataTransfer
        );
        // LDMIA R13!, {R1, R5, R7}
        assert_eq!(decode(0xE8BD_00A2), ArmInstruction::BlockDataTransfer);
        // SWP R1, R2, [R3]
        assert_eq!(decode(0xE103_1092), ArmInstruction::SingleDataSwap);
        // SWPB R4, R5, [R6]
        assert_eq!(decode(0xE146_4095), ArmInstruction::SingleDataSwap);
    }

    #[test]
    fn decode_software_interrupt() {
        assert_eq!(decode(0xEF00_0000), ArmInstruction::SoftwareInterrupt);
        assert_eq!(decode(0xEFFF_FFFF), ArmInstruction::SoftwareInterrupt);
    }

    #[test]
    fn gaps_resolve_to_undefined() {
        // Register-offset single data transfer with bit 4 set.
        assert_eq!(decode(0xE700_0010), ArmInstruction::Undefined);
        // The coprocessor space stays undefined on this system.
        assert_eq!(decode(0xEE00_0000), ArmInstruction::Undefined);
        assert_eq!(decode(0xEC00_0000), ArmInstruction::Undefined);
        // TST without S that is not a valid PSR transfer.
        assert_eq!(decode(0xE100_0020), ArmInstruction::Undefined);
    }

    #[test]
    fn every_slot_is_populated() {
        // The table carries a real class in every slot; Undefined is a
        // class of its own, never an uninitialized hole.
        assert_eq!(ARM_DECODE_TABLE.len(), 4096);
        let known_defined = decode_index(0xE3A0_0005);
        assert_ne!(ARM_DECODE_TABLE[known_defined], ArmInstruction::Undefined);
    }
}
