//! # The ARM7TDMI core
//!
//! [`Arm7tdmi`] owns the register file, the status registers, the banked
//! shadows and the three-stage pipeline, and advances them by exactly one
//! cycle per [`step`](Arm7tdmi::step). Memory and the interrupt line are
//! reached through the [`Bus`] trait; nothing else crosses the boundary.
//!
//! ## Pipeline
//!
//! One step performs, in this order: execute the opcode decoded two cycles
//! ago (or take a pending IRQ in its place), decode the opcode fetched one
//! cycle ago, fetch a new opcode at the program counter. The pipeline state
//! tracks how many of those stages are warm:
//!
//! ```text
//! Flushed ──> Fetch ──> Decode ──> Execute ──┐
//!    ▲                                 ▲─────┘
//!    └── any jump (branch, mode-changing write to r15, exception)
//! ```
//!
//! The program counter therefore reads 8 bytes past the executing
//! instruction in ARM state and 4 bytes past it in Thumb state, exactly as
//! software observes on hardware.

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::cpu::arm::instructions as arm_instructions;
use crate::cpu::arm::instructions::ArmInstruction;
use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER, REG_SP, Registers};
use crate::cpu::thumb::instructions as thumb_instructions;
use crate::cpu::thumb::instructions::ThumbInstruction;

pub const SIZE_OF_ARM_INSTRUCTION: u32 = 4;
pub const SIZE_OF_THUMB_INSTRUCTION: u32 = 2;

const ADDRESS_MASK_THUMB: u32 = 0xffff_fffe;
const ADDRESS_MASK_ARM: u32 = 0xffff_fffc;

const EXCEPTION_VECTOR_RESET: u32 = 0x0000_0000;
const EXCEPTION_VECTOR_UNDEFINED: u32 = 0x0000_0004;
const EXCEPTION_VECTOR_SWI: u32 = 0x0000_0008;
const EXCEPTION_VECTOR_IRQ: u32 = 0x0000_0018;

// State the reference boot ROM leaves behind when the boot sequence is
// skipped.
const POST_BOOT_SP: u32 = 0x0300_7f00;
const POST_BOOT_SP_IRQ: u32 = 0x0300_7fa0;
const POST_BOOT_SP_SVC: u32 = 0x0300_7fe0;
const POST_BOOT_PC: u32 = 0x0800_0000;

/// How many stages of the pipeline hold live content.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub(crate) enum PipelineState {
    #[default]
    Flushed,
    Fetch,
    Decode,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum FetchedOpcode {
    Arm(u32),
    Thumb(u16),
}

/// A fetched opcode resolved against the dispatch tables, waiting for the
/// execute stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedOpcode {
    Arm {
        instruction: ArmInstruction,
        opcode: u32,
    },
    Thumb {
        instruction: ThumbInstruction,
        opcode: u16,
    },
}

impl std::fmt::Display for DecodedOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arm {
                instruction,
                opcode,
            } => write!(f, "{instruction} (0x{opcode:08X})"),
            Self::Thumb {
                instruction,
                opcode,
            } => write!(f, "{instruction} (0x{opcode:04X})"),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Pipeline {
    pub state: PipelineState,
    pub fetched: Option<FetchedOpcode>,
    pub decoded: Option<DecodedOpcode>,
}

impl Pipeline {
    /// Discards the in-flight fetch/decode content. The next three steps
    /// refill the stages before anything executes again.
    pub fn flush(&mut self) {
        *self = Self::default();
    }

    pub fn advance_state(&mut self) {
        self.state = match self.state {
            PipelineState::Flushed => PipelineState::Fetch,
            PipelineState::Fetch => PipelineState::Decode,
            PipelineState::Decode | PipelineState::Execute => PipelineState::Execute,
        };
    }
}

/// The CPU aggregate. Construct it, call [`reset`](Self::reset) once, then
/// drive it with [`step`](Self::step).
#[derive(Debug, Serialize, Deserialize)]
pub struct Arm7tdmi {
    pub(crate) cpsr: Psr,
    pub(crate) registers: Registers,
    pub(crate) register_bank: RegisterBank,
    pub(crate) pipeline: Pipeline,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        let mut cpu = Self {
            cpsr: Psr::default(),
            registers: Registers::default(),
            register_bank: RegisterBank::default(),
            pipeline: Pipeline::default(),
        };
        cpu.reset(false);
        cpu
    }
}

impl Arm7tdmi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts the core back into its power-on state.
    ///
    /// With `skip_boot_sequence` the register file is seeded with the state
    /// the reference boot ROM hands to a cartridge: System mode, interrupts
    /// enabled, stack pointers placed in work RAM and the program counter at
    /// the cartridge entry point. Without it the core starts the way
    /// hardware does: Supervisor mode at the reset vector with IRQ and FIQ
    /// disabled.
    pub fn reset(&mut self, skip_boot_sequence: bool) {
        self.pipeline.flush();
        self.cpsr = Psr::default();
        self.registers = Registers::default();
        self.register_bank = RegisterBank::default();

        if skip_boot_sequence {
            self.cpsr.set_mode(Mode::System);
            self.registers.set_register_at(REG_SP as usize, POST_BOOT_SP);
            self.registers.set_program_counter(POST_BOOT_PC);
            self.register_bank.r13_irq = POST_BOOT_SP_IRQ;
            self.register_bank.r13_svc = POST_BOOT_SP_SVC;
        } else {
            self.cpsr.set_mode(Mode::Supervisor);
            self.cpsr.set_irq_disable(true);
            self.cpsr.set_fiq_disable(true);
            self.registers.set_program_counter(EXCEPTION_VECTOR_RESET);
        }
    }

    /// Advances the emulated machine by one CPU cycle.
    pub fn step(&mut self, bus: &mut impl Bus) {
        let fetch_address = self.registers.program_counter();

        self.execute(bus);
        self.decode();
        self.fetch(bus, fetch_address);

        self.pipeline.advance_state();
    }

    fn execute(&mut self, bus: &mut impl Bus) {
        if self.pipeline.state < PipelineState::Execute {
            return;
        }

        // A pending interrupt preempts the decoded instruction; it will be
        // re-fetched after the handler returns.
        if bus.irq_pending() && !self.cpsr.irq_disable() {
            self.raise_irq();
            return;
        }

        let Some(decoded) = self.pipeline.decoded else {
            return;
        };

        match decoded {
            DecodedOpcode::Arm {
                instruction,
                opcode,
            } => {
                let condition = Condition::from((opcode >> 28) as u8);
                if self.cpsr.can_execute(condition) {
                    self.execute_arm(instruction, opcode, bus);
                }
            }
            DecodedOpcode::Thumb {
                instruction,
                opcode,
            } => self.execute_thumb(instruction, opcode, bus),
        }
    }

    fn decode(&mut self) {
        if self.pipeline.state < PipelineState::Decode {
            return;
        }

        if let Some(fetched) = self.pipeline.fetched {
            let decoded = match fetched {
                FetchedOpcode::Arm(opcode) => DecodedOpcode::Arm {
                    instruction: arm_instructions::decode(opcode),
                    opcode,
                },
                FetchedOpcode::Thumb(opcode) => DecodedOpcode::Thumb {
                    instruction: thumb_instructions::decode(opcode),
                    opcode,
                },
            };

            tracing::trace!("decoded {decoded}");
            self.pipeline.decoded = Some(decoded);
        }
    }

    fn fetch(&mut self, bus: &mut impl Bus, fetch_address: u32) {
        if self.pipeline.state < PipelineState::Fetch {
            return;
        }

        match self.cpsr.cpu_state() {
            CpuState::Thumb => {
                self.pipeline.fetched =
                    Some(FetchedOpcode::Thumb(bus.read_half_word(fetch_address)));
                self.registers
                    .advance_program_counter(SIZE_OF_THUMB_INSTRUCTION);
            }
            CpuState::Arm => {
                self.pipeline.fetched = Some(FetchedOpcode::Arm(bus.read_word(fetch_address)));
                self.registers
                    .advance_program_counter(SIZE_OF_ARM_INSTRUCTION);
            }
        }
    }

    /// The only way the program counter changes outside of sequential
    /// fetching. Aligns the target to the current instruction size and
    /// flushes the pipeline.
    pub(crate) fn jump(&mut self, address: u32) {
        let mask = match self.cpsr.cpu_state() {
            CpuState::Thumb => ADDRESS_MASK_THUMB,
            CpuState::Arm => ADDRESS_MASK_ARM,
        };

        self.registers.set_program_counter(address & mask);
        self.pipeline.flush();
    }

    /// BX-style jump: bit 0 of the target selects the Thumb state before
    /// the address is aligned and the pipeline flushed.
    pub(crate) fn exchange_jump(&mut self, address: u32) {
        let thumb = address & 1 != 0;
        self.cpsr.set_state_bit(thumb);
        self.jump(address);
    }

    pub(crate) fn instruction_size(&self) -> u32 {
        match self.cpsr.cpu_state() {
            CpuState::Thumb => SIZE_OF_THUMB_INSTRUCTION,
            CpuState::Arm => SIZE_OF_ARM_INSTRUCTION,
        }
    }

    /// Reads any register, r15 (the program counter) included.
    pub(crate) fn read_register(&self, index: u32) -> u32 {
        self.registers.register_at(index as usize)
    }

    /// Writes a register. A write to r15 is a jump: the pipeline contract
    /// makes a raw store to the program counter impossible.
    pub(crate) fn write_register(&mut self, index: u32, value: u32) {
        if index == REG_PROGRAM_COUNTER {
            self.jump(value);
        } else {
            self.registers.set_register_at(index as usize, value);
        }
    }

    /// Reads a register out of the User/System bank regardless of the
    /// active mode. Needed by LDM with the force-user bit.
    pub(crate) fn read_user_register(&self, index: u32) -> u32 {
        match (self.cpsr.mode(), index) {
            (Mode::Fiq, 8..=14)
            | (Mode::Irq | Mode::Supervisor | Mode::Abort | Mode::Undefined, 13..=14) => {
                self.register_bank.user_register(index as usize)
            }
            _ => self.read_register(index),
        }
    }

    /// Writes a register in the User/System bank regardless of the active
    /// mode. A write to r15 still performs a full jump.
    pub(crate) fn write_user_register(&mut self, index: u32, value: u32) {
        if index == REG_PROGRAM_COUNTER {
            self.jump(value);
            return;
        }

        match (self.cpsr.mode(), index) {
            (Mode::Fiq, 8..=14)
            | (Mode::Irq | Mode::Supervisor | Mode::Abort | Mode::Undefined, 13..=14) => {
                self.register_bank.set_user_register(index as usize, value);
            }
            _ => self.registers.set_register_at(index as usize, value),
        }
    }

    /// Swaps the banked registers: saves the live r8-r14 into the current
    /// mode's bank, loads the new mode's bank, updates the mode field.
    /// r0-r7 and r15 are never banked.
    pub(crate) fn change_mode(&mut self, new_mode: Mode) {
        self.store_bank();
        self.load_bank(new_mode);
        self.cpsr.set_mode(new_mode);
    }

    fn store_bank(&mut self) {
        let bank = &mut self.register_bank;
        match self.cpsr.mode() {
            Mode::User | Mode::System => {
                bank.r8_usr = self.registers.register_at(8);
                bank.r9_usr = self.registers.register_at(9);
                bank.r10_usr = self.registers.register_at(10);
                bank.r11_usr = self.registers.register_at(11);
                bank.r12_usr = self.registers.register_at(12);
                bank.r13_usr = self.registers.register_at(13);
                bank.r14_usr = self.registers.register_at(14);
            }
            Mode::Fiq => {
                bank.r8_fiq = self.registers.register_at(8);
                bank.r9_fiq = self.registers.register_at(9);
                bank.r10_fiq = self.registers.register_at(10);
                bank.r11_fiq = self.registers.register_at(11);
                bank.r12_fiq = self.registers.register_at(12);
                bank.r13_fiq = self.registers.register_at(13);
                bank.r14_fiq = self.registers.register_at(14);
            }
            // The other privileged modes bank only r13-r14; their r8-r12
            // live in the User/System bank.
            Mode::Irq => {
                self.store_shared_low_bank();
                self.register_bank.r13_irq = self.registers.register_at(13);
                self.register_bank.r14_irq = self.registers.register_at(14);
            }
            Mode::Supervisor => {
                self.store_shared_low_bank();
                self.register_bank.r13_svc = self.registers.register_at(13);
                self.register_bank.r14_svc = self.registers.register_at(14);
            }
            Mode::Abort => {
                self.store_shared_low_bank();
                self.register_bank.r13_abt = self.registers.register_at(13);
                self.register_bank.r14_abt = self.registers.register_at(14);
            }
            Mode::Undefined => {
                self.store_shared_low_bank();
                self.register_bank.r13_und = self.registers.register_at(13);
                self.register_bank.r14_und = self.registers.register_at(14);
            }
        }
    }

    fn store_shared_low_bank(&mut self) {
        self.register_bank.r8_usr = self.registers.register_at(8);
        self.register_bank.r9_usr = self.registers.register_at(9);
        self.register_bank.r10_usr = self.registers.register_at(10);
        self.register_bank.r11_usr = self.registers.register_at(11);
        self.register_bank.r12_usr = self.registers.register_at(12);
    }

    fn load_bank(&mut self, new_mode: Mode) {
        match new_mode {
            Mode::User | Mode::System => {
                self.registers.set_register_at(8, self.register_bank.r8_usr);
                self.registers.set_register_at(9, self.register_bank.r9_usr);
                self.registers
                    .set_register_at(10, self.register_bank.r10_usr);
                self.registers
                    .set_register_at(11, self.register_bank.r11_usr);
                self.registers
                    .set_register_at(12, self.register_bank.r12_usr);
                self.registers
                    .set_register_at(13, self.register_bank.r13_usr);
                self.registers
                    .set_register_at(14, self.register_bank.r14_usr);
            }
            Mode::Fiq => {
                self.registers.set_register_at(8, self.register_bank.r8_fiq);
                self.registers.set_register_at(9, self.register_bank.r9_fiq);
                self.registers
                    .set_register_at(10, self.register_bank.r10_fiq);
                self.registers
                    .set_register_at(11, self.register_bank.r11_fiq);
                self.registers
                    .set_register_at(12, self.register_bank.r12_fiq);
                self.registers
                    .set_register_at(13, self.register_bank.r13_fiq);
                self.registers
                    .set_register_at(14, self.register_bank.r14_fiq);
            }
            Mode::Irq => {
                self.load_shared_low_bank();
                self.registers
                    .set_register_at(13, self.register_bank.r13_irq);
                self.registers
                    .set_register_at(14, self.register_bank.r14_irq);
            }
            Mode::Supervisor => {
                self.load_shared_low_bank();
                self.registers
                    .set_register_at(13, self.register_bank.r13_svc);
                self.registers
                    .set_register_at(14, self.register_bank.r14_svc);
            }
            Mode::Abort => {
                self.load_shared_low_bank();
                self.registers
                    .set_register_at(13, self.register_bank.r13_abt);
                self.registers
                    .set_register_at(14, self.register_bank.r14_abt);
            }
            Mode::Undefined => {
                self.load_shared_low_bank();
                self.registers
                    .set_register_at(13, self.register_bank.r13_und);
                self.registers
                    .set_register_at(14, self.register_bank.r14_und);
            }
        }
    }

    fn load_shared_low_bank(&mut self) {
        self.registers.set_register_at(8, self.register_bank.r8_usr);
        self.registers.set_register_at(9, self.register_bank.r9_usr);
        self.registers
            .set_register_at(10, self.register_bank.r10_usr);
        self.registers
            .set_register_at(11, self.register_bank.r11_usr);
        self.registers
            .set_register_at(12, self.register_bank.r12_usr);
    }

    /// The raw CPSR word.
    #[must_use]
    pub fn get_cpsr(&self) -> u32 {
        self.cpsr.into()
    }

    /// Writes the whole CPSR, swapping register banks when the mode field
    /// changes. The raw word is kept bit-exactly, so a readback returns
    /// exactly what was written.
    pub fn set_cpsr(&mut self, value: u32) {
        let new = Psr::from(value);
        self.change_mode(new.mode());
        self.cpsr = new;
    }

    /// The SPSR of the current mode. User and System have none; reading
    /// falls back to the CPSR, as on the systems this core targets.
    #[must_use]
    pub fn get_spsr(&self) -> u32 {
        match self.cpsr.mode() {
            Mode::User | Mode::System => self.get_cpsr(),
            Mode::Fiq => self.register_bank.spsr_fiq.into(),
            Mode::Irq => self.register_bank.spsr_irq.into(),
            Mode::Supervisor => self.register_bank.spsr_svc.into(),
            Mode::Abort => self.register_bank.spsr_abt.into(),
            Mode::Undefined => self.register_bank.spsr_und.into(),
        }
    }

    /// Writes the SPSR of the current mode. In User and System, which have
    /// no SPSR, the write falls through to the CPSR.
    pub fn set_spsr(&mut self, value: u32) {
        match self.cpsr.mode() {
            Mode::User | Mode::System => self.set_cpsr(value),
            Mode::Fiq => self.register_bank.spsr_fiq = Psr::from(value),
            Mode::Irq => self.register_bank.spsr_irq = Psr::from(value),
            Mode::Supervisor => self.register_bank.spsr_svc = Psr::from(value),
            Mode::Abort => self.register_bank.spsr_abt = Psr::from(value),
            Mode::Undefined => self.register_bank.spsr_und = Psr::from(value),
        }
    }

    /// Software interrupt entry: Supervisor mode, vector 0x08. The link
    /// register receives the address of the instruction after the SWI, so
    /// the handler returns with `MOVS PC, LR`.
    pub(crate) fn raise_swi(&mut self) {
        let saved_cpsr = self.cpsr;
        let return_address = self
            .registers
            .program_counter()
            .wrapping_sub(self.instruction_size());

        self.change_mode(Mode::Supervisor);
        self.register_bank.spsr_svc = saved_cpsr;
        self.registers
            .set_register_at(REG_LR as usize, return_address);
        self.cpsr.set_state_bit(false);
        self.cpsr.set_irq_disable(true);
        self.jump(EXCEPTION_VECTOR_SWI);
    }

    /// Undefined-instruction entry: Undefined mode, vector 0x04. Same link
    /// register convention as SWI.
    pub(crate) fn raise_und(&mut self) {
        tracing::debug!(
            "undefined instruction, entering exception handler at 0x{EXCEPTION_VECTOR_UNDEFINED:08X}"
        );

        let saved_cpsr = self.cpsr;
        let return_address = self
            .registers
            .program_counter()
            .wrapping_sub(self.instruction_size());

        self.change_mode(Mode::Undefined);
        self.register_bank.spsr_und = saved_cpsr;
        self.registers
            .set_register_at(REG_LR as usize, return_address);
        self.cpsr.set_state_bit(false);
        self.cpsr.set_irq_disable(true);
        self.jump(EXCEPTION_VECTOR_UNDEFINED);
    }

    /// Hardware interrupt entry: IRQ mode, vector 0x18. The preempted
    /// instruction never ran, and the link register receives its address
    /// plus 4, so the handler returns with `SUBS PC, LR, #4`. FIQ stays
    /// enabled.
    pub(crate) fn raise_irq(&mut self) {
        let saved_cpsr = self.cpsr;
        let size = self.instruction_size();
        let return_address = self
            .registers
            .program_counter()
            .wrapping_sub(2 * size)
            .wrapping_add(4);

        self.change_mode(Mode::Irq);
        self.register_bank.spsr_irq = saved_cpsr;
        self.registers
            .set_register_at(REG_LR as usize, return_address);
        self.cpsr.set_state_bit(false);
        self.cpsr.set_irq_disable(true);
        self.jump(EXCEPTION_VECTOR_IRQ);
    }

    /// Snapshot of the 16 visible registers. Tooling only.
    #[must_use]
    pub fn visible_registers(&self) -> [u32; 16] {
        self.registers.visible()
    }

    /// The CPSR as a typed value. Tooling only.
    #[must_use]
    pub fn cpsr(&self) -> Psr {
        self.cpsr
    }

    /// The current mode's SPSR as a typed value. Tooling only.
    #[must_use]
    pub fn spsr(&self) -> Psr {
        Psr::from(self.get_spsr())
    }

    /// The opcode currently waiting in the execute stage, if the pipeline
    /// is warm enough to have one. Tooling only.
    #[must_use]
    pub fn decoded_opcode(&self) -> Option<DecodedOpcode> {
        self.pipeline.decoded
    }
}

impl std::fmt::Display for Arm7tdmi {
    /// Register dump in four rows of four, the shape debuggers print.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registers = self.visible_registers();
        for row in 0..4 {
            for column in 0..4 {
                let index = (row << 2) | column;
                write!(f, "R{index:02}=0x{:08X} ", registers[index])?;
            }
            writeln!(f)?;
        }

        writeln!(
            f,
            "CPSR=0x{:08X} SPSR=0x{:08X}",
            self.get_cpsr(),
            self.get_spsr()
        )
    }
}
