//! Execution of the Thumb (16-bit) instruction set.
//!
//! Thumb instructions always update the flags where the format defines
//! them; there is no condition field and no S bit outside of the formats
//! that imply one.

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::cpu::arm7tdmi::{Arm7tdmi, SIZE_OF_THUMB_INSTRUCTION};
use crate::cpu::condition::Condition;
use crate::cpu::shifter::{
    ShiftKind, carry_sbc, carry_sub, overflow_add, overflow_sub, shift_with_immediate_amount,
    shift_with_register_amount,
};
use crate::cpu::thumb::instructions::ThumbInstruction;

impl Arm7tdmi {
    pub(crate) fn execute_thumb(
        &mut self,
        instruction: ThumbInstruction,
        opcode: u16,
        bus: &mut impl Bus,
    ) {
        match instruction {
            ThumbInstruction::MoveShiftedRegister => self.thumb_move_shifted_register(opcode),
            ThumbInstruction::AddSubtract => self.thumb_add_subtract(opcode),
            ThumbInstruction::MoveCompareAddSubtractImmediate => {
                self.thumb_move_compare_add_subtract_immediate(opcode);
            }
            ThumbInstruction::AluOperations => self.thumb_alu_operations(opcode),
            ThumbInstruction::HiRegisterOpsBx => self.thumb_hi_register_ops(opcode),
            ThumbInstruction::PcRelativeLoad => self.thumb_pc_relative_load(opcode, bus),
            ThumbInstruction::LoadStoreRegisterOffset => {
                self.thumb_load_store_register_offset(opcode, bus);
            }
            ThumbInstruction::LoadStoreSignExtended => {
                self.thumb_load_store_sign_extended(opcode, bus);
            }
            ThumbInstruction::LoadStoreImmediateOffset => {
                self.thumb_load_store_immediate_offset(opcode, bus);
            }
            ThumbInstruction::LoadStoreHalfword => self.thumb_load_store_halfword(opcode, bus),
            ThumbInstruction::SpRelativeLoadStore => {
                self.thumb_sp_relative_load_store(opcode, bus);
            }
            ThumbInstruction::LoadAddress => self.thumb_load_address(opcode),
            ThumbInstruction::AddSpOffset => self.thumb_add_sp_offset(opcode),
            ThumbInstruction::PushPop => self.thumb_push_pop(opcode, bus),
            ThumbInstruction::MultipleLoadStore => self.thumb_multiple_load_store(opcode, bus),
            ThumbInstruction::ConditionalBranch => self.thumb_conditional_branch(opcode),
            ThumbInstruction::SoftwareInterrupt => self.raise_swi(),
            ThumbInstruction::UnconditionalBranch => self.thumb_unconditional_branch(opcode),
            ThumbInstruction::LongBranchLink => self.thumb_long_branch_link(opcode),
            ThumbInstruction::Undefined => self.raise_und(),
        }
    }

    fn thumb_move_shifted_register(&mut self, opcode: u16) {
        // Operation 0b11 is the add/subtract format, filtered at decode.
        let kind = ShiftKind::from(u32::from(opcode.get_bits(11..=12)));
        let amount = u32::from(opcode.get_bits(6..=10));
        let rs = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let value = self.read_register(rs);
        let result = shift_with_immediate_amount(kind, amount, value, self.cpsr.carry_flag());

        self.write_register(rd, result.value);
        self.cpsr.set_flags_logical(result.value, result.carry);
    }

    fn thumb_add_subtract(&mut self, opcode: u16) {
        let immediate = opcode.get_bit(10);
        let subtract = opcode.get_bit(9);
        let rn_or_value = u32::from(opcode.get_bits(6..=8));
        let rs = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let op1 = self.read_register(rs);
        let op2 = if immediate {
            rn_or_value
        } else {
            self.read_register(rn_or_value)
        };

        let result = if subtract {
            let result = op1.wrapping_sub(op2);
            self.cpsr.set_carry_flag(carry_sub(op1, op2));
            self.cpsr.set_overflow_flag(overflow_sub(op1, op2, result));
            result
        } else {
            let sum = u64::from(op1) + u64::from(op2);
            let result = sum as u32;
            self.cpsr.set_carry_flag(sum > u64::from(u32::MAX));
            self.cpsr.set_overflow_flag(overflow_add(op1, op2, result));
            result
        };

        self.write_register(rd, result);
        self.cpsr.set_flags_arithmetical(result);
    }

    fn thumb_move_compare_add_subtract_immediate(&mut self, opcode: u16) {
        let operation = opcode.get_bits(11..=12);
        let rd = u32::from(opcode.get_bits(8..=10));
        let immediate = u32::from(opcode.get_bits(0..=7));

        match operation {
            // MOV
            0b00 => {
                self.write_register(rd, immediate);
                self.cpsr.set_flags_arithmetical(immediate);
            }
            // CMP
            0b01 => {
                let value = self.read_register(rd);
                let result = value.wrapping_sub(immediate);
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(carry_sub(value, immediate));
                self.cpsr
                    .set_overflow_flag(overflow_sub(value, immediate, result));
            }
            // ADD
            0b10 => {
                let value = self.read_register(rd);
                let sum = u64::from(value) + u64::from(immediate);
                let result = sum as u32;
                self.write_register(rd, result);
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(sum > u64::from(u32::MAX));
                self.cpsr
                    .set_overflow_flag(overflow_add(value, immediate, result));
            }
            // SUB
            0b11 => {
                let value = self.read_register(rd);
                let result = value.wrapping_sub(immediate);
                self.write_register(rd, result);
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(carry_sub(value, immediate));
                self.cpsr
                    .set_overflow_flag(overflow_sub(value, immediate, result));
            }
            _ => unreachable!(),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn thumb_alu_operations(&mut self, opcode: u16) {
        let operation = opcode.get_bits(6..=9);
        let rs = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let rs_value = self.read_register(rs);
        let rd_value = self.read_register(rd);
        let carry_in = self.cpsr.carry_flag();

        match operation {
            // AND
            0x0 => {
                let result = rd_value & rs_value;
                self.cpsr.set_flags_arithmetical(result);
                self.write_register(rd, result);
            }
            // EOR
            0x1 => {
                let result = rd_value ^ rs_value;
                self.cpsr.set_flags_arithmetical(result);
                self.write_register(rd, result);
            }
            // LSL
            0x2 => {
                let result =
                    shift_with_register_amount(ShiftKind::Lsl, rs_value & 0xff, rd_value, carry_in);
                self.cpsr.set_flags_logical(result.value, result.carry);
                self.write_register(rd, result.value);
            }
            // LSR
            0x3 => {
                let result =
                    shift_with_register_amount(ShiftKind::Lsr, rs_value & 0xff, rd_value, carry_in);
                self.cpsr.set_flags_logical(result.value, result.carry);
                self.write_register(rd, result.value);
            }
            // ASR
            0x4 => {
                let result =
                    shift_with_register_amount(ShiftKind::Asr, rs_value & 0xff, rd_value, carry_in);
                self.cpsr.set_flags_logical(result.value, result.carry);
                self.write_register(rd, result.value);
            }
            // ADC
            0x5 => {
                let sum = u64::from(rd_value) + u64::from(rs_value) + u64::from(carry_in);
                let result = sum as u32;
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(sum > u64::from(u32::MAX));
                self.cpsr
                    .set_overflow_flag(overflow_add(rd_value, rs_value, result));
                self.write_register(rd, result);
            }
            // SBC
            0x6 => {
                let result = rd_value
                    .wrapping_sub(rs_value)
                    .wrapping_sub(u32::from(!carry_in));
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr
                    .set_carry_flag(carry_sbc(rd_value, rs_value, carry_in));
                self.cpsr
                    .set_overflow_flag(overflow_sub(rd_value, rs_value, result));
                self.write_register(rd, result);
            }
            // ROR
            0x7 => {
                let result =
                    shift_with_register_amount(ShiftKind::Ror, rs_value & 0xff, rd_value, carry_in);
                self.cpsr.set_flags_logical(result.value, result.carry);
                self.write_register(rd, result.value);
            }
            // TST
            0x8 => {
                self.cpsr.set_flags_arithmetical(rd_value & rs_value);
            }
            // NEG
            0x9 => {
                let result = 0_u32.wrapping_sub(rs_value);
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(carry_sub(0, rs_value));
                self.cpsr
                    .set_overflow_flag(overflow_sub(0, rs_value, result));
                self.write_register(rd, result);
            }
            // CMP
            0xA => {
                let result = rd_value.wrapping_sub(rs_value);
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(carry_sub(rd_value, rs_value));
                self.cpsr
                    .set_overflow_flag(overflow_sub(rd_value, rs_value, result));
            }
            // CMN
            0xB => {
                let sum = u64::from(rd_value) + u64::from(rs_value);
                let result = sum as u32;
                self.cpsr.set_flags_arithmetical(result);
                self.cpsr.set_carry_flag(sum > u64::from(u32::MAX));
                self.cpsr
                    .set_overflow_flag(overflow_add(rd_value, rs_value, result));
            }
            // ORR
            0xC => {
                let result = rd_value | rs_value;
                self.cpsr.set_flags_arithmetical(result);
                self.write_register(rd, result);
            }
            // MUL
            0xD => {
                let result = rd_value.wrapping_mul(rs_value);
                self.cpsr.set_flags_arithmetical(result);
                self.write_register(rd, result);
            }
            // BIC
            0xE => {
                let result = rd_value & !rs_value;
                self.cpsr.set_flags_arithmetical(result);
                self.write_register(rd, result);
            }
            // MVN
            0xF => {
                let result = !rs_value;
                self.cpsr.set_flags_arithmetical(result);
                self.write_register(rd, result);
            }
            _ => unreachable!(),
        }
    }

    fn thumb_hi_register_ops(&mut self, opcode: u16) {
        let operation = opcode.get_bits(8..=9);
        let h1 = opcode.get_bit(7);
        let h2 = opcode.get_bit(6);
        let rs = u32::from(opcode.get_bits(3..=5)) | if h2 { 8 } else { 0 };
        let rd = u32::from(opcode.get_bits(0..=2)) | if h1 { 8 } else { 0 };

        let rs_value = self.read_register(rs);

        match operation {
            // ADD, no flags
            0b00 => {
                let result = self.read_register(rd).wrapping_add(rs_value);
                self.write_register(rd, result);
            }
            // CMP, the only flag-setting operation of the format
            0b01 => {
                let rd_value = self.read_register(rd);
                let result = rd_value.wrapping_sub(rs_value);
                self.cpsr.set_carry_flag(carry_sub(rd_value, rs_value));
                self.cpsr
                    .set_overflow_flag(overflow_sub(rd_value, rs_value, result));
                self.cpsr.set_flags_arithmetical(result);
            }
            // MOV, no flags
            0b10 => {
                self.write_register(rd, rs_value);
            }
            // BX
            0b11 => {
                self.exchange_jump(rs_value);
            }
            _ => unreachable!(),
        }
    }

    fn thumb_pc_relative_load(&mut self, opcode: u16, bus: &mut impl Bus) {
        let rd = u32::from(opcode.get_bits(8..=10));
        let offset = u32::from(opcode.get_bits(0..=7)) << 2;
        // The pipeline-visible pc, force-aligned to a word.
        let base = self.registers.program_counter() & !3;

        let value = bus.read_word(base.wrapping_add(offset));
        self.write_register(rd, value);
    }

    fn thumb_load_store_register_offset(&mut self, opcode: u16, bus: &mut impl Bus) {
        let load = opcode.get_bit(11);
        let byte = opcode.get_bit(10);
        let ro = u32::from(opcode.get_bits(6..=8));
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self.read_register(rb).wrapping_add(self.read_register(ro));

        if load {
            let value = if byte {
                u32::from(bus.read_byte(address))
            } else {
                bus.read_word(address).rotate_right((address & 3) * 8)
            };
            self.write_register(rd, value);
        } else {
            let value = self.read_register(rd);
            if byte {
                bus.write_byte(address, value as u8);
            } else {
                bus.write_word(address, value);
            }
        }
    }

    fn thumb_load_store_sign_extended(&mut self, opcode: u16, bus: &mut impl Bus) {
        let halfword = opcode.get_bit(11);
        let sign_extend = opcode.get_bit(10);
        let ro = u32::from(opcode.get_bits(6..=8));
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self.read_register(rb).wrapping_add(self.read_register(ro));

        if halfword {
            let misaligned = address & 1 != 0;
            let loaded = u32::from(bus.read_half_word(address));

            let value = if sign_extend {
                if misaligned {
                    (loaded >> 8).sign_extended(8)
                } else {
                    loaded.sign_extended(16)
                }
            } else if misaligned {
                loaded.rotate_right(8)
            } else {
                loaded
            };

            self.write_register(rd, value);
        } else if sign_extend {
            let value = u32::from(bus.read_byte(address)).sign_extended(8);
            self.write_register(rd, value);
        } else {
            bus.write_half_word(address, self.read_register(rd) as u16);
        }
    }

    fn thumb_load_store_immediate_offset(&mut self, opcode: u16, bus: &mut impl Bus) {
        let byte = opcode.get_bit(12);
        let load = opcode.get_bit(11);
        let offset = u32::from(opcode.get_bits(6..=10)) << if byte { 0 } else { 2 };
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self.read_register(rb).wrapping_add(offset);

        if load {
            let value = if byte {
                u32::from(bus.read_byte(address))
            } else {
                bus.read_word(address).rotate_right((address & 3) * 8)
            };
            self.write_register(rd, value);
        } else {
            let value = self.read_register(rd);
            if byte {
                bus.write_byte(address, value as u8);
            } else {
                bus.write_word(address, value);
            }
        }
    }

    fn thumb_load_store_halfword(&mut self, opcode: u16, bus: &mut impl Bus) {
        let load = opcode.get_bit(11);
        let offset = u32::from(opcode.get_bits(6..=10)) << 1;
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self.read_register(rb).wrapping_add(offset);

        if load {
            let rotation = (address & 1) * 8;
            let value = u32::from(bus.read_half_word(address)).rotate_right(rotation);
            self.write_register(rd, value);
        } else {
            bus.write_half_word(address, self.read_register(rd) as u16);
        }
    }

    fn thumb_sp_relative_load_store(&mut self, opcode: u16, bus: &mut impl Bus) {
        let load = opcode.get_bit(11);
        let rd = u32::from(opcode.get_bits(8..=10));
        let offset = u32::from(opcode.get_bits(0..=7)) << 2;

        let address = self.read_register(13).wrapping_add(offset);

        if load {
            let rotation = (address & 3) * 8;
            let value = bus.read_word(address).rotate_right(rotation);
            self.write_register(rd, value);
        } else {
            bus.write_word(address, self.read_register(rd));
        }
    }

    fn thumb_load_address(&mut self, opcode: u16) {
        let from_sp = opcode.get_bit(11);
        let rd = u32::from(opcode.get_bits(8..=10));
        let offset = u32::from(opcode.get_bits(0..=7)) << 2;

        let base = if from_sp {
            self.read_register(13)
        } else {
            self.registers.program_counter() & !3
        };

        self.write_register(rd, base.wrapping_add(offset));
    }

    fn thumb_add_sp_offset(&mut self, opcode: u16) {
        let negative = opcode.get_bit(7);
        let offset = u32::from(opcode.get_bits(0..=6)) << 2;

        let sp = self.read_register(13);
        let sp = if negative {
            sp.wrapping_sub(offset)
        } else {
            sp.wrapping_add(offset)
        };
        self.write_register(13, sp);
    }

    fn thumb_push_pop(&mut self, opcode: u16, bus: &mut impl Bus) {
        let load = opcode.get_bit(11);
        let with_lr_or_pc = opcode.get_bit(8);
        let register_list = u32::from(opcode.get_bits(0..=7));
        let register_count = register_list.count_ones() + u32::from(with_lr_or_pc);

        let base = self.read_register(13);

        // PUSH grows the stack downward and stores upward from the new
        // top; POP reads upward from the current top.
        let mut address = if load {
            base
        } else {
            base.wrapping_sub(4 * register_count)
        };

        for index in 0..8 {
            if !register_list.get_bit(index) {
                continue;
            }

            if load {
                let value = bus.read_word(address);
                self.write_register(u32::from(index), value);
            } else {
                bus.write_word(address, self.read_register(u32::from(index)));
            }

            address = address.wrapping_add(4);
        }

        if with_lr_or_pc {
            if load {
                let target = bus.read_word(address);
                self.jump(target);
            } else {
                bus.write_word(address, self.read_register(14));
            }
        }

        let stepped = if load {
            base.wrapping_add(4 * register_count)
        } else {
            base.wrapping_sub(4 * register_count)
        };
        self.write_register(13, stepped);
    }

    fn thumb_multiple_load_store(&mut self, opcode: u16, bus: &mut impl Bus) {
        let load = opcode.get_bit(11);
        let rb = u32::from(opcode.get_bits(8..=10));
        let register_list = u32::from(opcode.get_bits(0..=7));

        let base = self.read_register(rb);

        if register_list == 0 {
            // Same special case as the ARM form: transfer r15 only, step
            // the base by 0x40.
            if load {
                let target = bus.read_word(base);
                self.jump(target);
            } else {
                let value = self
                    .registers
                    .program_counter()
                    .wrapping_add(SIZE_OF_THUMB_INSTRUCTION);
                bus.write_word(base, value);
            }
            self.write_register(rb, base.wrapping_add(0x40));
            return;
        }

        let register_count = register_list.count_ones();
        let first_in_list = register_list.trailing_zeros();
        let mut address = base;

        for index in 0..8 {
            if !register_list.get_bit(index) {
                continue;
            }

            let index = u32::from(index);

            if load {
                let value = bus.read_word(address);
                self.write_register(index, value);
            } else {
                let value = if index == rb && index != first_in_list {
                    base.wrapping_add(4 * register_count)
                } else {
                    self.read_register(index)
                };
                bus.write_word(address, value);
            }

            address = address.wrapping_add(4);
        }

        if !(load && register_list.get_bit(rb as u8)) {
            self.write_register(rb, address);
        }
    }

    fn thumb_conditional_branch(&mut self, opcode: u16) {
        let condition = Condition::from(opcode.get_bits(8..=11) as u8);
        let offset = u32::from(opcode.get_bits(0..=7)).sign_extended(8) << 1;

        if self.cpsr.can_execute(condition) {
            let target = self.registers.program_counter().wrapping_add(offset);
            self.jump(target);
        }
    }

    fn thumb_unconditional_branch(&mut self, opcode: u16) {
        let offset = u32::from(opcode.get_bits(0..=10)).sign_extended(11) << 1;
        let target = self.registers.program_counter().wrapping_add(offset);
        self.jump(target);
    }

    /// The two-halfword BL sequence: the first half parks the high offset
    /// in LR, the second jumps and leaves the return address (with the
    /// Thumb bit set) in LR.
    fn thumb_long_branch_link(&mut self, opcode: u16) {
        let low = opcode.get_bit(11);
        let offset = u32::from(opcode.get_bits(0..=10));

        if low {
            let return_address = self
                .registers
                .program_counter()
                .wrapping_sub(SIZE_OF_THUMB_INSTRUCTION);
            let target = self.read_register(14).wrapping_add(offset << 1);
            self.jump(target);
            self.registers.set_register_at(14, return_address | 1);
        } else {
            let high_offset = offset.sign_extended(11) << 12;
            let value = self.registers.program_counter().wrapping_add(high_offset);
            self.registers.set_register_at(14, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::bus::Bus;
    use crate::bus::testing::TestBus;
    use crate::cpu::arm7tdmi::Arm7tdmi;
    use crate::cpu::cpu_modes::Mode;
    use crate::cpu::psr::CpuState;
    use crate::cpu::thumb::instructions;

    fn execute(cpu: &mut Arm7tdmi, bus: &mut TestBus, opcode: u16) {
        let instruction = instructions::decode(opcode);
        cpu.execute_thumb(instruction, opcode, bus);
    }

    fn cpu_and_bus() -> (Arm7tdmi, TestBus) {
        let mut cpu = Arm7tdmi::new();
        cpu.reset(true);
        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        (cpu, TestBus::default())
    }

    #[test]
    fn check_move_shifted_register() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0x4000_0001);

        // LSL R0, R1, #2
        execute(&mut cpu, &mut bus, 0x0088);
        assert_eq!(cpu.read_register(0), 4);
        assert!(cpu.cpsr().carry_flag());
        assert!(!cpu.cpsr().zero_flag());

        // LSR R0, R1, #0 encodes LSR #32.
        cpu.registers.set_register_at(1, 0x8000_0000);
        execute(&mut cpu, &mut bus, 0x0808);
        assert_eq!(cpu.read_register(0), 0);
        assert!(cpu.cpsr().zero_flag());
        assert!(cpu.cpsr().carry_flag());

        // ASR R0, R1, #0 encodes ASR #32.
        execute(&mut cpu, &mut bus, 0x1008);
        assert_eq!(cpu.read_register(0), 0xFFFF_FFFF);
        assert!(cpu.cpsr().sign_flag());
    }

    #[test]
    fn check_add_subtract() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0xFFFF_FFFF);
        cpu.registers.set_register_at(2, 1);

        // ADD R0, R1, R2 wraps and carries out.
        execute(&mut cpu, &mut bus, 0x1888);
        assert_eq!(cpu.read_register(0), 0);
        assert!(cpu.cpsr().zero_flag());
        assert!(cpu.cpsr().carry_flag());
        assert!(!cpu.cpsr().overflow_flag());

        // SUB R0, R1, #3
        cpu.registers.set_register_at(1, 2);
        execute(&mut cpu, &mut bus, 0x1EC8);
        assert_eq!(cpu.read_register(0), 0xFFFF_FFFF);
        assert!(!cpu.cpsr().carry_flag());
        assert!(cpu.cpsr().sign_flag());

        // ADD R0, R1, #2
        execute(&mut cpu, &mut bus, 0x1C88);
        assert_eq!(cpu.read_register(0), 4);
        assert!(!cpu.cpsr().carry_flag());
    }

    #[test]
    fn check_move_compare_add_subtract_immediate() {
        let (mut cpu, mut bus) = cpu_and_bus();

        // MOV R0, #5
        execute(&mut cpu, &mut bus, 0x2005);
        assert_eq!(cpu.read_register(0), 5);
        assert!(!cpu.cpsr().zero_flag());

        // CMP R0, #5
        execute(&mut cpu, &mut bus, 0x2805);
        assert!(cpu.cpsr().zero_flag());
        assert!(cpu.cpsr().carry_flag());

        // ADD R0, #1 then SUB R0, #1
        execute(&mut cpu, &mut bus, 0x3001);
        assert_eq!(cpu.read_register(0), 6);
        execute(&mut cpu, &mut bus, 0x3801);
        assert_eq!(cpu.read_register(0), 5);
    }

    #[test]
    fn check_alu_logical_ops() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(0, 0b1100);
        cpu.registers.set_register_at(1, 0b1010);

        // AND R0, R1
        execute(&mut cpu, &mut bus, 0x4008);
        assert_eq!(cpu.read_register(0), 0b1000);

        // ORR R0, R1
        execute(&mut cpu, &mut bus, 0x4308);
        assert_eq!(cpu.read_register(0), 0b1010);

        // BIC R0, R1 clears everything.
        execute(&mut cpu, &mut bus, 0x4388);
        assert_eq!(cpu.read_register(0), 0);
        assert!(cpu.cpsr().zero_flag());

        // MVN R0, R1
        execute(&mut cpu, &mut bus, 0x43C8);
        assert_eq!(cpu.read_register(0), !0b1010);
        assert!(cpu.cpsr().sign_flag());
    }

    #[test]
    fn check_alu_register_shifts() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(0, 0x8000_0001);
        cpu.registers.set_register_at(1, 1);

        // LSL R0, R1: bit 31 becomes the carry.
        execute(&mut cpu, &mut bus, 0x4088);
        assert_eq!(cpu.read_register(0), 2);
        assert!(cpu.cpsr().carry_flag());

        // Only the bottom byte of the amount register counts.
        cpu.registers.set_register_at(0, 1);
        cpu.registers.set_register_at(1, 0x0000_0100);
        execute(&mut cpu, &mut bus, 0x4088);
        assert_eq!(cpu.read_register(0), 1);

        // ROR R0, R1 by 4.
        cpu.registers.set_register_at(0, 0x0000_00F1);
        cpu.registers.set_register_at(1, 4);
        execute(&mut cpu, &mut bus, 0x41C8);
        assert_eq!(cpu.read_register(0), 0x1000_000F);
        assert!(!cpu.cpsr().carry_flag());
    }

    #[test]
    fn check_alu_arithmetic_ops() {
        let (mut cpu, mut bus) = cpu_and_bus();

        // ADC R0, R1 with carry set.
        cpu.registers.set_register_at(0, 5);
        cpu.registers.set_register_at(1, 3);
        cpu.cpsr.set_carry_flag(true);
        execute(&mut cpu, &mut bus, 0x4148);
        assert_eq!(cpu.read_register(0), 9);

        // SBC R0, R1 with borrow pending.
        cpu.registers.set_register_at(0, 5);
        cpu.cpsr.set_carry_flag(false);
        execute(&mut cpu, &mut bus, 0x4188);
        assert_eq!(cpu.read_register(0), 1);

        // NEG R0, R1 sets the borrow convention flags.
        execute(&mut cpu, &mut bus, 0x4248);
        assert_eq!(cpu.read_register(0), 0xFFFF_FFFD);
        assert!(!cpu.cpsr().carry_flag());
        assert!(cpu.cpsr().sign_flag());

        // MUL R0, R1
        cpu.registers.set_register_at(0, 6);
        execute(&mut cpu, &mut bus, 0x4348);
        assert_eq!(cpu.read_register(0), 18);

        // TST R0, R1 leaves registers alone.
        execute(&mut cpu, &mut bus, 0x4208);
        assert_eq!(cpu.read_register(0), 18);
        assert!(!cpu.cpsr().zero_flag());

        // CMP R0, R1 and CMN R0, R1.
        execute(&mut cpu, &mut bus, 0x4288);
        assert!(cpu.cpsr().carry_flag());
        execute(&mut cpu, &mut bus, 0x42C8);
        assert!(!cpu.cpsr().zero_flag());
    }

    #[test]
    fn check_hi_register_ops() {
        let (mut cpu, mut bus) = cpu_and_bus();

        // MOV R8, R0
        cpu.registers.set_register_at(0, 0x1234);
        execute(&mut cpu, &mut bus, 0x4680);
        assert_eq!(cpu.read_register(8), 0x1234);

        // ADD R1, R9 without touching the flags.
        cpu.registers.set_register_at(1, 1);
        cpu.registers.set_register_at(9, 0xFFFF_FFFF);
        let flags_before = cpu.get_cpsr();
        execute(&mut cpu, &mut bus, 0x4449);
        assert_eq!(cpu.read_register(1), 0);
        assert_eq!(cpu.get_cpsr(), flags_before);

        // CMP R8, R9 does set them.
        cpu.registers.set_register_at(8, 5);
        cpu.registers.set_register_at(9, 5);
        execute(&mut cpu, &mut bus, 0x45C8);
        assert!(cpu.cpsr().zero_flag());
    }

    #[test]
    fn check_bx_switches_back_to_arm() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0x0300_0000);

        // BX R1 with bit 0 clear leaves Thumb.
        execute(&mut cpu, &mut bus, 0x4708);
        assert!(!cpu.cpsr().state_bit());
        assert_eq!(cpu.registers.program_counter(), 0x0300_0000);

        // BX R8 with bit 0 set stays in Thumb.
        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        cpu.registers.set_register_at(8, 0x0300_0101);
        execute(&mut cpu, &mut bus, 0x4740);
        assert!(cpu.cpsr().state_bit());
        assert_eq!(cpu.registers.program_counter(), 0x0300_0100);
    }

    #[test]
    fn check_pc_relative_load() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_program_counter(0x0000_0006);
        bus.write_word(0x164, 0xCAFE_0000);

        // LDR R1, [PC, #352]: the pc is word-aligned before the add.
        execute(&mut cpu, &mut bus, 0x4958);
        assert_eq!(cpu.read_register(1), 0xCAFE_0000);
    }

    #[test]
    fn check_load_store_register_offset() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0x1000);
        cpu.registers.set_register_at(2, 8);
        cpu.registers.set_register_at(0, 0xAABB_CCDD);

        // STR R0, [R1, R2]
        execute(&mut cpu, &mut bus, 0x5088);
        assert_eq!(bus.read_word(0x1008), 0xAABB_CCDD);

        // LDR R0, [R1, R2]
        cpu.registers.set_register_at(0, 0);
        execute(&mut cpu, &mut bus, 0x5888);
        assert_eq!(cpu.read_register(0), 0xAABB_CCDD);

        // STRB R0, [R1, R2] then LDRB it back.
        execute(&mut cpu, &mut bus, 0x5488);
        execute(&mut cpu, &mut bus, 0x5C88);
        assert_eq!(cpu.read_register(0), 0xDD);
    }

    #[test]
    fn check_load_store_sign_extended() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0x1000);
        cpu.registers.set_register_at(2, 0);

        // STRH R0, [R1, R2]
        cpu.registers.set_register_at(0, 0x8070);
        execute(&mut cpu, &mut bus, 0x5288);
        assert_eq!(bus.read_half_word(0x1000), 0x8070);

        // LDRH R0, [R1, R2] zero-extends.
        execute(&mut cpu, &mut bus, 0x5A88);
        assert_eq!(cpu.read_register(0), 0x8070);

        // LDRSH R0, [R1, R2] sign-extends.
        execute(&mut cpu, &mut bus, 0x5E88);
        assert_eq!(cpu.read_register(0), 0xFFFF_8070);

        // LDRSB R0, [R1, R2].
        bus.write_byte(0x1000, 0x80);
        execute(&mut cpu, &mut bus, 0x5688);
        assert_eq!(cpu.read_register(0), 0xFFFF_FF80);
    }

    #[test]
    fn check_load_store_immediate_offset() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0x1000);
        cpu.registers.set_register_at(0, 0x1122_3344);

        // STR R0, [R1, #4]
        execute(&mut cpu, &mut bus, 0x6048);
        assert_eq!(bus.read_word(0x1004), 0x1122_3344);

        // LDR R0, [R1, #4]
        cpu.registers.set_register_at(0, 0);
        execute(&mut cpu, &mut bus, 0x6848);
        assert_eq!(cpu.read_register(0), 0x1122_3344);

        // STRB R0, [R1, #1] stores the low byte only.
        execute(&mut cpu, &mut bus, 0x7048);
        assert_eq!(bus.read_byte(0x1001), 0x44);

        // LDRB R0, [R1, #1]
        execute(&mut cpu, &mut bus, 0x7848);
        assert_eq!(cpu.read_register(0), 0x44);
    }

    #[test]
    fn check_load_store_halfword() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(1, 0x1000);
        cpu.registers.set_register_at(0, 0xBEEF);

        // STRH R0, [R1, #2]
        execute(&mut cpu, &mut bus, 0x8048);
        assert_eq!(bus.read_half_word(0x1002), 0xBEEF);

        // LDRH R0, [R1, #2]
        cpu.registers.set_register_at(0, 0);
        execute(&mut cpu, &mut bus, 0x8848);
        assert_eq!(cpu.read_register(0), 0xBEEF);
    }

    #[test]
    fn check_sp_relative_load_store() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(13, 0x1000);
        cpu.registers.set_register_at(0, 0x5566_7788);

        // STR R0, [SP, #4]
        execute(&mut cpu, &mut bus, 0x9001);
        assert_eq!(bus.read_word(0x1004), 0x5566_7788);

        // LDR R0, [SP, #4]
        cpu.registers.set_register_at(0, 0);
        execute(&mut cpu, &mut bus, 0x9801);
        assert_eq!(cpu.read_register(0), 0x5566_7788);
    }

    #[test]
    fn check_load_address() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_program_counter(0x0000_0102);
        cpu.registers.set_register_at(13, 0x2000);

        // ADD R0, PC, #4: pc is word-aligned first.
        execute(&mut cpu, &mut bus, 0xA001);
        assert_eq!(cpu.read_register(0), 0x104);

        // ADD R0, SP, #4
        execute(&mut cpu, &mut bus, 0xA801);
        assert_eq!(cpu.read_register(0), 0x2004);
    }

    #[test]
    fn check_add_sp_offset() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(13, 0x1000);

        // ADD SP, #4
        execute(&mut cpu, &mut bus, 0xB001);
        assert_eq!(cpu.read_register(13), 0x1004);

        // SUB SP, #4
        execute(&mut cpu, &mut bus, 0xB081);
        assert_eq!(cpu.read_register(13), 0x1000);
    }

    #[test]
    fn check_push_pop() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(13, 0x1000);
        cpu.registers.set_register_at(0, 0xAA);
        cpu.registers.set_register_at(14, 0x0300_0001);

        // PUSH {R0, LR}
        execute(&mut cpu, &mut bus, 0xB501);
        assert_eq!(cpu.read_register(13), 0x0FF8);
        assert_eq!(bus.read_word(0x0FF8), 0xAA);
        assert_eq!(bus.read_word(0x0FFC), 0x0300_0001);

        // POP {R0, PC}: the loaded pc is aligned and the pipeline flushed.
        cpu.registers.set_register_at(0, 0);
        execute(&mut cpu, &mut bus, 0xBD01);
        assert_eq!(cpu.read_register(0), 0xAA);
        assert_eq!(cpu.registers.program_counter(), 0x0300_0000);
        assert_eq!(cpu.read_register(13), 0x1000);
    }

    #[test]
    fn check_push_pop_without_lr() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(13, 0x1000);
        cpu.registers.set_register_at(1, 0x11);
        cpu.registers.set_register_at(2, 0x22);

        // PUSH {R1, R2}: lowest register at the lowest address.
        execute(&mut cpu, &mut bus, 0xB406);
        assert_eq!(bus.read_word(0x0FF8), 0x11);
        assert_eq!(bus.read_word(0x0FFC), 0x22);
        assert_eq!(cpu.read_register(13), 0x0FF8);

        // POP {R1, R2}
        cpu.registers.set_register_at(1, 0);
        cpu.registers.set_register_at(2, 0);
        execute(&mut cpu, &mut bus, 0xBC06);
        assert_eq!(cpu.read_register(1), 0x11);
        assert_eq!(cpu.read_register(2), 0x22);
        assert_eq!(cpu.read_register(13), 0x1000);
    }

    #[test]
    fn check_multiple_load_store() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_register_at(0, 0x1000);
        cpu.registers.set_register_at(1, 0x11);
        cpu.registers.set_register_at(2, 0x22);

        // STMIA R0!, {R1, R2}
        execute(&mut cpu, &mut bus, 0xC006);
        assert_eq!(bus.read_word(0x1000), 0x11);
        assert_eq!(bus.read_word(0x1004), 0x22);
        assert_eq!(cpu.read_register(0), 0x1008);

        // LDMIA R0!, {R1, R2} from fresh memory.
        bus.write_word(0x1008, 0x33);
        bus.write_word(0x100C, 0x44);
        execute(&mut cpu, &mut bus, 0xC806);
        assert_eq!(cpu.read_register(1), 0x33);
        assert_eq!(cpu.read_register(2), 0x44);
        assert_eq!(cpu.read_register(0), 0x1010);
    }

    #[test]
    fn check_multiple_load_store_base_in_list() {
        let (mut cpu, mut bus) = cpu_and_bus();

        // STMIA R1!, {R0, R1}: the base is not first, so the stored value
        // is the written-back one.
        cpu.registers.set_register_at(0, 0xAA);
        cpu.registers.set_register_at(1, 0x1000);
        execute(&mut cpu, &mut bus, 0xC103);
        assert_eq!(bus.read_word(0x1000), 0xAA);
        assert_eq!(bus.read_word(0x1004), 0x1008);
        assert_eq!(cpu.read_register(1), 0x1008);

        // LDMIA R1!, {R1}: the loaded value wins over the write-back.
        bus.write_word(0x2000, 0x1234);
        cpu.registers.set_register_at(1, 0x2000);
        execute(&mut cpu, &mut bus, 0xC902);
        assert_eq!(cpu.read_register(1), 0x1234);
    }

    #[test]
    fn check_multiple_load_store_empty_list() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_program_counter(0x0000_0104);
        cpu.registers.set_register_at(0, 0x1000);

        // STMIA R0!, {}: stores pc + 2 and steps the base by 0x40.
        execute(&mut cpu, &mut bus, 0xC000);
        assert_eq!(bus.read_word(0x1000), 0x106);
        assert_eq!(cpu.read_register(0), 0x1040);
    }

    #[test]
    fn check_conditional_branch() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_program_counter(0x0000_0104);

        // BEQ -4 with Z clear falls through.
        execute(&mut cpu, &mut bus, 0xD0FE);
        assert_eq!(cpu.registers.program_counter(), 0x104);

        // ...and branches once Z is set.
        cpu.cpsr.set_zero_flag(true);
        execute(&mut cpu, &mut bus, 0xD0FE);
        assert_eq!(cpu.registers.program_counter(), 0x100);
    }

    #[test]
    fn check_unconditional_branch() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_program_counter(0x0000_0104);

        // B -8
        execute(&mut cpu, &mut bus, 0xE7FC);
        assert_eq!(cpu.registers.program_counter(), 0x0FC);
    }

    #[test]
    fn check_long_branch_link() {
        let (mut cpu, mut bus) = cpu_and_bus();
        // BL with a +0x1000 high part: first half at pc 0x0204.
        cpu.registers.set_program_counter(0x0000_0204);
        execute(&mut cpu, &mut bus, 0xF001);
        assert_eq!(cpu.read_register(14), 0x0000_1204);

        // Second half: offset 8 halfwords.
        cpu.registers.set_program_counter(0x0000_0206);
        execute(&mut cpu, &mut bus, 0xF808);
        assert_eq!(cpu.registers.program_counter(), 0x0000_1214);
        // LR holds the return address with the Thumb bit set.
        assert_eq!(cpu.read_register(14), 0x0000_0205);
    }

    #[test]
    fn check_swi_from_thumb() {
        let (mut cpu, mut bus) = cpu_and_bus();
        cpu.registers.set_program_counter(0x0000_0104);

        execute(&mut cpu, &mut bus, 0xDF00);
        assert_eq!(cpu.cpsr().mode(), Mode::Supervisor);
        // Back to ARM state inside the handler, return address one Thumb
        // instruction back.
        assert!(!cpu.cpsr().state_bit());
        assert_eq!(cpu.read_register(14), 0x0000_0102);
        assert_eq!(cpu.registers.program_counter(), 0x0000_0008);
    }
}
