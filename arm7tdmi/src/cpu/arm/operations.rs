//! Execution of the ARM (32-bit) instruction set.
//!
//! One handler per opcode family, parameterized over the operand fields it
//! re-extracts from the raw word. Handlers never touch the program counter
//! directly: r15 writes go through the jump path, which flushes the
//! pipeline.

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::cpu::arm::instructions::{ArmAluOp, ArmInstruction};
use crate::cpu::arm7tdmi::{Arm7tdmi, SIZE_OF_ARM_INSTRUCTION};
use crate::cpu::psr::Psr;
use crate::cpu::registers::REG_PROGRAM_COUNTER;
use crate::cpu::shifter::{
    ShiftResult, carry_sbc, carry_sub, overflow_add, overflow_sub, rotated_immediate,
    shift_with_immediate_amount, shift_with_register_amount,
};

impl Arm7tdmi {
    pub(crate) fn execute_arm(
        &mut self,
        instruction: ArmInstruction,
        opcode: u32,
        bus: &mut impl Bus,
    ) {
        match instruction {
            ArmInstruction::DataProcessing(op) => self.data_processing(op, opcode),
            ArmInstruction::Mrs => self.mrs(opcode),
            ArmInstruction::Msr => self.msr(opcode),
            ArmInstruction::Multiply => self.multiply(opcode),
            ArmInstruction::MultiplyLong => self.multiply_long(opcode),
            ArmInstruction::SingleDataTransfer => self.single_data_transfer(opcode, bus),
            ArmInstruction::HalfwordSignedDataTransfer => {
                self.halfword_signed_data_transfer(opcode, bus);
            }
            ArmInstruction::BlockDataTransfer => self.block_data_transfer(opcode, bus),
            ArmInstruction::Branch => self.branch(opcode),
            ArmInstruction::BranchLink => self.branch_link(opcode),
            ArmInstruction::BranchAndExchange => self.branch_and_exchange(opcode),
            ArmInstruction::SingleDataSwap => self.single_data_swap(opcode, bus),
            ArmInstruction::SoftwareInterrupt => self.raise_swi(),
            ArmInstruction::Undefined => self.raise_und(),
        }
    }

    /// The first ALU operand, with the prefetch quirk: when Rn is r15 and
    /// the second operand is shifted by a register, the extra internal
    /// cycle makes r15 read 4 bytes further ahead.
    fn alu_operand1(&self, opcode: u32) -> u32 {
        let rn = opcode.get_bits(16..=19);
        let value = self.read_register(rn);

        if rn != REG_PROGRAM_COUNTER {
            return value;
        }

        let shift_by_register = !opcode.get_bit(25) && opcode.get_bit(4);
        if shift_by_register {
            value.wrapping_add(SIZE_OF_ARM_INSTRUCTION)
        } else {
            value
        }
    }

    /// The barrel-shifted second operand and its carry-out.
    fn alu_operand2(&self, opcode: u32) -> ShiftResult {
        let carry = self.cpsr.carry_flag();

        if opcode.get_bit(25) {
            let immediate = opcode.get_bits(0..=7);
            let rotation = opcode.get_bits(8..=11) * 2;
            return rotated_immediate(immediate, rotation, carry);
        }

        let rm = opcode.get_bits(0..=3);
        let mut value = self.read_register(rm);
        let kind = opcode.get_bits(5..=6).into();

        if opcode.get_bit(4) {
            // Shift amount from the bottom byte of Rs; r15 reads ahead by
            // the extra cycle here too.
            if rm == REG_PROGRAM_COUNTER {
                value = value.wrapping_add(SIZE_OF_ARM_INSTRUCTION);
            }
            let rs = opcode.get_bits(8..=11);
            let amount = self.read_register(rs) & 0xff;
            shift_with_register_amount(kind, amount, value, carry)
        } else {
            shift_with_immediate_amount(kind, opcode.get_bits(7..=11), value, carry)
        }
    }

    fn alu_flags_logical(&mut self, set_flags: bool, rd: u32, result: u32, shifter_carry: bool) {
        if !set_flags {
            return;
        }

        if rd == REG_PROGRAM_COUNTER {
            // S with Rd=15: return-from-exception, CPSR <- SPSR.
            let spsr = self.get_spsr();
            self.set_cpsr(spsr);
        } else {
            self.cpsr.set_flags_logical(result, shifter_carry);
        }
    }

    fn alu_flags_arithmetical(
        &mut self,
        set_flags: bool,
        rd: u32,
        result: u32,
        carry: bool,
        overflow: bool,
    ) {
        if !set_flags {
            return;
        }

        if rd == REG_PROGRAM_COUNTER {
            let spsr = self.get_spsr();
            self.set_cpsr(spsr);
        } else {
            self.cpsr.set_flags_arithmetical(result);
            self.cpsr.set_carry_flag(carry);
            self.cpsr.set_overflow_flag(overflow);
        }
    }

    pub(crate) fn data_processing(&mut self, op: ArmAluOp, opcode: u32) {
        let set_flags = opcode.get_bit(20);
        let rd = opcode.get_bits(12..=15);
        let ShiftResult {
            value: op2,
            carry: shifter_carry,
        } = self.alu_operand2(opcode);
        let op1 = self.alu_operand1(opcode);
        let carry_in = self.cpsr.carry_flag();

        match op {
            ArmAluOp::And => {
                let result = op1 & op2;
                self.write_register(rd, result);
                self.alu_flags_logical(set_flags, rd, result, shifter_carry);
            }
            ArmAluOp::Eor => {
                let result = op1 ^ op2;
                self.write_register(rd, result);
                self.alu_flags_logical(set_flags, rd, result, shifter_carry);
            }
            ArmAluOp::Sub => {
                let result = op1.wrapping_sub(op2);
                self.write_register(rd, result);
                self.alu_flags_arithmetical(
                    set_flags,
                    rd,
                    result,
                    carry_sub(op1, op2),
                    overflow_sub(op1, op2, result),
                );
            }
            ArmAluOp::Rsb => {
                let result = op2.wrapping_sub(op1);
                self.write_register(rd, result);
                self.alu_flags_arithmetical(
                    set_flags,
                    rd,
                    result,
                    carry_sub(op2, op1),
                    overflow_sub(op2, op1, result),
                );
            }
            ArmAluOp::Add => {
                let sum = u64::from(op1) + u64::from(op2);
                let result = sum as u32;
                self.write_register(rd, result);
                self.alu_flags_arithmetical(
                    set_flags,
                    rd,
                    result,
                    sum > u64::from(u32::MAX),
                    overflow_add(op1, op2, result),
                );
            }
            ArmAluOp::Adc => {
                let sum = u64::from(op1) + u64::from(op2) + u64::from(carry_in);
                let result = sum as u32;
                self.write_register(rd, result);
                self.alu_flags_arithmetical(
                    set_flags,
                    rd,
                    result,
                    sum > u64::from(u32::MAX),
                    overflow_add(op1, op2, result),
                );
            }
            ArmAluOp::Sbc => {
                let result = op1
                    .wrapping_sub(op2)
                    .wrapping_sub(u32::from(!carry_in));
                self.write_register(rd, result);
                self.alu_flags_arithmetical(
                    set_flags,
                    rd,
                    result,
                    carry_sbc(op1, op2, carry_in),
                    overflow_sub(op1, op2, result),
                );
            }
            ArmAluOp::Rsc => {
                let result = op2
                    .wrapping_sub(op1)
                    .wrapping_sub(u32::from(!carry_in));
                self.write_register(rd, result);
                self.alu_flags_arithmetical(
                    set_flags,
                    rd,
                    result,
                    carry_sbc(op2, op1, carry_in),
                    overflow_sub(op2, op1, result),
                );
            }
            ArmAluOp::Tst => {
                let result = op1 & op2;
                if set_flags {
                    self.cpsr.set_flags_logical(result, shifter_carry);
                }
            }
            ArmAluOp::Teq => {
                let result = op1 ^ op2;
                if set_flags {
                    self.cpsr.set_flags_logical(result, shifter_carry);
                }
            }
            ArmAluOp::Cmp => {
                let result = op1.wrapping_sub(op2);
                if set_flags {
                    self.cpsr.set_flags_arithmetical(result);
                    self.cpsr.set_carry_flag(carry_sub(op1, op2));
                    self.cpsr.set_overflow_flag(overflow_sub(op1, op2, result));
                }
            }
            ArmAluOp::Cmn => {
                let sum = u64::from(op1) + u64::from(op2);
                let result = sum as u32;
                if set_flags {
                    self.cpsr.set_flags_arithmetical(result);
                    self.cpsr.set_carry_flag(sum > u64::from(u32::MAX));
                    self.cpsr.set_overflow_flag(overflow_add(op1, op2, result));
                }
            }
            ArmAluOp::Orr => {
                let result = op1 | op2;
                self.write_register(rd, result);
                self.alu_flags_logical(set_flags, rd, result, shifter_carry);
            }
            ArmAluOp::Mov => {
                self.write_register(rd, op2);
                self.alu_flags_logical(set_flags, rd, op2, shifter_carry);
            }
            ArmAluOp::Bic => {
                let result = op1 & !op2;
                self.write_register(rd, result);
                self.alu_flags_logical(set_flags, rd, result, shifter_carry);
            }
            ArmAluOp::Mvn => {
                let result = !op2;
                self.write_register(rd, result);
                self.alu_flags_logical(set_flags, rd, result, shifter_carry);
            }
        }
    }

    fn branch(&mut self, opcode: u32) {
        let offset = (opcode.get_bits(0..=23) << 2).sign_extended(26);
        let target = self.registers.program_counter().wrapping_add(offset);
        self.jump(target);
    }

    fn branch_link(&mut self, opcode: u32) {
        let offset = (opcode.get_bits(0..=23) << 2).sign_extended(26);
        let pc = self.registers.program_counter();

        // The link value is the instruction after the BL: visible r15 is
        // two instructions ahead.
        self.registers
            .set_register_at(14, pc.wrapping_sub(SIZE_OF_ARM_INSTRUCTION));
        self.jump(pc.wrapping_add(offset));
    }

    fn branch_and_exchange(&mut self, opcode: u32) {
        if (opcode & 0x0fff_fff0) != 0x012f_ff10 {
            self.raise_und();
            return;
        }

        let rn = opcode.get_bits(0..=3);
        let target = self.read_register(rn);
        self.exchange_jump(target);
    }

    fn multiply(&mut self, opcode: u32) {
        let accumulate = opcode.get_bit(21);
        let set_flags = opcode.get_bit(20);
        let rd = opcode.get_bits(16..=19);
        let rs = opcode.get_bits(8..=11);
        let rm = opcode.get_bits(0..=3);

        let mut result = self.read_register(rs).wrapping_mul(self.read_register(rm));

        if accumulate {
            let rn = opcode.get_bits(12..=15);
            result = result.wrapping_add(self.read_register(rn));
        }

        if set_flags {
            // N and Z only; hardware leaves C and V unpredictable and this
            // core leaves them untouched.
            self.cpsr.set_flags_arithmetical(result);
        }

        self.write_register(rd, result);
    }

    fn multiply_long(&mut self, opcode: u32) {
        let signed = opcode.get_bit(22);
        let accumulate = opcode.get_bit(21);
        let set_flags = opcode.get_bit(20);
        let rd_hi = opcode.get_bits(16..=19);
        let rd_lo = opcode.get_bits(12..=15);
        let rs = opcode.get_bits(8..=11);
        let rm = opcode.get_bits(0..=3);

        let rs_value = self.read_register(rs);
        let rm_value = self.read_register(rm);

        let mut result = if signed {
            (i64::from(rs_value as i32).wrapping_mul(i64::from(rm_value as i32))) as u64
        } else {
            u64::from(rs_value).wrapping_mul(u64::from(rm_value))
        };

        if accumulate {
            let seed = (u64::from(self.read_register(rd_hi)) << 32)
                | u64::from(self.read_register(rd_lo));
            result = result.wrapping_add(seed);
        }

        self.write_register(rd_hi, (result >> 32) as u32);
        self.write_register(rd_lo, result as u32);

        if set_flags {
            self.cpsr.set_zero_flag(result == 0);
            self.cpsr.set_sign_flag(result.get_bit(63));
        }
    }

    /// The LDR/STR offset: a 12-bit immediate or a register shifted by an
    /// immediate amount.
    fn single_data_transfer_offset(&self, opcode: u32) -> u32 {
        if !opcode.get_bit(25) {
            return opcode.get_bits(0..=11);
        }

        let rm = opcode.get_bits(0..=3);
        let mut value = self.read_register(rm);
        if rm == REG_PROGRAM_COUNTER {
            value = value.wrapping_add(SIZE_OF_ARM_INSTRUCTION);
        }

        let kind = opcode.get_bits(5..=6).into();
        let amount = opcode.get_bits(7..=11);
        shift_with_immediate_amount(kind, amount, value, self.cpsr.carry_flag()).value
    }

    fn single_data_transfer(&mut self, opcode: u32, bus: &mut impl Bus) {
        let pre_indexed = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let byte = opcode.get_bit(22);
        let write_back = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);

        let offset = self.single_data_transfer_offset(opcode);
        let mut address = self.read_register(rn);

        if pre_indexed {
            address = if up {
                address.wrapping_add(offset)
            } else {
                address.wrapping_sub(offset)
            };
        }

        if load {
            let value = if byte {
                u32::from(bus.read_byte(address))
            } else {
                // A misaligned word load rotates the word so the addressed
                // byte lands in the low lane.
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

        // Post-indexing always writes the stepped base back; a load that
        // targeted the base register wins over the write-back.
        if (!pre_indexed || write_back) && !(load && rd == rn) {
            if !pre_indexed {
                address = if up {
                    address.wrapping_add(offset)
                } else {
                    address.wrapping_sub(offset)
                };
            }
            self.write_register(rn, address);
        }
    }

    fn halfword_signed_data_transfer(&mut self, opcode: u32, bus: &mut impl Bus) {
        let pre_indexed = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let immediate = opcode.get_bit(22);
        let write_back = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let signed = opcode.get_bit(6);
        let halfword = opcode.get_bit(5);
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);

        let offset = if immediate {
            (opcode.get_bits(8..=11) << 4) | opcode.get_bits(0..=3)
        } else {
            self.read_register(opcode.get_bits(0..=3))
        };

        let mut address = self.read_register(rn);

        if pre_indexed {
            address = if up {
                address.wrapping_add(offset)
            } else {
                address.wrapping_sub(offset)
            };
        }

        if load {
            let value = if halfword {
                let misaligned = address & 1 != 0;
                let loaded = u32::from(bus.read_half_word(address));

                if signed {
                    if misaligned {
                        // A misaligned signed halfword degrades to a
                        // sign-extended load of the high byte.
                        (loaded >> 8).sign_extended(8)
                    } else {
                        loaded.sign_extended(16)
                    }
                } else if misaligned {
                    loaded.rotate_right(8)
                } else {
                    loaded
                }
            } else {
                let loaded = u32::from(bus.read_byte(address));
                if signed { loaded.sign_extended(8) } else { loaded }
            };

            self.write_register(rd, value);
        } else {
            let value = self.read_register(rd);
            if halfword {
                bus.write_half_word(address, value as u16);
            } else {
                bus.write_byte(address, value as u8);
            }
        }

        if (!pre_indexed || write_back) && !(load && rd == rn) {
            if !pre_indexed {
                address = if up {
                    address.wrapping_add(offset)
                } else {
                    address.wrapping_sub(offset)
                };
            }
            self.write_register(rn, address);
        }
    }

    fn block_data_transfer(&mut self, opcode: u32, bus: &mut impl Bus) {
        let pre_indexed = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let psr_or_user_bank = opcode.get_bit(22);
        let write_back = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19);
        let register_list = opcode.get_bits(0..=15);

        let base = self.read_register(rn);

        if register_list == 0 {
            self.block_data_transfer_empty_list(opcode, bus, base);
            return;
        }

        let register_count = register_list.count_ones();
        let first_in_list = register_list.trailing_zeros();
        let stepped_base = if up {
            base.wrapping_add(4 * register_count)
        } else {
            base.wrapping_sub(4 * register_count)
        };

        // The four index/direction combinations collapse into one ascending
        // loop: lowest register always lands at the lowest address.
        let mut address = base;
        if up == pre_indexed {
            address = address.wrapping_add(4);
        }
        if !up {
            address = address.wrapping_sub(4 * register_count);
        }

        for index in 0..16 {
            if !register_list.get_bit(index) {
                continue;
            }

            let index = u32::from(index);

            if load {
                let value = bus.read_word(address);
                if psr_or_user_bank {
                    if register_list.get_bit(15) {
                        // S with r15 in the list: restore CPSR from SPSR
                        // alongside the jump.
                        if index == 15 {
                            let spsr = self.get_spsr();
                            self.set_cpsr(spsr);
                        }
                        self.write_register(index, value);
                    } else {
                        self.write_user_register(index, value);
                    }
                } else {
                    self.write_register(index, value);
                }
            } else {
                let value = if index == 15 {
                    // A stored r15 reads one instruction further ahead than
                    // the usual prefetch.
                    self.registers.program_counter().wrapping_add(4)
                } else if psr_or_user_bank {
                    self.read_user_register(index)
                } else if index == rn && index != first_in_list && write_back {
                    // A base stored later in the list observes the written
                    // -back value.
                    stepped_base
                } else {
                    self.read_register(index)
                };
                bus.write_word(address, value);
            }

            address = address.wrapping_add(4);
        }

        // Write-back loses against a load that included the base register.
        if write_back && !(load && register_list.get_bit(rn as u8)) {
            self.write_register(rn, stepped_base);
        }
    }

    /// An empty register list transfers r15 only and moves the base by
    /// 0x40 in the transfer direction.
    fn block_data_transfer_empty_list(&mut self, opcode: u32, bus: &mut impl Bus, base: u32) {
        let pre_indexed = opcode.get_bit(24);
        let up = opcode.get_bit(23);
        let write_back = opcode.get_bit(21);
        let load = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19);

        let offset: i32 = match (pre_indexed, up) {
            (true, true) => 4,
            (true, false) => -0x40,
            (false, true) => 0,
            (false, false) => -0x3c,
        };
        let address = base.wrapping_add_signed(offset);

        if load {
            let target = bus.read_word(address);
            self.jump(target);
        } else {
            let value = self.registers.program_counter().wrapping_add(4);
            bus.write_word(address, value);
        }

        if write_back {
            let stepped = if up {
                base.wrapping_add(0x40)
            } else {
                base.wrapping_sub(0x40)
            };
            self.write_register(rn, stepped);
        }
    }

    fn mrs(&mut self, opcode: u32) {
        let value = if opcode.get_bit(22) {
            self.get_spsr()
        } else {
            self.get_cpsr()
        };

        let rd = opcode.get_bits(12..=15);
        self.write_register(rd, value);
    }

    fn msr(&mut self, opcode: u32) {
        let value = if opcode.get_bit(25) {
            let rotation = (opcode >> 7) & 0x1e;
            opcode.get_bits(0..=7).rotate_right(rotation)
        } else {
            self.read_register(opcode.get_bits(0..=3))
        };

        if opcode.get_bit(22) {
            self.set_spsr(value);
        } else if self.cpsr.mode().is_privileged() {
            self.set_cpsr(value);
        } else {
            // User mode may only rewrite the four flag bits.
            let masked = (self.get_cpsr() & 0x0fff_ffff) | (value & 0xf000_0000);
            self.cpsr = Psr::from(masked);
        }
    }

    fn single_data_swap(&mut self, opcode: u32, bus: &mut impl Bus) {
        let byte = opcode.get_bit(22);
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);
        let rm = opcode.get_bits(0..=3);

        let address = self.read_register(rn);
        let source = self.read_register(rm);

        if byte {
            let loaded = bus.read_byte(address);
            bus.write_byte(address, source as u8);
            self.write_register(rd, u32::from(loaded));
        } else {
            let rotation = (address & 3) * 8;
            let loaded = bus.read_word(address).rotate_right(rotation);
            bus.write_word(address, source);
            self.write_register(rd, loaded);
        }
    }
}
