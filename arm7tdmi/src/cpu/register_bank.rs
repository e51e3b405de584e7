//! # Banked Registers for Exception Modes
//!
//! Storage for the register copies swapped on mode change:
//!
//! - one User/System bank for r8-r14 (these two modes share it),
//! - a fully private FIQ bank for r8-r14,
//! - r13/r14 pairs for IRQ, Supervisor, Abort and Undefined (their r8-r12
//!   come from the User/System bank),
//! - one SPSR per exception mode.
//!
//! Exactly one bank is live in the register file at any instant; the swap
//! happens in [`Arm7tdmi::change_mode`](super::arm7tdmi::Arm7tdmi::change_mode).

use serde::{Deserialize, Serialize};

use crate::cpu::psr::Psr;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RegisterBank {
    // User/System bank, also holding r8-r12 for IRQ/SVC/ABT/UND.
    pub r8_usr: u32,
    pub r9_usr: u32,
    pub r10_usr: u32,
    pub r11_usr: u32,
    pub r12_usr: u32,
    pub r13_usr: u32,
    pub r14_usr: u32,

    // FIQ banks the whole r8-r14 range for fast interrupt entry.
    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,

    pub r13_irq: u32,
    pub r14_irq: u32,

    pub r13_svc: u32,
    pub r14_svc: u32,

    pub r13_abt: u32,
    pub r14_abt: u32,

    pub r13_und: u32,
    pub r14_und: u32,

    /// SPSR for FIQ mode.
    pub spsr_fiq: Psr,
    /// SPSR for IRQ mode.
    pub spsr_irq: Psr,
    /// SPSR for Supervisor mode (saves CPSR when a SWI is taken).
    pub spsr_svc: Psr,
    /// SPSR for Abort mode.
    pub spsr_abt: Psr,
    /// SPSR for Undefined mode (saves CPSR on an undefined instruction).
    pub spsr_und: Psr,
}

impl RegisterBank {
    /// Reads an r8-r14 slot of the User/System bank. Used by LDM/STM with
    /// the force-user-bank bit while a privileged bank is live.
    pub fn user_register(&self, index: usize) -> u32 {
        match index {
            8 => self.r8_usr,
            9 => self.r9_usr,
            10 => self.r10_usr,
            11 => self.r11_usr,
            12 => self.r12_usr,
            13 => self.r13_usr,
            14 => self.r14_usr,
            _ => unreachable!("r{index} is not banked"),
        }
    }

    pub fn set_user_register(&mut self, index: usize, value: u32) {
        match index {
            8 => self.r8_usr = value,
            9 => self.r9_usr = value,
            10 => self.r10_usr = value,
            11 => self.r11_usr = value,
            12 => self.r12_usr = value,
            13 => self.r13_usr = value,
            14 => self.r14_usr = value,
            _ => unreachable!("r{index} is not banked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn user_bank_slots() {
        let mut bank = RegisterBank::default();
        for index in 8..=14 {
            bank.set_user_register(index, index as u32 * 10);
        }
        for index in 8..=14 {
            assert_eq!(bank.user_register(index), index as u32 * 10);
        }
    }
}
