//! # ARM Conditional Execution
//!
//! Every ARM instruction carries a 4-bit condition field (bits 28-31) tested
//! against the CPSR flags before the execute stage commits anything. In Thumb
//! state only the conditional branch format carries a condition.
//!
//! | Code | Suffix | Meaning              | Flags tested |
//! |------|--------|----------------------|--------------|
//! | 0000 | EQ     | Equal                | Z=1          |
//! | 0001 | NE     | Not equal            | Z=0          |
//! | 0010 | CS     | Unsigned >=          | C=1          |
//! | 0011 | CC     | Unsigned <           | C=0          |
//! | 0100 | MI     | Negative             | N=1          |
//! | 0101 | PL     | Positive or zero     | N=0          |
//! | 0110 | VS     | Overflow             | V=1          |
//! | 0111 | VC     | No overflow          | V=0          |
//! | 1000 | HI     | Unsigned >           | C=1 and Z=0  |
//! | 1001 | LS     | Unsigned <=          | C=0 or Z=1   |
//! | 1010 | GE     | Signed >=            | N=V          |
//! | 1011 | LT     | Signed <             | N!=V         |
//! | 1100 | GT     | Signed >             | Z=0 and N=V  |
//! | 1101 | LE     | Signed <=            | Z=1 or N!=V  |
//! | 1110 | AL     | Always               |              |
//! | 1111 | NV     | Never (reserved)     |              |

use serde::{Deserialize, Serialize};

/// Condition codes for ARM conditional execution.
///
/// An instruction whose condition is not satisfied by the current flags is
/// skipped as a NOP. See [`Psr::can_execute`](super::psr::Psr::can_execute)
/// for the evaluation.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// Equal (Z=1)
    EQ = 0x0,
    /// Not equal (Z=0)
    NE = 0x1,
    /// Carry set / unsigned higher or same (C=1)
    CS = 0x2,
    /// Carry clear / unsigned lower (C=0)
    CC = 0x3,
    /// Minus / negative (N=1)
    MI = 0x4,
    /// Plus / positive or zero (N=0)
    PL = 0x5,
    /// Overflow set (V=1)
    VS = 0x6,
    /// Overflow clear (V=0)
    VC = 0x7,
    /// Unsigned higher (C=1 and Z=0)
    HI = 0x8,
    /// Unsigned lower or same (C=0 or Z=1)
    LS = 0x9,
    /// Signed greater or equal (N=V)
    GE = 0xA,
    /// Signed less than (N!=V)
    LT = 0xB,
    /// Signed greater than (Z=0 and N=V)
    GT = 0xC,
    /// Signed less than or equal (Z=1 or N!=V)
    LE = 0xD,
    /// Always. The default when no suffix is written in assembly.
    AL = 0xE,
    /// Never. Meaningful on ARMv1/v2 only, reserved since ARMv3; evaluates
    /// to false here.
    NV = 0xF,
}

impl From<u8> for Condition {
    fn from(item: u8) -> Self {
        match item {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            0xF => Self::NV,
            _ => unreachable!(),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EQ => f.write_str("EQ"),
            Self::NE => f.write_str("NE"),
            Self::CS => f.write_str("CS"),
            Self::CC => f.write_str("CC"),
            Self::MI => f.write_str("MI"),
            Self::PL => f.write_str("PL"),
            Self::VS => f.write_str("VS"),
            Self::VC => f.write_str("VC"),
            Self::HI => f.write_str("HI"),
            Self::LS => f.write_str("LS"),
            Self::GE => f.write_str("GE"),
            Self::LT => f.write_str("LT"),
            Self::GT => f.write_str("GT"),
            Self::LE => f.write_str("LE"),
            Self::AL => Ok(()),
            Self::NV => f.write_str("NV"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn from_condition_field() {
        assert_eq!(Condition::from(0x0_u8), Condition::EQ);
        assert_eq!(Condition::from(0x9_u8), Condition::LS);
        assert_eq!(Condition::from(0xE_u8), Condition::AL);
        assert_eq!(Condition::from(0xF_u8), Condition::NV);
    }

    #[test]
    fn display() {
        assert_eq!(Condition::GT.to_string(), "GT");
        // AL is the implicit default suffix
        assert_eq!(Condition::AL.to_string(), "");
    }
}
