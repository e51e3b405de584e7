//! The seven ARM7TDMI operating modes.
//!
//! The mode field selects which bank of r8-r14 (and which SPSR, if any) is
//! visible. See `register_bank` for the banking layout.

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Mode {
    /// The normal ARM program execution state.
    User = 0b10000,

    /// Designed to support a data transfer or channel process.
    Fiq = 0b10001,

    /// Used for general-purpose interrupt handling.
    Irq = 0b10010,

    /// Protected mode for the operating system.
    Supervisor = 0b10011,

    /// Entered after a data or instruction prefetch abort.
    Abort = 0b10111,

    /// Entered when an undefined instruction is executed.
    Undefined = 0b11011,

    /// A privileged user mode for the operating system.
    System = 0b11111,
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = String;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            // Deprecated 26-bit-era encodings, kept by ARMv4 for backwards
            // compatibility. They alias the modern modes.
            0b00000 => Ok(Self::User),
            0b00001 => Ok(Self::Fiq),
            0b00010 => Ok(Self::Irq),
            0b00011 => Ok(Self::Supervisor),
            _ => Err(format!("Unexpected value for Mode: 0b{n:05b}")),
        }
    }
}

impl Mode {
    /// True for every mode except User: privileged modes may rewrite the
    /// CPSR control bits.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        !matches!(self, Self::User)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decode_modes() {
        assert_eq!(Mode::try_from(0b10000), Ok(Mode::User));
        assert_eq!(Mode::try_from(0b10001), Ok(Mode::Fiq));
        assert_eq!(Mode::try_from(0b10010), Ok(Mode::Irq));
        assert_eq!(Mode::try_from(0b10011), Ok(Mode::Supervisor));
        assert_eq!(Mode::try_from(0b10111), Ok(Mode::Abort));
        assert_eq!(Mode::try_from(0b11011), Ok(Mode::Undefined));
        assert_eq!(Mode::try_from(0b11111), Ok(Mode::System));
    }

    #[test]
    fn decode_deprecated_aliases() {
        assert_eq!(Mode::try_from(0b00000), Ok(Mode::User));
        assert_eq!(Mode::try_from(0b00001), Ok(Mode::Fiq));
        assert_eq!(Mode::try_from(0b00010), Ok(Mode::Irq));
        assert_eq!(Mode::try_from(0b00011), Ok(Mode::Supervisor));
    }

    #[test]
    fn reject_invalid_modes() {
        assert!(Mode::try_from(0b00100).is_err());
        assert!(Mode::try_from(0b10100).is_err());
        assert!(Mode::try_from(0b11110).is_err());
    }

    #[test]
    fn privileges() {
        assert!(!Mode::User.is_privileged());
        assert!(Mode::System.is_privileged());
        assert!(Mode::Fiq.is_privileged());
    }
}
