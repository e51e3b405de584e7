//! # Thumb Instruction Set (16-bit)
//!
//! Denser encodings restricted (mostly) to r0-r7, selected by the CPSR T
//! bit.
//!
//! - [`instructions`] holds the 19 format classes and the 1024-entry
//!   dispatch table
//! - `operations` holds the handlers, as methods on
//!   [`Arm7tdmi`](super::arm7tdmi::Arm7tdmi)

pub mod instructions;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod operations;
