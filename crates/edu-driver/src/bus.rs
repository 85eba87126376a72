//! Register bus abstraction
//!
//! Unified interface over anything that behaves like the card's BAR0
//! window: the memory-mapped hardware region or the in-process simulator.
//! The control core and the interrupt handler only ever talk to this trait.

use crate::error::Result;
use std::fmt::Debug;

/// A 32-bit register window.
///
/// Accesses through one bus are ordered relative to each other — the
/// device's state machine depends on "write operand, then write start bit",
/// and implementations must not let those writes reorder. Offsets outside
/// the window surface a transfer fault rather than touching memory.
pub trait RegisterBus: Debug + Send + Sync {
    /// Read a 32-bit register.
    ///
    /// # Errors
    ///
    /// Returns a transfer fault if the access fails or the offset is
    /// outside the mapped window.
    fn read32(&self, offset: usize) -> Result<u32>;

    /// Write a 32-bit register.
    ///
    /// # Errors
    ///
    /// Returns a transfer fault if the access fails or the offset is
    /// outside the mapped window.
    fn write32(&self, offset: usize, value: u32) -> Result<()>;
}
