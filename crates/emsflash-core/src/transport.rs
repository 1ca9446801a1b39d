//! Block-I/O transport interface
//!
//! A transport moves bytes between the host and one of the cartridge's
//! address spaces. The flash ROM space spans two consecutive 4 MiB pages;
//! the SRAM space spans 128 KiB. The hardware accepts writes in 32-byte
//! units and implicitly erases a whole 128 KiB erase-block whenever a write
//! lands on the block's base offset; everything above this interface relies
//! on that contract.

use crate::Result;

/// Address spaces exposed by the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// The flash ROM (two pages of [`crate::PAGE_SIZE`]).
    Rom,
    /// The battery-backed save RAM ([`crate::SRAM_SIZE`]).
    Sram,
}

/// Byte-granular access to a cartridge.
///
/// Implementations report failures as [`crate::Error::Usb`]; retries are
/// not required. Writes shorter than 32 bytes are unsupported by the
/// hardware and need not be handled.
pub trait Transport {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&mut self, space: Space, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`.
    fn write(&mut self, space: Space, offset: u32, data: &[u8]) -> Result<()>;
}
