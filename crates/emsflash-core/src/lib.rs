//! emsflash-core - Multi-ROM image management for the EMS 64 Mbit USB cart
//!
//! This crate models the contents of one 4 MiB flash page as an ordered
//! image of ROMs, places new ROMs with a buddy best-fit allocator, computes
//! minimal update plans (file writes, intra-flash moves, slot rescues,
//! explicit erases) and executes them against a block-I/O transport with
//! progress reporting, cooperative interruption and best-effort recovery.
//!
//! The crate is transport-agnostic: see [`transport::Transport`] for the
//! interface a cartridge backend has to provide.

pub mod apply;
pub mod error;
pub mod flash;
pub mod header;
pub mod image;
pub mod insert;
pub mod transport;
pub mod update;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};

/// Size of one flash page, the addressable window managed by this crate.
pub const PAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Size of the cartridge SRAM.
pub const SRAM_SIZE: u32 = 128 * 1024;

/// Physical erase granule. A write to an erase-block base implicitly
/// erases the whole block first.
pub const ERASE_BLOCK_SIZE: u32 = 128 * 1024;

/// Smallest ROM the cartridge can hold. Also the listing stride.
pub const MIN_ROM_SIZE: u32 = 32 * 1024;

/// Memory-bus bank size; listings and deletions address ROMs in banks.
pub const BANK_SIZE: u32 = 16 * 1024;

/// Granularity of a single transport write.
pub const WRITE_UNIT: u32 = 32;

/// Chunk size for bulk reads and progress accounting.
pub const READ_CHUNK: u32 = 4096;

/// Number of RAM side-buffers available to rescue small ROMs while their
/// erase-block is rebuilt.
pub const NB_SLOTS: usize = 3;

/// Size of one rescue slot.
pub const SLOT_SIZE: u32 = ERASE_BLOCK_SIZE / 2;

/// Title of the boot-menu ROM that must occupy bank 0.
pub const MENU_TITLE: &str = "MENU#";
