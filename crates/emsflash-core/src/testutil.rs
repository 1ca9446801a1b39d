//! Shared fixtures for the core test suites: a raw-header builder and an
//! in-memory cartridge that emulates the implicit erase of the hardware
//! while recording every write it sees.

use std::cell::Cell;
use std::rc::Rc;

use crate::flash::{InterruptSource, ProgressSink, Transfer};
use crate::header::{Enhancements, HEADER_SIZE, NINTENDO_LOGO, TITLE_SIZE};
use crate::transport::{Space, Transport};
use crate::{Error, Result, ERASE_BLOCK_SIZE, PAGE_SIZE, SRAM_SIZE};

/// Interrupt probe backed by a shared flag, typically raised by a
/// [`MemCart`] trip.
pub struct FlagProbe(pub Rc<Cell<bool>>);

impl InterruptSource for FlagProbe {
    fn pending(&self) -> bool {
        self.0.get()
    }
}

/// Interrupt probe pinned to a constant answer.
pub struct ConstProbe(pub bool);

impl InterruptSource for ConstProbe {
    fn pending(&self) -> bool {
        self.0
    }
}

/// Progress sink recording every event.
#[derive(Default)]
pub struct EventLog(pub Vec<(Transfer, u32)>);

impl ProgressSink for EventLog {
    fn report(&mut self, kind: Transfer, bytes: u32) {
        self.0.push((kind, bytes));
    }
}

/// Build a raw header area for a ROM with the given title and size code.
pub fn raw_header(title: &str, size_code: u8, enh: Enhancements, gbc_only: bool) -> Vec<u8> {
    let mut raw = vec![0u8; HEADER_SIZE];
    raw[0x104..0x134].copy_from_slice(&NINTENDO_LOGO);
    for (i, b) in title.bytes().take(TITLE_SIZE).enumerate() {
        raw[0x134 + i] = b;
    }
    for i in title.len()..TITLE_SIZE {
        raw[0x134 + i] = b' ';
    }
    if enh.contains(Enhancements::GBC) {
        raw[0x143] = if gbc_only { 0xc0 } else { 0x80 };
    }
    if enh.contains(Enhancements::SGB) {
        raw[0x146] = 0x03;
        raw[0x14b] = 0x33;
    }
    raw[0x148] = size_code;

    let mut chk: u8 = 0;
    for &byte in &raw[0x134..0x14d] {
        chk = chk.wrapping_sub(byte).wrapping_sub(1);
    }
    raw[0x14d] = chk;
    raw
}

/// Size code for a power-of-two ROM size in bytes.
pub fn size_code(size: u32) -> u8 {
    (size / 32768).trailing_zeros() as u8
}

/// Build a complete ROM image of `size` bytes: a valid header followed by
/// a position-dependent filler pattern.
pub fn rom_bytes(title: &str, size: u32, enh: Enhancements) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..size).map(|i| (i / 32) as u8).collect();
    let header = raw_header(title, size_code(size), enh, false);
    bytes[..HEADER_SIZE].copy_from_slice(&header);
    bytes
}

/// In-memory cartridge with the hardware's implicit-erase behavior.
///
/// Every ROM-space write is appended to `writes` so tests can assert exact
/// write order (notably the header-last discipline). `fail_write_at` /
/// `fail_read_at` make a specific offset fail with a transport error;
/// `trip_write_at` / `trip_read_at` raise a shared flag when an offset is
/// touched, which tests wire to an interrupt source.
pub struct MemCart {
    pub rom: Vec<u8>,
    pub sram: Vec<u8>,
    pub writes: Vec<(u32, Vec<u8>)>,
    pub fail_write_at: Option<u32>,
    pub fail_read_at: Option<u32>,
    pub trip_write_at: Option<(u32, Rc<Cell<bool>>)>,
    pub trip_read_at: Option<(u32, Rc<Cell<bool>>)>,
}

impl MemCart {
    pub fn new() -> Self {
        MemCart {
            rom: vec![0xff; 2 * PAGE_SIZE as usize],
            sram: vec![0xff; SRAM_SIZE as usize],
            writes: Vec::new(),
            fail_write_at: None,
            fail_read_at: None,
            trip_write_at: None,
            trip_read_at: None,
        }
    }

    /// Preload a ROM image at `offset`.
    pub fn load(&mut self, offset: u32, bytes: &[u8]) {
        self.rom[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
    }

    /// The offsets of all recorded ROM-space writes, in order.
    pub fn write_offsets(&self) -> Vec<u32> {
        self.writes.iter().map(|(o, _)| *o).collect()
    }
}

impl Transport for MemCart {
    fn read(&mut self, space: Space, offset: u32, buf: &mut [u8]) -> Result<()> {
        if let Some((trip, flag)) = &self.trip_read_at {
            if *trip == offset {
                flag.set(true);
            }
        }
        if self.fail_read_at == Some(offset) {
            return Err(Error::Usb { offset });
        }
        let mem = match space {
            Space::Rom => &self.rom,
            Space::Sram => &self.sram,
        };
        buf.copy_from_slice(&mem[offset as usize..offset as usize + buf.len()]);
        Ok(())
    }

    fn write(&mut self, space: Space, offset: u32, data: &[u8]) -> Result<()> {
        if let Some((trip, flag)) = &self.trip_write_at {
            if *trip == offset {
                flag.set(true);
            }
        }
        if self.fail_write_at == Some(offset) {
            return Err(Error::Usb { offset });
        }
        let mem = match space {
            Space::Rom => &mut self.rom,
            Space::Sram => &mut self.sram,
        };
        if space == Space::Rom && offset % ERASE_BLOCK_SIZE == 0 {
            let base = offset as usize;
            mem[base..base + ERASE_BLOCK_SIZE as usize].fill(0xff);
        }
        mem[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        if space == Space::Rom {
            self.writes.push((offset, data.to_vec()));
        }
        Ok(())
    }
}
