//! Flash engine: the transfer primitives behind update commands
//!
//! When a ROM is written to flash (from a file, a rescue slot or another
//! flash location), the 32-byte unit at ROM offset `0x100`, the start of
//! the logo area, is held back and written only after everything else
//! succeeded. Until that last unit lands, the header does not validate and
//! the ROM is invisible to listings, so an abort at any earlier point
//! leaves the page self-consistent. A move deletes the source header only
//! once the copy is complete.
//!
//! The engine polls the injected interrupt source at cooperative points:
//! between write-unit pairs, before bulk reads, and at the entry of erase
//! and delete. Writing a slot back never polls, so recovery can assume a
//! started slot write either completes or fails on the transport.
//!
//! `last_ofs` tracks the highest tracked write offset; the execution
//! engine derives the erase-block to recover from it.

use std::fs::File;
use std::io::Read;

use crate::image::RomFile;
use crate::transport::{Space, Transport};
use crate::{Error, Result, ERASE_BLOCK_SIZE, NB_SLOTS, READ_CHUNK, SLOT_SIZE, WRITE_UNIT};

/// Transfer kinds reported to the progress sink.
///
/// `Erase` events are weightless ticks; the others carry 4 KiB quanta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// An erase-block was (implicitly or explicitly) erased.
    Erase,
    /// Bytes written from a file.
    WriteFile,
    /// Bytes written from flash or a slot.
    Write,
    /// Bytes read from flash.
    Read,
}

/// Receives transfer progress events.
pub trait ProgressSink {
    /// Called for every 4 KiB transferred and for every erase.
    fn report(&mut self, kind: Transfer, bytes: u32);
}

/// Level-triggered interrupt probe polled at cooperative points.
pub trait InterruptSource {
    /// True when a termination request is pending.
    fn pending(&self) -> bool;
}

/// Drives update commands against a transport.
///
/// Owns the three rescue-slot buffers and the `last_ofs` bookkeeping the
/// recovery path needs.
pub struct FlashEngine<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    progress: Option<&'a mut dyn ProgressSink>,
    interrupt: Option<&'a dyn InterruptSource>,
    last_ofs: Option<u32>,
    slots: Vec<Vec<u8>>,
}

impl<'a, T: Transport + ?Sized> FlashEngine<'a, T> {
    /// Create an engine over a transport, without progress reporting or
    /// interruption.
    pub fn new(transport: &'a mut T) -> Self {
        FlashEngine {
            transport,
            progress: None,
            interrupt: None,
            last_ofs: None,
            slots: vec![vec![0; SLOT_SIZE as usize]; NB_SLOTS],
        }
    }

    /// Attach a progress sink.
    pub fn with_progress(mut self, progress: &'a mut dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Attach an interrupt source.
    pub fn with_interrupt(mut self, interrupt: &'a dyn InterruptSource) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Highest offset written through the tracked path, if any.
    pub fn last_ofs(&self) -> Option<u32> {
        self.last_ofs
    }

    fn check_int(&self) -> Result<()> {
        match self.interrupt {
            Some(int) if int.pending() => {
                log::warn!("operation interrupted");
                Err(Error::Interrupted)
            }
            _ => Ok(()),
        }
    }

    fn report(&mut self, kind: Transfer, bytes: u32) {
        if let Some(progress) = self.progress.as_deref_mut() {
            progress.report(kind, bytes);
        }
    }

    /// Tracked write: records the offset for recovery.
    fn write_tracked(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.last_ofs = Some(offset);
        self.transport.write(Space::Rom, offset, data)
    }

    /// Untracked write, used for deferred header units and deletions.
    fn write_raw(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.transport.write(Space::Rom, offset, data)
    }

    /// Stream a file to flash at `offset`, header unit last.
    pub fn write_file(&mut self, offset: u32, size: u32, file: &RomFile) -> Result<()> {
        const PAIR: u32 = WRITE_UNIT * 2;

        let mut f = File::open(&file.path).map_err(|e| Error::file(&file.path, e))?;

        let mut header_pair = [0u8; PAIR as usize];
        let mut have_header = false;
        let mut progress = 0;
        let mut block_ofs = 0;
        while block_ofs < size {
            let mut pair = [0u8; PAIR as usize];
            match f.read_exact(&mut pair) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::file(&file.path, e)),
            }

            if block_ofs == 0x100 {
                header_pair = pair;
                have_header = true;
                block_ofs += PAIR;
                continue;
            }

            self.check_int()?;

            for i in 0..2 {
                let unit = &pair[(i * WRITE_UNIT) as usize..][..WRITE_UNIT as usize];
                self.write_tracked(offset + block_ofs + i * WRITE_UNIT, unit)?;
            }

            if (offset + block_ofs) % ERASE_BLOCK_SIZE == 0 {
                self.report(Transfer::Erase, 0);
            }
            progress += PAIR;
            if progress % READ_CHUNK == 0 {
                self.report(Transfer::WriteFile, READ_CHUNK);
            }
            block_ofs += PAIR;
        }

        if have_header {
            for i in 0..2 {
                let unit = &header_pair[(i * WRITE_UNIT) as usize..][..WRITE_UNIT as usize];
                self.write_raw(offset + 0x100 + i * WRITE_UNIT, unit)?;
            }
        }
        self.report(Transfer::WriteFile, READ_CHUNK);
        Ok(())
    }

    /// Copy a ROM within flash, header units last, then invalidate the
    /// source header.
    pub fn move_rom(&mut self, offset: u32, size: u32, orig_offset: u32) -> Result<()> {
        let mut header_pair = [0u8; 2 * WRITE_UNIT as usize];
        let mut flipflop = false;
        let mut progress = 0;

        let mut src = orig_offset;
        let mut dest = offset;
        let mut remain = size;
        while remain > 0 {
            self.check_int()?;

            let mut chunk = [0u8; READ_CHUNK as usize];
            self.transport.read(Space::Rom, src, &mut chunk)?;
            self.report(Transfer::Read, READ_CHUNK);

            let mut block_ofs = 0;
            while block_ofs < READ_CHUNK {
                if src == orig_offset && block_ofs == 0x100 {
                    header_pair.copy_from_slice(&chunk[0x100..0x140]);
                    block_ofs += 2 * WRITE_UNIT;
                    continue;
                }

                flipflop = !flipflop;
                if flipflop {
                    self.check_int()?;
                }

                self.write_tracked(
                    dest + block_ofs,
                    &chunk[block_ofs as usize..][..WRITE_UNIT as usize],
                )?;

                if (dest + block_ofs) % ERASE_BLOCK_SIZE == 0 {
                    self.report(Transfer::Erase, 0);
                }
                progress += WRITE_UNIT;
                if progress % READ_CHUNK == 0 {
                    self.report(Transfer::Write, READ_CHUNK);
                }
                block_ofs += WRITE_UNIT;
            }

            src += READ_CHUNK;
            dest += READ_CHUNK;
            remain -= READ_CHUNK;
        }

        for i in 0..2 {
            let unit = &header_pair[(i * WRITE_UNIT) as usize..][..WRITE_UNIT as usize];
            self.write_raw(offset + 0x100 + i * WRITE_UNIT, unit)?;
        }
        self.report(Transfer::Write, READ_CHUNK);

        self.delete(orig_offset, 2)
    }

    /// Rescue a ROM from flash into a slot buffer.
    pub fn read_slot(&mut self, slot: usize, size: u32, offset: u32) -> Result<()> {
        let mut pos = 0usize;
        let mut src = offset;
        let mut remain = size;
        while remain > 0 {
            self.check_int()?;
            self.transport.read(
                Space::Rom,
                src,
                &mut self.slots[slot][pos..pos + READ_CHUNK as usize],
            )?;
            pos += READ_CHUNK as usize;
            src += READ_CHUNK;
            remain -= READ_CHUNK;
            self.report(Transfer::Read, READ_CHUNK);
        }
        Ok(())
    }

    /// Write a rescued ROM back from its slot, header unit last.
    ///
    /// Atomic with respect to user interruption: no poll points.
    pub fn write_slot(&mut self, offset: u32, size: u32, slot: usize) -> Result<()> {
        let mut progress = 0;
        let mut block_ofs = 0;
        while block_ofs < size {
            if block_ofs == 0x100 {
                block_ofs += WRITE_UNIT;
                continue;
            }

            let mut unit = [0u8; WRITE_UNIT as usize];
            unit.copy_from_slice(&self.slots[slot][block_ofs as usize..][..WRITE_UNIT as usize]);
            self.write_tracked(offset + block_ofs, &unit)?;

            if (offset + block_ofs) % ERASE_BLOCK_SIZE == 0 {
                self.report(Transfer::Erase, 0);
            }
            progress += WRITE_UNIT;
            if progress % READ_CHUNK == 0 {
                self.report(Transfer::Write, READ_CHUNK);
            }
            block_ofs += WRITE_UNIT;
        }

        let mut unit = [0u8; WRITE_UNIT as usize];
        unit.copy_from_slice(&self.slots[slot][0x100..][..WRITE_UNIT as usize]);
        self.write_raw(offset + 0x100, &unit)?;

        self.report(Transfer::Write, READ_CHUNK);
        Ok(())
    }

    /// Blank the start of the erase-block at `offset`, triggering the
    /// implicit erase and leaving the block empty.
    pub fn erase(&mut self, offset: u32) -> Result<()> {
        self.check_int()?;

        let blank = [0xffu8; WRITE_UNIT as usize];
        for i in 0..2 {
            self.write_tracked(offset + i * WRITE_UNIT, &blank)?;
        }
        self.report(Transfer::Erase, 0);
        Ok(())
    }

    /// Invalidate one or two ROM headers at `offset` by zeroing logo
    /// units, removing the ROM(s) from listings without erasing.
    pub fn delete(&mut self, offset: u32, headers: u32) -> Result<()> {
        let zero = [0u8; WRITE_UNIT as usize];
        let mut remaining = headers;
        while remaining > 0 {
            remaining -= 1;
            if (remaining + 1) % 2 == 0 {
                self.check_int()?;
            }
            self.write_raw(offset + 0x130 - remaining * WRITE_UNIT, &zero)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::RomFile;
    use crate::testutil::{ConstProbe, EventLog, FlagProbe, MemCart};
    use std::cell::Cell;
    use std::io::Write;
    use std::rc::Rc;

    const KB: u32 = 1024;

    fn patterned(size: u32) -> Vec<u8> {
        (0..size).map(|i| (i / 32) as u8).collect()
    }

    fn rom_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> RomFile {
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        RomFile {
            path,
            ctime: 0,
        }
    }

    #[test]
    fn write_file_defers_the_header_pair() {
        let dir = tempfile::tempdir().unwrap();
        let size = 64 * KB;
        let bytes = patterned(size);
        let file = rom_file(&dir, "rom.gb", &bytes);

        let mut cart = MemCart::new();
        {
            let mut engine = FlashEngine::new(&mut cart);
            engine.write_file(256 * KB, size, &file).unwrap();
            assert_eq!(engine.last_ofs(), Some(256 * KB + size - 32));
        }

        // every unit except the pair at 0x100 in ascending order, then the
        // deferred pair
        let offsets = cart.write_offsets();
        let mut expected: Vec<u32> = (0..size)
            .step_by(32)
            .filter(|&o| o != 0x100 && o != 0x120)
            .map(|o| 256 * KB + o)
            .collect();
        expected.push(256 * KB + 0x100);
        expected.push(256 * KB + 0x120);
        assert_eq!(offsets, expected);

        // the flash contents equal the file
        assert_eq!(&cart.rom[256 * KB as usize..][..size as usize], &bytes[..]);
    }

    #[test]
    fn move_copies_then_deletes_the_source_header() {
        let size = 256 * KB;
        let mut cart = MemCart::new();
        let bytes = patterned(size);
        cart.load(2048 * KB, &bytes);

        {
            let mut engine = FlashEngine::new(&mut cart);
            engine.move_rom(1024 * KB, size, 2048 * KB).unwrap();
            assert_eq!(engine.last_ofs(), Some(1024 * KB + size - 32));
        }

        // contents copied
        assert_eq!(&cart.rom[1024 * KB as usize..][..size as usize], &bytes[..]);
        // source header units zeroed
        assert_eq!(&cart.rom[(2048 * KB + 0x110) as usize..][..32], &[0u8; 32]);
        assert_eq!(&cart.rom[(2048 * KB + 0x130) as usize..][..32], &[0u8; 32]);

        // the two header units of the destination came last, before the
        // two deletion units
        let offsets = cart.write_offsets();
        let n = offsets.len();
        assert_eq!(offsets[n - 4], 1024 * KB + 0x100);
        assert_eq!(offsets[n - 3], 1024 * KB + 0x120);
        assert_eq!(offsets[n - 2], 2048 * KB + 0x110);
        assert_eq!(offsets[n - 1], 2048 * KB + 0x130);
        assert!(!offsets[..n - 4].contains(&(1024 * KB + 0x100)));
        assert!(!offsets[..n - 4].contains(&(1024 * KB + 0x120)));
    }

    #[test]
    fn slot_round_trip_defers_one_header_unit() {
        let size = 32 * KB;
        let mut cart = MemCart::new();
        let bytes = patterned(size);
        cart.load(96 * KB, &bytes);

        {
            let mut engine = FlashEngine::new(&mut cart);
            engine.read_slot(0, size, 96 * KB).unwrap();
            // reads leave last_ofs untouched
            assert_eq!(engine.last_ofs(), None);
            engine.write_slot(160 * KB, size, 0).unwrap();
            assert_eq!(engine.last_ofs(), Some(160 * KB + size - 32));
        }

        assert_eq!(&cart.rom[160 * KB as usize..][..size as usize], &bytes[..]);

        let offsets = cart.write_offsets();
        let mut expected: Vec<u32> = (0..size)
            .step_by(32)
            .filter(|&o| o != 0x100)
            .map(|o| 160 * KB + o)
            .collect();
        expected.push(160 * KB + 0x100);
        assert_eq!(offsets, expected);
    }

    #[test]
    fn erase_blanks_the_block() {
        let mut cart = MemCart::new();
        cart.rom[128 * KB as usize..256 * KB as usize].fill(0x42);

        {
            let mut engine = FlashEngine::new(&mut cart);
            engine.erase(128 * KB).unwrap();
            assert_eq!(engine.last_ofs(), Some(128 * KB + 32));
        }

        assert_eq!(
            cart.write_offsets(),
            vec![128 * KB, 128 * KB + 32]
        );
        assert!(cart.rom[128 * KB as usize..256 * KB as usize]
            .iter()
            .all(|&b| b == 0xff));
    }

    #[test]
    fn delete_zeroes_exactly_the_header_units() {
        let mut cart = MemCart::new();
        cart.rom[..256 * KB as usize].fill(0x42);

        let mut engine = FlashEngine::new(&mut cart);
        engine.delete(128 * KB, 1).unwrap();
        assert_eq!(engine.last_ofs(), None);
        engine.delete(0, 2).unwrap();
        drop(engine);

        assert_eq!(
            cart.write_offsets(),
            vec![128 * KB + 0x130, 0x110, 0x130]
        );
        assert_eq!(&cart.rom[(128 * KB + 0x130) as usize..][..32], &[0u8; 32]);
        // untouched byte right before and after each zeroed unit
        assert_eq!(cart.rom[(128 * KB + 0x12f) as usize], 0x42);
        assert_eq!(cart.rom[(128 * KB + 0x150) as usize], 0x42);
    }

    #[test]
    fn interrupted_write_file_leaves_no_header() {
        let dir = tempfile::tempdir().unwrap();
        let size = 32 * KB;
        let file = rom_file(&dir, "rom.gb", &patterned(size));

        let flag = Rc::new(Cell::new(false));
        let mut cart = MemCart::new();
        cart.trip_write_at = Some((4 * KB, flag.clone()));

        let probe = FlagProbe(flag);
        let mut engine = FlashEngine::new(&mut cart).with_interrupt(&probe);
        let err = engine.write_file(0, size, &file).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        drop(engine);

        // a bounded prefix was written and the header unit is absent
        let offsets = cart.write_offsets();
        assert!(!offsets.is_empty());
        assert!(offsets.iter().all(|&o| o <= 4 * KB + 32));
        assert!(!offsets.contains(&0x100));
    }

    #[test]
    fn move_polls_before_reads_and_between_unit_pairs() {
        let flag = Rc::new(Cell::new(false));
        let mut cart = MemCart::new();
        cart.load(2048 * KB, &patterned(64 * KB));
        cart.trip_read_at = Some((2048 * KB + 8 * KB, flag.clone()));

        let probe = FlagProbe(flag);
        let mut engine = FlashEngine::new(&mut cart).with_interrupt(&probe);
        let err = engine.move_rom(1024 * KB, 64 * KB, 2048 * KB).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        drop(engine);

        // the read at src+8K raised the flag; the poll before the next
        // write stops the transfer, so nothing at or past dest+8K was
        // written and the source is still intact
        let offsets = cart.write_offsets();
        assert!(offsets.iter().all(|&o| o < 1024 * KB + 8 * KB + 32));
        assert!(!offsets.contains(&(1024 * KB + 0x100)));
        assert_eq!(cart.rom[(2048 * KB + 0x130) as usize], patterned(64 * KB)[0x130 as usize]);
    }

    #[test]
    fn write_slot_never_polls() {
        let mut cart = MemCart::new();
        cart.load(96 * KB, &patterned(32 * KB));

        let always = ConstProbe(true);
        let mut engine = FlashEngine::new(&mut cart);
        engine.read_slot(0, 32 * KB, 96 * KB).unwrap();
        let mut engine = engine.with_interrupt(&always);
        // an armed interrupt does not stop a slot write
        engine.write_slot(160 * KB, 32 * KB, 0).unwrap();
        // but it stops an erase at entry
        assert!(matches!(engine.erase(0), Err(Error::Interrupted)));
    }

    #[test]
    fn usb_errors_propagate_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let file = rom_file(&dir, "rom.gb", &patterned(32 * KB));

        let mut cart = MemCart::new();
        cart.fail_write_at = Some(8 * KB);
        let mut engine = FlashEngine::new(&mut cart);
        let err = engine.write_file(0, 32 * KB, &file).unwrap_err();
        assert!(matches!(err, Error::Usb { offset } if offset == 8 * KB));
        drop(engine);

        let offsets = cart.write_offsets();
        assert_eq!(*offsets.last().unwrap(), 8 * KB - 32);
    }

    #[test]
    fn missing_file_fails_before_any_write() {
        let file = RomFile {
            path: "/nonexistent/rom.gb".into(),
            ctime: 0,
        };
        let mut cart = MemCart::new();
        let mut engine = FlashEngine::new(&mut cart);
        assert!(matches!(
            engine.write_file(0, 32 * KB, &file),
            Err(Error::File { .. })
        ));
        drop(engine);
        assert!(cart.writes.is_empty());
    }

    #[test]
    fn progress_totals_are_exact_per_transfer_kind() {
        let dir = tempfile::tempdir().unwrap();
        let size = 64 * KB;
        let file = rom_file(&dir, "rom.gb", &patterned(size));

        let mut log = EventLog::default();
        {
            let mut cart = MemCart::new();
            let mut engine = FlashEngine::new(&mut cart).with_progress(&mut log);
            engine.write_file(0, size, &file).unwrap();
            engine.read_slot(0, 32 * KB, 0).unwrap();
            engine.write_slot(128 * KB, 32 * KB, 0).unwrap();
            engine.move_rom(256 * KB, size, 1024 * KB).unwrap();
        }

        let total = |wanted: Transfer| -> u32 {
            log.0
                .iter()
                .filter(|(kind, _)| *kind == wanted)
                .map(|(_, bytes)| bytes)
                .sum()
        };
        assert_eq!(total(Transfer::WriteFile), size);
        assert_eq!(total(Transfer::Read), 32 * KB + size);
        assert_eq!(total(Transfer::Write), 32 * KB + size);
        // implicit erases at offsets 0, 128K and 256K
        let erases = log.0.iter().filter(|(k, _)| *k == Transfer::Erase).count();
        assert_eq!(erases, 3);
    }
}
