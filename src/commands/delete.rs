//! Delete command

use emsflash_core::flash::FlashEngine;
use emsflash_core::image;
use emsflash_core::transport::Transport;
use emsflash_core::{Error, BANK_SIZE, PAGE_SIZE};

use crate::interrupt::IntFlag;

use super::CmdResult;

/// Remove the ROMs at the given page-relative bank numbers by
/// invalidating their headers; nothing is erased.
pub fn run_delete(cart: &mut dyn Transport, page: u32, args: &[String], int: &IntFlag) -> CmdResult {
    let banks = parse_banks(args)?;
    let image = image::list(cart, page)?;

    // resolve every bank before the first write
    let mut doomed = Vec::with_capacity(banks.len());
    for bank in banks {
        let offset = bank * BANK_SIZE;
        let rom = image
            .roms()
            .iter()
            .find(|r| r.offset == offset)
            .ok_or_else(|| Error::InvalidArg(format!("no ROM at bank {bank}")))?;
        doomed.push(rom);
    }

    let base = page * PAGE_SIZE;
    let mut engine = FlashEngine::new(cart).with_interrupt(int);
    for rom in doomed {
        log::info!("deleting {} (offset {})", rom.header.title, rom.offset);
        engine.delete(base + rom.offset, 1)?;
    }
    Ok(())
}

/// Bank numbers are integers in `[0, PAGE_SIZE / BANK_SIZE)`.
fn parse_banks(args: &[String]) -> Result<Vec<u32>, Error> {
    let mut banks = Vec::with_capacity(args.len());
    for arg in args {
        let bank: u32 = arg
            .parse()
            .map_err(|_| Error::InvalidArg(format!("invalid bank number {arg:?}")))?;
        if bank >= PAGE_SIZE / BANK_SIZE {
            return Err(Error::InvalidArg(format!(
                "bank number {bank} out of range (0-{})",
                PAGE_SIZE / BANK_SIZE - 1
            )));
        }
        banks.push(bank);
    }
    Ok(banks)
}
