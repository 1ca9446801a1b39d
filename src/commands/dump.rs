//! Whole-page dump and restore (and the SRAM save path)
//!
//! Linear streaming copies between a file and one address space. Dump
//! files are raw images sized exactly one page (ROM) or the SRAM.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use emsflash_core::transport::{Space, Transport};
use emsflash_core::{Error, PAGE_SIZE, READ_CHUNK, SRAM_SIZE};

use crate::interrupt::IntFlag;
use crate::progress::copy_bar;

use super::CmdResult;

fn extent(space: Space, page: u32) -> (u32, u32) {
    match space {
        Space::Rom => (page * PAGE_SIZE, PAGE_SIZE),
        Space::Sram => (0, SRAM_SIZE),
    }
}

/// Copy a page of flash (or the SRAM) into a file.
pub fn run_dump(
    cart: &mut dyn Transport,
    page: u32,
    space: Space,
    path: &str,
    int: &IntFlag,
) -> CmdResult {
    let (base, size) = extent(space, page);
    let mut file = File::create(path).map_err(|e| Error::file(path, e))?;

    let bar = copy_bar(u64::from(size), "Reading");
    let mut buf = [0u8; READ_CHUNK as usize];
    let mut offset = 0;
    while offset < size {
        if int.is_set() {
            return Err(Error::Interrupted.into());
        }
        cart.read(space, base + offset, &mut buf)?;
        file.write_all(&buf).map_err(|e| Error::file(path, e))?;
        offset += READ_CHUNK;
        bar.inc(u64::from(READ_CHUNK));
    }
    bar.finish_with_message("Read complete");
    Ok(())
}

/// Copy a dump file back onto a page of flash (or the SRAM).
pub fn run_restore(
    cart: &mut dyn Transport,
    page: u32,
    space: Space,
    path: &str,
    int: &IntFlag,
) -> CmdResult {
    let (base, size) = extent(space, page);

    let meta = std::fs::metadata(path).map_err(|e| Error::file(path, e))?;
    if meta.len() != u64::from(size) {
        return Err(Error::InvalidArg(format!(
            "{path}: expected exactly {size} bytes, found {}",
            meta.len()
        ))
        .into());
    }
    let mut file = File::open(path).map_err(|e| Error::file(path, e))?;

    let bar = copy_bar(u64::from(size), "Writing");
    let mut buf = [0u8; READ_CHUNK as usize];
    let mut offset = 0;
    while offset < size {
        if int.is_set() {
            return Err(Error::Interrupted.into());
        }
        file.read_exact(&mut buf).map_err(|e| Error::file(path, e))?;
        cart.write(space, base + offset, &buf)?;
        offset += READ_CHUNK;
        bar.inc(u64::from(READ_CHUNK));
    }
    bar.finish_with_message("Write complete");
    Ok(())
}
