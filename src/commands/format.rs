//! Format command

use emsflash_core::flash::FlashEngine;
use emsflash_core::transport::Transport;
use emsflash_core::{ERASE_BLOCK_SIZE, PAGE_SIZE};

use crate::interrupt::IntFlag;
use crate::progress::copy_bar;

use super::CmdResult;

/// Erase every erase-block of the selected page.
pub fn run_format(cart: &mut dyn Transport, page: u32, int: &IntFlag) -> CmdResult {
    let base = page * PAGE_SIZE;
    let blocks = PAGE_SIZE / ERASE_BLOCK_SIZE;

    let bar = copy_bar(u64::from(PAGE_SIZE), "Formatting");
    let mut engine = FlashEngine::new(cart).with_interrupt(int);
    for block in 0..blocks {
        engine.erase(base + block * ERASE_BLOCK_SIZE)?;
        bar.inc(u64::from(ERASE_BLOCK_SIZE));
    }
    bar.finish_with_message("Format complete");
    Ok(())
}
