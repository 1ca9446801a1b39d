//! Update-stream execution and recovery
//!
//! Commands run strictly in issue order against a flash engine. Before a
//! file write, the file is stat'ed and its ctime compared against the
//! value captured at validation, catching files swapped between planning
//! and execution.
//!
//! On a transport error execution aborts outright: the bus may be
//! unhealthy and further writes would make things worse. On a file error
//! or an interruption, the erase-block being rebuilt may hold rescued ROMs
//! whose flash copies are already gone, so the engine replays the pending
//! slot writes of that block before giving up. ROMs it cannot restore are
//! reported by title, prefixed with "possibly" when it is unknown whether
//! the erase at the block base actually completed.

use std::os::unix::fs::MetadataExt;

use crate::flash::FlashEngine;
use crate::image::RomFile;
use crate::transport::Transport;
use crate::update::Update;
use crate::{Error, Result, ERASE_BLOCK_SIZE};

/// Execute an update stream against the page starting at `base`.
///
/// Returns the first error encountered; recovery outcomes are reported
/// through the log.
pub fn apply<T: Transport + ?Sized>(
    engine: &mut FlashEngine<'_, T>,
    base: u32,
    updates: &[Update],
) -> Result<()> {
    let mut failure = None;
    for (index, update) in updates.iter().enumerate() {
        let result = match update {
            Update::WriteFile {
                dst,
                size,
                file,
                title,
            } => {
                log::info!("writing {} [{}]", file.path.display(), title);
                check_unchanged(file).and_then(|()| engine.write_file(base + dst, *size, file))
            }
            Update::Move {
                dst, size, src, ..
            } => {
                log::debug!("moving {} -> {}", src, dst);
                engine.move_rom(base + dst, *size, base + src)
            }
            Update::ReadSlot { slot, src, size } => engine.read_slot(*slot, *size, base + src),
            Update::WriteSlot {
                dst, size, slot, ..
            } => engine.write_slot(base + dst, *size, *slot),
            Update::Erase { dst } => engine.erase(base + dst),
        };
        if let Err(error) = result {
            log::warn!("{error}");
            failure = Some((index, error));
            break;
        }
    }

    let Some((index, error)) = failure else {
        return Ok(());
    };
    recover(engine, base, updates, index, &error);
    Err(error)
}

/// Verify a file's ctime still matches the value captured at validation.
fn check_unchanged(file: &RomFile) -> Result<()> {
    let meta = std::fs::metadata(&file.path).map_err(|e| Error::file(&file.path, e))?;
    if meta.ctime() != file.ctime {
        return Err(Error::FileChanged {
            path: file.path.clone(),
        });
    }
    Ok(())
}

/// Replay pending slot writes of the erase-block the failure landed in.
///
/// Walks the remaining stream; commands other than slot writes are
/// skipped, and the walk stops at the first slot write outside the block.
/// The command that originally failed is never re-executed; its ROM is
/// reported lost. A transport error, whether the first failure or one
/// hit during replay, stops re-execution; the remaining same-block slot
/// ROMs are reported lost.
fn recover<T: Transport + ?Sized>(
    engine: &mut FlashEngine<'_, T>,
    base: u32,
    updates: &[Update],
    fail_index: usize,
    first_error: &Error,
) {
    let block_of = |offset: u32| offset / ERASE_BLOCK_SIZE;

    // The block to recover is where the last write landed. When nothing
    // was written yet, fall back to the device's erase-block 0, so the
    // walk below replays block-0 slot writes and stops immediately
    // anywhere else.
    let current_block =
        |engine: &FlashEngine<'_, T>| engine.last_ofs().map(block_of).unwrap_or(0);

    let possibly = |engine: &FlashEngine<'_, T>| {
        if engine
            .last_ofs()
            .is_some_and(|o| o % ERASE_BLOCK_SIZE == 0)
        {
            "possibly "
        } else {
            ""
        }
    };

    let mut usb = first_error.is_usb();
    let mut err_index = fail_index;

    // A failing file or slot write leaves its ROM absent from flash; a
    // failing move leaves the source intact, so it is not lost.
    if !usb {
        if let Update::WriteFile { dst, size, title, .. } = &updates[fail_index] {
            let started = engine
                .last_ofs()
                .is_some_and(|o| (base + dst..base + dst + size).contains(&o));
            if started {
                log::warn!("{}lost {}", possibly(engine), title);
            }
        }
    }

    for (index, update) in updates.iter().enumerate().skip(fail_index) {
        let Update::WriteSlot {
            dst, size, slot, title,
        } = update
        else {
            continue;
        };
        if block_of(base + dst) != current_block(engine) {
            break;
        }

        if !usb && index != err_index {
            log::info!("recovering {}", title);
            if let Err(error) = engine.write_slot(base + dst, *size, *slot) {
                log::warn!("{error}");
                usb = error.is_usb();
                err_index = index;
            }
        }

        if usb || index == err_index {
            log::warn!("{}lost {}", possibly(engine), title);
        }
    }
}
