//! Update planner
//!
//! Diffs a target image against the flash contents its ROMs came from and
//! emits an ordered command stream. ROMs spanning whole erase-blocks turn
//! into direct writes or moves. Smaller ROMs are grouped by destination
//! erase-block: members whose flash source lives in the same block are
//! first read into rescue slots (the erase would destroy them), the block
//! is erased (explicitly when the first write will not land on the block
//! base) and every member is then written back from its slot, file or
//! flash source.
//!
//! Stream safety: the layout engine only relocates ROMs downward, so every
//! move's source lies above its destination, and commands are emitted in
//! increasing destination order; no command can overwrite the source of a
//! later one. Rescues capture stale bytes before any write touches their
//! erase-block.

use crate::image::{Image, Rom, RomFile, RomSource};
use crate::{ERASE_BLOCK_SIZE, NB_SLOTS};

/// One flash operation of an update stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Stream a file to flash at `dst`.
    WriteFile {
        /// Destination offset within the page.
        dst: u32,
        /// ROM size in bytes.
        size: u32,
        /// Validated source file.
        file: RomFile,
        /// Title, for diagnostics and loss reports.
        title: String,
    },
    /// Copy a ROM within flash, then invalidate the source header.
    Move {
        /// Destination offset within the page.
        dst: u32,
        /// ROM size in bytes.
        size: u32,
        /// Source offset within the page.
        src: u32,
        /// Title, for diagnostics and loss reports.
        title: String,
    },
    /// Rescue a ROM from flash into a RAM slot.
    ReadSlot {
        /// Slot index, `0..NB_SLOTS`.
        slot: usize,
        /// Source offset within the page.
        src: u32,
        /// ROM size in bytes.
        size: u32,
    },
    /// Write a rescued ROM back from its RAM slot.
    WriteSlot {
        /// Destination offset within the page.
        dst: u32,
        /// ROM size in bytes.
        size: u32,
        /// Slot index the ROM was rescued to.
        slot: usize,
        /// Title, for diagnostics and loss reports.
        title: String,
    },
    /// Explicitly erase the 128 KiB erase-block at `dst`.
    Erase {
        /// Block base offset within the page.
        dst: u32,
    },
}

fn erase_block(offset: u32) -> u32 {
    offset / ERASE_BLOCK_SIZE
}

/// Compute the command stream that turns the flash contents into `image`.
///
/// ROMs already at their flash offset emit nothing.
pub fn plan(image: &Image) -> Vec<Update> {
    let roms = image.roms();
    let mut updates = Vec::new();

    let mut i = 0;
    while i < roms.len() {
        let rom = &roms[i];
        if rom.is_unmoved() {
            i += 1;
            continue;
        }

        if rom.size >= ERASE_BLOCK_SIZE {
            updates.push(direct_update(rom));
            i += 1;
        } else {
            // the full run of ROMs sharing this destination erase-block
            let eb = erase_block(rom.offset);
            let mut from = i;
            while from > 0 && erase_block(roms[from - 1].offset) == eb {
                from -= 1;
            }
            let mut end = i;
            while end + 1 < roms.len() && erase_block(roms[end + 1].offset) == eb {
                end += 1;
            }
            plan_small_roms(&roms[from..=end], &mut updates);
            i = end + 1;
        }
    }

    updates
}

fn direct_update(rom: &Rom) -> Update {
    match &rom.source {
        RomSource::File(file) => Update::WriteFile {
            dst: rom.offset,
            size: rom.size,
            file: file.clone(),
            title: rom.header.title.clone(),
        },
        RomSource::Flash { orig_offset } => Update::Move {
            dst: rom.offset,
            size: rom.size,
            src: *orig_offset,
            title: rom.header.title.clone(),
        },
    }
}

/// Rebuild one erase-block that holds sub-block ROMs.
///
/// `members` are all the ROMs destined for the block, in offset order; at
/// most [`NB_SLOTS`] of them can have their flash source inside the block
/// (a physical constraint the layout engine upholds).
fn plan_small_roms(members: &[Rom], updates: &mut Vec<Update>) {
    let eb = erase_block(members[0].offset);
    let rescued = |rom: &Rom| {
        matches!(rom.source, RomSource::Flash { orig_offset } if erase_block(orig_offset) == eb)
    };

    let mut slot = 0;
    for rom in members.iter().filter(|r| rescued(r)) {
        let RomSource::Flash { orig_offset } = rom.source else {
            unreachable!()
        };
        updates.push(Update::ReadSlot {
            slot,
            src: orig_offset,
            size: rom.size,
        });
        slot += 1;
    }
    debug_assert!(slot <= NB_SLOTS, "more than {NB_SLOTS} rescues in one erase-block");

    // the first write only erases implicitly when it lands on the block
    // base
    if members[0].offset % ERASE_BLOCK_SIZE != 0 {
        updates.push(Update::Erase {
            dst: eb * ERASE_BLOCK_SIZE,
        });
    }

    let mut slot = 0;
    for rom in members {
        if rescued(rom) {
            updates.push(Update::WriteSlot {
                dst: rom.offset,
                size: rom.size,
                slot,
                title: rom.header.title.clone(),
            });
            slot += 1;
        } else {
            updates.push(direct_update(rom));
        }
    }
}
