//! Buddy best-fit insertion and incremental defragmentation
//!
//! Free space is enumerated as maximal aligned power-of-two slots: for each
//! gap, repeatedly take the largest power of two that divides the gap start
//! and fits in the gap, then advance. Insertion picks the smallest such
//! slot that holds the ROM (ties go to the lowest offset). When nothing
//! fits, defragmentation reserves two aligned half-size blocks, empties the
//! buddy of the upper one into the lower one and retries. Every relocation
//! moves a ROM to a strictly lower offset; the update planner depends on
//! this to emit moves in increasing-offset order without clobbering any
//! source.

use crate::header::Header;
use crate::image::{Image, Rom, RomSource};
use crate::{MIN_ROM_SIZE, PAGE_SIZE};

/// Place `rom` at the best-fitting free buddy slot.
///
/// On success the ROM is inserted with its offset updated; on failure the
/// ROM is handed back unchanged.
pub fn insert(image: &mut Image, rom: Rom) -> Result<(), Rom> {
    insert_at(image, rom).map(|_| ())
}

/// Like [`insert`], but defragments the image and retries once when no
/// slot fits.
pub fn insert_defrag(image: &mut Image, rom: Rom) -> Result<(), Rom> {
    insert_defrag_at(image, rom).map(|_| ())
}

fn insert_at(image: &mut Image, mut rom: Rom) -> Result<u32, Rom> {
    let mut best: Option<(u32, u32)> = None; // (slot size, slot offset)

    let extents = image
        .roms()
        .iter()
        .map(|r| (r.offset, r.offset + r.size))
        .chain(std::iter::once((PAGE_SIZE, PAGE_SIZE)));

    let mut offset = 0;
    for (cur, next) in extents {
        while cur - offset > 0 {
            let mut slot = PAGE_SIZE;
            while slot >= MIN_ROM_SIZE {
                if offset % slot == 0 && cur - offset >= slot {
                    break;
                }
                slot /= 2;
            }
            if slot >= rom.size && best.is_none_or(|(size, _)| size > slot) {
                best = Some((slot, offset));
            }
            offset += slot;
        }
        offset = next;
    }

    match best {
        Some((_, slot_offset)) => {
            rom.offset = slot_offset;
            image.insert(rom);
            Ok(slot_offset)
        }
        None => Err(rom),
    }
}

fn insert_defrag_at(image: &mut Image, rom: Rom) -> Result<u32, Rom> {
    match insert_at(image, rom) {
        Ok(offset) => Ok(offset),
        Err(rom) => {
            defrag(image, rom.size);
            insert_at(image, rom)
        }
    }
}

/// Free one aligned block of `size` bytes by relocating ROMs downward.
///
/// Reserves two aligned half-blocks (recursively defragmenting for them if
/// needed), then moves every ROM inside the block containing the upper
/// reservation into the lower one, preserving each ROM's offset modulo
/// half the block size. Returns false when the image cannot be
/// defragmented at this granularity.
fn defrag(image: &mut Image, size: u32) -> bool {
    if size == MIN_ROM_SIZE {
        return false;
    }
    let half = size / 2;

    let first = match insert_defrag_at(image, reservation(half)) {
        Ok(offset) => offset,
        Err(_) => return false,
    };
    let second = match insert_defrag_at(image, reservation(half)) {
        Ok(offset) => offset,
        Err(_) => {
            let _ = image.remove_at(first);
            return false;
        }
    };
    let (first, second) = if second < first {
        (second, first)
    } else {
        (first, second)
    };

    let _ = image.remove_at(first);
    let _ = image.remove_at(second);

    // The aligned block of `size` containing the upper reservation; only
    // its buddy half can still hold ROMs.
    let block = second & !(size - 1);
    for rom in image.roms_mut() {
        if (block..block + size).contains(&rom.offset) {
            debug_assert!(first + rom.offset % half < rom.offset);
            rom.offset = first + rom.offset % half;
        }
    }
    image.resort();
    true
}

/// Placeholder ROM used to reserve a free slot during defragmentation.
fn reservation(size: u32) -> Rom {
    Rom {
        offset: 0,
        size,
        source: RomSource::Flash {
            orig_offset: u32::MAX,
        },
        header: Header {
            title: String::new(),
            romsize: size,
            enhancements: Default::default(),
            gbc_only: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Enhancements;
    use crate::image::{RomFile, RomSource};
    use std::path::PathBuf;

    const KB: u32 = 1024;

    fn flash_rom(offset: u32, size: u32) -> Rom {
        Rom {
            offset,
            size,
            source: RomSource::Flash {
                orig_offset: offset,
            },
            header: Header {
                title: format!("ROM {offset}"),
                romsize: size,
                enhancements: Enhancements::empty(),
                gbc_only: false,
            },
        }
    }

    fn file_rom(size: u32) -> Rom {
        Rom {
            offset: 0,
            size,
            source: RomSource::File(RomFile {
                path: PathBuf::from("new.gb"),
                ctime: 0,
            }),
            header: Header {
                title: format!("NEW {size}"),
                romsize: size,
                enhancements: Enhancements::empty(),
                gbc_only: false,
            },
        }
    }

    fn image_of(extents: &[(u32, u32)]) -> Image {
        let mut image = Image::new();
        for &(offset, size) in extents {
            image.insert(flash_rom(offset, size));
        }
        image
    }

    fn check_invariants(image: &Image) {
        let mut prev_end = 0;
        for rom in image.roms() {
            assert!(rom.size.is_power_of_two());
            assert!(rom.size >= MIN_ROM_SIZE && rom.size <= PAGE_SIZE);
            assert_eq!(rom.offset % rom.size, 0, "offset {} size {}", rom.offset, rom.size);
            assert!(rom.offset + rom.size <= PAGE_SIZE);
            assert!(rom.offset >= prev_end, "overlap at {}", rom.offset);
            prev_end = rom.offset + rom.size;
        }
    }

    #[test]
    fn best_fit_prefers_the_smallest_slot() {
        // free: [32K,64K) and [128K,4M); a 32K ROM goes in the tight hole
        let mut image = image_of(&[(0, 32 * KB), (64 * KB, 64 * KB)]);
        insert(&mut image, file_rom(32 * KB)).unwrap();
        assert_eq!(image.roms()[1].offset, 32 * KB);
        check_invariants(&image);
    }

    #[test]
    fn best_fit_ties_break_to_the_lowest_offset() {
        // two exact 32K holes at 32K and 96K
        let mut image = image_of(&[(0, 32 * KB), (64 * KB, 32 * KB), (128 * KB, 128 * KB)]);
        insert(&mut image, file_rom(32 * KB)).unwrap();
        assert_eq!(image.roms()[1].offset, 32 * KB);
    }

    #[test]
    fn insertion_respects_alignment() {
        // free space starts at 32K but a 64K ROM must land on a 64K boundary
        let mut image = image_of(&[(0, 32 * KB)]);
        insert(&mut image, file_rom(64 * KB)).unwrap();
        assert_eq!(image.roms()[1].offset, 64 * KB);
        check_invariants(&image);
    }

    #[test]
    fn insert_fails_on_a_full_page() {
        let mut image = image_of(&[(0, PAGE_SIZE)]);
        assert!(insert(&mut image, file_rom(32 * KB)).is_err());
    }

    #[test]
    fn insert_fails_without_an_aligned_slot() {
        // 32K ROMs at 0, 64K, 128K, 192K: no aligned 128K block is free
        let mut image = image_of(&[
            (0, 32 * KB),
            (64 * KB, 32 * KB),
            (128 * KB, 32 * KB),
            (192 * KB, 32 * KB),
        ]);
        assert!(insert(&mut image, file_rom(128 * KB)).is_err());
    }

    #[test]
    fn defrag_compacts_and_retries() {
        // same layout as above; defragmentation moves the ROMs at 64K,
        // 128K and 192K down into 32K..128K and frees [128K, 256K)
        let mut image = image_of(&[
            (0, 32 * KB),
            (64 * KB, 32 * KB),
            (128 * KB, 32 * KB),
            (192 * KB, 32 * KB),
        ]);
        insert_defrag(&mut image, file_rom(128 * KB)).unwrap();
        check_invariants(&image);

        let offsets: Vec<u32> = image.roms().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 32 * KB, 64 * KB, 96 * KB, 128 * KB]);
        assert_eq!(image.roms()[4].size, 128 * KB);

        // every relocation went downward
        for rom in image.roms() {
            if let RomSource::Flash { orig_offset } = rom.source {
                assert!(rom.offset <= orig_offset);
            }
        }
    }

    #[test]
    fn defrag_moves_only_downward_across_layouts() {
        // a page over-fragmented with alternating 32K ROMs in its lower
        // half and a big ROM pinning the upper half forces recursive
        // defragmentation; verify the move-direction guarantee the
        // planner relies on
        let mut extents: Vec<(u32, u32)> = (0..32).map(|k| (k * 64 * KB, 32 * KB)).collect();
        extents.push((2048 * KB, 2048 * KB));
        let mut image = image_of(&extents);

        for size in [64 * KB, 128 * KB, 256 * KB] {
            insert_defrag(&mut image, file_rom(size)).unwrap();
            check_invariants(&image);
            for rom in image.roms() {
                if let RomSource::Flash { orig_offset } = rom.source {
                    assert!(
                        rom.offset <= orig_offset,
                        "ROM moved up: {} -> {}",
                        orig_offset,
                        rom.offset
                    );
                }
            }
        }
    }

    #[test]
    fn defrag_gives_up_at_minimum_granularity() {
        // alternating 32K ROMs leave no room to shuffle a 4 MiB request
        let mut extents = Vec::new();
        let mut offset = 0;
        while offset < PAGE_SIZE {
            extents.push((offset, 32 * KB));
            offset += 64 * KB;
        }
        let mut image = image_of(&extents);
        assert!(insert_defrag(&mut image, file_rom(PAGE_SIZE)).is_err());
    }

    #[test]
    fn fills_a_page_exactly() {
        // insertion succeeds whenever the sizes sum to the page and a
        // buddy arrangement exists
        let mut image = Image::new();
        for size in [2048 * KB, 1024 * KB, 512 * KB, 256 * KB, 128 * KB, 64 * KB, 32 * KB, 32 * KB]
        {
            insert_defrag(&mut image, file_rom(size)).unwrap();
            check_invariants(&image);
        }
        assert_eq!(image.occupied(), u64::from(PAGE_SIZE));
        assert!(insert(&mut image, file_rom(32 * KB)).is_err());
    }

    #[test]
    fn mixed_insert_sequences_keep_invariants() {
        let sequences: &[&[u32]] = &[
            &[32, 32, 64, 32, 128, 256, 32, 64],
            &[1024, 32, 512, 64, 256, 32, 128],
            &[64, 64, 64, 64, 32, 32, 32, 32, 256],
        ];
        for &sizes in sequences {
            let mut image = Image::new();
            for &kb in sizes {
                insert_defrag(&mut image, file_rom(kb * KB)).unwrap();
                check_invariants(&image);
            }
        }
    }
}
