//! Page image model and listing
//!
//! An [`Image`] is the ordered sequence of ROMs occupying one flash page.
//! Invariants after every public operation: sizes are powers of two within
//! `[MIN_ROM_SIZE, PAGE_SIZE]`, offsets are size-aligned (buddy discipline),
//! extents stay inside the page and never overlap, and offsets strictly
//! increase. Bank 0 is either free or holds the boot menu.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::header::{self, Header, HEADER_SIZE};
use crate::transport::{Space, Transport};
use crate::{Error, Result, MENU_TITLE, MIN_ROM_SIZE, PAGE_SIZE};

/// Where a ROM's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RomSource {
    /// Already on flash, at this offset of the page.
    Flash {
        /// Offset the ROM currently occupies on flash.
        orig_offset: u32,
    },
    /// A validated file waiting to be written.
    File(RomFile),
}

/// A validated input file, pinned by the ctime captured at validation so
/// the execution engine can detect a swap before writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomFile {
    /// Path of the ROM file.
    pub path: PathBuf,
    /// Status-change time at validation.
    pub ctime: i64,
}

/// One ROM of a page image.
#[derive(Debug, Clone)]
pub struct Rom {
    /// Offset within the page. Aligned to `size`.
    pub offset: u32,
    /// Size in bytes. A power of two.
    pub size: u32,
    /// Origin of the ROM's bytes.
    pub source: RomSource,
    /// Decoded header.
    pub header: Header,
}

impl Rom {
    /// True when the ROM already sits at its target offset on flash and
    /// needs no update commands.
    pub fn is_unmoved(&self) -> bool {
        matches!(self.source, RomSource::Flash { orig_offset } if orig_offset == self.offset)
    }
}

/// Ordered sequence of the ROMs occupying a page.
#[derive(Debug, Clone, Default)]
pub struct Image {
    roms: Vec<Rom>,
}

impl Image {
    /// Create an empty image.
    pub fn new() -> Self {
        Image { roms: Vec::new() }
    }

    /// The ROMs in increasing-offset order.
    pub fn roms(&self) -> &[Rom] {
        &self.roms
    }

    /// Number of ROMs in the image.
    pub fn len(&self) -> usize {
        self.roms.len()
    }

    /// True when the image holds no ROM.
    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }

    /// The boot menu, when bank 0 holds one.
    pub fn menu(&self) -> Option<&Rom> {
        self.roms
            .first()
            .filter(|r| r.offset == 0 && r.size == MIN_ROM_SIZE && r.header.title == MENU_TITLE)
    }

    /// True when some ROM of the image carries this title.
    pub fn contains_title(&self, title: &str) -> bool {
        self.roms.iter().any(|r| r.header.title == title)
    }

    /// Sum of the ROM sizes.
    pub fn occupied(&self) -> u64 {
        self.roms.iter().map(|r| u64::from(r.size)).sum()
    }

    /// Place a ROM at a fixed offset, verifying alignment and overlap.
    /// Used to pin the menu at bank 0; general placement goes through
    /// [`crate::insert`].
    pub fn place(&mut self, mut rom: Rom, offset: u32) -> Result<()> {
        if offset % rom.size != 0 || offset + rom.size > PAGE_SIZE {
            return Err(Error::Format(format!(
                "cannot place {:?} at offset {}",
                rom.header.title, offset
            )));
        }
        if self
            .roms
            .iter()
            .any(|r| r.offset < offset + rom.size && offset < r.offset + r.size)
        {
            return Err(Error::Format(format!("offset {offset} is occupied")));
        }
        rom.offset = offset;
        self.insert(rom);
        Ok(())
    }

    /// Verify the image is self-consistent: offsets strictly increase, no
    /// extents overlap, and the sizes sum to at most a page.
    pub fn check_consistency(&self) -> Result<()> {
        if self.occupied() > u64::from(PAGE_SIZE) {
            return Err(Error::Format(
                "sum of ROM sizes on flash exceeds the page size".into(),
            ));
        }
        for pair in self.roms.windows(2) {
            if pair[0].offset + pair[0].size > pair[1].offset {
                return Err(Error::Format(format!(
                    "ROMs at offsets {} and {} overlap",
                    pair[0].offset, pair[1].offset
                )));
            }
        }
        Ok(())
    }

    /// Insert keeping increasing-offset order.
    pub(crate) fn insert(&mut self, rom: Rom) {
        let pos = self.roms.partition_point(|r| r.offset < rom.offset);
        self.roms.insert(pos, rom);
    }

    /// Remove the ROM at this offset.
    pub(crate) fn remove_at(&mut self, offset: u32) -> Option<Rom> {
        let pos = self.roms.iter().position(|r| r.offset == offset)?;
        Some(self.roms.remove(pos))
    }

    pub(crate) fn roms_mut(&mut self) -> &mut Vec<Rom> {
        &mut self.roms
    }

    pub(crate) fn resort(&mut self) {
        self.roms.sort_by_key(|r| r.offset);
    }
}

/// Reconstruct a page image from whatever is on flash.
///
/// Scans the page in 32 KiB strides. A stride that holds a valid header
/// declaring a power-of-two size aligned to the stride and fitting the page
/// becomes a ROM and the cursor advances past it; anything else is skipped
/// silently. Fails only on transport errors.
pub fn list<T: Transport + ?Sized>(transport: &mut T, page: u32) -> Result<Image> {
    let base = page * PAGE_SIZE;
    let mut image = Image::new();
    let mut buf = [0u8; HEADER_SIZE];

    let mut offset = 0;
    while offset < PAGE_SIZE {
        transport.read(Space::Rom, base + offset, &mut buf)?;

        if !header::validate(&buf) {
            offset += MIN_ROM_SIZE;
            continue;
        }
        let header = header::decode(&buf);
        if header.romsize == 0
            || !header.romsize.is_power_of_two()
            || offset % header.romsize != 0
            || offset + header.romsize > PAGE_SIZE
        {
            offset += MIN_ROM_SIZE;
            continue;
        }

        let size = header.romsize;
        image.insert(Rom {
            offset,
            size,
            source: RomSource::Flash {
                orig_offset: offset,
            },
            header,
        });
        offset += size;
    }

    Ok(image)
}

/// Validate a ROM file: header logo and checksum, a known power-of-two
/// size code that matches the actual file size and fits a page. Captures
/// the file's ctime for the execution-time identity check.
pub fn validate_file(path: &Path) -> Result<Rom> {
    let bad = |reason: &str| Error::BadRom {
        path: path.to_path_buf(),
        reason: reason.into(),
    };

    let mut file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => bad("invalid header"),
        _ => Error::file(path, e),
    })?;

    if !header::validate(&buf) {
        return Err(bad("invalid header"));
    }
    let header = header::decode(&buf);
    if header.romsize == 0 {
        return Err(bad("invalid romsize code in header"));
    }
    if !header.romsize.is_power_of_two() {
        return Err(bad("size is not a power of two"));
    }
    if header.romsize > PAGE_SIZE {
        return Err(bad("ROM is larger than a page"));
    }

    let meta = std::fs::metadata(path).map_err(|e| Error::file(path, e))?;
    if meta.size() != u64::from(header.romsize) {
        return Err(bad(
            "ROM size declared in header doesn't match the file size",
        ));
    }

    let size = header.romsize;
    Ok(Rom {
        offset: 0,
        size,
        source: RomSource::File(RomFile {
            path: path.to_path_buf(),
            ctime: meta.ctime(),
        }),
        header,
    })
}
