//! emsflash-file - File-backed cartridge emulation
//!
//! Performs cartridge I/O against an image file holding both flash pages,
//! for offline testing of the update pipeline without hardware. The
//! emulation reproduces the one hardware behavior the flash engine relies
//! on: a write landing on an erase-block base blanks the whole block
//! first. Reads past the end of the image return `0xff`, like blank
//! flash.
//!
//! SRAM operations are not emulated.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use emsflash_core::transport::{Space, Transport};
use emsflash_core::{Error, Result, ERASE_BLOCK_SIZE};

/// Cartridge emulated on top of an image file.
pub struct FileCart {
    file: File,
    path: PathBuf,
}

impl FileCart {
    /// Open (or create) the image file at `path`.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        log::debug!("using image file {}", path.display());
        Ok(FileCart { file, path })
    }

    /// Path of the backing image file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_failed(&self, offset: u32, error: std::io::Error) -> Error {
        log::warn!("{}: {}", self.path.display(), error);
        Error::Usb { offset }
    }
}

impl Transport for FileCart {
    fn read(&mut self, space: Space, offset: u32, buf: &mut [u8]) -> Result<()> {
        if space == Space::Sram {
            log::warn!("SRAM is not supported by the image-file cart");
            return Err(Error::Usb { offset });
        }

        self.file
            .seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|e| self.io_failed(offset, e))?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(self.io_failed(offset, e)),
            }
        }
        // blank flash past the end of the image
        buf[filled..].fill(0xff);
        Ok(())
    }

    fn write(&mut self, space: Space, offset: u32, data: &[u8]) -> Result<()> {
        if space == Space::Sram {
            log::warn!("SRAM is not supported by the image-file cart");
            return Err(Error::Usb { offset });
        }

        if offset % ERASE_BLOCK_SIZE == 0 {
            self.file
                .seek(SeekFrom::Start(u64::from(offset)))
                .map_err(|e| self.io_failed(offset, e))?;
            let blank = [0xffu8; 4096];
            let mut remaining = ERASE_BLOCK_SIZE;
            while remaining > 0 {
                self.file
                    .write_all(&blank)
                    .map_err(|e| self.io_failed(offset, e))?;
                remaining -= blank.len() as u32;
            }
        }

        self.file
            .seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|e| self.io_failed(offset, e))?;
        self.file
            .write_all(data)
            .map_err(|e| self.io_failed(offset, e))
    }
}
