//! CLI argument parsing

use clap::{ArgGroup, Parser};

use emsflash_core::transport::Space;

#[derive(Parser)]
#[command(name = "emsflash")]
#[command(author, version, about = "Multi-ROM manager for the EMS 64 Mbit USB flash cart", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).multiple(false)))]
#[command(group(ArgGroup::new("space").multiple(false)))]
pub struct Cli {
    /// Read the selected space of the cart into a file
    #[arg(long, group = "mode")]
    pub read: bool,

    /// Write ROM file(s) to the cart
    #[arg(long, group = "mode")]
    pub write: bool,

    /// Dump an entire page of flash (or the SRAM) to a file
    #[arg(long, group = "mode")]
    pub dump: bool,

    /// Restore a dump taken by --dump
    #[arg(long, group = "mode")]
    pub restore: bool,

    /// Delete the ROMs at the given bank numbers
    #[arg(long, group = "mode")]
    pub delete: bool,

    /// Delete every ROM of the selected page
    #[arg(long, group = "mode")]
    pub format: bool,

    /// List the ROMs of the selected page
    #[arg(long, group = "mode")]
    pub title: bool,

    /// Cart page to operate on (1 or 2)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=2))]
    pub bank: u32,

    /// Operate on the save RAM
    #[arg(long, group = "space")]
    pub save: bool,

    /// Operate on the flash ROM
    #[arg(long, group = "space")]
    pub rom: bool,

    /// Override menu compatibility checks
    #[arg(long)]
    pub force: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// ROM/SAV file paths, or bank numbers for --delete
    #[arg(value_name = "ARG")]
    pub args: Vec<String>,
}

/// The operation selected by the mutually-exclusive mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Dump,
    Restore,
    Delete,
    Format,
    Title,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.read {
            Mode::Read
        } else if self.write {
            Mode::Write
        } else if self.dump {
            Mode::Dump
        } else if self.restore {
            Mode::Restore
        } else if self.delete {
            Mode::Delete
        } else if self.format {
            Mode::Format
        } else {
            Mode::Title
        }
    }

    /// Pick the address space: explicit flags win, then a `.sav` file
    /// extension, then flash ROM.
    pub fn space_for(&self, file: Option<&str>) -> Space {
        if self.save {
            Space::Sram
        } else if self.rom {
            Space::Rom
        } else if file.is_some_and(|f| f.to_ascii_lowercase().ends_with(".sav")) {
            Space::Sram
        } else {
            Space::Rom
        }
    }
}
