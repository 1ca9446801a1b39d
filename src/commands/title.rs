//! Listing command

use emsflash_core::header::Enhancements;
use emsflash_core::image;
use emsflash_core::transport::Transport;
use emsflash_core::{BANK_SIZE, PAGE_SIZE};

use super::CmdResult;

/// Print the ROMs of a page, one row per ROM.
pub fn run_title(cart: &mut dyn Transport, page: u32) -> CmdResult {
    let image = image::list(cart, page)?;
    let base = page * PAGE_SIZE;

    println!("Bank  Title             Size     Compatibility");
    for rom in image.roms() {
        let bank = (base + rom.offset) / BANK_SIZE;
        println!(
            "{:3}   {:<16}  {:>4} KB  {}",
            bank,
            rom.header.title,
            rom.size >> 10,
            compatibility(&rom.header.enhancements, rom.header.gbc_only)
        );
    }
    Ok(())
}

fn compatibility(enhancements: &Enhancements, gbc_only: bool) -> String {
    if gbc_only {
        return "Color only".into();
    }
    let mut out = String::from("Classic");
    if enhancements.contains(Enhancements::GBC) {
        out.push_str(" + Color");
    }
    if enhancements.contains(Enhancements::SGB) {
        out.push_str(" + Super");
    }
    out
}
