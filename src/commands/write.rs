//! Write command: validate, place, plan and execute
//!
//! Every input file is validated up front (header, size, ctime capture);
//! the page is listed and checked for consistency; titles must be unique
//! across the inputs and the flash; the menu policy below is enforced;
//! then each ROM is placed by the buddy allocator, the update stream is
//! planned and executed with progress and interrupt wiring.
//!
//! Menu policy: a page holding ROMs boots through the menu at bank 0.
//! When no menu is present, one is loaded from `$MENUDIR` and pinned at
//! offset 0; the variant (`menu.gb`, `menuc.gb`, `menus.gb`, `menucs.gb`)
//! is picked by the union of the new ROMs' enhancements. When a menu is
//! already flashed, each new ROM's enhancements must be covered by the
//! menu's; `--force` downgrades the rejection to a warning.

use std::path::{Path, PathBuf};

use emsflash_core::apply::apply;
use emsflash_core::flash::FlashEngine;
use emsflash_core::header::{Enhancements, Header};
use emsflash_core::image::{self, Image, Rom};
use emsflash_core::insert::insert_defrag;
use emsflash_core::transport::Transport;
use emsflash_core::update::plan;
use emsflash_core::{Error, MENU_TITLE, MIN_ROM_SIZE, PAGE_SIZE};

use crate::interrupt::IntFlag;
use crate::progress::UpdateProgress;

use super::CmdResult;

const DEFAULT_MENU_DIR: &str = "/usr/local/share/emsflash";

/// Write one or more ROM files to the selected page.
pub fn run_write(
    cart: &mut dyn Transport,
    page: u32,
    force: bool,
    files: &[String],
    int: &IntFlag,
) -> CmdResult {
    let mut new_roms = Vec::with_capacity(files.len());
    for file in files {
        new_roms.push(image::validate_file(Path::new(file))?);
    }

    let mut image = image::list(cart, page)?;
    image.check_consistency()?;

    check_titles(&image, &new_roms)?;

    let wanted: Enhancements = new_roms
        .iter()
        .fold(Enhancements::empty(), |acc, r| acc | r.header.enhancements);

    match image.menu() {
        Some(menu) => {
            let offered = menu.header.enhancements;
            for rom in &new_roms {
                if !compatible(offered, &rom.header) {
                    if !force {
                        return Err(Error::EnhancementIncompat {
                            title: rom.header.title.clone(),
                        }
                        .into());
                    }
                    log::warn!(
                        "{:?} is not compatible with the menu of this page",
                        rom.header.title
                    );
                }
            }
        }
        None => {
            if let Some(first) = image.roms().first() {
                if first.offset < MIN_ROM_SIZE {
                    return Err(Error::Format(
                        "bank 0 is occupied by a ROM that is not the menu".into(),
                    )
                    .into());
                }
            }
            let menu = load_menu(wanted)?;
            log::info!("adding menu from {:?}", menu_file_name(wanted));
            image.place(menu, 0)?;
        }
    }

    for rom in new_roms {
        insert_defrag(&mut image, rom).map_err(|_| Error::NoSpace)?;
    }

    let updates = plan(&image);
    if updates.is_empty() {
        println!("Nothing to do");
        return Ok(());
    }

    let mut progress = UpdateProgress::new(&updates);
    let mut engine = FlashEngine::new(cart)
        .with_progress(&mut progress)
        .with_interrupt(int);
    let result = apply(&mut engine, page * PAGE_SIZE, &updates);
    drop(engine);
    progress.finish(result.is_ok());
    result?;
    Ok(())
}

/// Titles must be unique across the inputs and against the flash.
fn check_titles(image: &Image, new_roms: &[Rom]) -> Result<(), Error> {
    for (i, rom) in new_roms.iter().enumerate() {
        if new_roms[..i]
            .iter()
            .any(|other| other.header.title == rom.header.title)
            || image.contains_title(&rom.header.title)
        {
            return Err(Error::DuplicateTitle(rom.header.title.clone()));
        }
    }
    Ok(())
}

/// A ROM runs under a menu that offers every enhancement it advertises;
/// a Color-only ROM additionally needs a Color-aware menu.
fn compatible(offered: Enhancements, header: &Header) -> bool {
    if !offered.contains(header.enhancements) {
        return false;
    }
    !header.gbc_only || offered.contains(Enhancements::GBC)
}

fn menu_file_name(enhancements: Enhancements) -> &'static str {
    let gbc = enhancements.contains(Enhancements::GBC);
    let sgb = enhancements.contains(Enhancements::SGB);
    match (gbc, sgb) {
        (false, false) => "menu.gb",
        (true, false) => "menuc.gb",
        (false, true) => "menus.gb",
        (true, true) => "menucs.gb",
    }
}

fn load_menu(enhancements: Enhancements) -> Result<Rom, Error> {
    let dir = std::env::var_os("MENUDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MENU_DIR));
    let path = dir.join(menu_file_name(enhancements));

    let rom = image::validate_file(&path)?;
    if rom.header.title != MENU_TITLE || rom.size != MIN_ROM_SIZE {
        return Err(Error::BadRom {
            path,
            reason: "not a menu ROM".into(),
        });
    }
    Ok(rom)
}
