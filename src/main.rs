//! emsflash - Multi-ROM manager for the EMS 64 Mbit USB flash cart
//!
//! Lists, writes, moves and deletes ROMs on a 4 MiB flash page without
//! re-flashing the whole page. Set `IMAGEFILE` in the environment to run
//! against a file-backed cartridge emulation instead of the USB device.

mod cli;
mod commands;
mod interrupt;
mod progress;

use clap::Parser;
use cli::{Cli, Mode};
use emsflash_core::transport::Transport;
use emsflash_core::Error;
use emsflash_file::FileCart;
use emsflash_usb::UsbCart;
use interrupt::IntFlag;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> commands::CmdResult {
    let page = cli.bank - 1;
    let mode = cli.mode();

    check_args(cli, mode)?;

    let int = IntFlag::install()?;

    with_cart(|cart| match mode {
        Mode::Title => commands::run_title(cart, page),
        Mode::Write => {
            // .sav inputs go straight to the save RAM
            let space = cli.space_for(cli.args.first().map(String::as_str));
            if space == emsflash_core::transport::Space::Sram {
                commands::run_restore(cart, page, space, &cli.args[0], &int)
            } else {
                commands::run_write(cart, page, cli.force, &cli.args, &int)
            }
        }
        Mode::Read | Mode::Dump => {
            let space = cli.space_for(Some(cli.args[0].as_str()));
            commands::run_dump(cart, page, space, &cli.args[0], &int)
        }
        Mode::Restore => {
            let space = cli.space_for(Some(cli.args[0].as_str()));
            commands::run_restore(cart, page, space, &cli.args[0], &int)
        }
        Mode::Delete => commands::run_delete(cart, page, &cli.args, &int),
        Mode::Format => commands::run_format(cart, page, &int),
    })
}

/// Positional-argument rules per mode, checked before any device I/O.
fn check_args(cli: &Cli, mode: Mode) -> commands::CmdResult {
    let invalid = |msg: &str| Err(Error::InvalidArg(msg.into()).into());
    match mode {
        Mode::Title | Mode::Format => {
            if !cli.args.is_empty() {
                return invalid("no argument expected");
            }
        }
        Mode::Delete => {
            if cli.args.is_empty() {
                return invalid("you must provide bank numbers");
            }
        }
        Mode::Write => {
            if cli.args.is_empty() {
                return invalid("you must provide an input filename");
            }
        }
        Mode::Read | Mode::Dump => {
            if cli.args.len() != 1 {
                return invalid("you must provide an output filename");
            }
        }
        Mode::Restore => {
            if cli.args.len() != 1 {
                return invalid("you must provide an input filename");
            }
        }
    }
    Ok(())
}

/// Open the cartridge: the USB device, or a file-backed emulation when
/// `IMAGEFILE` is set.
fn with_cart<F>(f: F) -> commands::CmdResult
where
    F: FnOnce(&mut dyn Transport) -> commands::CmdResult,
{
    match std::env::var_os("IMAGEFILE") {
        Some(path) => {
            log::debug!("IMAGEFILE set, using the file-backed cart");
            let mut cart = FileCart::open(path)?;
            f(&mut cart)
        }
        None => {
            let mut cart = UsbCart::open()?;
            f(&mut cart)
        }
    }
}
