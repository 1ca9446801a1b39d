//! Progress rendering for update streams
//!
//! The core reports one event per 4 KiB transferred plus a weightless tick
//! per erase; totals are precomputed from the stream (a move transfers its
//! size twice, once reading and once writing) so the bar lands exactly on
//! 100% when the stream completes.

use indicatif::{ProgressBar, ProgressStyle};

use emsflash_core::flash::{ProgressSink, Transfer};
use emsflash_core::update::Update;

pub struct UpdateProgress {
    bar: ProgressBar,
}

impl UpdateProgress {
    /// Create a bar sized from the stream's transfer totals.
    pub fn new(updates: &[Update]) -> Self {
        let mut total: u64 = 0;
        for update in updates {
            total += match *update {
                Update::WriteFile { size, .. } => u64::from(size),
                Update::Move { size, .. } => 2 * u64::from(size),
                Update::ReadSlot { size, .. } => u64::from(size),
                Update::WriteSlot { size, .. } => u64::from(size),
                Update::Erase { .. } => 0,
            };
        }

        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("Updating");
        UpdateProgress { bar }
    }

    pub fn finish(self, ok: bool) {
        if ok {
            self.bar.finish_with_message("Update complete");
        } else {
            self.bar.abandon_with_message("Update failed");
        }
    }
}

impl ProgressSink for UpdateProgress {
    fn report(&mut self, kind: Transfer, bytes: u32) {
        match kind {
            Transfer::Erase => self.bar.tick(),
            _ => self.bar.inc(u64::from(bytes)),
        }
    }
}

/// Plain byte-copy bar for dump/restore.
pub fn copy_bar(total: u64, msg: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_message(msg);
    bar
}
