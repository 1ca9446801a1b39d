//! Interrupt wiring
//!
//! Termination requests (SIGINT/SIGTERM) are latched into a level-triggered
//! flag; the core polls it through the [`InterruptSource`] capability at
//! its cooperative points and unwinds into recovery when it is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emsflash_core::flash::InterruptSource;

/// Shared termination flag fed by the signal handler.
#[derive(Clone)]
pub struct IntFlag(Arc<AtomicBool>);

impl IntFlag {
    /// Install the handler and hand out the flag.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = flag.clone();
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))?;
        Ok(IntFlag(flag))
    }

    /// True once a termination request arrived.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl InterruptSource for IntFlag {
    fn pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
