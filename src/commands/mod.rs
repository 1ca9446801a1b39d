//! Subcommand implementations

mod delete;
mod dump;
mod format;
mod title;
mod write;

pub use delete::run_delete;
pub use dump::{run_dump, run_restore};
pub use format::run_format;
pub use title::run_title;
pub use write::run_write;

/// Shared error type of the CLI layer.
pub type CmdResult = Result<(), Box<dyn std::error::Error>>;
