//! Command-line interface
//!
//! `commands` holds the process flags and the grammar of one shell line;
//! `shell` runs the read-eval loop against a started node.

pub mod commands;
pub mod shell;

pub use commands::{Opt, ShellCommand, ShellLine};
pub use shell::{CommandShell, ShellOutcome};
