//! Configuration management
//!
//! Settings are layered: built-in defaults, then `<home>/config.toml`, then
//! `LNSHELL_*` environment variables, then process flags.

pub mod settings;

pub use settings::{
    default_chain_url, Config, ConfigOverrides, Seed, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_HANDOFF_TIMEOUT_MS, DEFAULT_NEGOTIATION_TIMEOUT_MS,
};
