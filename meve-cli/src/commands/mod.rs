//! Subcommand implementations.

pub mod hash;
pub mod inspect;
pub mod protect;
pub mod verify;
