//! Deckhand CLI library.
//!
//! Argument parsing and pipeline glue around the `deckhand_core` engine.

pub mod commands;
pub mod config;
pub mod security;
pub mod version;
