//! Deckhand lifecycle engine.
//!
//! Everything needed to turn a declarative install request into a healthy,
//! supervised local cluster:
//!
//! - [`spec`] - version/source classification and plugin source resolution
//! - [`fetch`] / [`acquire`] - artifact downloads, the on-disk cache, and
//!   source checkouts
//! - [`configure`] - line-oriented config rewriting
//! - [`build`] - the opaque external build step and the plugin build
//!   fan-out
//! - [`health`] - HTTP readiness probes
//! - [`supervise`] - managed child processes and the health-wait loop
//! - [`shutdown`] - the process-wide shutdown registry
//!
//! The CLI lives in the `deckhand_manager` crate; this crate is the part
//! with real concurrency, timing, and failure handling.

pub mod acquire;
pub mod build;
pub mod configure;
pub mod error;
pub mod fetch;
pub mod git;
pub mod health;
pub mod retry;
pub mod shutdown;
pub mod spec;
pub mod supervise;

pub use error::{DeckhandError, DeckhandResult};
