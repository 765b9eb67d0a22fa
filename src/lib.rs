//! Core engine for a unified Linux block-device management library.
//!
//! This crate provides the pieces a higher-level plugin-oriented API is
//! built on: a plugin/technology runtime, a dependency checker for the
//! external utilities each plugin wraps, a blocking exec/progress engine,
//! and a set of self-contained decoders (SMART, NVMe, VDO statistics) that
//! read kernel and utility output directly rather than re-shelling out to
//! parse it twice.
//!
//! Everything here is synchronous. Plugin operations are expected to run on
//! a thread the caller owns; there is no bundled async runtime.

pub mod config;
pub mod deps;
pub mod error;
pub mod exec;
pub mod logging;
pub mod nvme;
pub mod plugin;
pub mod sizes;
pub mod smart;
pub mod vdo_stats;

pub use error::{BlockdevError, Result};
