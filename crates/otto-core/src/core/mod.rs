//! Internal implementation modules for `otto-core`.

pub mod config;
pub mod launcher;
pub mod reaper;
pub mod stage;
pub mod store;
pub mod tooling;
