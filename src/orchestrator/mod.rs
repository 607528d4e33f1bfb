//! Application-level orchestration.
//!
//! This module owns request dispatch, the single emulator slot and cache
//! maintenance. CLI layers call into this module to keep responsibilities separated.

mod controller;
mod maintenance;
mod supervisor;

pub(crate) use controller::{run_controller, Dispatcher, Outcome, Preview};
pub(crate) use maintenance::{
    cache_records, remove_extraction, spawn_startup_sweep, sweep_cache, SweepLimits,
};
