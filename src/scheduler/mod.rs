//! Cycle scheduling
//!
//! # Modules
//!
//! - [`rotation`] - deterministic per-cycle start offset over the station list
//! - [`trigger`] - the cycle runner, the night pause window, and the interval trigger
//!
//! One cycle runs at a time. It is triggered either by the interval trigger
//! (`server.schedule_enabled`), by `POST /run`, or by the `run` CLI command.

pub mod rotation;
pub mod trigger;

pub use rotation::{cycle_index, rotate, rotate_for_cycle, rotation_offset};
pub use trigger::{
    is_night_pause_window, spawn_interval_trigger, CycleReport, CycleRunner, CycleSettings,
};
