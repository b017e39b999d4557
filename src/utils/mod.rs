//! Common utilities shared across the crate

pub mod error;
