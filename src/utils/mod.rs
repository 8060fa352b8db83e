// src/utils/mod.rs
//! Common utility functions for ChipFlow core
//!
//! Time helpers and the injectable stall clock used by hardware sequences.

pub mod time;

pub use time::{millis, minutes_seconds, Clock, ManualClock, SystemClock};
