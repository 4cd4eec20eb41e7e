//! # dov-cli
//!
//! File-based front-end for the optical link. The sender "displays" by
//! writing numbered PNG files and the receiver "captures" by reading them
//! back, which makes the whole link reproducible without a screen or a
//! camera.

pub mod config;
pub mod png;
