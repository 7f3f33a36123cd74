//! # Controller Module
//!
//! Pad data model and the emulated input source.
//!
//! This module handles:
//! - Raw and emulated sample records, button masks and ports
//! - Translating stick deflection into directional buttons
//! - The input source handler called by the host polling loop

pub mod input_source;
pub mod sample;
pub mod translation;
