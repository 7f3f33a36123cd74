//! # Pad Emulator Library
//!
//! Emulates an external controller port and injects its state into the
//! host's basic pad reads.
//!
//! An owning thread installs an input source on an external port and enables
//! passthrough for it. The host polling loop then calls the source on every
//! iteration; the source reads the physical stick and reports deflections
//! past a threshold as d-pad buttons.

pub mod config;
pub mod controller;
pub mod emulation;
pub mod error;
pub mod host;
pub mod logging;
