//! # Emulation Module
//!
//! Everything that runs on the module's side of the host boundary.
//!
//! This module handles:
//! - Port passthrough and sampling mode setup ([`enabler`])
//! - The owning thread's install / sleep / uninstall lifecycle ([`lifecycle`])
//! - Module start and stop ([`module`])

pub mod enabler;
pub mod lifecycle;
pub mod module;

pub use lifecycle::{LifecycleState, LifecycleStateCell};
pub use module::{EmulatorModule, ModuleStatus};
