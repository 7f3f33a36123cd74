//! # Host Module
//!
//! Interfaces to the host platform that the emulation pipeline consumes, plus
//! an in-process simulation of that host.
//!
//! This module handles:
//! - Host status codes ([`HostError`]) and opaque handles
//! - The controller driver seam ([`driver_trait`])
//! - The kernel seam: threads, callbacks, virtual timers ([`kernel_trait`])
//! - A `std::thread` backed kernel ([`kernel::StdKernel`])
//! - A simulated controller subsystem ([`sim::SimController`])

pub mod driver_trait;
pub mod kernel;
pub mod kernel_trait;
pub mod sim;

#[cfg(test)]
pub mod mocks;

pub use driver_trait::{ControllerDriver, InputSource, PadSampler};
pub use kernel_trait::{
    CallbackNotifier, ThreadEntry, ThreadEvent, ThreadManager, ThreadServices, VirtualTimers,
};

use thiserror::Error;

/// Result of a host call.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Negative status returned by a host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("host call failed: {name} (0x{code:08x})", name = self.name())]
pub struct HostError {
    code: u32,
}

impl HostError {
    /// Resource already in use.
    pub const BUSY: HostError = HostError::new(0x8000_0021);
    /// Nothing is installed where something was expected.
    pub const NOT_INSTALLED: HostError = HostError::new(0x8000_0025);
    /// Raw pad read failed.
    pub const READ_FAILED: HostError = HostError::new(0x8000_0023);
    /// Self-described structure size does not match.
    pub const INVALID_SIZE: HostError = HostError::new(0x8000_0104);
    /// Argument out of range.
    pub const INVALID_ARGUMENT: HostError = HostError::new(0x8000_0107);
    /// Unknown thread id.
    pub const UNKNOWN_THREAD: HostError = HostError::new(0x8002_0198);
    /// Unknown callback id.
    pub const UNKNOWN_CALLBACK: HostError = HostError::new(0x8002_01a1);
    /// Unknown virtual timer id.
    pub const UNKNOWN_TIMER: HostError = HostError::new(0x8002_01a5);
    /// Thread has not been started, or has already exited.
    pub const DORMANT: HostError = HostError::new(0x8002_01a2);
    /// Thread is running and cannot be started or deleted.
    pub const NOT_DORMANT: HostError = HostError::new(0x8002_01a4);
    /// Bounded wait expired.
    pub const WAIT_TIMEOUT: HostError = HostError::new(0x8002_01a8);
    /// Calling thread was forcibly terminated.
    pub const TERMINATED: HostError = HostError::new(0x8002_01ac);
    /// Host could not allocate a resource.
    pub const NO_MEMORY: HostError = HostError::new(0x8002_00d9);

    /// Wraps a raw status code.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self { code }
    }

    /// Raw status code.
    #[must_use]
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// Status as the signed value a host call returns.
    #[must_use]
    pub const fn status(&self) -> i32 {
        self.code as i32
    }

    /// Symbolic name of a known status, or `"unknown"`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match *self {
            Self::BUSY => "busy",
            Self::NOT_INSTALLED => "not installed",
            Self::READ_FAILED => "read failed",
            Self::INVALID_SIZE => "invalid size",
            Self::INVALID_ARGUMENT => "invalid argument",
            Self::UNKNOWN_THREAD => "unknown thread",
            Self::UNKNOWN_CALLBACK => "unknown callback",
            Self::UNKNOWN_TIMER => "unknown timer",
            Self::DORMANT => "dormant",
            Self::NOT_DORMANT => "not dormant",
            Self::WAIT_TIMEOUT => "wait timeout",
            Self::TERMINATED => "terminated",
            Self::NO_MEMORY => "no memory",
            _ => "unknown",
        }
    }
}

macro_rules! host_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub i32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($label, " 0x{:08x}"), self.0)
            }
        }
    };
}

host_id!(
    /// Identifier of a host thread.
    ThreadId,
    "thread"
);
host_id!(
    /// Identifier of a kernel callback object.
    CallbackId,
    "callback"
);
host_id!(
    /// Identifier of a virtual timer.
    TimerId,
    "vtimer"
);
host_id!(
    /// Identifier of an installed input source. Always non-negative.
    RegistrationHandle,
    "input source"
);
