//! Trait abstraction for the host controller driver to enable testing

use std::sync::Arc;

use crate::controller::input_source::{EmulationContext, InputDataTransferHandler};
use crate::controller::sample::{Port, PortMask, RawSample, SamplingMode};

use super::{HostResult, RegistrationHandle};

/// Read access to the physical pad.
pub trait PadSampler: Send + Sync {
    /// Peek the latest raw sample without consuming it.
    fn peek_buffer_positive(&self) -> HostResult<RawSample>;
}

/// An input source as handed to [`ControllerDriver::set_input_handler`].
#[derive(Debug, Clone)]
pub struct InputSource {
    /// Handler descriptor.
    pub handler: InputDataTransferHandler,
    /// Context passed back to the handler on every call.
    pub context: Option<Arc<EmulationContext>>,
}

impl InputSource {
    /// Creates an input source from a descriptor and its context.
    #[must_use]
    pub fn new(handler: InputDataTransferHandler, context: Option<Arc<EmulationContext>>) -> Self {
        Self { handler, context }
    }
}

/// Calls the emulation pipeline makes into the host controller driver.
pub trait ControllerDriver: PadSampler {
    /// Route basic reads of the ports in `mask` through their emulation slot.
    ///
    /// An empty mask disables passthrough for every port.
    fn enable_port_passthrough(&self, mask: PortMask) -> HostResult<()>;

    /// Install (`Some`) or uninstall (`None`) the input source of `port`.
    ///
    /// Installing returns the new handle. Uninstalling returns the handle
    /// that was removed.
    fn set_input_handler(
        &self,
        port: Port,
        source: Option<InputSource>,
    ) -> HostResult<RegistrationHandle>;

    /// Switch the sampling mode, returning the previous one.
    fn set_sampling_mode(&self, mode: SamplingMode) -> HostResult<SamplingMode>;
}
