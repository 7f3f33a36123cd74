//! Port passthrough and sampling mode setup.
//!
//! Both calls change host-wide state: once passthrough is enabled for a
//! port, every basic read is served from that port's emulation slot until
//! someone resets the mask. Nothing here resets it.

use tracing::{debug, warn};

use crate::controller::sample::{Port, PortMask, SamplingMode};
use crate::host::{ControllerDriver, HostError, HostResult};

/// Routes basic reads of `port` through its emulation slot.
///
/// Returns the mask that was applied.
///
/// # Errors
///
/// `INVALID_ARGUMENT` for the primary port or an out-of-range port (the
/// driver is not called), otherwise whatever the driver reports.
pub fn enable_port_emulation(driver: &dyn ControllerDriver, port: Port) -> HostResult<PortMask> {
    let mask = PortMask::from_port(port).ok_or(HostError::INVALID_ARGUMENT)?;

    match driver.enable_port_passthrough(mask) {
        Ok(()) => {
            debug!("Passthrough enabled for {} (mask {:#04x})", port, mask.0);
            Ok(mask)
        }
        Err(e) => {
            warn!("Failed to enable passthrough for {}: {}", port, e);
            Err(e)
        }
    }
}

/// Switches the controller to digital + analog sampling.
///
/// Returns the previous mode.
///
/// # Errors
///
/// Whatever the driver reports.
pub fn enable_analog_sampling(driver: &dyn ControllerDriver) -> HostResult<SamplingMode> {
    match driver.set_sampling_mode(SamplingMode::DigitalAnalog) {
        Ok(previous) => {
            debug!("Sampling mode set to analog (was {:?})", previous);
            Ok(previous)
        }
        Err(e) => {
            warn!("Failed to set analog sampling mode: {}", e);
            Err(e)
        }
    }
}
