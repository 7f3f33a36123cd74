//! # Simulated Controller Subsystem
//!
//! [`SimController`] plays the host side of the controller driver: it holds
//! the physical pad's raw sample, the per-port input source slots, the
//! passthrough mask and the sampling mode, and it runs the polling loop that
//! calls installed input sources.
//!
//! ## Reads
//!
//! - [`PadSampler::peek_buffer_positive`]: raw physical pad only. This is
//!   what input sources read, so they never see their own output.
//! - [`SimController::read_buffer_positive`]: the application-facing basic
//!   read. Every passthrough-enabled port's emulation slot is merged in:
//!   buttons are ORed, and the stick is taken from the slot when the slot's
//!   stick is off-center.
//!
//! ## Polling
//!
//! [`SimController::poll`] is one iteration of the host polling loop. For
//! each port with an installed source it hands the handler a fresh,
//! timestamped buffer and stores the result in the port's emulation slot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::controller::input_source::InputDataTransferHandler;
use crate::controller::sample::{
    EmulatedSample, Port, PortMask, RawSample, SamplingMode, ANALOG_CENTER, EXTERNAL_PORT_COUNT,
};

use super::{ControllerDriver, HostError, HostResult, InputSource, PadSampler, RegistrationHandle};

const PORTS: usize = EXTERNAL_PORT_COUNT as usize;

/// Input source installed on one port.
struct InstalledSource {
    handle: RegistrationHandle,
    source: InputSource,
}

#[derive(Default)]
struct PortSlot {
    installed: Option<InstalledSource>,
    emulated: Option<EmulatedSample>,
}

/// Outcome of one [`SimController::poll`] iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollReport {
    /// Input sources invoked.
    pub invoked: usize,
    /// Input sources that returned a negative status.
    pub failed: usize,
}

/// In-process controller subsystem.
pub struct SimController {
    raw: Mutex<RawSample>,
    read_error: Mutex<Option<HostError>>,
    passthrough: AtomicU32,
    sampling_mode: Mutex<SamplingMode>,
    slots: Mutex<[PortSlot; PORTS]>,
    next_handle: AtomicU32,
    clock: AtomicU32,
}

impl std::fmt::Debug for SimController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimController")
            .field("raw", &*self.raw.lock())
            .field("passthrough", &self.passthrough_mask())
            .field("sampling_mode", &self.sampling_mode())
            .finish_non_exhaustive()
    }
}

impl Default for SimController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimController {
    /// Polling loop period the timestamps advance by, in microseconds.
    pub const POLL_PERIOD_US: u32 = 16_666;

    /// Creates a controller with a centered pad and nothing installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            raw: Mutex::new(RawSample::default()),
            read_error: Mutex::new(None),
            passthrough: AtomicU32::new(0),
            sampling_mode: Mutex::new(SamplingMode::Digital),
            slots: Mutex::new(Default::default()),
            next_handle: AtomicU32::new(0),
            clock: AtomicU32::new(0),
        }
    }

    /// Replaces the physical pad state.
    pub fn set_raw_sample(&self, sample: RawSample) {
        *self.raw.lock() = sample;
    }

    /// Makes raw reads fail with `error` until cleared with `None`.
    pub fn set_read_error(&self, error: Option<HostError>) {
        *self.read_error.lock() = error;
    }

    /// Current passthrough mask.
    #[must_use]
    pub fn passthrough_mask(&self) -> PortMask {
        PortMask(self.passthrough.load(Ordering::Acquire))
    }

    /// Current sampling mode.
    #[must_use]
    pub fn sampling_mode(&self) -> SamplingMode {
        *self.sampling_mode.lock()
    }

    /// Handle of the source installed on `port`, if any.
    #[must_use]
    pub fn installed_handle(&self, port: Port) -> Option<RegistrationHandle> {
        let slot = port.slot_index()?;
        self.slots.lock()[slot].installed.as_ref().map(|i| i.handle)
    }

    /// Latest sample produced for `port`'s emulation slot.
    #[must_use]
    pub fn emulated_sample(&self, port: Port) -> Option<EmulatedSample> {
        let slot = port.slot_index()?;
        self.slots.lock()[slot].emulated
    }

    /// Runs one polling-loop iteration.
    pub fn poll(&self) -> PollReport {
        let timestamp = self
            .clock
            .fetch_add(Self::POLL_PERIOD_US, Ordering::Relaxed)
            .wrapping_add(Self::POLL_PERIOD_US);
        let mut report = PollReport::default();

        for index in 0..PORTS {
            // Handlers read the pad, so no slot lock may be held while they run
            let source = self.slots.lock()[index]
                .installed
                .as_ref()
                .map(|installed| installed.source.clone());
            let Some(source) = source else { continue };

            let mut buffer = EmulatedSample {
                timestamp,
                ..EmulatedSample::default()
            };
            let status = (source.handler.copy_input_data)(source.context.as_deref(), &mut buffer);
            report.invoked += 1;

            if status < 0 {
                report.failed += 1;
                trace!("Input source on slot {} returned {:#x}", index, status);
                continue;
            }

            let mut slots = self.slots.lock();
            // Skip results for a source uninstalled mid-poll
            if slots[index].installed.is_some() {
                slots[index].emulated = Some(buffer);
            }
        }

        report
    }

    /// Application-facing basic read, with passthrough slots merged in.
    ///
    /// # Errors
    ///
    /// Fails when the raw pad read fails.
    pub fn read_buffer_positive(&self) -> HostResult<RawSample> {
        let mut sample = self.peek_buffer_positive()?;
        let mask = self.passthrough_mask();
        let slots = self.slots.lock();

        for port in (1..=EXTERNAL_PORT_COUNT).map(Port) {
            if !mask.contains(port) {
                continue;
            }
            let Some(index) = port.slot_index() else { continue };
            let Some(emulated) = slots[index].emulated else { continue };

            sample.buttons |= emulated.buttons;
            if emulated.primary_stick_active() {
                sample.lx = emulated.lx;
                sample.ly = emulated.ly;
            }
        }

        if self.sampling_mode() == SamplingMode::Digital {
            sample.lx = ANALOG_CENTER;
            sample.ly = ANALOG_CENTER;
        }

        Ok(sample)
    }
}

impl PadSampler for SimController {
    fn peek_buffer_positive(&self) -> HostResult<RawSample> {
        if let Some(error) = *self.read_error.lock() {
            return Err(error);
        }
        let mut sample = *self.raw.lock();
        sample.timestamp = self.clock.load(Ordering::Relaxed);
        Ok(sample)
    }
}

impl ControllerDriver for SimController {
    fn enable_port_passthrough(&self, mask: PortMask) -> HostResult<()> {
        let valid = (1u32 << EXTERNAL_PORT_COUNT) - 1;
        if mask.0 & !valid != 0 {
            return Err(HostError::INVALID_ARGUMENT);
        }

        self.passthrough.store(mask.0, Ordering::Release);
        debug!("Passthrough mask set to {:#04x}", mask.0);
        Ok(())
    }

    fn set_input_handler(
        &self,
        port: Port,
        source: Option<InputSource>,
    ) -> HostResult<RegistrationHandle> {
        let index = port.slot_index().ok_or(HostError::INVALID_ARGUMENT)?;
        let mut slots = self.slots.lock();
        let slot = &mut slots[index];

        match source {
            Some(source) => {
                if source.handler.size != InputDataTransferHandler::SIZE {
                    return Err(HostError::INVALID_SIZE);
                }
                if slot.installed.is_some() {
                    return Err(HostError::BUSY);
                }

                let handle =
                    RegistrationHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) as i32);
                slot.installed = Some(InstalledSource { handle, source });
                debug!("Installed {} on {}", handle, port);
                Ok(handle)
            }
            None => {
                let installed = slot.installed.take().ok_or(HostError::NOT_INSTALLED)?;
                slot.emulated = None;
                debug!("Uninstalled {} from {}", installed.handle, port);
                Ok(installed.handle)
            }
        }
    }

    fn set_sampling_mode(&self, mode: SamplingMode) -> HostResult<SamplingMode> {
        let mut current = self.sampling_mode.lock();
        Ok(std::mem::replace(&mut *current, mode))
    }
}
