//! # Input Source Module
//!
//! The handler the host's controller polling loop calls to produce one
//! emulated sample, and the context it reads.
//!
//! ## Calling Convention
//!
//! The host calls `copy_input_data(context, out)` once per polling-loop
//! iteration for every installed input source. `out` is a host-owned buffer,
//! valid and writable for the duration of the call. `context` is whatever
//! was passed at installation time and may be absent.
//!
//! ## Algorithm
//!
//! 1. Seed buttons come from the context (none if the context is absent).
//! 2. [`EmulationDesign::Handler`]: the raw pad is peeked through the
//!    context's sampler and the translation policy turns the stick position
//!    into directions, which are ORed into the seed. If the peek fails, only
//!    the seed buttons are reported.
//! 3. [`EmulationDesign::Timer`]: the pad is not read at all. The directions
//!    last published by the owning thread's timer callback are ORed into the
//!    seed.
//! 4. Every other field is written to its neutral value, and the secondary
//!    stick gets the policy's secondary transform of the stick that was read
//!    (centered when nothing was read).
//!
//! The handler never fails: it returns [`STATUS_OK`] unconditionally.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use pad_emulator::controller::input_source::{copy_input_data, EmulationContext};
//! use pad_emulator::controller::sample::{Buttons, EmulatedSample, RawSample};
//! use pad_emulator::controller::translation::AsymmetricDeflection;
//! use pad_emulator::host::sim::SimController;
//!
//! let sim = Arc::new(SimController::new());
//! sim.set_raw_sample(RawSample::with_stick(250, 128));
//!
//! let context = EmulationContext::new(
//!     Buttons::empty(),
//!     Arc::new(AsymmetricDeflection::default()),
//!     sim,
//! );
//!
//! let mut out = EmulatedSample::default();
//! assert_eq!(copy_input_data(Some(&context), &mut out), 0);
//! assert_eq!(out.buttons, Buttons::RIGHT);
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::trace;

use super::sample::{Buttons, EmulatedSample, ANALOG_CENTER};
use super::translation::TranslationPolicy;
use crate::host::PadSampler;

/// Status returned by [`copy_input_data`].
pub const STATUS_OK: i32 = 0;

/// Signature of an input source handler.
pub type CopyInputDataFn = fn(Option<&EmulationContext>, &mut EmulatedSample) -> i32;

/// Handler descriptor handed to the host at installation.
///
/// `size` carries the descriptor's own byte size so the host can reject a
/// descriptor built against a different layout.
#[derive(Debug, Clone, Copy)]
pub struct InputDataTransferHandler {
    /// Byte size of this descriptor.
    pub size: u32,
    /// Function the polling loop calls.
    pub copy_input_data: CopyInputDataFn,
}

impl InputDataTransferHandler {
    /// Byte size a well-formed descriptor reports.
    pub const SIZE: u32 = std::mem::size_of::<InputDataTransferHandler>() as u32;

    /// Creates a descriptor for `handler` with the correct size.
    #[must_use]
    pub fn new(handler: CopyInputDataFn) -> Self {
        Self {
            size: Self::SIZE,
            copy_input_data: handler,
        }
    }
}

impl Default for InputDataTransferHandler {
    fn default() -> Self {
        Self::new(copy_input_data)
    }
}

/// Where the directions reported by the input source come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmulationDesign {
    /// The input source translates the stick itself on every poll.
    #[default]
    Handler,
    /// A periodic virtual timer drives the translation on the owning thread
    /// and the input source reports the stored result without reading the pad.
    Timer,
}

/// State shared between the owning thread and the polling loop.
///
/// The seed is written once, before the handler is installed, and only read
/// afterwards. The timer word is written solely by the owning thread's timer
/// callback and only read by the handler in the timer-driven design.
pub struct EmulationContext {
    design: EmulationDesign,
    seed: AtomicU32,
    timer_buttons: AtomicU32,
    policy: Arc<dyn TranslationPolicy>,
    sampler: Arc<dyn PadSampler>,
}

impl std::fmt::Debug for EmulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulationContext")
            .field("design", &self.design)
            .field("seed", &self.seed())
            .field("timer_buttons", &self.timer_buttons())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EmulationContext {
    /// Creates a handler-design context seeded with `seed`.
    #[must_use]
    pub fn new(
        seed: Buttons,
        policy: Arc<dyn TranslationPolicy>,
        sampler: Arc<dyn PadSampler>,
    ) -> Self {
        Self {
            design: EmulationDesign::Handler,
            seed: AtomicU32::new(seed.bits()),
            timer_buttons: AtomicU32::new(0),
            policy,
            sampler,
        }
    }

    /// Switches the context to `design`.
    #[must_use]
    pub fn with_design(mut self, design: EmulationDesign) -> Self {
        self.design = design;
        self
    }

    #[must_use]
    pub fn design(&self) -> EmulationDesign {
        self.design
    }

    /// Seed buttons reported on every invocation.
    #[must_use]
    pub fn seed(&self) -> Buttons {
        Buttons::from_bits_retain(self.seed.load(Ordering::Acquire))
    }

    /// Buttons last published by the timer callback.
    #[must_use]
    pub fn timer_buttons(&self) -> Buttons {
        Buttons::from_bits_retain(self.timer_buttons.load(Ordering::Acquire))
    }

    /// Publishes the timer callback's latest translation.
    pub fn publish_timer_buttons(&self, buttons: Buttons) {
        self.timer_buttons.store(buttons.bits(), Ordering::Release);
    }

    /// Translation policy in use.
    #[must_use]
    pub fn policy(&self) -> &dyn TranslationPolicy {
        self.policy.as_ref()
    }

    /// Raw pad sampler.
    #[must_use]
    pub fn sampler(&self) -> &dyn PadSampler {
        self.sampler.as_ref()
    }

    /// Peeks the raw pad and translates the stick, as the timer callback does.
    ///
    /// Returns `None` when the raw read fails.
    #[must_use]
    pub fn sample_directions(&self) -> Option<Buttons> {
        self.sampler
            .peek_buffer_positive()
            .ok()
            .map(|raw| self.policy.directions(raw.lx, raw.ly))
    }
}

/// Produces one emulated sample.
///
/// See the [module documentation](self) for the algorithm.
pub fn copy_input_data(context: Option<&EmulationContext>, out: &mut EmulatedSample) -> i32 {
    let mut buttons = Buttons::empty();
    let mut secondary = (ANALOG_CENTER, ANALOG_CENTER);

    if let Some(ctx) = context {
        buttons = ctx.seed();

        match ctx.design() {
            EmulationDesign::Handler => match ctx.sampler().peek_buffer_positive() {
                Ok(raw) => {
                    buttons |= ctx.policy().directions(raw.lx, raw.ly);
                    secondary = ctx.policy().secondary_stick(raw.lx, raw.ly);
                }
                Err(e) => {
                    trace!("Raw pad read failed, reporting seed only: {}", e);
                }
            },
            EmulationDesign::Timer => buttons |= ctx.timer_buttons(),
        }
    }

    if !buttons.is_empty() {
        trace!(
            "Input source timestamp: 0x{:08x}, buttons: 0x{:08x}",
            out.timestamp,
            buttons.bits()
        );
    }

    out.reset_neutral();
    out.buttons = buttons;
    out.rx = secondary.0;
    out.ry = secondary.1;

    STATUS_OK
}
