//! # Lifecycle Controller
//!
//! Body of the owning thread: installs the emulated input source, sleeps
//! while the host polling loop calls it, and tears everything down after
//! wakeup.
//!
//! ## States
//!
//! ```text
//! Idle -> Installing -> Running -> Draining -> Uninstalling -> Idle
//! ```
//!
//! The current state is published through a [`LifecycleStateCell`] shared
//! with the module boundary.
//!
//! ## Installing
//!
//! 1. Enable passthrough for the emulated port.
//! 2. Register the input source, recording its handle.
//! 3. Switch sampling to digital + analog (if enabled).
//! 4. Timer-driven design only: create a callback on this thread, create a
//!    virtual timer, stop it, zero its clock, attach the periodic handler and
//!    start it.
//!
//! A failed step is logged. By default setup carries on with whatever it has;
//! with `abort_on_setup_failure` the first failure releases everything
//! acquired so far and the thread exits with [`EXIT_SETUP_ABORTED`].
//!
//! ## Timer-Driven Design
//!
//! The virtual timer handler runs in timer context and never touches the pad
//! or the context. It only notifies the callback. The callback runs on this
//! thread while it services callbacks in `Running`, reads the pad, and
//! publishes the translated directions into the context's timer word.
//!
//! ## Uninstalling
//!
//! Reverse order of acquisition: timer, callback, input source. Every step
//! runs regardless of earlier failures.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::enabler::{enable_analog_sampling, enable_port_emulation};
use crate::config::{Config, EmulationDesign};
use crate::controller::input_source::{EmulationContext, InputDataTransferHandler};
use crate::controller::sample::Port;
use crate::host::kernel_trait::{CallbackFn, TimerHandler};
use crate::host::{
    CallbackId, ControllerDriver, HostError, HostResult, InputSource, RegistrationHandle,
    ThreadEntry, ThreadServices, TimerId, VirtualTimers,
};

/// Exit status of a thread that ran to completion.
pub const EXIT_OK: i32 = 0;

/// Exit status of a thread that aborted setup.
pub const EXIT_SETUP_ABORTED: i32 = 1;

/// Name of the owning thread's timer callback.
pub const TIMER_CALLBACK_NAME: &str = "EmulatedController Timer Callback";

/// Name of the virtual timer.
pub const TIMER_NAME: &str = "EmulatedController Timer";

/// Phase of the owning thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Idle = 0,
    Installing = 1,
    Running = 2,
    Draining = 3,
    Uninstalling = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Installing,
            2 => Self::Running,
            3 => Self::Draining,
            4 => Self::Uninstalling,
            _ => Self::Idle,
        }
    }
}

/// Lock-free holder of the current [`LifecycleState`].
#[derive(Debug)]
pub struct LifecycleStateCell(AtomicU8);

impl Default for LifecycleStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateCell {
    /// Creates a cell in [`LifecycleState::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Idle as u8))
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `state`.
    pub fn set(&self, state: LifecycleState) {
        let previous = LifecycleState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        debug!("Lifecycle {:?} -> {:?}", previous, state);
    }
}

/// What the owning thread installs and how it reacts to failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub port: Port,
    pub design: EmulationDesign,
    pub analog_sampling: bool,
    pub timer_period: Duration,
    pub abort_on_setup_failure: bool,
}

impl LifecycleSettings {
    /// Extracts the lifecycle settings from a full configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.emulation.port(),
            design: config.emulation.design,
            analog_sampling: config.emulation.analog_sampling,
            timer_period: config.lifecycle.timer_period(),
            abort_on_setup_failure: config.lifecycle.abort_on_setup_failure,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Host resources held by the owning thread.
#[derive(Debug, Default)]
struct Acquired {
    handle: Option<RegistrationHandle>,
    callback: Option<CallbackId>,
    timer: Option<TimerId>,
}

/// The owning thread of one activation.
pub struct OwningThread {
    settings: LifecycleSettings,
    driver: Arc<dyn ControllerDriver>,
    timers: Arc<dyn VirtualTimers>,
    context: Arc<EmulationContext>,
    state: Arc<LifecycleStateCell>,
}

impl OwningThread {
    pub fn new(
        settings: LifecycleSettings,
        driver: Arc<dyn ControllerDriver>,
        timers: Arc<dyn VirtualTimers>,
        context: Arc<EmulationContext>,
        state: Arc<LifecycleStateCell>,
    ) -> Self {
        Self {
            settings,
            driver,
            timers,
            context,
            state,
        }
    }

    /// Wraps the thread body as a host thread entry point.
    #[must_use]
    pub fn into_entry(self) -> ThreadEntry {
        Box::new(move |services| self.run(services))
    }

    /// Runs the whole lifecycle on the calling thread and returns its exit
    /// status.
    pub fn run(self, services: &dyn ThreadServices) -> i32 {
        debug!("Owning thread {} running", services.thread_id());
        self.state.set(LifecycleState::Installing);

        let mut acquired = Acquired::default();
        if let Err(e) = self.install(services, &mut acquired) {
            warn!("Setup aborted ({}), releasing acquired resources", e);
            self.state.set(LifecycleState::Uninstalling);
            self.uninstall(services, acquired);
            self.state.set(LifecycleState::Idle);
            return EXIT_SETUP_ABORTED;
        }

        self.state.set(LifecycleState::Running);
        debug!("Now processing callbacks");
        if let Err(e) = services.sleep_thread_cb() {
            warn!("Callback sleep ended abnormally: {}", e);
        }

        self.state.set(LifecycleState::Draining);
        self.state.set(LifecycleState::Uninstalling);
        self.uninstall(services, acquired);
        self.state.set(LifecycleState::Idle);

        EXIT_OK
    }

    /// `Ok` to carry on after a failed step, `Err` to abort setup.
    fn on_failure(&self, error: HostError) -> HostResult<()> {
        if self.settings.abort_on_setup_failure {
            Err(error)
        } else {
            Ok(())
        }
    }

    fn install(&self, services: &dyn ThreadServices, acquired: &mut Acquired) -> HostResult<()> {
        let port = self.settings.port;

        debug!("Registering input source on {}", port);
        if let Err(e) = enable_port_emulation(self.driver.as_ref(), port) {
            self.on_failure(e)?;
        }

        let source = InputSource::new(
            InputDataTransferHandler::default(),
            Some(self.context.clone()),
        );
        match self.driver.set_input_handler(port, Some(source)) {
            Ok(handle) => {
                debug!("Registered {} on {}", handle, port);
                acquired.handle = Some(handle);
            }
            Err(e) => {
                warn!("Failed to register input source on {}: {}", port, e);
                self.on_failure(e)?;
            }
        }

        if self.settings.analog_sampling {
            if let Err(e) = enable_analog_sampling(self.driver.as_ref()) {
                self.on_failure(e)?;
            }
        }

        if self.settings.design == EmulationDesign::Timer {
            self.install_timer(services, acquired)?;
        }

        Ok(())
    }

    fn install_timer(&self, services: &dyn ThreadServices, acquired: &mut Acquired) -> HostResult<()> {
        debug!("Creating timer callback");
        let context = self.context.clone();
        let callback: CallbackFn = Box::new(move |_id, _arg| {
            match context.sample_directions() {
                Some(buttons) => context.publish_timer_buttons(buttons),
                None => trace!("Timer callback could not read the pad"),
            }
            0
        });

        let notifier = match services.create_callback(TIMER_CALLBACK_NAME, callback) {
            Ok(notifier) => {
                acquired.callback = Some(notifier.id());
                notifier
            }
            Err(e) => {
                warn!("Failed to create timer callback: {}", e);
                return self.on_failure(e);
            }
        };

        debug!("Registering timer");
        let timer = match self.timers.create_vtimer(TIMER_NAME) {
            Ok(timer) => {
                acquired.timer = Some(timer);
                timer
            }
            Err(e) => {
                warn!("Failed to create timer: {}", e);
                return self.on_failure(e);
            }
        };

        if let Err(e) = self.timers.stop_vtimer(timer) {
            warn!("Failed to stop {}: {}", timer, e);
            self.on_failure(e)?;
        }

        if let Err(e) = self.timers.set_vtimer_time(timer, Duration::ZERO) {
            warn!("Failed to reset {}: {}", timer, e);
            self.on_failure(e)?;
        }

        let period = self.settings.timer_period;
        let handler: TimerHandler = Box::new(move |id, _schedule, _actual| {
            match notifier.notify(id.0) {
                Ok(()) => Some(period),
                Err(e) => {
                    trace!("Timer {} could not notify its callback: {}", id, e);
                    None
                }
            }
        });
        if let Err(e) = self.timers.set_vtimer_handler(timer, period, handler) {
            warn!("Failed to attach handler to {}: {}", timer, e);
            self.on_failure(e)?;
        }

        debug!("Starting {}", timer);
        if let Err(e) = self.timers.start_vtimer(timer) {
            warn!("Failed to start {}: {}", timer, e);
            self.on_failure(e)?;
        }

        Ok(())
    }

    fn uninstall(&self, services: &dyn ThreadServices, acquired: Acquired) {
        if let Some(timer) = acquired.timer {
            debug!("Deleting {}", timer);
            if let Err(e) = self.timers.delete_vtimer(timer) {
                warn!("Failed to delete {}: {}", timer, e);
            }
        }

        if let Some(callback) = acquired.callback {
            debug!("Deleting {}", callback);
            if let Err(e) = services.delete_callback(callback) {
                warn!("Failed to delete {}: {}", callback, e);
            }
        }

        if let Some(handle) = acquired.handle {
            let port = self.settings.port;
            debug!("Deregistering {} from {}", handle, port);
            match self.driver.set_input_handler(port, None) {
                Ok(removed) if removed != handle => {
                    warn!("Deregistration removed {} but {} was installed", removed, handle);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to deregister {}: {}", handle, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::sample::{Buttons, RawSample};
    use crate::controller::translation::AsymmetricDeflection;
    use crate::host::mocks::{CallLog, MockDriver, MockKernel, MockThreadServices};
    use std::sync::Mutex;

    struct Harness {
        log: CallLog,
        driver: Arc<MockDriver>,
        kernel: Arc<MockKernel>,
        services: MockThreadServices,
        context: Arc<EmulationContext>,
        state: Arc<LifecycleStateCell>,
    }

    impl Harness {
        fn new() -> Self {
            let log = CallLog::new();
            let driver = Arc::new(MockDriver::with_log(log.clone()));
            let context = Arc::new(EmulationContext::new(
                Buttons::CROSS,
                Arc::new(AsymmetricDeflection::default()),
                driver.clone(),
            ));
            Self {
                kernel: Arc::new(MockKernel::with_log(log.clone())),
                services: MockThreadServices::with_log(log.clone()),
                driver,
                context,
                state: Arc::new(LifecycleStateCell::new()),
                log,
            }
        }

        fn run(&self, settings: LifecycleSettings) -> i32 {
            let thread = OwningThread::new(
                settings,
                self.driver.clone(),
                self.kernel.clone(),
                self.context.clone(),
                self.state.clone(),
            );
            thread.run(&self.services)
        }
    }

    fn timer_settings() -> LifecycleSettings {
        LifecycleSettings {
            design: EmulationDesign::Timer,
            ..LifecycleSettings::default()
        }
    }

    fn strict(settings: LifecycleSettings) -> LifecycleSettings {
        LifecycleSettings {
            abort_on_setup_failure: true,
            ..settings
        }
    }

    // ==================== State Cell Tests ====================

    #[test]
    fn test_state_cell_starts_idle() {
        assert_eq!(LifecycleStateCell::new().get(), LifecycleState::Idle);
    }

    #[test]
    fn test_state_cell_roundtrip() {
        let cell = LifecycleStateCell::new();
        for state in [
            LifecycleState::Installing,
            LifecycleState::Running,
            LifecycleState::Draining,
            LifecycleState::Uninstalling,
            LifecycleState::Idle,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    // ==================== Handler Design Tests ====================

    #[test]
    fn test_handler_design_order() {
        let harness = Harness::new();

        let status = harness.run(LifecycleSettings::default());

        assert_eq!(status, EXIT_OK);
        assert_eq!(
            harness.log.calls(),
            vec![
                "enable_port_passthrough",
                "install_handler",
                "set_sampling_mode",
                "sleep_thread_cb",
                "uninstall_handler",
            ]
        );
        assert_eq!(harness.state.get(), LifecycleState::Idle);
        assert!(harness.driver.installed_source().is_none());
    }

    #[test]
    fn test_running_while_asleep() {
        let harness = Harness::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_hook = seen.clone();
        let state = harness.state.clone();
        let driver = harness.driver.clone();
        harness.services.on_sleep(move || {
            let source = driver.installed_source();
            *seen_in_hook.lock().unwrap() = Some((state.get(), source.is_some()));
        });

        harness.run(LifecycleSettings::default());

        assert_eq!(*seen.lock().unwrap(), Some((LifecycleState::Running, true)));
    }

    #[test]
    fn test_installed_source_carries_context() {
        let harness = Harness::new();
        let driver = harness.driver.clone();
        let seed = Arc::new(Mutex::new(None));
        let seed_in_hook = seed.clone();
        harness.services.on_sleep(move || {
            let source = driver.installed_source().unwrap();
            assert_eq!(source.handler.size, InputDataTransferHandler::SIZE);
            *seed_in_hook.lock().unwrap() = source.context.map(|c| c.seed());
        });

        harness.run(LifecycleSettings::default());

        assert_eq!(*seed.lock().unwrap(), Some(Buttons::CROSS));
    }

    #[test]
    fn test_passthrough_uses_configured_port() {
        let harness = Harness::new();
        let settings = LifecycleSettings {
            port: Port::EXTERNAL_2,
            ..LifecycleSettings::default()
        };

        harness.run(settings);

        assert_eq!(
            harness.driver.passthrough_mask(),
            Some(crate::controller::sample::PortMask(0x02))
        );
    }

    #[test]
    fn test_analog_sampling_optional() {
        let harness = Harness::new();
        let settings = LifecycleSettings {
            analog_sampling: false,
            ..LifecycleSettings::default()
        };

        harness.run(settings);

        assert_eq!(harness.log.count("set_sampling_mode"), 0);
    }

    #[test]
    fn test_soft_failure_keeps_going() {
        let harness = Harness::new();
        harness.log.fail("enable_port_passthrough", HostError::BUSY);
        harness.log.fail("install_handler", HostError::BUSY);

        let status = harness.run(LifecycleSettings::default());

        assert_eq!(status, EXIT_OK);
        assert_eq!(harness.log.count("set_sampling_mode"), 1);
        assert_eq!(harness.log.count("sleep_thread_cb"), 1);
        // Nothing recorded, nothing to deregister
        assert_eq!(harness.log.count("uninstall_handler"), 0);
    }

    #[test]
    fn test_handle_mismatch_still_completes() {
        let harness = Harness::new();
        harness.driver.set_uninstall_handle(RegistrationHandle(9));

        assert_eq!(harness.run(LifecycleSettings::default()), EXIT_OK);
        assert_eq!(harness.log.count("uninstall_handler"), 1);
    }

    #[test]
    fn test_sleep_failure_still_uninstalls() {
        let harness = Harness::new();
        harness.log.fail("sleep_thread_cb", HostError::TERMINATED);

        assert_eq!(harness.run(LifecycleSettings::default()), EXIT_OK);
        assert_eq!(harness.log.count("uninstall_handler"), 1);
    }

    // ==================== Timer Design Tests ====================

    #[test]
    fn test_timer_design_setup_order() {
        let harness = Harness::new();

        assert_eq!(harness.run(timer_settings()), EXIT_OK);

        let calls = harness.log.calls();
        let setup: Vec<_> = calls
            .iter()
            .copied()
            .take_while(|c| *c != "sleep_thread_cb")
            .collect();
        assert_eq!(
            setup,
            vec![
                "enable_port_passthrough",
                "install_handler",
                "set_sampling_mode",
                "create_callback",
                "create_vtimer",
                "stop_vtimer",
                "set_vtimer_time",
                "set_vtimer_handler",
                "start_vtimer",
            ]
        );
    }

    #[test]
    fn test_timer_teardown_is_reversed() {
        let harness = Harness::new();

        harness.run(timer_settings());

        let calls = harness.log.calls();
        let sleep = harness.log.position("sleep_thread_cb").unwrap();
        assert_eq!(
            &calls[sleep + 1..],
            &["delete_vtimer", "delete_callback", "uninstall_handler"]
        );
        assert_eq!(harness.services.callback_count(), 0);
        assert!(harness.kernel.timer_ids().is_empty());
    }

    #[test]
    fn test_teardown_continues_after_failure() {
        let harness = Harness::new();
        harness.log.fail("delete_vtimer", HostError::UNKNOWN_TIMER);

        assert_eq!(harness.run(timer_settings()), EXIT_OK);

        let calls = harness.log.calls();
        let sleep = harness.log.position("sleep_thread_cb").unwrap();
        assert_eq!(
            &calls[sleep + 1..],
            &["delete_vtimer", "delete_callback", "uninstall_handler"]
        );
    }

    #[test]
    fn test_timer_publishes_on_owning_thread() {
        let harness = Harness::new();
        harness.driver.set_raw_sample(RawSample::with_stick(250, 128));
        let kernel = harness.kernel.clone();
        let context = harness.context.clone();
        let fired = Arc::new(Mutex::new(None));
        let fired_in_hook = fired.clone();
        harness.services.on_sleep(move || {
            let timer = kernel.timer_ids()[0];
            let next = kernel.fire_timer(timer);
            // Notification is queued; nothing published until the callback runs
            assert_eq!(context.timer_buttons(), Buttons::empty());
            *fired_in_hook.lock().unwrap() = next;
        });

        harness.run(timer_settings());

        assert_eq!(
            *fired.lock().unwrap(),
            Some(Some(Duration::from_millis(10)))
        );
        assert_eq!(harness.context.timer_buttons(), Buttons::RIGHT);
    }

    #[test]
    fn test_timer_callback_keeps_last_value_on_read_failure() {
        let harness = Harness::new();
        harness.context.publish_timer_buttons(Buttons::LEFT);
        harness.driver.set_read_error(HostError::READ_FAILED);
        let kernel = harness.kernel.clone();
        harness.services.on_sleep(move || {
            let timer = kernel.timer_ids()[0];
            kernel.fire_timer(timer);
        });

        harness.run(timer_settings());

        assert_eq!(harness.context.timer_buttons(), Buttons::LEFT);
    }

    #[test]
    fn test_callback_failure_skips_timer() {
        let harness = Harness::new();
        harness.log.fail("create_callback", HostError::NO_MEMORY);

        assert_eq!(harness.run(timer_settings()), EXIT_OK);
        assert_eq!(harness.log.count("create_vtimer"), 0);
        assert_eq!(harness.log.count("delete_callback"), 0);
        assert_eq!(harness.log.count("uninstall_handler"), 1);
    }

    #[test]
    fn test_soft_timer_step_failure() {
        let harness = Harness::new();
        harness.log.fail("set_vtimer_handler", HostError::INVALID_ARGUMENT);

        assert_eq!(harness.run(timer_settings()), EXIT_OK);
        assert_eq!(harness.log.count("start_vtimer"), 1);
        assert_eq!(harness.log.count("delete_vtimer"), 1);
    }

    // ==================== Strict Mode Tests ====================

    #[test]
    fn test_strict_rollback_in_reverse() {
        let harness = Harness::new();
        harness.log.fail("create_vtimer", HostError::NO_MEMORY);

        let status = harness.run(strict(timer_settings()));

        assert_eq!(status, EXIT_SETUP_ABORTED);
        assert_eq!(harness.log.count("sleep_thread_cb"), 0);
        let calls = harness.log.calls();
        let failed = harness.log.position("create_vtimer").unwrap();
        assert_eq!(&calls[failed + 1..], &["delete_callback", "uninstall_handler"]);
        assert_eq!(harness.state.get(), LifecycleState::Idle);
    }

    #[test]
    fn test_strict_late_timer_failure_releases_timer() {
        let harness = Harness::new();
        harness.log.fail("start_vtimer", HostError::INVALID_ARGUMENT);

        assert_eq!(harness.run(strict(timer_settings())), EXIT_SETUP_ABORTED);

        let calls = harness.log.calls();
        let failed = harness.log.position("start_vtimer").unwrap();
        assert_eq!(
            &calls[failed + 1..],
            &["delete_vtimer", "delete_callback", "uninstall_handler"]
        );
    }

    #[test]
    fn test_strict_passthrough_failure_installs_nothing() {
        let harness = Harness::new();
        harness.log.fail("enable_port_passthrough", HostError::BUSY);

        let status = harness.run(strict(LifecycleSettings::default()));

        assert_eq!(status, EXIT_SETUP_ABORTED);
        assert_eq!(harness.log.calls(), vec!["enable_port_passthrough"]);
    }

    #[test]
    fn test_strict_success_behaves_normally() {
        let harness = Harness::new();

        assert_eq!(harness.run(strict(timer_settings())), EXIT_OK);
        assert_eq!(harness.log.count("sleep_thread_cb"), 1);
    }
}
