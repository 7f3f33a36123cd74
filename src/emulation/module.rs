//! # Module Boundary
//!
//! [`EmulatorModule`] is what the host loads and unloads. `start` spawns the
//! owning thread and returns without blocking; `stop` wakes it, waits a
//! bounded time for it to tear down, and deletes it. A thread that misses the
//! deadline is terminated and deleted instead.
//!
//! Both calls report a coarse [`ModuleStatus`]. Everything finer grained is
//! logged.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use pad_emulator::config::Config;
//! use pad_emulator::emulation::module::{EmulatorModule, ModuleStatus};
//! use pad_emulator::host::kernel::StdKernel;
//! use pad_emulator::host::sim::SimController;
//!
//! let kernel = Arc::new(StdKernel::new());
//! let sim = Arc::new(SimController::new());
//! let mut module = EmulatorModule::new(&Config::default(), sim, kernel.clone(), kernel);
//!
//! assert_eq!(module.start(), ModuleStatus::Ok);
//! assert_eq!(module.stop(), ModuleStatus::Ok);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::lifecycle::{LifecycleSettings, LifecycleState, LifecycleStateCell, OwningThread};
use crate::config::Config;
use crate::controller::input_source::EmulationContext;
use crate::controller::sample::Buttons;
use crate::controller::translation::{build_policy, PolicyKind, Thresholds};
use crate::host::{ControllerDriver, PadSampler, ThreadId, ThreadManager, VirtualTimers};

const MODULE_NAME: &str = env!("CARGO_PKG_NAME");
const MODULE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result of a module start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Ok,
    Error,
}

/// Owning-thread parameters taken from the configuration.
#[derive(Debug, Clone)]
struct ThreadSettings {
    name: String,
    priority: u32,
    stack_size: usize,
    stop_timeout: Duration,
}

/// One loadable emulator instance.
pub struct EmulatorModule {
    thread_settings: ThreadSettings,
    lifecycle: LifecycleSettings,
    seed: Buttons,
    policy: PolicyKind,
    thresholds: Thresholds,
    driver: Arc<dyn ControllerDriver>,
    sampler: Arc<dyn PadSampler>,
    threads: Arc<dyn ThreadManager>,
    timers: Arc<dyn VirtualTimers>,
    state: Arc<LifecycleStateCell>,
    context: Option<Arc<EmulationContext>>,
    thread: Option<ThreadId>,
}

impl std::fmt::Debug for EmulatorModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorModule")
            .field("thread", &self.thread)
            .field("state", &self.state())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl EmulatorModule {
    /// Creates a stopped module.
    pub fn new<D>(
        config: &Config,
        driver: Arc<D>,
        threads: Arc<dyn ThreadManager>,
        timers: Arc<dyn VirtualTimers>,
    ) -> Self
    where
        D: ControllerDriver + 'static,
    {
        Self {
            thread_settings: ThreadSettings {
                name: config.lifecycle.thread_name.clone(),
                priority: config.lifecycle.thread_priority,
                stack_size: config.lifecycle.stack_size,
                stop_timeout: config.lifecycle.stop_timeout(),
            },
            lifecycle: LifecycleSettings::from_config(config),
            seed: config.emulation.seed(),
            policy: config.translation.policy,
            thresholds: config.translation.thresholds(),
            sampler: driver.clone(),
            driver,
            threads,
            timers,
            state: Arc::new(LifecycleStateCell::new()),
            context: None,
            thread: None,
        }
    }

    /// Current phase of the owning thread of the latest activation.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// State cell of the latest activation, for observers that outlive a
    /// borrow of the module. Each `start` replaces it.
    #[must_use]
    pub fn state_cell(&self) -> Arc<LifecycleStateCell> {
        self.state.clone()
    }

    /// Context of the current activation.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<EmulationContext>> {
        self.context.as_ref()
    }

    /// Id of the owning thread while started.
    #[must_use]
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.thread.is_some()
    }

    /// Spawns the owning thread.
    ///
    /// Returns [`ModuleStatus::Error`] if already started or if the thread
    /// cannot be created or started.
    pub fn start(&mut self) -> ModuleStatus {
        if let Some(thread) = self.thread {
            warn!("Already started ({}), stop first", thread);
            return ModuleStatus::Error;
        }

        info!("{} v{} Module Start", MODULE_NAME, MODULE_VERSION);

        let context = Arc::new(
            EmulationContext::new(
                self.seed,
                build_policy(self.policy, self.thresholds),
                self.sampler.clone(),
            )
            .with_design(self.lifecycle.design),
        );
        // A terminated thread from an earlier activation may still be
        // unwinding; it keeps writing to its own cell, never this one
        let state = Arc::new(LifecycleStateCell::new());
        let owning = OwningThread::new(
            self.lifecycle.clone(),
            self.driver.clone(),
            self.timers.clone(),
            context.clone(),
            state.clone(),
        );

        let settings = &self.thread_settings;
        let thread = match self.threads.create_thread(
            &settings.name,
            settings.priority,
            settings.stack_size,
            owning.into_entry(),
        ) {
            Ok(thread) => thread,
            Err(e) => {
                warn!("Failed to create main thread: {}", e);
                return ModuleStatus::Error;
            }
        };

        debug!("Starting main thread {}", thread);
        if let Err(e) = self.threads.start_thread(thread) {
            warn!("Failed to start main thread: {}", e);
            if let Err(e) = self.threads.delete_thread(thread) {
                warn!("Failed to delete unstarted {}: {}", thread, e);
            }
            return ModuleStatus::Error;
        }

        self.thread = Some(thread);
        self.context = Some(context);
        self.state = state;
        info!("Started");
        ModuleStatus::Ok
    }

    /// Wakes the owning thread and waits for it to finish.
    ///
    /// Returns [`ModuleStatus::Error`] only if the thread could not be
    /// deleted (or terminated); the module then stays started.
    pub fn stop(&mut self) -> ModuleStatus {
        let Some(thread) = self.thread else {
            return ModuleStatus::Ok;
        };

        info!("Stopping ...");

        // Unblocks the callback sleep so teardown can begin
        if let Err(e) = self.threads.wakeup_thread(thread) {
            warn!("Failed to wake up {}: {}", thread, e);
        }

        debug!("Waiting for {} to exit ...", thread);
        let timeout = self.thread_settings.stop_timeout;
        let result = match self.threads.wait_thread_end(thread, Some(timeout)) {
            Ok(status) => {
                debug!("{} exited with status {}, deleting", thread, status);
                self.threads.delete_thread(thread)
            }
            Err(e) => {
                warn!("Failed to wait for {} ({}), terminating", thread, e);
                self.threads.terminate_delete_thread(thread)
            }
        };

        match result {
            Ok(()) => {
                self.thread = None;
                self.context = None;
                info!("{} v{} Module Stop", MODULE_NAME, MODULE_VERSION);
                ModuleStatus::Ok
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", thread, e);
                ModuleStatus::Error
            }
        }
    }
}

impl Drop for EmulatorModule {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
    }
}
