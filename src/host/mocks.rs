//! Hand-written host mocks for unit tests.
//!
//! Every mock records the host calls it receives in a [`CallLog`]. Sharing
//! one log between mocks gives the global call order, and any call can be
//! made to fail with [`CallLog::fail`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};

use super::kernel_trait::{CallbackFn, TimerHandler};
use super::*;
use crate::controller::sample::{Port, PortMask, RawSample, SamplingMode};

/// Ordered record of host calls, plus scripted failures.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<&'static str>>>,
    failures: Arc<Mutex<HashMap<&'static str, HostError>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `call` and returns its scripted result.
    pub fn record(&self, call: &'static str) -> HostResult<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(call) {
            Some(error) => Err(*error),
            None => Ok(()),
        }
    }

    /// Makes every future `call` fail with `error`.
    pub fn fail(&self, call: &'static str, error: HostError) {
        self.failures.lock().unwrap().insert(call, error);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| *c == call)
    }
}

// ==================== Controller Driver ====================

/// Mock controller driver.
#[derive(Clone)]
pub struct MockDriver {
    pub log: CallLog,
    pub raw_sample: Arc<Mutex<RawSample>>,
    pub read_error: Arc<Mutex<Option<HostError>>>,
    pub passthrough: Arc<Mutex<Option<PortMask>>>,
    pub installed: Arc<Mutex<Option<(Port, InputSource)>>>,
    pub sampling_mode: Arc<Mutex<SamplingMode>>,
    /// Handle reported on uninstall instead of the installed one.
    pub uninstall_handle: Arc<Mutex<Option<RegistrationHandle>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            raw_sample: Arc::new(Mutex::new(RawSample::default())),
            read_error: Arc::new(Mutex::new(None)),
            passthrough: Arc::new(Mutex::new(None)),
            installed: Arc::new(Mutex::new(None)),
            sampling_mode: Arc::new(Mutex::new(SamplingMode::Digital)),
            uninstall_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_raw_sample(&self, sample: RawSample) {
        *self.raw_sample.lock().unwrap() = sample;
    }

    pub fn set_read_error(&self, error: HostError) {
        *self.read_error.lock().unwrap() = Some(error);
    }

    pub fn set_uninstall_handle(&self, handle: RegistrationHandle) {
        *self.uninstall_handle.lock().unwrap() = Some(handle);
    }

    pub fn installed_source(&self) -> Option<InputSource> {
        self.installed.lock().unwrap().as_ref().map(|(_, s)| s.clone())
    }

    pub fn passthrough_mask(&self) -> Option<PortMask> {
        *self.passthrough.lock().unwrap()
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        *self.sampling_mode.lock().unwrap()
    }
}

/// Handle the mock hands out on install.
pub const MOCK_HANDLE: RegistrationHandle = RegistrationHandle(0);

impl PadSampler for MockDriver {
    fn peek_buffer_positive(&self) -> HostResult<RawSample> {
        if let Some(error) = *self.read_error.lock().unwrap() {
            return Err(error);
        }
        Ok(*self.raw_sample.lock().unwrap())
    }
}

impl ControllerDriver for MockDriver {
    fn enable_port_passthrough(&self, mask: PortMask) -> HostResult<()> {
        self.log.record("enable_port_passthrough")?;
        *self.passthrough.lock().unwrap() = Some(mask);
        Ok(())
    }

    fn set_input_handler(
        &self,
        port: Port,
        source: Option<InputSource>,
    ) -> HostResult<RegistrationHandle> {
        let mut installed = self.installed.lock().unwrap();
        match source {
            Some(source) => {
                self.log.record("install_handler")?;
                if installed.is_some() {
                    return Err(HostError::BUSY);
                }
                *installed = Some((port, source));
                Ok(MOCK_HANDLE)
            }
            None => {
                self.log.record("uninstall_handler")?;
                installed.take().ok_or(HostError::NOT_INSTALLED)?;
                Ok(self.uninstall_handle.lock().unwrap().unwrap_or(MOCK_HANDLE))
            }
        }
    }

    fn set_sampling_mode(&self, mode: SamplingMode) -> HostResult<SamplingMode> {
        self.log.record("set_sampling_mode")?;
        let mut current = self.sampling_mode.lock().unwrap();
        Ok(std::mem::replace(&mut *current, mode))
    }
}

// ==================== Kernel ====================

/// Mock thread manager and virtual timers.
///
/// Threads never run: the entry is kept so a test can run it by hand.
#[derive(Clone)]
pub struct MockKernel {
    pub log: CallLog,
    pub entries: Arc<Mutex<HashMap<ThreadId, ThreadEntry>>>,
    pub exit_status: Arc<Mutex<i32>>,
    pub timers: Arc<Mutex<HashMap<TimerId, Option<(Duration, TimerHandler)>>>>,
    next_id: Arc<Mutex<i32>>,
}

impl MockKernel {
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            entries: Arc::new(Mutex::new(HashMap::new())),
            exit_status: Arc::new(Mutex::new(0)),
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(0x10)),
        }
    }

    fn next_id(&self) -> i32 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }

    /// Takes the entry of a created thread.
    pub fn take_entry(&self, id: ThreadId) -> Option<ThreadEntry> {
        self.entries.lock().unwrap().remove(&id)
    }

    /// Runs the handler attached to `id` once at its schedule.
    ///
    /// Returns the handler's answer, or `None` if no handler is attached.
    pub fn fire_timer(&self, id: TimerId) -> Option<Option<Duration>> {
        let (schedule, mut handler) = self.timers.lock().unwrap().get_mut(&id)?.take()?;
        let next = handler(id, schedule, schedule);
        if let Some(slot) = self.timers.lock().unwrap().get_mut(&id) {
            *slot = Some((schedule, handler));
        }
        Some(next)
    }

    pub fn timer_ids(&self) -> Vec<TimerId> {
        self.timers.lock().unwrap().keys().copied().collect()
    }
}

impl ThreadManager for MockKernel {
    fn create_thread(
        &self,
        _name: &str,
        _priority: u32,
        _stack_size: usize,
        entry: ThreadEntry,
    ) -> HostResult<ThreadId> {
        self.log.record("create_thread")?;
        let id = ThreadId(self.next_id());
        self.entries.lock().unwrap().insert(id, entry);
        Ok(id)
    }

    fn start_thread(&self, _id: ThreadId) -> HostResult<()> {
        self.log.record("start_thread")
    }

    fn wakeup_thread(&self, _id: ThreadId) -> HostResult<()> {
        self.log.record("wakeup_thread")
    }

    fn wait_thread_end(&self, _id: ThreadId, _timeout: Option<Duration>) -> HostResult<i32> {
        self.log.record("wait_thread_end")?;
        Ok(*self.exit_status.lock().unwrap())
    }

    fn delete_thread(&self, id: ThreadId) -> HostResult<()> {
        self.log.record("delete_thread")?;
        self.entries.lock().unwrap().remove(&id);
        Ok(())
    }

    fn terminate_delete_thread(&self, id: ThreadId) -> HostResult<()> {
        self.log.record("terminate_delete_thread")?;
        self.entries.lock().unwrap().remove(&id);
        Ok(())
    }
}

impl VirtualTimers for MockKernel {
    fn create_vtimer(&self, _name: &str) -> HostResult<TimerId> {
        self.log.record("create_vtimer")?;
        let id = TimerId(self.next_id());
        self.timers.lock().unwrap().insert(id, None);
        Ok(id)
    }

    fn start_vtimer(&self, _id: TimerId) -> HostResult<()> {
        self.log.record("start_vtimer")
    }

    fn stop_vtimer(&self, _id: TimerId) -> HostResult<()> {
        self.log.record("stop_vtimer")
    }

    fn set_vtimer_time(&self, _id: TimerId, _time: Duration) -> HostResult<()> {
        self.log.record("set_vtimer_time")
    }

    fn set_vtimer_handler(
        &self,
        id: TimerId,
        schedule: Duration,
        handler: TimerHandler,
    ) -> HostResult<()> {
        self.log.record("set_vtimer_handler")?;
        let mut timers = self.timers.lock().unwrap();
        let slot = timers.get_mut(&id).ok_or(HostError::UNKNOWN_TIMER)?;
        *slot = Some((schedule, handler));
        Ok(())
    }

    fn delete_vtimer(&self, id: TimerId) -> HostResult<()> {
        self.log.record("delete_vtimer")?;
        self.timers
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(HostError::UNKNOWN_TIMER)
    }
}

// ==================== Thread Services ====================

/// Mock services of the calling thread.
///
/// `sleep_thread_cb` runs the sleep hook (if any), then every queued
/// notification, and returns without blocking.
pub struct MockThreadServices {
    pub log: CallLog,
    callbacks: RefCell<HashMap<CallbackId, CallbackFn>>,
    mailbox: (Sender<ThreadEvent>, Receiver<ThreadEvent>),
    sleep_hook: RefCell<Option<Box<dyn FnOnce()>>>,
    next_id: RefCell<i32>,
}

impl MockThreadServices {
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            callbacks: RefCell::new(HashMap::new()),
            mailbox: unbounded(),
            sleep_hook: RefCell::new(None),
            next_id: RefCell::new(0x40),
        }
    }

    /// Runs `hook` at the start of the next sleep.
    pub fn on_sleep(&self, hook: impl FnOnce() + 'static) {
        *self.sleep_hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

impl ThreadServices for MockThreadServices {
    fn thread_id(&self) -> ThreadId {
        ThreadId(1)
    }

    fn create_callback(&self, _name: &str, handler: CallbackFn) -> HostResult<CallbackNotifier> {
        self.log.record("create_callback")?;
        let id = {
            let mut next = self.next_id.borrow_mut();
            *next += 1;
            CallbackId(*next)
        };
        self.callbacks.borrow_mut().insert(id, handler);
        Ok(CallbackNotifier::new(id, self.mailbox.0.clone()))
    }

    fn delete_callback(&self, id: CallbackId) -> HostResult<()> {
        self.log.record("delete_callback")?;
        self.callbacks
            .borrow_mut()
            .remove(&id)
            .map(|_| ())
            .ok_or(HostError::UNKNOWN_CALLBACK)
    }

    fn sleep_thread_cb(&self) -> HostResult<()> {
        self.log.record("sleep_thread_cb")?;

        let hook = self.sleep_hook.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }

        while let Ok(event) = self.mailbox.1.try_recv() {
            if let ThreadEvent::Notify { callback, arg } = event {
                let mut callbacks = self.callbacks.borrow_mut();
                if let Some(handler) = callbacks.get_mut(&callback) {
                    handler(callback, arg);
                }
            }
        }
        Ok(())
    }
}
