//! # Simulated Kernel
//!
//! [`StdKernel`] implements the kernel seams on top of `std::thread` and
//! `crossbeam` channels.
//!
//! ## Threads
//!
//! Every created thread gets a mailbox. [`ThreadManager::wakeup_thread`]
//! posts a [`ThreadEvent::Wakeup`]; callback notifications post a
//! [`ThreadEvent::Notify`]. [`ThreadServices::sleep_thread_cb`] drains the
//! mailbox, running callbacks until it sees a wakeup. A wakeup posted while
//! the thread is not sleeping is kept and ends the next sleep immediately.
//!
//! A `std::thread` cannot be preempted, so
//! [`ThreadManager::terminate_delete_thread`] detaches the thread and marks
//! it terminated: its next `sleep_thread_cb` returns `TERMINATED` at once.
//!
//! ## Virtual Timers
//!
//! Each timer owns a worker thread that sleeps until the armed schedule is
//! reached and then runs the handler there, which is the "timer context".
//! The timer's clock only advances while it is started.

use std::collections::HashMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::kernel_trait::{CallbackFn, TimerHandler};
use super::{
    CallbackId, CallbackNotifier, HostError, HostResult, ThreadEntry, ThreadEvent, ThreadId,
    ThreadManager, ThreadServices, TimerId, VirtualTimers,
};

/// Lowest accepted thread priority.
pub const MIN_PRIORITY: u32 = 1;

/// Highest accepted thread priority.
pub const MAX_PRIORITY: u32 = 127;

/// Smallest accepted stack size request.
pub const MIN_STACK_SIZE: usize = 512;

/// Stack size actually given to the backing `std::thread`, at minimum.
const BACKING_STACK_SIZE: usize = 256 * 1024;

/// First id handed out.
const FIRST_ID: i32 = 0x0400_0001;

/// Exit status reported for a thread whose entry point panicked.
pub const PANIC_EXIT_STATUS: i32 = HostError::TERMINATED.status();

/// Kernel simulation backed by `std::thread`.
///
/// Cloning yields another handle to the same kernel.
#[derive(Clone, Default)]
pub struct StdKernel {
    inner: Arc<KernelInner>,
}

impl std::fmt::Debug for StdKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdKernel")
            .field("threads", &self.inner.threads.lock().len())
            .field("timers", &self.inner.timers.lock().len())
            .finish()
    }
}

struct KernelInner {
    next_id: AtomicI32,
    threads: Mutex<HashMap<ThreadId, ThreadSlot>>,
    timers: Mutex<HashMap<TimerId, TimerSlot>>,
}

impl Default for KernelInner {
    fn default() -> Self {
        Self {
            next_id: AtomicI32::new(FIRST_ID),
            threads: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        }
    }
}

impl KernelInner {
    fn allocate_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Everything a thread needs before it is started.
struct PendingStart {
    entry: ThreadEntry,
    mailbox_rx: Receiver<ThreadEvent>,
    exit_tx: Sender<i32>,
}

struct ThreadSlot {
    name: String,
    stack_size: usize,
    mailbox_tx: Sender<ThreadEvent>,
    pending: Option<PendingStart>,
    exit_rx: Receiver<i32>,
    exit_status: Option<i32>,
    terminated: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ThreadSlot {
    /// Picks up the exit status if the thread has finished.
    fn poll_exit(&mut self) -> Option<i32> {
        if self.exit_status.is_none() && self.pending.is_none() {
            match self.exit_rx.try_recv() {
                Ok(status) => self.exit_status = Some(status),
                Err(TryRecvError::Disconnected) => self.exit_status = Some(PANIC_EXIT_STATUS),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.exit_status
    }
}

impl StdKernel {
    /// Creates an empty kernel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads that have not been deleted.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.inner.threads.lock().len()
    }

    /// Number of virtual timers that have not been deleted.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    fn with_timer<T>(&self, id: TimerId, f: impl FnOnce(&TimerSlot) -> T) -> HostResult<T> {
        let timers = self.inner.timers.lock();
        let slot = timers.get(&id).ok_or(HostError::UNKNOWN_TIMER)?;
        Ok(f(slot))
    }
}

impl ThreadManager for StdKernel {
    fn create_thread(
        &self,
        name: &str,
        priority: u32,
        stack_size: usize,
        entry: ThreadEntry,
    ) -> HostResult<ThreadId> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) || stack_size < MIN_STACK_SIZE {
            return Err(HostError::INVALID_ARGUMENT);
        }

        let id = ThreadId(self.inner.allocate_id());
        let (mailbox_tx, mailbox_rx) = unbounded();
        let (exit_tx, exit_rx) = unbounded();

        self.inner.threads.lock().insert(
            id,
            ThreadSlot {
                name: name.to_string(),
                stack_size,
                mailbox_tx,
                pending: Some(PendingStart {
                    entry,
                    mailbox_rx,
                    exit_tx,
                }),
                exit_rx,
                exit_status: None,
                terminated: Arc::new(AtomicBool::new(false)),
                join: None,
            },
        );

        debug!("Created {} '{}' (priority {}, stack {:#x})", id, name, priority, stack_size);
        Ok(id)
    }

    fn start_thread(&self, id: ThreadId) -> HostResult<()> {
        let mut threads = self.inner.threads.lock();
        let slot = threads.get_mut(&id).ok_or(HostError::UNKNOWN_THREAD)?;
        let pending = slot.pending.take().ok_or(HostError::NOT_DORMANT)?;

        let PendingStart {
            entry,
            mailbox_rx,
            exit_tx,
        } = pending;
        let kernel = self.inner.clone();
        let mailbox_tx = slot.mailbox_tx.clone();
        let terminated = slot.terminated.clone();

        let spawned = std::thread::Builder::new()
            .name(slot.name.clone())
            .stack_size(slot.stack_size.max(BACKING_STACK_SIZE))
            .spawn(move || {
                // Callbacks are thread-bound, so the table is built here
                let services = StdThreadServices {
                    id,
                    kernel,
                    mailbox_rx,
                    mailbox_tx,
                    terminated,
                    callbacks: RefCell::new(HashMap::new()),
                };
                let status = entry(&services);
                trace!("{} exited with status {}", services.id, status);
                let _ = exit_tx.send(status);
            });

        match spawned {
            Ok(join) => {
                slot.join = Some(join);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to spawn {}: {}", id, e);
                Err(HostError::NO_MEMORY)
            }
        }
    }

    fn wakeup_thread(&self, id: ThreadId) -> HostResult<()> {
        let mut threads = self.inner.threads.lock();
        let slot = threads.get_mut(&id).ok_or(HostError::UNKNOWN_THREAD)?;

        if slot.pending.is_some() || slot.poll_exit().is_some() {
            return Err(HostError::DORMANT);
        }

        slot.mailbox_tx
            .send(ThreadEvent::Wakeup)
            .map_err(|_| HostError::DORMANT)
    }

    fn wait_thread_end(&self, id: ThreadId, timeout: Option<Duration>) -> HostResult<i32> {
        let exit_rx = {
            let mut threads = self.inner.threads.lock();
            let slot = threads.get_mut(&id).ok_or(HostError::UNKNOWN_THREAD)?;

            if slot.pending.is_some() {
                return Err(HostError::DORMANT);
            }
            if let Some(status) = slot.poll_exit() {
                return Ok(status);
            }
            slot.exit_rx.clone()
        };

        let status = match timeout {
            Some(timeout) => match exit_rx.recv_timeout(timeout) {
                Ok(status) => status,
                Err(RecvTimeoutError::Timeout) => return Err(HostError::WAIT_TIMEOUT),
                Err(RecvTimeoutError::Disconnected) => PANIC_EXIT_STATUS,
            },
            None => exit_rx.recv().unwrap_or(PANIC_EXIT_STATUS),
        };

        if let Some(slot) = self.inner.threads.lock().get_mut(&id) {
            slot.exit_status = Some(status);
        }
        Ok(status)
    }

    fn delete_thread(&self, id: ThreadId) -> HostResult<()> {
        let mut threads = self.inner.threads.lock();
        let slot = threads.get_mut(&id).ok_or(HostError::UNKNOWN_THREAD)?;

        if slot.pending.is_none() && slot.poll_exit().is_none() {
            return Err(HostError::NOT_DORMANT);
        }

        if let Some(slot) = threads.remove(&id) {
            if let Some(join) = slot.join {
                // Already exited; this only reaps it
                let _ = join.join();
            }
        }
        debug!("Deleted {}", id);
        Ok(())
    }

    fn terminate_delete_thread(&self, id: ThreadId) -> HostResult<()> {
        let slot = self
            .inner
            .threads
            .lock()
            .remove(&id)
            .ok_or(HostError::UNKNOWN_THREAD)?;

        slot.terminated.store(true, Ordering::Release);
        let _ = slot.mailbox_tx.send(ThreadEvent::Wakeup);

        // Detached: it exits at its next kernel call
        drop(slot.join);
        debug!("Terminated and deleted {}", id);
        Ok(())
    }
}

/// Per-thread services handed to a [`StdKernel`] thread's entry point.
struct StdThreadServices {
    id: ThreadId,
    kernel: Arc<KernelInner>,
    mailbox_rx: Receiver<ThreadEvent>,
    mailbox_tx: Sender<ThreadEvent>,
    terminated: Arc<AtomicBool>,
    callbacks: RefCell<HashMap<CallbackId, (String, CallbackFn)>>,
}

impl StdThreadServices {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn run_callback(&self, callback: CallbackId, arg: i32) {
        let mut callbacks = self.callbacks.borrow_mut();
        match callbacks.get_mut(&callback) {
            Some((name, handler)) => {
                let result = handler(callback, arg);
                trace!("Callback '{}' returned {}", name, result);
            }
            None => trace!("Dropping notification for deleted {}", callback),
        }
    }
}

impl ThreadServices for StdThreadServices {
    fn thread_id(&self) -> ThreadId {
        self.id
    }

    fn create_callback(&self, name: &str, handler: CallbackFn) -> HostResult<CallbackNotifier> {
        if self.is_terminated() {
            return Err(HostError::TERMINATED);
        }

        let id = CallbackId(self.kernel.allocate_id());
        self.callbacks
            .borrow_mut()
            .insert(id, (name.to_string(), handler));

        Ok(CallbackNotifier::new(id, self.mailbox_tx.clone()))
    }

    fn delete_callback(&self, id: CallbackId) -> HostResult<()> {
        self.callbacks
            .borrow_mut()
            .remove(&id)
            .map(|_| ())
            .ok_or(HostError::UNKNOWN_CALLBACK)
    }

    fn sleep_thread_cb(&self) -> HostResult<()> {
        loop {
            if self.is_terminated() {
                return Err(HostError::TERMINATED);
            }

            match self.mailbox_rx.recv() {
                Ok(ThreadEvent::Wakeup) => {
                    return if self.is_terminated() {
                        Err(HostError::TERMINATED)
                    } else {
                        Ok(())
                    };
                }
                Ok(ThreadEvent::Notify { callback, arg }) => self.run_callback(callback, arg),
                // Own sender is alive, so this only happens on teardown races
                Err(_) => return Err(HostError::UNKNOWN_THREAD),
            }
        }
    }
}

/// Clock and handler state of one virtual timer.
#[derive(Default)]
struct TimerState {
    deleted: bool,
    base: Duration,
    started_at: Option<Instant>,
    schedule: Option<Duration>,
    handler: Option<TimerHandler>,
}

impl TimerState {
    fn now(&self) -> Duration {
        match self.started_at {
            Some(started) => self.base + started.elapsed(),
            None => self.base,
        }
    }

    /// Real time until the armed schedule is reached, if the timer can fire.
    fn time_to_fire(&self) -> Option<Duration> {
        self.started_at?;
        self.handler.as_ref()?;
        let schedule = self.schedule?;
        Some(schedule.saturating_sub(self.now()))
    }
}

struct TimerSlot {
    state: Arc<Mutex<TimerState>>,
    // Dropping this ends the worker
    control: Sender<()>,
}

impl TimerSlot {
    fn update(&self, f: impl FnOnce(&mut TimerState)) {
        f(&mut self.state.lock());
        let _ = self.control.send(());
    }
}

fn run_timer_worker(id: TimerId, state: Arc<Mutex<TimerState>>, control: Receiver<()>) {
    loop {
        let wait = state.lock().time_to_fire();

        let fire = match wait {
            Some(wait) => match control.recv_timeout(wait) {
                Ok(()) => false,
                Err(RecvTimeoutError::Timeout) => true,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match control.recv() {
                Ok(()) => false,
                Err(_) => break,
            },
        };

        if !fire {
            continue;
        }

        // Run the handler without holding the lock
        let (handler, schedule, actual) = {
            let mut state = state.lock();
            if state.deleted {
                break;
            }
            let Some(schedule) = state.schedule else { continue };
            let actual = state.now();
            if actual < schedule {
                continue;
            }
            (state.handler.take(), schedule, actual)
        };
        let Some(mut handler) = handler else { continue };

        let next = handler(id, schedule, actual);

        let mut state = state.lock();
        if state.deleted {
            break;
        }
        if state.handler.is_none() {
            state.handler = Some(handler);
        }
        state.schedule = match next {
            Some(delay) if !delay.is_zero() => Some(schedule + delay),
            _ => None,
        };
    }
    trace!("{} worker exited", id);
}

impl VirtualTimers for StdKernel {
    fn create_vtimer(&self, name: &str) -> HostResult<TimerId> {
        let id = TimerId(self.inner.allocate_id());
        let state = Arc::new(Mutex::new(TimerState::default()));
        let (control_tx, control_rx) = unbounded();

        let worker_state = state.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_timer_worker(id, worker_state, control_rx))
            .map_err(|e| {
                warn!("Failed to spawn worker for {}: {}", id, e);
                HostError::NO_MEMORY
            })?;

        self.inner.timers.lock().insert(
            id,
            TimerSlot {
                state,
                control: control_tx,
            },
        );
        debug!("Created {} '{}'", id, name);
        Ok(id)
    }

    fn start_vtimer(&self, id: TimerId) -> HostResult<()> {
        self.with_timer(id, |slot| {
            slot.update(|state| {
                if state.started_at.is_none() {
                    state.started_at = Some(Instant::now());
                }
            })
        })
    }

    fn stop_vtimer(&self, id: TimerId) -> HostResult<()> {
        self.with_timer(id, |slot| {
            slot.update(|state| {
                if let Some(started) = state.started_at.take() {
                    state.base += started.elapsed();
                }
            })
        })
    }

    fn set_vtimer_time(&self, id: TimerId, time: Duration) -> HostResult<()> {
        self.with_timer(id, |slot| {
            slot.update(|state| {
                state.base = time;
                if state.started_at.is_some() {
                    state.started_at = Some(Instant::now());
                }
            })
        })
    }

    fn set_vtimer_handler(
        &self,
        id: TimerId,
        schedule: Duration,
        handler: TimerHandler,
    ) -> HostResult<()> {
        self.with_timer(id, |slot| {
            slot.update(|state| {
                state.schedule = Some(schedule);
                state.handler = Some(handler);
            })
        })
    }

    fn delete_vtimer(&self, id: TimerId) -> HostResult<()> {
        let slot = self
            .inner
            .timers
            .lock()
            .remove(&id)
            .ok_or(HostError::UNKNOWN_TIMER)?;

        // Disarm before the worker notices the closed channel
        {
            let mut state = slot.state.lock();
            state.deleted = true;
            state.handler = None;
        }
        debug!("Deleted {}", id);
        Ok(())
    }
}
