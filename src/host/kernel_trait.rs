//! Trait abstraction for the host kernel services the lifecycle relies on.
//!
//! Three seams:
//! - [`ThreadManager`]: creating, waking, joining and deleting threads.
//!   Used by the module boundary.
//! - [`ThreadServices`]: operations only valid on the calling thread
//!   (callbacks bound to it, the callback-servicing sleep). Handed to the
//!   thread entry point.
//! - [`VirtualTimers`]: periodic timers whose handlers run in timer context,
//!   not on any thread the caller owns.
//!
//! Timer handlers must not touch thread-bound state. They hand work to the
//! owning thread through a [`CallbackNotifier`], which posts a
//! [`ThreadEvent::Notify`] into the owning thread's mailbox; the owning
//! thread runs the callback the next time it services callbacks.

use std::time::Duration;

use crossbeam::channel::Sender;

use super::{CallbackId, HostError, HostResult, ThreadId, TimerId};

/// Thread entry point. Receives the services of the thread it runs on and
/// returns the thread's exit status.
pub type ThreadEntry = Box<dyn FnOnce(&dyn ThreadServices) -> i32 + Send>;

/// Kernel callback, run on the thread that created it. Receives its own id
/// and the notification argument.
pub type CallbackFn = Box<dyn FnMut(CallbackId, i32) -> i32>;

/// Virtual timer handler, run in timer context.
///
/// Receives the timer id, the scheduled and the actual timer time. Returns
/// the delay until the next invocation, or `None` to disarm.
pub type TimerHandler = Box<dyn FnMut(TimerId, Duration, Duration) -> Option<Duration> + Send>;

/// Event delivered to a thread's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEvent {
    /// Ends the current (or next) callback-servicing sleep.
    Wakeup,
    /// Runs `callback` with `arg` on the mailbox's thread.
    Notify {
        /// Callback to run.
        callback: CallbackId,
        /// Argument passed through to the callback.
        arg: i32,
    },
}

/// Sending side of a callback, safe to move into timer context.
#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    id: CallbackId,
    mailbox: Sender<ThreadEvent>,
}

impl CallbackNotifier {
    /// Creates a notifier posting to `mailbox`.
    #[must_use]
    pub fn new(id: CallbackId, mailbox: Sender<ThreadEvent>) -> Self {
        Self { id, mailbox }
    }

    /// Id of the callback this notifier targets.
    #[must_use]
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Queue the callback for execution on its owning thread.
    ///
    /// # Errors
    ///
    /// Returns `UNKNOWN_CALLBACK` once the owning thread has gone away.
    pub fn notify(&self, arg: i32) -> HostResult<()> {
        self.mailbox
            .send(ThreadEvent::Notify {
                callback: self.id,
                arg,
            })
            .map_err(|_| HostError::UNKNOWN_CALLBACK)
    }
}

/// Thread lifecycle calls, usable from any thread.
pub trait ThreadManager: Send + Sync {
    /// Create a dormant thread.
    fn create_thread(
        &self,
        name: &str,
        priority: u32,
        stack_size: usize,
        entry: ThreadEntry,
    ) -> HostResult<ThreadId>;

    /// Start a dormant thread.
    fn start_thread(&self, id: ThreadId) -> HostResult<()>;

    /// End the thread's current or next callback-servicing sleep.
    fn wakeup_thread(&self, id: ThreadId) -> HostResult<()>;

    /// Wait for the thread to exit, at most `timeout` if given.
    ///
    /// Returns the thread's exit status.
    fn wait_thread_end(&self, id: ThreadId, timeout: Option<Duration>) -> HostResult<i32>;

    /// Delete a thread that has exited (or never started).
    fn delete_thread(&self, id: ThreadId) -> HostResult<()>;

    /// Forcibly terminate a thread and delete it.
    fn terminate_delete_thread(&self, id: ThreadId) -> HostResult<()>;
}

/// Calls only valid on the thread the services belong to.
pub trait ThreadServices {
    /// Id of the calling thread.
    fn thread_id(&self) -> ThreadId;

    /// Create a callback bound to the calling thread.
    fn create_callback(&self, name: &str, handler: CallbackFn) -> HostResult<CallbackNotifier>;

    /// Delete a callback created by the calling thread.
    fn delete_callback(&self, id: CallbackId) -> HostResult<()>;

    /// Sleep until woken, running notified callbacks in the meantime.
    fn sleep_thread_cb(&self) -> HostResult<()>;
}

/// Virtual timer calls.
pub trait VirtualTimers: Send + Sync {
    /// Create a stopped timer at time zero.
    fn create_vtimer(&self, name: &str) -> HostResult<TimerId>;

    /// Start counting.
    fn start_vtimer(&self, id: TimerId) -> HostResult<()>;

    /// Stop counting. The current time is kept.
    fn stop_vtimer(&self, id: TimerId) -> HostResult<()>;

    /// Set the timer's current time.
    fn set_vtimer_time(&self, id: TimerId, time: Duration) -> HostResult<()>;

    /// Arm `handler` to run when the timer reaches `schedule`.
    fn set_vtimer_handler(
        &self,
        id: TimerId,
        schedule: Duration,
        handler: TimerHandler,
    ) -> HostResult<()>;

    /// Delete the timer. Its handler will not run again.
    fn delete_vtimer(&self, id: TimerId) -> HostResult<()>;
}
