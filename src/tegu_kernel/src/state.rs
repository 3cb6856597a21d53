//! The kernel context value
//!
//! Every piece of mutable kernel state (object pools, the ready queue, the
//! timeout engine, the running-task pointer) is a field of [`KernelState`],
//! constructed once by [`Kernel::new`](crate::Kernel::new) and reached only
//! through the [`klock`](crate::klock) guard. There are no free-standing
//! globals.
use crate::{
    cfg::KernelConfig,
    mutex::MutexCb,
    queue::QueueCb,
    semaphore::SemaphoreCb,
    task::{readyqueue::ReadyQueue, TaskCb, TaskRef},
    timeout::TimeoutQueue,
    timer::TimerCb,
    utils::{list::ListHead, pool::Pool},
    KernelError, Result,
};

pub(crate) struct KernelState {
    pub(crate) cfg: KernelConfig,

    pub(crate) tasks: Pool<TaskCb>,
    pub(crate) semaphores: Pool<SemaphoreCb>,
    pub(crate) mutexes: Pool<MutexCb>,
    pub(crate) queues: Pool<QueueCb>,
    pub(crate) timers: Pool<TimerCb>,

    pub(crate) ready: ReadyQueue,
    pub(crate) timeouts: TimeoutQueue,

    /// The currently running task. `None` until [`Kernel::start`] picks the
    /// first one.
    ///
    /// [`Kernel::start`]: crate::Kernel::start
    pub(crate) running_task: Option<TaskRef>,

    /// Tasks in the `Terminated` state, awaiting reclamation by the idle
    /// task.
    pub(crate) to_delete: ListHead,

    pub(crate) started: bool,
}

fn pool<T>(limit: Option<usize>) -> Pool<T> {
    match limit {
        Some(n) => Pool::bounded(n),
        None => Pool::unbounded(),
    }
}

impl KernelState {
    pub(crate) fn new(cfg: KernelConfig) -> Self {
        Self {
            tasks: pool(cfg.max_tasks),
            semaphores: pool(cfg.max_semaphores),
            mutexes: pool(cfg.max_mutexes),
            queues: pool(cfg.max_queues),
            timers: pool(cfg.max_timers),
            ready: ReadyQueue::new(),
            timeouts: TimeoutQueue::new(cfg.ticks_per_second),
            running_task: None,
            to_delete: ListHead::new(),
            started: false,
            cfg,
        }
    }

    /// The task the kernel considers to be executing right now.
    ///
    /// Fails with `InvalidKernelState` when called before the first task was
    /// dispatched.
    pub(crate) fn running_task(&self) -> Result<TaskRef> {
        self.running_task.ok_or(KernelError::InvalidKernelState)
    }

    /// Select the task at the front of the highest non-empty priority list.
    ///
    /// `clz` is the port's count-leading-zeros primitive.
    pub(crate) fn pick_highest_ready(&self, clz: fn(u32) -> u8) -> Result<TaskRef> {
        let word = self.ready.bitmap_word();
        if word == 0 {
            // The idle task guarantees this does not happen once started
            return Err(KernelError::NothingToSchedule);
        }
        let level = 31 - clz(word) as usize;
        debug_assert_eq!(self.ready.highest_level(), Some(level));
        // The bitmap bit was set, so the list cannot be empty
        Ok(self.ready.peek_front(level).expect("ready bitmap out of sync"))
    }
}
