//! Tasks
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::{
    error::WakeCause,
    state::KernelState,
    timeout::Timeout,
    utils::{
        list::{self, Link},
        pool::PoolPtr,
    },
    wait::{self, WaitChannel},
    KernelError, Kernel, Port, Result,
};

pub(crate) mod readyqueue;

/// Numeric handle identifying a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) PoolPtr);

pub(crate) type TaskRef = PoolPtr;

/// A task entry point.
pub type TaskFunction = fn(usize);

/// Parameters for [`Kernel::task_create`].
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub function: TaskFunction,
    pub argument: usize,
    /// Priority in `[1, priority_levels)`; higher numbers run first.
    /// Priority 0 is reserved for the idle task.
    pub priority: u8,
    pub stack_size: usize,
}

/// Task state machine. The states are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run; linked into the ready queue.
    Ready,
    /// Blocked in a semaphore's wait queue.
    PendingSemaphore,
    /// Blocked in a mutex's wait queue.
    PendingMutex,
    /// Blocked in a message queue's writer or reader wait queue.
    PendingQueue,
    /// Sleeping on a bare timeout; member of no wait queue.
    PendingTimeout,
    Suspended,
    /// Awaiting reclamation on the deferred-delete list.
    Terminated,
}

/// *Task control block* - the state data of a task.
pub(crate) struct TaskCb {
    pub(crate) entry_point: TaskFunction,
    pub(crate) entry_param: usize,

    /// The task's stack region. Reclaimed by the idle task together with the
    /// control block.
    pub(crate) stack: Vec<u8>,

    pub(crate) priority: u8,
    pub(crate) state: TaskState,

    pub(crate) timeout: Timeout,

    /// Membership in exactly one of: a ready list, a wait queue, or the
    /// deferred-delete list.
    pub(crate) link: Link,

    /// The wait queue the task is blocked in, if any.
    pub(crate) waiting_on: Option<WaitChannel>,

    /// Why the task was last woken. Written by the waker, read by the
    /// blocking call when it resumes.
    pub(crate) wake_cause: WakeCause,
}

impl TaskCb {
    pub(crate) fn new(
        entry_point: TaskFunction,
        entry_param: usize,
        stack: Vec<u8>,
        priority: u8,
    ) -> Self {
        Self {
            entry_point,
            entry_param,
            stack,
            priority,
            state: TaskState::Ready,
            timeout: Timeout::new(),
            link: Link::default(),
            waiting_on: None,
            wake_cause: WakeCause::Delivered,
        }
    }

    /// Map the recorded wake cause to the blocking call's result.
    ///
    /// Read by the blocked operation once it resumes; at that point the
    /// expired flag and the wake cause must agree.
    pub(crate) fn wait_outcome(&self) -> Result<()> {
        debug_assert_eq!(
            self.timeout.expired,
            self.wake_cause == WakeCause::TimedOut
        );
        self.wake_cause.into_result()
    }
}

impl fmt::Debug for TaskCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("entry_point", &self.entry_point)
            .field("entry_param", &self.entry_param)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("waiting_on", &self.waiting_on)
            .finish()
    }
}

/// Unlink the task from whatever list its state says it is on.
fn detach(st: &mut KernelState, task: TaskRef) {
    match st.tasks[task].state {
        TaskState::Ready => {
            let KernelState { ready, tasks, .. } = st;
            ready.remove(tasks, task);
        }
        TaskState::PendingSemaphore | TaskState::PendingMutex | TaskState::PendingQueue => {
            wait::remove_waiter(st, task);
        }
        TaskState::PendingTimeout | TaskState::Suspended => {}
        TaskState::Terminated => {
            let KernelState {
                to_delete, tasks, ..
            } = st;
            list::remove(to_delete, tasks, task, |t| &mut t.link);
        }
    }
}

/// Admit the task to the ready queue.
///
/// The task must not be linked into any list; any proper cleanup of its
/// previous state is the caller's responsibility.
pub(crate) fn make_ready(st: &mut KernelState, task: TaskRef) {
    st.tasks[task].state = TaskState::Ready;
    let KernelState { ready, tasks, .. } = st;
    ready.push_back(tasks, task);
}

/// Remove the task from wherever it currently sits and record `reason`.
/// A terminated task moves onto the deferred-delete list; a task blocking on
/// a kernel object is appended to that object's wait queue.
pub(crate) fn make_pending(
    st: &mut KernelState,
    task: TaskRef,
    reason: TaskState,
    chan: Option<WaitChannel>,
) {
    debug_assert_ne!(reason, TaskState::Ready);

    detach(st, task);
    st.tasks[task].state = reason;

    if reason == TaskState::Terminated {
        let KernelState {
            to_delete, tasks, ..
        } = st;
        list::push_back(to_delete, tasks, task, |t| &mut t.link);
    }

    if let Some(chan) = chan {
        wait::enqueue_waiter(st, chan, task);
    }
}

/// Assign a new priority, repositioning the task within the ready queue if it
/// is currently Ready (its FIFO position among equals resets). For a blocked
/// task the change is recorded and takes effect when the task is woken.
///
/// Returns the previous priority.
pub(crate) fn set_priority_inner(st: &mut KernelState, task: TaskRef, priority: u8) -> u8 {
    let old = st.tasks[task].priority;
    if old == priority {
        return old;
    }

    if st.tasks[task].state == TaskState::Ready {
        {
            let KernelState { ready, tasks, .. } = st;
            ready.remove(tasks, task);
        }
        st.tasks[task].priority = priority;
        let KernelState { ready, tasks, .. } = st;
        ready.push_back(tasks, task);
    } else {
        st.tasks[task].priority = priority;
    }

    old
}

/// The entry point of the internally created idle task. On a real port the
/// dispatch loop built around this task repeatedly calls
/// [`Kernel::reclaim_one_terminated_task`].
pub(crate) fn idle_task_body(_: usize) {}

/// These methods implement the task lifecycle portion of the kernel API.
impl<P: Port> Kernel<P> {
    /// Create a task and make it Ready. The new task preempts the caller
    /// immediately if its priority is higher.
    pub fn task_create(&self, settings: TaskSettings) -> Result<TaskId> {
        if settings.priority == 0 {
            // Priority 0 is reserved for the idle task
            return Err(KernelError::InvalidParam);
        }
        self.create_task_inner(settings)
    }

    pub(crate) fn create_task_inner(&self, settings: TaskSettings) -> Result<TaskId> {
        if settings.stack_size == 0 {
            return Err(KernelError::InvalidParam);
        }

        let mut stack = vec![0u8; settings.stack_size];
        self.port()
            .build_initial_stack_frame(settings.function, settings.argument, &mut stack)?;

        let task = {
            let mut g = self.lock();
            let st = &mut *g;
            if settings.priority >= st.cfg.priority_levels {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            let cb = TaskCb::new(
                settings.function,
                settings.argument,
                stack,
                settings.priority,
            );
            let Some(task) = st.tasks.allocate(cb) else {
                st.ready.unlock_scheduler();
                return Err(KernelError::NotEnoughKernelMemory);
            };
            make_ready(st, task);
            log::trace!("created task {task:?} at priority {}", settings.priority);
            task
        };

        self.reschedule()?;
        Ok(TaskId(task))
    }

    /// Move the task into the `Suspended` state. A blocked task abandons its
    /// wait. Fails if the task is already suspended.
    pub fn task_suspend(&self, id: TaskId) -> Result<()> {
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.tasks.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            if st.tasks[id.0].state == TaskState::Suspended {
                st.ready.unlock_scheduler();
                return Err(KernelError::TaskAlreadySuspended);
            }
            if st.tasks[id.0].state == TaskState::Terminated {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidParam);
            }
            make_pending(st, id.0, TaskState::Suspended, None);
            st.disarm_task_timeout(id.0);
        }
        self.reschedule()
    }

    /// Make a suspended task Ready again.
    pub fn task_resume(&self, id: TaskId) -> Result<()> {
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.tasks.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            if st.tasks[id.0].state != TaskState::Suspended {
                st.ready.unlock_scheduler();
                return Err(KernelError::TaskAlreadyResumed);
            }
            make_ready(st, id.0);
        }
        self.reschedule()
    }

    /// Mark the task `Terminated` and queue it for reclamation by the idle
    /// task. Deleting the running task switches away from it immediately.
    pub fn task_delete(&self, id: TaskId) -> Result<()> {
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.tasks.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            if st.tasks[id.0].state == TaskState::Terminated {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidParam);
            }
            make_pending(st, id.0, TaskState::Terminated, None);
            st.disarm_task_timeout(id.0);
            log::trace!("task {:?} terminated", id.0);
        }
        self.reschedule()
    }

    /// Change a task's priority, returning the previous one. The change takes
    /// effect immediately for a Ready task; a blocked task is repositioned
    /// when it wakes.
    pub fn task_set_priority(&self, id: TaskId, priority: u8) -> Result<u8> {
        if priority == 0 {
            return Err(KernelError::InvalidParam);
        }
        let old = {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.tasks.contains(id.0) || priority >= st.cfg.priority_levels {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            set_priority_inner(st, id.0, priority)
        };
        self.reschedule()?;
        Ok(old)
    }

    pub fn task_priority(&self, id: TaskId) -> Result<u8> {
        let g = self.lock();
        g.tasks
            .get(id.0)
            .map(|t| t.priority)
            .ok_or(KernelError::InvalidParam)
    }

    pub fn task_state(&self, id: TaskId) -> Result<TaskState> {
        let g = self.lock();
        g.tasks
            .get(id.0)
            .map(|t| t.state)
            .ok_or(KernelError::InvalidParam)
    }

    /// Re-enqueue the calling task at the tail of its own priority level and
    /// reschedule. Has no effect when it is the only task at that level.
    pub fn yield_now(&self) -> Result<()> {
        {
            let mut g = self.lock();
            let st = &mut *g;
            let task = st.running_task()?;
            st.ready.lock_scheduler();
            {
                let KernelState { ready, tasks, .. } = st;
                ready.remove(tasks, task);
            }
            make_ready(st, task);
        }
        self.reschedule()
    }

    /// The task the kernel considers to be executing right now.
    pub fn current_task(&self) -> Option<TaskId> {
        self.lock().running_task.map(TaskId)
    }

    /// The number of live tasks, the idle task included.
    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// How many more tasks the control-block pool can hold, or `None` when
    /// it is unbounded.
    pub fn unused_task_capacity(&self) -> Option<usize> {
        self.lock().tasks.unused_capacity()
    }

    /// Reclaim one `Terminated` task's stack and control block. Returns
    /// `false` when the deferred-delete list is empty.
    ///
    /// This is the idle task's duty; it runs whenever nothing else is Ready,
    /// which defers freeing until no interrupt or lock context can still
    /// reference the task.
    pub fn reclaim_one_terminated_task(&self) -> bool {
        let mut g = self.lock();
        let st = &mut *g;
        let Some(task) = st.to_delete.first else {
            return false;
        };
        {
            let KernelState {
                to_delete, tasks, ..
            } = st;
            list::remove(to_delete, tasks, task, |t| &mut t.link);
        }
        // The deferred-delete list only holds live control blocks
        let cb = st.tasks.deallocate(task).expect("terminated task vanished");
        log::trace!("reclaimed task {task:?} ({} B stack)", cb.stack.len());
        true
    }
}
