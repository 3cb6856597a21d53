//! Wait queues
//!
//! A wait queue is a plain FIFO of tasks blocked on one specific kernel
//! object. Waiters are served in arrival order regardless of task priority;
//! this is a deliberate policy choice, decoupled from the priority-partitioned
//! ordering of the ready queue.
use crate::{
    error::WakeCause,
    state::KernelState,
    task::{self, TaskCb, TaskRef},
    utils::{
        list::{self, ListHead},
        pool::{Pool, PoolPtr},
    },
};

/// FIFO queue of tasks blocked on one kernel object.
///
/// The queue links tasks through their embedded list link, which a task uses
/// for exactly one list at a time (ready list, wait queue, or the
/// deferred-delete list).
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitQueue {
    head: ListHead,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: ListHead::new(),
        }
    }

    pub(crate) fn push_back(&mut self, tasks: &mut Pool<TaskCb>, task: TaskRef) {
        list::push_back(&mut self.head, tasks, task, |t| &mut t.link);
    }

    pub(crate) fn pop_front(&mut self, tasks: &mut Pool<TaskCb>) -> Option<TaskRef> {
        list::pop_front(&mut self.head, tasks, |t| &mut t.link)
    }

    pub(crate) fn remove(&mut self, tasks: &mut Pool<TaskCb>, task: TaskRef) {
        list::remove(&mut self.head, tasks, task, |t| &mut t.link);
    }
}

/// Identifies the wait queue a blocked task sits in, so that timeouts,
/// suspension, and deletion can unlink it without a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitChannel {
    Semaphore(PoolPtr),
    Mutex(PoolPtr),
    QueueWriters(PoolPtr),
    QueueReaders(PoolPtr),
}

/// Move the channel's queue out of its control block so the task pool can be
/// borrowed alongside it. Always paired with [`put_queue`].
fn take_queue(st: &mut KernelState, chan: WaitChannel) -> WaitQueue {
    let slot = match chan {
        WaitChannel::Semaphore(p) => &mut st.semaphores[p].waiters,
        WaitChannel::Mutex(p) => &mut st.mutexes[p].waiters,
        WaitChannel::QueueWriters(p) => &mut st.queues[p].writers,
        WaitChannel::QueueReaders(p) => &mut st.queues[p].readers,
    };
    core::mem::replace(slot, WaitQueue::new())
}

fn put_queue(st: &mut KernelState, chan: WaitChannel, q: WaitQueue) {
    let slot = match chan {
        WaitChannel::Semaphore(p) => &mut st.semaphores[p].waiters,
        WaitChannel::Mutex(p) => &mut st.mutexes[p].waiters,
        WaitChannel::QueueWriters(p) => &mut st.queues[p].writers,
        WaitChannel::QueueReaders(p) => &mut st.queues[p].readers,
    };
    *slot = q;
}

/// Append the task to the channel's wait queue and record the membership.
pub(crate) fn enqueue_waiter(st: &mut KernelState, chan: WaitChannel, task: TaskRef) {
    let mut q = take_queue(st, chan);
    q.push_back(&mut st.tasks, task);
    put_queue(st, chan, q);
    st.tasks[task].waiting_on = Some(chan);
}

/// Unlink the task from whatever wait queue it is pending on. No-op for a
/// task that isn't queue-blocked (e.g. a sleeper).
pub(crate) fn remove_waiter(st: &mut KernelState, task: TaskRef) {
    if let Some(chan) = st.tasks[task].waiting_on.take() {
        let mut q = take_queue(st, chan);
        q.remove(&mut st.tasks, task);
        put_queue(st, chan, q);
    }
}

/// Detach the first waiter from the channel's queue and disarm its timeout,
/// without making it ready yet. The caller finishes the hand-off (e.g.
/// transfers mutex ownership) and then calls [`complete_wake`].
pub(crate) fn claim_next_waiter(st: &mut KernelState, chan: WaitChannel) -> Option<TaskRef> {
    let mut q = take_queue(st, chan);
    let task = q.pop_front(&mut st.tasks);
    put_queue(st, chan, q);
    let task = task?;
    st.tasks[task].waiting_on = None;
    st.disarm_task_timeout(task);
    Some(task)
}

/// Record the wake cause and admit the task to the ready queue.
pub(crate) fn complete_wake(st: &mut KernelState, task: TaskRef, cause: WakeCause) {
    st.tasks[task].wake_cause = cause;
    task::make_ready(st, task);
}

/// Wake the first waiter with a successful result. Returns the woken task.
pub(crate) fn unpend_next(st: &mut KernelState, chan: WaitChannel) -> Option<TaskRef> {
    let task = claim_next_waiter(st, chan)?;
    complete_wake(st, task, WakeCause::Delivered);
    Some(task)
}

/// Force-wake every waiter with the given cause. Used when the object they
/// are pending on is deleted; the waiters observe a failure, not a success.
pub(crate) fn wake_all_with(st: &mut KernelState, chan: WaitChannel, cause: WakeCause) {
    while let Some(task) = claim_next_waiter(st, chan) {
        complete_wake(st, task, cause);
    }
}

/// Timeout expiry handler for a blocked task: unlink it from its wait queue
/// (if any) and wake it with a timeout result.
pub(crate) fn expire_wait(st: &mut KernelState, task: TaskRef) {
    remove_waiter(st, task);
    complete_wake(st, task, WakeCause::TimedOut);
}
