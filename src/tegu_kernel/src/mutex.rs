//! Mutexes (fixed-ceiling protocol)
//!
//! Single-owner and recursive. While owned, the owner runs at the configured
//! ceiling priority if its own priority is lower, which bounds how long
//! lower-priority work can delay higher-priority work. This is a fixed
//! ceiling, not dynamic priority inheritance from the highest-priority
//! blocked waiter.
use core::fmt;

use crate::{
    error::WakeCause,
    state::KernelState,
    task::{self, TaskRef, TaskState},
    timeout::Deadline,
    utils::pool::PoolPtr,
    wait::{self, WaitChannel, WaitQueue},
    Kernel, KernelError, Port, Result,
};

/// Numeric handle identifying a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) PoolPtr);

/// *Mutex control block* - the state data of a mutex.
///
/// Invariant: `!owned` implies `recursion_depth == 0 && owner.is_none()`.
pub(crate) struct MutexCb {
    pub(crate) owned: bool,

    /// The owning task. Never dereferenced after the task is deleted; only
    /// compared against the caller.
    pub(crate) owner: Option<TaskRef>,

    pub(crate) recursion_depth: u32,

    /// The owner's pre-boost priority. Saved here rather than on the task so
    /// restoration stays correct across recursive re-entry.
    pub(crate) saved_priority: u8,

    pub(crate) waiters: WaitQueue,
}

impl fmt::Debug for MutexCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MutexCb")
            .field("owned", &self.owned)
            .field("owner", &self.owner)
            .field("recursion_depth", &self.recursion_depth)
            .finish()
    }
}

/// Give the ownership of the mutex to `task` and apply the ceiling boost.
///
/// The saved pre-boost priority lands on the mutex, and the boost is applied
/// before the task is (re)admitted to the ready queue so it enqueues at the
/// boosted level.
fn lock_core(st: &mut KernelState, mutex: PoolPtr, task: TaskRef) {
    let ceiling = st.cfg.mutex_ceiling_priority;
    let saved = st.tasks[task].priority;

    let m = &mut st.mutexes[mutex];
    m.owned = true;
    m.owner = Some(task);
    m.recursion_depth = 1;
    m.saved_priority = saved;

    if saved < ceiling {
        // Don't bump the priority if it is already at or above the ceiling
        task::set_priority_inner(st, task, ceiling);
    }
}

/// These methods implement the mutex portion of the kernel API.
impl<P: Port> Kernel<P> {
    pub fn mutex_create(&self) -> Result<MutexId> {
        let mut g = self.lock();
        let st = &mut *g;
        st.ready.lock_scheduler();
        let cb = MutexCb {
            owned: false,
            owner: None,
            recursion_depth: 0,
            saved_priority: 0,
            waiters: WaitQueue::new(),
        };
        let Some(mutex) = st.mutexes.allocate(cb) else {
            st.ready.unlock_scheduler();
            return Err(KernelError::NotEnoughKernelMemory);
        };
        st.ready.unlock_scheduler();
        log::trace!("created mutex {mutex:?}");
        Ok(MutexId(mutex))
    }

    /// Acquire the mutex without blocking. Fails with `MutexAlreadyTaken` if
    /// another task owns it; recursive acquisition by the owner succeeds and
    /// increments the recursion depth.
    pub fn mutex_try_lock(&self, id: MutexId) -> Result<()> {
        self.expect_waitable_context()?;
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.mutexes.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            let Some(task) = st.running_task else {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidKernelState);
            };

            let m = &mut st.mutexes[id.0];
            if m.owned {
                if m.owner == Some(task) {
                    m.recursion_depth = m.recursion_depth.saturating_add(1);
                    st.ready.unlock_scheduler();
                    return Ok(());
                }
                st.ready.unlock_scheduler();
                return Err(KernelError::MutexAlreadyTaken);
            }

            lock_core(st, id.0, task);
        }
        self.reschedule()
    }

    /// Acquire the mutex, blocking for up to `deadline` while another task
    /// owns it. Recursive acquisition by the owner never blocks.
    pub fn mutex_lock(&self, id: MutexId, deadline: Deadline) -> Result<()> {
        self.expect_waitable_context()?;
        if deadline == Deadline::Ticks(0) {
            return Err(KernelError::InvalidParam);
        }

        let task = {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.mutexes.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            let Some(task) = st.running_task else {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidKernelState);
            };

            let m = &mut st.mutexes[id.0];
            if !m.owned {
                lock_core(st, id.0, task);
                drop(g);
                return self.reschedule();
            }

            if m.owner == Some(task) {
                m.recursion_depth = m.recursion_depth.saturating_add(1);
                st.ready.unlock_scheduler();
                return Ok(());
            }

            if deadline == Deadline::NoWait {
                st.ready.unlock_scheduler();
                return Err(KernelError::MutexAlreadyTaken);
            }

            task::make_pending(
                st,
                task,
                TaskState::PendingMutex,
                Some(WaitChannel::Mutex(id.0)),
            );
            st.arm_task_timeout(task, deadline);
            task
        };

        // Does not return (to this task) until the owner hands the mutex
        // over, the deadline passes, or the mutex is deleted
        self.reschedule()?;

        let g = self.lock();
        // On a successful wake the previous owner already transferred
        // ownership to this task
        g.tasks[task].wait_outcome()
    }

    /// Release one level of ownership. At depth zero the owner's saved
    /// priority is restored, and if a waiter is queued, ownership passes
    /// directly to it (with the ceiling boost applied) before it wakes, so
    /// there is no window where the mutex appears free.
    ///
    /// Only the recorded owner may unlock.
    pub fn mutex_unlock(&self, id: MutexId) -> Result<()> {
        self.expect_waitable_context()?;
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.mutexes.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            let Some(task) = st.running_task else {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidKernelState);
            };

            let m = &mut st.mutexes[id.0];
            if m.owner != Some(task) {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidMutexOwner);
            }

            m.recursion_depth -= 1;
            if m.recursion_depth != 0 {
                st.ready.unlock_scheduler();
                return Ok(());
            }

            let saved = m.saved_priority;
            task::set_priority_inner(st, task, saved);

            if let Some(next) = wait::claim_next_waiter(st, WaitChannel::Mutex(id.0)) {
                lock_core(st, id.0, next);
                wait::complete_wake(st, next, WakeCause::Delivered);
            } else {
                let m = &mut st.mutexes[id.0];
                m.owned = false;
                m.owner = None;
            }
        }
        self.reschedule()
    }

    /// Delete the mutex, waking all waiters with `ObjectDeleted`.
    pub fn mutex_delete(&self, id: MutexId) -> Result<()> {
        self.expect_waitable_context()?;
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.mutexes.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            wait::wake_all_with(st, WaitChannel::Mutex(id.0), WakeCause::ObjectDeleted);
            st.mutexes.deallocate(id.0);
        }
        self.reschedule()
    }
}
