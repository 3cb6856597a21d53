//! Semaphores
use core::fmt;

use crate::{
    error::WakeCause,
    task::{self, TaskState},
    timeout::Deadline,
    utils::pool::PoolPtr,
    wait::{self, WaitChannel, WaitQueue},
    Kernel, KernelError, Port, Result,
};

/// Numeric handle identifying a counting semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(pub(crate) PoolPtr);

/// *Semaphore control block* - the state data of a counting semaphore.
///
/// Invariant: `count <= limit`.
pub(crate) struct SemaphoreCb {
    pub(crate) count: u32,
    pub(crate) limit: u32,
    pub(crate) waiters: WaitQueue,
}

impl fmt::Debug for SemaphoreCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SemaphoreCb")
            .field("count", &self.count)
            .field("limit", &self.limit)
            .finish()
    }
}

/// These methods implement the semaphore portion of the kernel API.
impl<P: Port> Kernel<P> {
    /// Create a counting semaphore. `limit` caps the count and must be
    /// positive; `initial` must not exceed it.
    pub fn semaphore_create(&self, initial: u32, limit: u32) -> Result<SemaphoreId> {
        if limit == 0 || initial > limit {
            return Err(KernelError::InvalidParam);
        }

        let mut g = self.lock();
        let st = &mut *g;
        st.ready.lock_scheduler();
        let cb = SemaphoreCb {
            count: initial,
            limit,
            waiters: WaitQueue::new(),
        };
        let Some(sem) = st.semaphores.allocate(cb) else {
            st.ready.unlock_scheduler();
            return Err(KernelError::NotEnoughKernelMemory);
        };
        st.ready.unlock_scheduler();
        log::trace!("created semaphore {sem:?} ({initial}/{limit})");
        Ok(SemaphoreId(sem))
    }

    /// Consume one unit, blocking for up to `deadline` if none is available.
    ///
    /// With [`Deadline::NoWait`] an empty semaphore fails with
    /// `SemaphoreUnavailable` instead of blocking.
    pub fn semaphore_take(&self, id: SemaphoreId, deadline: Deadline) -> Result<()> {
        self.expect_waitable_context()?;
        if deadline == Deadline::Ticks(0) {
            return Err(KernelError::InvalidParam);
        }

        let task = {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.semaphores.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            if st.semaphores[id.0].count > 0 {
                st.semaphores[id.0].count -= 1;
                st.ready.unlock_scheduler();
                return Ok(());
            }

            if deadline == Deadline::NoWait {
                st.ready.unlock_scheduler();
                return Err(KernelError::SemaphoreUnavailable);
            }

            let Some(task) = st.running_task else {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidKernelState);
            };
            task::make_pending(
                st,
                task,
                TaskState::PendingSemaphore,
                Some(WaitChannel::Semaphore(id.0)),
            );
            st.arm_task_timeout(task, deadline);
            task
        };

        // Does not return (to this task) until a give hands it a unit, the
        // deadline passes, or the semaphore is deleted
        self.reschedule()?;

        let g = self.lock();
        g.tasks[task].wait_outcome()
    }

    /// Deposit `count` units, saturating at the semaphore's limit. If a task
    /// is waiting, exactly one waiter (FIFO) is woken and one unit is
    /// consumed on its behalf, making the hand-off atomic with respect to
    /// other takers.
    ///
    /// Callable from interrupt context; the reschedule is then deferred to
    /// ISR exit.
    pub fn semaphore_give(&self, id: SemaphoreId, count: u32) -> Result<()> {
        if count == 0 {
            return Err(KernelError::InvalidParam);
        }
        if self.port().in_interrupt() && self.port().interrupt_nesting() == 0 {
            return Err(KernelError::InvalidKernelState);
        }

        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.semaphores.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            let sem = &mut st.semaphores[id.0];
            sem.count = sem.count.saturating_add(count).min(sem.limit);

            if wait::unpend_next(st, WaitChannel::Semaphore(id.0)).is_some() {
                let sem = &mut st.semaphores[id.0];
                if sem.count > 0 {
                    sem.count -= 1;
                }
            }
        }

        if self.port().in_interrupt() {
            // Intentional batching: the switch happens at ISR exit
            self.sched_resume();
            Ok(())
        } else {
            self.reschedule()
        }
    }

    /// Read the current count. No scheduling effect.
    pub fn semaphore_count(&self, id: SemaphoreId) -> Result<u32> {
        let g = self.lock();
        g.semaphores
            .get(id.0)
            .map(|s| s.count)
            .ok_or(KernelError::InvalidParam)
    }

    /// Delete the semaphore, waking all waiters with `ObjectDeleted`.
    pub fn semaphore_delete(&self, id: SemaphoreId) -> Result<()> {
        self.expect_waitable_context()?;
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.semaphores.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            wait::wake_all_with(st, WaitChannel::Semaphore(id.0), WakeCause::ObjectDeleted);
            st.semaphores.deallocate(id.0);
        }
        self.reschedule()
    }
}
