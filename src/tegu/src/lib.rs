//! Application-facing API for the tegu RTOS kernel.
//!
//! This crate layers typed object handles over the raw id-based surface of
//! [`tegu_kernel`]. A handle pairs a kernel reference with an object id, so
//! application code reads as method calls on the object:
//!
//! ```rust,ignore
//! use tegu::prelude::*;
//!
//! let sem = kernel.new_semaphore(0, 1)?;
//! sem.give(1)?;
//! sem.take(Deadline::Forever)?;
//! ```
//!
//! Everything here delegates to the kernel; no additional state is kept in
//! the handles, which are freely copyable.
#![cfg_attr(not(test), no_std)]

use core::fmt;

pub use tegu_kernel::{
    Deadline, Kernel, KernelConfig, KernelError, MutexId, Port, QueueId, Result, SemaphoreId,
    TaskFunction, TaskId, TaskSettings, TaskState, Ticks, TimerCallback, TimerId,
    MAX_PRIORITY_LEVELS,
};

/// The prelude: the kernel entry points plus every handle type.
pub mod prelude {
    pub use crate::{
        Deadline, Kernel, KernelConfig, KernelExt, MessageQueue, Mutex, Semaphore, Task,
        TaskSettings, Timer,
    };
}

macro_rules! define_handle {
    (
        $( #[doc $( $doc:tt )*] )*
        pub struct $Name:ident($IdTy:ty);
    ) => {
        $( #[doc $( $doc )*] )*
        pub struct $Name<'k, P: Port> {
            kernel: &'k Kernel<P>,
            id: $IdTy,
        }

        impl<'k, P: Port> $Name<'k, P> {
            /// Construct a handle from a raw object id.
            pub const fn from_id(kernel: &'k Kernel<P>, id: $IdTy) -> Self {
                Self { kernel, id }
            }

            /// The raw object id this handle refers to.
            pub const fn id(&self) -> $IdTy {
                self.id
            }
        }

        impl<P: Port> Clone for $Name<'_, P> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<P: Port> Copy for $Name<'_, P> {}

        impl<P: Port> fmt::Debug for $Name<'_, P> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_tuple(stringify!($Name)).field(&self.id).finish()
            }
        }
    };
}

define_handle! {
    /// A task of the kernel.
    pub struct Task(TaskId);
}

define_handle! {
    /// A counting semaphore.
    pub struct Semaphore(SemaphoreId);
}

define_handle! {
    /// A recursive mutex with fixed-ceiling priority boosting.
    pub struct Mutex(MutexId);
}

define_handle! {
    /// A fixed-slot message queue.
    pub struct MessageQueue(QueueId);
}

define_handle! {
    /// A software timer.
    pub struct Timer(TimerId);
}

impl<P: Port> Task<'_, P> {
    pub fn suspend(&self) -> Result<()> {
        self.kernel.task_suspend(self.id)
    }

    pub fn resume(&self) -> Result<()> {
        self.kernel.task_resume(self.id)
    }

    pub fn delete(&self) -> Result<()> {
        self.kernel.task_delete(self.id)
    }

    /// Change the task's priority, returning the previous one.
    pub fn set_priority(&self, priority: u8) -> Result<u8> {
        self.kernel.task_set_priority(self.id, priority)
    }

    pub fn priority(&self) -> Result<u8> {
        self.kernel.task_priority(self.id)
    }
}

impl<P: Port> Semaphore<'_, P> {
    pub fn take(&self, deadline: Deadline) -> Result<()> {
        self.kernel.semaphore_take(self.id, deadline)
    }

    pub fn give(&self, count: u32) -> Result<()> {
        self.kernel.semaphore_give(self.id, count)
    }

    pub fn count(&self) -> Result<u32> {
        self.kernel.semaphore_count(self.id)
    }

    pub fn delete(&self) -> Result<()> {
        self.kernel.semaphore_delete(self.id)
    }
}

impl<P: Port> Mutex<'_, P> {
    pub fn lock(&self, deadline: Deadline) -> Result<()> {
        self.kernel.mutex_lock(self.id, deadline)
    }

    pub fn try_lock(&self) -> Result<()> {
        self.kernel.mutex_try_lock(self.id)
    }

    pub fn unlock(&self) -> Result<()> {
        self.kernel.mutex_unlock(self.id)
    }

    pub fn delete(&self) -> Result<()> {
        self.kernel.mutex_delete(self.id)
    }
}

impl<P: Port> MessageQueue<'_, P> {
    pub fn insert(&self, data: &[u8], deadline: Deadline) -> Result<()> {
        self.kernel.queue_insert(self.id, data, deadline)
    }

    /// Non-destructive read of the head slot.
    pub fn peek(&self, out: &mut [u8], deadline: Deadline) -> Result<()> {
        self.kernel.queue_peek(self.id, out, deadline)
    }

    pub fn remove(&self, out: &mut [u8], deadline: Deadline) -> Result<()> {
        self.kernel.queue_remove(self.id, out, deadline)
    }

    pub fn delete(&self) -> Result<()> {
        self.kernel.queue_delete(self.id)
    }
}

impl<P: Port> Timer<'_, P> {
    pub fn start(&self) -> Result<()> {
        self.kernel.timer_start(self.id)
    }

    pub fn stop(&self) -> Result<()> {
        self.kernel.timer_stop(self.id)
    }

    /// Stop the timer and record new expiry/period values; restart it with
    /// [`Timer::start`].
    pub fn set_values(&self, expiry_time: Ticks, period_time: Ticks) -> Result<()> {
        self.kernel.timer_set_values(self.id, expiry_time, period_time)
    }

    pub fn delete(&self) -> Result<()> {
        self.kernel.timer_delete(self.id)
    }
}

/// Handle-returning constructors, implemented for [`Kernel`].
pub trait KernelExt<P: Port> {
    /// Create a task and make it Ready.
    fn new_task(&self, settings: TaskSettings) -> Result<Task<'_, P>>;

    /// Create a counting semaphore.
    fn new_semaphore(&self, initial: u32, limit: u32) -> Result<Semaphore<'_, P>>;

    /// Create a mutex.
    fn new_mutex(&self) -> Result<Mutex<'_, P>>;

    /// Create a message queue of `slot_count` slots of `slot_size` bytes.
    fn new_queue(&self, slot_count: usize, slot_size: usize) -> Result<MessageQueue<'_, P>>;

    /// Create a software timer.
    fn new_timer(
        &self,
        callback: TimerCallback,
        expiry_time: Ticks,
        period_time: Ticks,
        user_data: usize,
    ) -> Result<Timer<'_, P>>;
}

impl<P: Port> KernelExt<P> for Kernel<P> {
    fn new_task(&self, settings: TaskSettings) -> Result<Task<'_, P>> {
        Ok(Task::from_id(self, self.task_create(settings)?))
    }

    fn new_semaphore(&self, initial: u32, limit: u32) -> Result<Semaphore<'_, P>> {
        Ok(Semaphore::from_id(self, self.semaphore_create(initial, limit)?))
    }

    fn new_mutex(&self) -> Result<Mutex<'_, P>> {
        Ok(Mutex::from_id(self, self.mutex_create()?))
    }

    fn new_queue(&self, slot_count: usize, slot_size: usize) -> Result<MessageQueue<'_, P>> {
        Ok(MessageQueue::from_id(
            self,
            self.queue_create(slot_count, slot_size)?,
        ))
    }

    fn new_timer(
        &self,
        callback: TimerCallback,
        expiry_time: Ticks,
        period_time: Ticks,
        user_data: usize,
    ) -> Result<Timer<'_, P>> {
        Ok(Timer::from_id(
            self,
            self.timer_create(callback, expiry_time, period_time, user_data)?,
        ))
    }
}
