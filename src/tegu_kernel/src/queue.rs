//! Message queues
//!
//! Fixed-slot circular buffer with two independent FIFO wait queues: writers
//! pending on a full buffer and readers pending on an empty one.
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::{
    error::WakeCause,
    task::{self, TaskState},
    timeout::Deadline,
    utils::pool::PoolPtr,
    wait::{self, WaitChannel, WaitQueue},
    Kernel, KernelError, Port, Result,
};

/// Numeric handle identifying a message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) PoolPtr);

/// *Queue control block* - the state data of a message queue.
///
/// Invariant: `available_slots == 0` iff `full`;
/// `available_slots == slot_count` iff `empty`.
pub(crate) struct QueueCb {
    storage: Vec<u8>,
    slot_size: usize,
    slot_count: usize,

    /// Slot index of the next read.
    head: usize,
    /// Slot index of the next write.
    tail: usize,

    available_slots: usize,
    full: bool,
    empty: bool,

    pub(crate) writers: WaitQueue,
    pub(crate) readers: WaitQueue,
}

impl fmt::Debug for QueueCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("QueueCb")
            .field("slot_size", &self.slot_size)
            .field("slot_count", &self.slot_count)
            .field("available_slots", &self.available_slots)
            .field("full", &self.full)
            .field("empty", &self.empty)
            .finish()
    }
}

impl QueueCb {
    fn write_slot(&mut self, data: &[u8]) {
        debug_assert!(!self.full);
        let off = self.tail * self.slot_size;
        self.storage[off..off + self.slot_size].copy_from_slice(data);
        self.tail = (self.tail + 1) % self.slot_count;
        self.available_slots -= 1;
        self.empty = false;
        self.full = self.available_slots == 0;
    }

    /// Copy out the head slot. Advances the head and updates the
    /// availability bookkeeping only when `consume` is set; a peek leaves
    /// the queue untouched.
    fn read_slot(&mut self, out: &mut [u8], consume: bool) {
        debug_assert!(!self.empty);
        let off = self.head * self.slot_size;
        out.copy_from_slice(&self.storage[off..off + self.slot_size]);
        if consume {
            self.head = (self.head + 1) % self.slot_count;
            self.available_slots += 1;
            self.full = false;
            self.empty = self.available_slots == self.slot_count;
        }
    }
}

/// These methods implement the message queue portion of the kernel API.
impl<P: Port> Kernel<P> {
    /// Create a queue of `slot_count` fixed-size slots.
    pub fn queue_create(&self, slot_count: usize, slot_size: usize) -> Result<QueueId> {
        if slot_count == 0 || slot_size == 0 {
            return Err(KernelError::InvalidParam);
        }
        let bytes = slot_count
            .checked_mul(slot_size)
            .ok_or(KernelError::InvalidParam)?;
        let storage = vec![0u8; bytes];

        let mut g = self.lock();
        let st = &mut *g;
        st.ready.lock_scheduler();
        let cb = QueueCb {
            storage,
            slot_size,
            slot_count,
            head: 0,
            tail: 0,
            available_slots: slot_count,
            full: false,
            empty: true,
            writers: WaitQueue::new(),
            readers: WaitQueue::new(),
        };
        let Some(queue) = st.queues.allocate(cb) else {
            st.ready.unlock_scheduler();
            return Err(KernelError::NotEnoughKernelMemory);
        };
        st.ready.unlock_scheduler();
        log::trace!("created queue {queue:?} ({slot_count} x {slot_size} B)");
        Ok(QueueId(queue))
    }

    /// Copy `data` into the tail slot, waking one pending reader. Blocks for
    /// up to `deadline` while the buffer is full; with [`Deadline::NoWait`] a
    /// full buffer fails with `BufferFull`.
    ///
    /// `data` must be exactly one slot long. Callable from interrupt context
    /// as long as it does not have to block.
    pub fn queue_insert(&self, id: QueueId, data: &[u8], deadline: Deadline) -> Result<()> {
        if deadline == Deadline::Ticks(0) {
            return Err(KernelError::InvalidParam);
        }

        let task = {
            let mut g = self.lock();
            let st = &mut *g;
            let Some(q) = st.queues.get(id.0) else {
                return Err(KernelError::InvalidParam);
            };
            if data.len() != q.slot_size {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            if !st.queues[id.0].full {
                st.queues[id.0].write_slot(data);
                let woke = wait::unpend_next(st, WaitChannel::QueueReaders(id.0)).is_some();
                drop(g);
                return self.finish_queue_op(woke);
            }

            if deadline == Deadline::NoWait {
                st.ready.unlock_scheduler();
                return Err(KernelError::BufferFull);
            }
            if self.port().in_interrupt() {
                st.ready.unlock_scheduler();
                return Err(KernelError::InsideInterrupt);
            }

            let Some(task) = st.running_task else {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidKernelState);
            };
            task::make_pending(
                st,
                task,
                TaskState::PendingQueue,
                Some(WaitChannel::QueueWriters(id.0)),
            );
            st.arm_task_timeout(task, deadline);
            task
        };

        // Does not return (to this task) until a remove frees a slot, the
        // deadline passes, or the queue is deleted
        self.reschedule()?;

        {
            let g = self.lock();
            g.tasks[task].wait_outcome()?;
        }

        // Complete the insert the wake-up was for
        let woke = {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.queues.contains(id.0) {
                return Err(KernelError::ObjectDeleted);
            }
            st.ready.lock_scheduler();
            if st.queues[id.0].full {
                // The freed slot went to a higher-priority writer that ran
                // in between
                st.ready.unlock_scheduler();
                return Err(KernelError::BufferFull);
            }
            st.queues[id.0].write_slot(data);
            wait::unpend_next(st, WaitChannel::QueueReaders(id.0)).is_some()
        };
        self.finish_queue_op(woke)
    }

    /// Copy the head slot into `out` without advancing the head. Blocks like
    /// [`Kernel::queue_remove`] while the buffer is empty.
    pub fn queue_peek(&self, id: QueueId, out: &mut [u8], deadline: Deadline) -> Result<()> {
        self.read_op(id, out, deadline, false)
    }

    /// Copy the head slot into `out`, advance the head, and wake one pending
    /// writer. Blocks for up to `deadline` while the buffer is empty; with
    /// [`Deadline::NoWait`] an empty buffer fails with `BufferEmpty`.
    pub fn queue_remove(&self, id: QueueId, out: &mut [u8], deadline: Deadline) -> Result<()> {
        self.read_op(id, out, deadline, true)
    }

    fn read_op(&self, id: QueueId, out: &mut [u8], deadline: Deadline, consume: bool) -> Result<()> {
        if deadline == Deadline::Ticks(0) {
            return Err(KernelError::InvalidParam);
        }

        let task = {
            let mut g = self.lock();
            let st = &mut *g;
            let Some(q) = st.queues.get(id.0) else {
                return Err(KernelError::InvalidParam);
            };
            if out.len() != q.slot_size {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();

            if !st.queues[id.0].empty {
                st.queues[id.0].read_slot(out, consume);
                let woke = consume
                    && wait::unpend_next(st, WaitChannel::QueueWriters(id.0)).is_some();
                drop(g);
                return self.finish_queue_op(woke);
            }

            if deadline == Deadline::NoWait {
                st.ready.unlock_scheduler();
                return Err(KernelError::BufferEmpty);
            }
            if self.port().in_interrupt() {
                st.ready.unlock_scheduler();
                return Err(KernelError::InsideInterrupt);
            }

            let Some(task) = st.running_task else {
                st.ready.unlock_scheduler();
                return Err(KernelError::InvalidKernelState);
            };
            task::make_pending(
                st,
                task,
                TaskState::PendingQueue,
                Some(WaitChannel::QueueReaders(id.0)),
            );
            st.arm_task_timeout(task, deadline);
            task
        };

        // Does not return (to this task) until an insert delivers a message,
        // the deadline passes, or the queue is deleted
        self.reschedule()?;

        {
            let g = self.lock();
            g.tasks[task].wait_outcome()?;
        }

        // Complete the read the wake-up was for
        let woke = {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.queues.contains(id.0) {
                return Err(KernelError::ObjectDeleted);
            }
            st.ready.lock_scheduler();
            if st.queues[id.0].empty {
                // The delivered message went to a higher-priority reader
                // that ran in between
                st.ready.unlock_scheduler();
                return Err(KernelError::BufferEmpty);
            }
            st.queues[id.0].read_slot(out, consume);
            consume && wait::unpend_next(st, WaitChannel::QueueWriters(id.0)).is_some()
        };
        self.finish_queue_op(woke)
    }

    /// Delete the queue, waking all pending writers and readers with
    /// `ObjectDeleted`.
    pub fn queue_delete(&self, id: QueueId) -> Result<()> {
        self.expect_waitable_context()?;
        {
            let mut g = self.lock();
            let st = &mut *g;
            if !st.queues.contains(id.0) {
                return Err(KernelError::InvalidParam);
            }
            st.ready.lock_scheduler();
            wait::wake_all_with(st, WaitChannel::QueueWriters(id.0), WakeCause::ObjectDeleted);
            wait::wake_all_with(st, WaitChannel::QueueReaders(id.0), WakeCause::ObjectDeleted);
            st.queues.deallocate(id.0);
        }
        self.reschedule()
    }

    /// Release the scheduler lock taken by a queue operation. The reschedule
    /// runs only when a waiter was woken, and is deferred to ISR exit when
    /// the operation came from an interrupt.
    fn finish_queue_op(&self, woke: bool) -> Result<()> {
        if !woke || self.port().in_interrupt() {
            self.sched_resume();
            Ok(())
        } else {
            self.reschedule()
        }
    }
}
