//! A preemptive, priority-based real-time kernel core.
//!
//! The kernel provides tasks, blocking synchronization primitives (counting
//! semaphore, fixed-ceiling mutex, fixed-slot message queue), and a
//! tick-driven timeout engine, all coordinated by a single ready-queue
//! scheduler.
//!
//! # Scheduling model
//!
//! One task runs at a time, preemptive by priority. Priorities are numeric
//! with 0 the lowest; 0 is reserved for the internally created idle task.
//! Within one priority level, admission to the ready queue and wait-queue
//! wake-ups are FIFO. Once per tick the highest active level is rotated so
//! equal-priority tasks share the processor round-robin; lower levels are
//! never rotated.
//!
//! A task gives up the processor only at a blocking call (semaphore take,
//! mutex lock, queue insert/peek/remove, sleep) or a voluntary
//! [`yield_now`](Kernel::yield_now). Every state-affecting operation funnels
//! into one reschedule point, which is suppressed while the reentrant
//! scheduler lock is held and deferred to ISR exit for operations issued
//! from interrupt handlers.
//!
//! # The port
//!
//! Context-switch mechanics, stack-frame layout, and interrupt masking are
//! delegated to an architecture port implementing [`Port`]. The kernel calls
//! the port; it never inspects registers or stack layouts itself. The
//! port-facing entry points ([`Kernel::tick_advance`],
//! [`Kernel::interrupt_enter`], [`Kernel::interrupt_exit`],
//! [`Kernel::reclaim_one_terminated_task`]) are what a port wires into its
//! tick interrupt, ISR prologue/epilogue, and idle loop.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cfg;
mod error;
mod klock;
mod mutex;
mod queue;
mod semaphore;
mod state;
mod task;
mod timeout;
mod timer;
pub(crate) mod utils;
mod wait;

pub use self::{
    cfg::{KernelConfig, MAX_PRIORITY_LEVELS},
    error::{KernelError, Result},
    mutex::MutexId,
    queue::QueueId,
    semaphore::SemaphoreId,
    task::{TaskFunction, TaskId, TaskSettings, TaskState},
    timeout::{Deadline, Ticks},
    timer::{TimerCallback, TimerId},
};

use crate::{state::KernelState, timeout::FiredTimers};

/// The capability contract an architecture port provides to the kernel.
///
/// These methods are only meant to be called by the kernel.
pub trait Port {
    /// Set up the tick timer and interrupt priorities. Called once from
    /// [`Kernel::start`], before the first task is dispatched.
    fn initialize_timer_and_priorities(&self);

    /// Prepare a new task's stack so that the task starts execution from
    /// `entry_point` with `argument` the first time it receives control.
    fn build_initial_stack_frame(
        &self,
        entry_point: TaskFunction,
        argument: usize,
        stack: &mut [u8],
    ) -> Result<()>;

    /// Mask kernel-managed interrupts. Nests; each call must be balanced by
    /// [`Port::exit_critical_section`].
    fn enter_critical_section(&self);

    fn exit_critical_section(&self);

    /// Perform (or pend) a context switch to the task the kernel has
    /// committed as running. With `from_interrupt` set, the switch must be
    /// deferred to the interrupt's return path rather than taken in place.
    ///
    /// When the calling task was just blocked, this call does not return
    /// until the task is scheduled again.
    fn request_context_switch(&self, from_interrupt: bool);

    /// Note entry into an interrupt handler. Nests.
    fn enter_interrupt(&self);

    /// Note exit from an interrupt handler; returns the remaining nesting
    /// depth.
    fn leave_interrupt(&self) -> u32;

    fn in_interrupt(&self) -> bool;

    fn interrupt_nesting(&self) -> u32;

    /// Whether the caller is inside an interrupt handler or a critical
    /// section, i.e. a context where blocking is forbidden.
    fn in_critical_or_interrupt(&self) -> bool;

    /// Count leading zeros; the scheduler's priority scan. The default uses
    /// the compiler intrinsic, which lowers to a single instruction on
    /// targets that have one.
    fn count_leading_zeros(word: u32) -> u8 {
        word.leading_zeros() as u8
    }
}

/// The kernel context value: every piece of kernel state, plus the port.
///
/// Constructed once by [`Kernel::new`] and referenced by every core
/// operation.
pub struct Kernel<P: Port> {
    state: spin::Mutex<KernelState>,
    port: P,
}

impl<P: Port> Kernel<P> {
    /// Construct a kernel from a validated configuration. No task runs until
    /// [`Kernel::start`].
    pub fn new(cfg: KernelConfig, port: P) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            state: spin::Mutex::new(KernelState::new(cfg)),
            port,
        })
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub(crate) fn lock(&self) -> klock::StateGuard<'_, P> {
        klock::lock(&self.port, &self.state)
    }

    /// Release one level of the scheduler lock without a reschedule.
    pub(crate) fn sched_resume(&self) {
        let _ = self.lock().ready.unlock_scheduler();
    }

    /// Blocking operations are only legal from task context, outside any
    /// critical section.
    pub(crate) fn expect_waitable_context(&self) -> Result<()> {
        if self.port.in_critical_or_interrupt() {
            Err(KernelError::InsideInterrupt)
        } else {
            Ok(())
        }
    }

    /// Commit the highest-priority ready task as the running task. Returns
    /// whether a context switch towards it is required.
    fn commit_next_task(&self, st: &mut KernelState) -> Result<bool> {
        let next = st
            .pick_highest_ready(P::count_leading_zeros)
            .map_err(|_| KernelError::InvalidKernelState)?;

        if st.started && st.running_task != Some(next) {
            let prev = st.running_task.replace(next);
            log::trace!("switching context: {prev:?} -> {next:?}");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// The central reschedule point, invoked after every state-affecting
    /// operation. Releases one level of the scheduler lock; if the scheduler
    /// is still locked no switch happens. Otherwise the highest-priority
    /// ready task is committed and, when it differs from the running task,
    /// the port is asked to switch.
    ///
    /// When the calling task just blocked itself, this call does not return
    /// (to that task) until the task is scheduled again.
    pub(crate) fn reschedule(&self) -> Result<()> {
        let switch = {
            let mut g = self.lock();
            let st = &mut *g;
            if st.ready.unlock_scheduler() {
                return Ok(());
            }
            self.commit_next_task(st)?
        };

        if switch {
            self.port
                .request_context_switch(self.port.in_interrupt());
        }
        Ok(())
    }

    /// Like [`Kernel::reschedule`], but leaves the scheduler lock depth
    /// untouched. Used at ISR exit, where any lock depth belongs to the
    /// interrupted task.
    fn reschedule_if_unlocked(&self) -> Result<()> {
        let switch = {
            let mut g = self.lock();
            let st = &mut *g;
            if st.ready.is_locked() {
                return Ok(());
            }
            self.commit_next_task(st)?
        };

        if switch {
            self.port
                .request_context_switch(self.port.in_interrupt());
        }
        Ok(())
    }

    /// Start the kernel: initialize the port, create the idle task, and
    /// dispatch the highest-priority ready task. Idempotent.
    pub fn start(&self) -> Result<()> {
        {
            let g = self.lock();
            if g.started {
                return Ok(());
            }
        }

        self.port.initialize_timer_and_priorities();

        let idle_stack_size = self.lock().cfg.idle_task_stack_size;
        self.create_task_inner(TaskSettings {
            function: task::idle_task_body,
            argument: 0,
            priority: 0,
            stack_size: idle_stack_size,
        })?;

        {
            let mut g = self.lock();
            let st = &mut *g;
            let first = st
                .pick_highest_ready(P::count_leading_zeros)
                .map_err(|_| KernelError::InvalidKernelState)?;
            st.running_task = Some(first);
            st.started = true;
            log::debug!("kernel started; first task {first:?}");
        }

        self.port.request_context_switch(false);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Advance the tick clock by `ticks` and fire every timeout whose
    /// deadline has been reached, in non-decreasing deadline order.
    ///
    /// Must be called exactly once per timer interrupt, from interrupt
    /// context, after the kernel has started; anything else is an
    /// `InvalidKernelState` error. Reschedule decisions made here are
    /// deferred to [`Kernel::interrupt_exit`].
    pub fn tick_advance(&self, ticks: Ticks) -> Result<()> {
        if !self.port.in_interrupt() {
            return Err(KernelError::InvalidKernelState);
        }

        let mut first_pass = true;
        loop {
            let mut fired = FiredTimers::new();
            let more = {
                let mut g = self.lock();
                let st = &mut *g;
                if !st.started {
                    return Err(KernelError::InvalidKernelState);
                }

                if first_pass {
                    first_pass = false;

                    // Round robin: rotate the highest active priority level
                    // only, and only when it holds more than one task
                    if st.cfg.enable_round_robin {
                        let word = st.ready.bitmap_word();
                        if word != 0 {
                            let level = 31 - P::count_leading_zeros(word) as usize;
                            let KernelState { ready, tasks, .. } = st;
                            ready.rotate(tasks, level);
                        }
                    }

                    st.timeouts.advance_clock(ticks);
                }

                timeout::sweep_expired(st, &mut fired)
            };

            // Timer callbacks run with the kernel state unlocked so they can
            // call back into the kernel
            for (callback, user_data) in fired {
                callback(user_data);
            }

            if !more {
                return Ok(());
            }
        }
    }

    /// Note entry into an interrupt handler.
    pub fn interrupt_enter(&self) {
        self.port.enter_interrupt();
    }

    /// Note exit from an interrupt handler. When the nesting depth returns
    /// to zero, reschedule decisions deferred during the interrupt are acted
    /// on.
    pub fn interrupt_exit(&self) -> Result<()> {
        if self.port.leave_interrupt() == 0 {
            self.reschedule_if_unlocked()
        } else {
            Ok(())
        }
    }
}
