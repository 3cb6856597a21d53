//! Kernel state locking mechanism
//!
//! All kernel data structures live in a single [`KernelState`] value guarded
//! by a spin mutex. Taking the lock also enters the port's critical section,
//! so interrupt handlers (which reach the kernel through the same entry
//! points) cannot observe a half-updated ready list or timeout list.
//!
//! The guard is deliberately *not* held across anything that can suspend the
//! calling task: [`Port::request_context_switch`] is always called after the
//! guard is dropped. The reentrant scheduler lock that suppresses preemption
//! over longer multi-step sections is a separate mechanism, kept as a depth
//! counter in the ready queue.
//!
//! [`Port::request_context_switch`]: crate::Port::request_context_switch
use core::{mem::ManuallyDrop, ops};

use crate::{state::KernelState, Port};

/// RAII guard for exclusive access to the kernel state.
pub(crate) struct StateGuard<'a, P: Port> {
    port: &'a P,
    state: ManuallyDrop<spin::MutexGuard<'a, KernelState>>,
}

/// Enter the port's critical section and lock the kernel state.
pub(crate) fn lock<'a, P: Port>(
    port: &'a P,
    state: &'a spin::Mutex<KernelState>,
) -> StateGuard<'a, P> {
    port.enter_critical_section();
    StateGuard {
        port,
        state: ManuallyDrop::new(state.lock()),
    }
}

impl<P: Port> Drop for StateGuard<'_, P> {
    fn drop(&mut self) {
        // Release the state lock before re-enabling interrupts
        // Safety: `state` is never touched again after this point
        unsafe { ManuallyDrop::drop(&mut self.state) };
        self.port.exit_critical_section();
    }
}

impl<P: Port> ops::Deref for StateGuard<'_, P> {
    type Target = KernelState;
    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<P: Port> ops::DerefMut for StateGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}
