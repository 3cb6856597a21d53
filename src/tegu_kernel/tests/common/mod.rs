//! A simulation port for driving the kernel from tests.
//!
//! Context switches are simulated synchronously: when the kernel requests a
//! switch, the port runs any queued actions in the context of whichever task
//! the kernel just committed as running, then returns. A blocking call
//! therefore returns to the test immediately; its return value is only
//! meaningful when the calling task was woken during its own switch episode
//! (e.g. by a queued action). Otherwise the test ignores the value and
//! asserts on the kernel state instead.
#![allow(dead_code)] // each test binary uses a different subset
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tegu_kernel::{Kernel, KernelConfig, Port, Result, TaskFunction, Ticks};

type Action = Box<dyn FnOnce()>;

#[derive(Default)]
pub struct SimPort {
    critical_depth: Cell<u32>,
    isr_depth: Cell<u32>,
    switch_requests: Cell<u32>,
    frames_built: Cell<u32>,
    in_switch: Cell<bool>,
    actions: RefCell<VecDeque<Action>>,
}

impl SimPort {
    /// Queue an action to run during the next context-switch episode, in the
    /// context of the task the switch commits.
    pub fn on_context_switch(&self, action: impl FnOnce() + 'static) {
        self.actions.borrow_mut().push_back(Box::new(action));
    }

    pub fn switch_requests(&self) -> u32 {
        self.switch_requests.get()
    }

    pub fn frames_built(&self) -> u32 {
        self.frames_built.get()
    }
}

impl Port for SimPort {
    fn initialize_timer_and_priorities(&self) {}

    fn build_initial_stack_frame(
        &self,
        _entry_point: TaskFunction,
        _argument: usize,
        stack: &mut [u8],
    ) -> Result<()> {
        // A real port would lay out registers here; the simulation only
        // checks that it was handed a usable region
        assert!(!stack.is_empty());
        self.frames_built.set(self.frames_built.get() + 1);
        Ok(())
    }

    fn enter_critical_section(&self) {
        self.critical_depth.set(self.critical_depth.get() + 1);
    }

    fn exit_critical_section(&self) {
        self.critical_depth.set(self.critical_depth.get() - 1);
    }

    fn request_context_switch(&self, _from_interrupt: bool) {
        self.switch_requests.set(self.switch_requests.get() + 1);
        if self.in_switch.get() {
            // Nested request from inside a queued action; the outer episode
            // already represents the switch
            return;
        }
        self.in_switch.set(true);
        loop {
            let action = self.actions.borrow_mut().pop_front();
            match action {
                Some(action) => action(),
                None => break,
            }
        }
        self.in_switch.set(false);
    }

    fn enter_interrupt(&self) {
        self.isr_depth.set(self.isr_depth.get() + 1);
    }

    fn leave_interrupt(&self) -> u32 {
        let depth = self.isr_depth.get() - 1;
        self.isr_depth.set(depth);
        depth
    }

    fn in_interrupt(&self) -> bool {
        self.isr_depth.get() != 0
    }

    fn interrupt_nesting(&self) -> u32 {
        self.isr_depth.get()
    }

    fn in_critical_or_interrupt(&self) -> bool {
        self.critical_depth.get() != 0 || self.isr_depth.get() != 0
    }
}

/// A started kernel with the default test configuration.
pub fn started_kernel(cfg: KernelConfig) -> Rc<Kernel<SimPort>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let kernel = Rc::new(Kernel::new(cfg, SimPort::default()).unwrap());
    kernel.start().unwrap();
    kernel
}

pub fn test_config() -> KernelConfig {
    KernelConfig {
        priority_levels: 16,
        mutex_ceiling_priority: 8,
        ..KernelConfig::default()
    }
}

/// Deliver one timer interrupt advancing the clock by `ticks`.
pub fn run_tick(kernel: &Kernel<SimPort>, ticks: Ticks) {
    kernel.interrupt_enter();
    kernel.tick_advance(ticks).unwrap();
    kernel.interrupt_exit().unwrap();
}

/// A task entry point that never runs in the simulation.
pub fn noop_task(_: usize) {}
