//! Runtime configuration for the kernel
use crate::utils::prio_bitmap::PRIO_BITMAP_LEN;
use crate::{KernelError, Result};

/// The number of priority levels the ready bitmap can represent.
pub const MAX_PRIORITY_LEVELS: usize = PRIO_BITMAP_LEN;

/// Parameters consumed by [`Kernel::new`](crate::Kernel::new).
///
/// Capacity limits select the allocator behavior per object kind: `Some(n)`
/// pre-reserves a fixed pool of `n` control blocks, `None` lets the pool grow
/// on demand.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of task priority levels, in `2..=32`. Priority 0 is reserved
    /// for the idle task.
    pub priority_levels: u8,

    /// The tick rate reported by [`Kernel::ticks_per_second`].
    ///
    /// [`Kernel::ticks_per_second`]: crate::Kernel::ticks_per_second
    pub ticks_per_second: u32,

    /// The fixed priority a mutex owner is boosted to while it holds any
    /// mutex whose ceiling applies.
    pub mutex_ceiling_priority: u8,

    /// Rotate same-priority tasks at the highest active level once per tick.
    pub enable_round_robin: bool,

    /// Stack size of the internally created idle task.
    pub idle_task_stack_size: usize,

    pub max_tasks: Option<usize>,
    pub max_semaphores: Option<usize>,
    pub max_mutexes: Option<usize>,
    pub max_queues: Option<usize>,
    pub max_timers: Option<usize>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            priority_levels: 32,
            ticks_per_second: 1000,
            mutex_ceiling_priority: 8,
            enable_round_robin: true,
            idle_task_stack_size: 1024,
            max_tasks: None,
            max_semaphores: None,
            max_mutexes: None,
            max_queues: None,
            max_timers: None,
        }
    }
}

impl KernelConfig {
    /// Reject configurations the kernel cannot represent.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.priority_levels < 2 || self.priority_levels as usize > MAX_PRIORITY_LEVELS {
            return Err(KernelError::InvalidParam);
        }
        if self.mutex_ceiling_priority >= self.priority_levels {
            return Err(KernelError::InvalidParam);
        }
        if self.ticks_per_second == 0 || self.idle_task_stack_size == 0 {
            return Err(KernelError::InvalidParam);
        }
        Ok(())
    }
}
