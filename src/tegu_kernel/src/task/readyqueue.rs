//! Task ready queue implementation (internal use only).
use crate::{
    cfg::MAX_PRIORITY_LEVELS,
    task::{TaskCb, TaskRef},
    utils::{
        list::{self, ListHead},
        pool::Pool,
        prio_bitmap::PrioBitmap,
    },
};

/// The set of all tasks currently eligible to run, segregated by priority.
///
/// Also carries the reentrant scheduler lock: while `lock_depth` is non-zero,
/// reschedule decisions are suppressed so a caller can perform multi-step
/// mutation of kernel objects without an interleaved preemption.
pub(crate) struct ReadyQueue {
    /// One FIFO list per priority level, in which each list holds the Ready
    /// tasks at the corresponding priority.
    ///
    /// Invariant: `queues[i].first.is_some() == bitmap.get(i)`
    queues: [ListHead; MAX_PRIORITY_LEVELS],

    /// One bit per non-empty priority list.
    bitmap: PrioBitmap,

    lock_depth: u32,
}

impl ReadyQueue {
    pub(crate) const fn new() -> Self {
        Self {
            queues: [ListHead::new(); MAX_PRIORITY_LEVELS],
            bitmap: PrioBitmap::new(),
            lock_depth: 0,
        }
    }

    /// The raw bitmap word, scanned by the scheduler through the port's
    /// count-leading-zeros primitive.
    pub(crate) fn bitmap_word(&self) -> u32 {
        self.bitmap.word()
    }

    /// The highest priority with a Ready task, if any.
    pub(crate) fn highest_level(&self) -> Option<usize> {
        self.bitmap.find_highest_set()
    }

    pub(crate) fn peek_front(&self, level: usize) -> Option<TaskRef> {
        self.queues[level].first
    }

    /// Append the task to the list matching its current priority.
    ///
    /// The task must not be linked into any list.
    pub(crate) fn push_back(&mut self, tasks: &mut Pool<TaskCb>, task: TaskRef) {
        let level = tasks[task].priority as usize;
        list::push_back(&mut self.queues[level], tasks, task, |t| &mut t.link);
        self.bitmap.set(level);
    }

    /// Unlink the task from the list it was filed under.
    ///
    /// Must be called before the task's priority changes.
    pub(crate) fn remove(&mut self, tasks: &mut Pool<TaskCb>, task: TaskRef) {
        let level = tasks[task].priority as usize;
        list::remove(&mut self.queues[level], tasks, task, |t| &mut t.link);
        if self.queues[level].is_empty() {
            self.bitmap.clear(level);
        }
    }

    /// Rotate the front task of `level` to the back of its own list. No-op
    /// unless the list holds more than one task.
    ///
    /// Round robin only ever rotates the highest active level; lower levels
    /// keep their arrival order.
    pub(crate) fn rotate(&mut self, tasks: &mut Pool<TaskCb>, level: usize) {
        let Some(front) = self.queues[level].first else {
            return;
        };
        if self.queues[level].last == Some(front) {
            return;
        }
        list::remove(&mut self.queues[level], tasks, front, |t| &mut t.link);
        list::push_back(&mut self.queues[level], tasks, front, |t| &mut t.link);
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.lock_depth != 0
    }

    pub(crate) fn lock_scheduler(&mut self) {
        self.lock_depth = self.lock_depth.saturating_add(1);
    }

    /// Release one level of the scheduler lock. Returns `true` if the
    /// scheduler is still locked afterwards.
    pub(crate) fn unlock_scheduler(&mut self) -> bool {
        self.lock_depth = self.lock_depth.saturating_sub(1);
        self.lock_depth != 0
    }

    #[cfg(test)]
    pub(crate) fn level_tasks(&self, tasks: &Pool<TaskCb>, level: usize) -> Vec<TaskRef> {
        let mut out = Vec::new();
        let mut cur = self.queues[level].first;
        while let Some(p) = cur {
            out.push(p);
            cur = tasks[p].link.next;
        }
        out
    }
}
