//! Manages timeouts (timed events) and the tick clock.
//!
//! # The ordering structure
//!
//! Armed timeouts are kept on an unordered doubly linked append list together
//! with a cached pointer to the current earliest entry. Instead of fixing the
//! order on every mutation the way a balanced heap would, the list is
//! restored to ascending-deadline order by a bottom-up merge pass after each
//! structural change, which runs in a single O(n) sweep when the list is
//! already mostly sorted. While the list is sorted, the earliest entry is the
//! list head, so the expiry sweep pops from the front in constant time.
//!
//! Every task and every software timer owns exactly one embedded [`Timeout`]
//! record. Arming the record allocates a node in the ordering structure and
//! stores its handle back in the record, which makes arbitrary removal (a
//! wait that completes before its deadline) a constant-time unlink.
use arrayvec::ArrayVec;

use crate::{
    state::KernelState,
    task::TaskRef,
    timer::{self, TimerCallback},
    utils::{
        list::{self, Link, ListHead},
        pool::{Pool, PoolPtr},
    },
    wait, KernelError, Port, Result,
};

/// The kernel's unit of time, advanced once per timer interrupt.
pub type Ticks = u32;

/// The universal timeout parameter accepted by every blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Fail immediately instead of blocking.
    NoWait,
    /// Block for at most this many ticks. Must be positive.
    Ticks(Ticks),
    /// Block until the awaited event occurs.
    Forever,
}

/// An embedded timeout record. Owned by a task or a software timer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeout {
    /// The node in the ordering structure, present while the timeout is
    /// armed. `None` also encodes the "wait forever" case, which never
    /// expires and has no structural presence.
    pub(crate) node: Option<PoolPtr>,

    /// Set by the expiry sweep when the deadline passed.
    pub(crate) expired: bool,
}

impl Timeout {
    pub(crate) const fn new() -> Self {
        Self {
            node: None,
            expired: false,
        }
    }
}

/// What an armed timeout belongs to, and therefore what its expiry does.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TimeoutOwner {
    /// Wake the task from its bounded wait.
    Task(TaskRef),
    /// Fire the software timer's callback.
    Timer(PoolPtr),
}

struct TimeoutNode {
    owner: TimeoutOwner,
    /// The absolute wake tick.
    at: Ticks,
    link: Link,
}

/// The timeout-ordering structure plus the tick clock.
pub(crate) struct TimeoutQueue {
    nodes: Pool<TimeoutNode>,

    /// Append list of all armed timeouts. Sorted by ascending `at` after
    /// every `reorder`; unordered only transiently inside a mutation.
    list: ListHead,

    /// Cached earliest entry. Equals `list.first` whenever the list is
    /// sorted.
    root: Option<PoolPtr>,

    tick_count: Ticks,
    ticks_per_second: u32,
}

impl TimeoutQueue {
    pub(crate) fn new(ticks_per_second: u32) -> Self {
        Self {
            nodes: Pool::unbounded(),
            list: ListHead::new(),
            root: None,
            tick_count: 0,
            ticks_per_second,
        }
    }

    pub(crate) fn now(&self) -> Ticks {
        self.tick_count
    }

    pub(crate) fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    pub(crate) fn advance_clock(&mut self, ticks: Ticks) {
        self.tick_count = self.tick_count.wrapping_add(ticks);
    }

    /// Arm a timeout `delay` ticks from now and return its node.
    pub(crate) fn insert(&mut self, owner: TimeoutOwner, delay: Ticks) -> PoolPtr {
        let at = self.tick_count.wrapping_add(delay);
        let node = self
            .nodes
            .allocate(TimeoutNode {
                owner,
                at,
                link: Link::default(),
            })
            .expect("timeout node pool is unbounded");
        list::push_back(&mut self.list, &mut self.nodes, node, |n| &mut n.link);
        self.reorder();
        node
    }

    /// Unlink and free an armed timeout's node.
    pub(crate) fn remove(&mut self, node: PoolPtr) {
        list::remove(&mut self.list, &mut self.nodes, node, |n| &mut n.link);
        self.nodes.deallocate(node);
        self.reorder();
    }

    /// The earliest armed timeout, if any.
    pub(crate) fn earliest(&self) -> Option<(PoolPtr, TimeoutOwner, Ticks)> {
        let root = self.root?;
        let n = &self.nodes[root];
        Some((root, n.owner, n.at))
    }

    /// Detach and free the earliest entry. The list stays sorted, so the
    /// next earliest is simply the new list head.
    pub(crate) fn pop_earliest(&mut self) -> Option<TimeoutOwner> {
        let root = self.root?;
        let owner = self.nodes[root].owner;
        list::remove(&mut self.list, &mut self.nodes, root, |n| &mut n.link);
        self.nodes.deallocate(root);
        self.root = self.list.first;
        Some(owner)
    }

    /// Restore ascending-deadline order with a bottom-up merge pass
    /// (run length 1, 2, 4, ...), then point `root` at the new head.
    pub(crate) fn reorder(&mut self) {
        if self.list.first == self.list.last {
            self.root = self.list.first;
            return;
        }

        let mut run_len = 1usize;
        loop {
            let mut cur = self.list.first;
            let mut new_first: Option<PoolPtr> = None;
            let mut new_last: Option<PoolPtr> = None;
            let mut merges = 0usize;

            while let Some(left) = cur {
                merges += 1;

                let right = self.split_run(left, run_len);
                cur = match right {
                    Some(right) => self.split_run(right, run_len),
                    None => None,
                };

                let (merged_first, merged_last) = self.merge_runs(left, right);

                match new_last {
                    Some(t) => {
                        self.nodes[t].link.next = Some(merged_first);
                        self.nodes[merged_first].link.prev = Some(t);
                    }
                    None => new_first = Some(merged_first),
                }
                new_last = Some(merged_last);
            }

            self.list.first = new_first;
            self.list.last = new_last;

            if merges <= 1 {
                break;
            }
            run_len <<= 1;
        }

        self.root = self.list.first;
    }

    /// Cut the list after `run_len` nodes starting at `head` and return the
    /// first node of the remainder, if any.
    fn split_run(&mut self, head: PoolPtr, run_len: usize) -> Option<PoolPtr> {
        let mut walk = Some(head);
        let mut remaining = run_len;
        while let Some(p) = walk {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            walk = self.nodes[p].link.next;
        }
        let next = walk?;
        let prev = self.nodes[next].link.prev;
        if let Some(prev) = prev {
            self.nodes[prev].link.next = None;
        }
        self.nodes[next].link.prev = None;
        Some(next)
    }

    /// Merge two sorted, detached runs into one, returning its two ends.
    /// Stable: on equal deadlines the left run's node goes first.
    fn merge_runs(&mut self, left: PoolPtr, right: Option<PoolPtr>) -> (PoolPtr, PoolPtr) {
        let mut a = Some(left);
        let mut b = right;
        let mut first: Option<PoolPtr> = None;
        let mut last: Option<PoolPtr> = None;

        loop {
            let pick = match (a, b) {
                (Some(x), Some(y)) => {
                    if self.nodes[x].at <= self.nodes[y].at {
                        a = self.nodes[x].link.next;
                        x
                    } else {
                        b = self.nodes[y].link.next;
                        y
                    }
                }
                (Some(x), None) => {
                    a = self.nodes[x].link.next;
                    x
                }
                (None, Some(y)) => {
                    b = self.nodes[y].link.next;
                    y
                }
                (None, None) => break,
            };

            self.nodes[pick].link.prev = last;
            self.nodes[pick].link.next = None;
            match last {
                Some(t) => self.nodes[t].link.next = Some(pick),
                None => first = Some(pick),
            }
            last = Some(pick);
        }

        (first.expect("merged at least one node"), last.unwrap())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl KernelState {
    /// Arm the embedded timeout of a task that is about to block.
    ///
    /// `Deadline::Forever` leaves the record unarmed; such a wait can only
    /// end through an explicit wake-up.
    pub(crate) fn arm_task_timeout(&mut self, task: TaskRef, deadline: Deadline) {
        let tcb = &mut self.tasks[task];
        tcb.timeout.expired = false;
        debug_assert!(tcb.timeout.node.is_none());
        match deadline {
            Deadline::Ticks(delay) => {
                let node = self.timeouts.insert(TimeoutOwner::Task(task), delay);
                self.tasks[task].timeout.node = Some(node);
            }
            Deadline::Forever => {}
            // `NoWait` never reaches the blocking path
            Deadline::NoWait => unreachable!("armed a timeout for a non-blocking wait"),
        }
    }

    /// Disarm a task's embedded timeout. No-op if it was never armed.
    pub(crate) fn disarm_task_timeout(&mut self, task: TaskRef) {
        if let Some(node) = self.tasks[task].timeout.node.take() {
            self.timeouts.remove(node);
        }
    }
}

/// Upper bound on timer callbacks collected per sweep pass. Callbacks run
/// with the kernel state unlocked, so the sweep relocks and continues when a
/// tick fires more than this many timers at once.
pub(crate) const TIMER_FIRE_BATCH: usize = 8;

pub(crate) type FiredTimers = ArrayVec<(TimerCallback, usize), TIMER_FIRE_BATCH>;

/// Pop and dispatch every timeout whose deadline has passed.
///
/// Returns `true` if the sweep stopped early because `fired` is full; the
/// caller must flush the batch and call again.
pub(crate) fn sweep_expired(st: &mut KernelState, fired: &mut FiredTimers) -> bool {
    let now = st.timeouts.now();

    while let Some((_, owner, at)) = st.timeouts.earliest() {
        if at > now {
            break;
        }

        if matches!(owner, TimeoutOwner::Timer(_)) && fired.is_full() {
            return true;
        }

        st.timeouts.pop_earliest();

        match owner {
            TimeoutOwner::Task(task) => {
                st.tasks[task].timeout.node = None;
                st.tasks[task].timeout.expired = true;
                wait::expire_wait(st, task);
            }
            TimeoutOwner::Timer(timer) => {
                st.timers[timer].timeout.node = None;
                st.timers[timer].timeout.expired = true;
                timer::handle_expired(st, timer, fired);
            }
        }
    }

    false
}

/// These methods implement the tick-clock portion of the kernel API.
impl<P: Port> crate::Kernel<P> {
    /// Get the current value of the tick counter.
    pub fn tick_count(&self) -> Ticks {
        self.lock().timeouts.now()
    }

    /// Get the configured tick rate.
    pub fn ticks_per_second(&self) -> u32 {
        self.lock().timeouts.ticks_per_second()
    }

    /// Put the calling task to sleep for the given number of ticks.
    pub fn sleep(&self, ticks: Ticks) -> Result<()> {
        if ticks == 0 {
            return Err(KernelError::InvalidParam);
        }
        self.expect_waitable_context()?;

        {
            let mut g = self.lock();
            let st = &mut *g;
            let task = st.running_task()?;
            st.ready.lock_scheduler();
            crate::task::make_pending(st, task, crate::task::TaskState::PendingTimeout, None);
            st.arm_task_timeout(task, Deadline::Ticks(ticks));
        }

        // Does not return (to this task) until the deadline passed
        self.reschedule()?;
        Ok(())
    }
}
