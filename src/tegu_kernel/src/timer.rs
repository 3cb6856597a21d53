//! Software timers
use core::fmt;

use crate::{
    state::KernelState,
    timeout::{FiredTimers, Ticks, Timeout, TimeoutOwner},
    utils::pool::PoolPtr,
    Kernel, KernelError, Port, Result,
};

/// Numeric handle identifying a software timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) PoolPtr);

/// A timer callback. Runs from the tick path with the kernel state unlocked,
/// so it may call back into the kernel (e.g. give a semaphore).
pub type TimerCallback = fn(usize);

/// *Timer control block* - the state data of a software timer.
pub(crate) struct TimerCb {
    pub(crate) callback: TimerCallback,
    pub(crate) user_data: usize,

    pub(crate) periodic: bool,
    pub(crate) expired: bool,
    pub(crate) running: bool,

    /// Delay from start to the first firing.
    pub(crate) expiry_time: Ticks,
    /// Re-arm interval of a periodic timer; zero for one-shot.
    pub(crate) period_time: Ticks,

    pub(crate) timeout: Timeout,
}

impl fmt::Debug for TimerCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("periodic", &self.periodic)
            .field("running", &self.running)
            .field("expired", &self.expired)
            .field("expiry_time", &self.expiry_time)
            .field("period_time", &self.period_time)
            .finish()
    }
}

/// Expiry handler, called by the tick sweep with the timer's node already
/// popped. Collects the user callback for invocation outside the state lock
/// and re-arms periodic timers relative to the current tick.
pub(crate) fn handle_expired(st: &mut KernelState, timer: PoolPtr, fired: &mut FiredTimers) {
    let (callback, user_data) = {
        let t = &st.timers[timer];
        (t.callback, t.user_data)
    };
    // The sweep checked for space before popping the node
    fired.push((callback, user_data));

    if st.timers[timer].periodic {
        let period = st.timers[timer].period_time;
        let node = st.timeouts.insert(TimeoutOwner::Timer(timer), period);
        st.timers[timer].timeout.node = Some(node);
    } else {
        let t = &mut st.timers[timer];
        t.expired = true;
        t.running = false;
    }
}

/// These methods implement the software timer portion of the kernel API.
impl<P: Port> Kernel<P> {
    /// Create a timer. It does not run until [`Kernel::timer_start`].
    ///
    /// `expiry_time` is the delay to the first firing and must be positive.
    /// A non-zero `period_time` makes the timer periodic with that interval;
    /// zero makes it one-shot.
    pub fn timer_create(
        &self,
        callback: TimerCallback,
        expiry_time: Ticks,
        period_time: Ticks,
        user_data: usize,
    ) -> Result<TimerId> {
        if expiry_time == 0 {
            return Err(KernelError::InvalidParam);
        }

        let mut g = self.lock();
        let st = &mut *g;
        st.ready.lock_scheduler();
        let cb = TimerCb {
            callback,
            user_data,
            periodic: period_time != 0,
            expired: false,
            running: false,
            expiry_time,
            period_time,
            timeout: Timeout::new(),
        };
        let Some(timer) = st.timers.allocate(cb) else {
            st.ready.unlock_scheduler();
            return Err(KernelError::NotEnoughKernelMemory);
        };
        st.ready.unlock_scheduler();
        log::trace!("created timer {timer:?}");
        Ok(TimerId(timer))
    }

    /// Arm the timer to fire `expiry_time` ticks from now. Restarting a
    /// running timer re-arms it from the current tick.
    pub fn timer_start(&self, id: TimerId) -> Result<()> {
        let mut g = self.lock();
        let st = &mut *g;
        if !st.timers.contains(id.0) {
            return Err(KernelError::InvalidParam);
        }
        st.ready.lock_scheduler();

        if let Some(node) = st.timers[id.0].timeout.node.take() {
            st.timeouts.remove(node);
        }
        let expiry = st.timers[id.0].expiry_time;
        let node = st.timeouts.insert(TimeoutOwner::Timer(id.0), expiry);
        let t = &mut st.timers[id.0];
        t.timeout.node = Some(node);
        t.timeout.expired = false;
        t.expired = false;
        t.running = true;

        st.ready.unlock_scheduler();
        Ok(())
    }

    /// Disarm a running timer. Fails with `TimerNotRunning` otherwise.
    pub fn timer_stop(&self, id: TimerId) -> Result<()> {
        let mut g = self.lock();
        let st = &mut *g;
        if !st.timers.contains(id.0) {
            return Err(KernelError::InvalidParam);
        }
        st.ready.lock_scheduler();

        if !st.timers[id.0].running {
            st.ready.unlock_scheduler();
            return Err(KernelError::TimerNotRunning);
        }

        if let Some(node) = st.timers[id.0].timeout.node.take() {
            st.timeouts.remove(node);
        }
        let t = &mut st.timers[id.0];
        t.running = false;
        t.expired = false;

        st.ready.unlock_scheduler();
        Ok(())
    }

    /// Stop the timer (if running) and record new expiry/period values. The
    /// caller restarts it with [`Kernel::timer_start`].
    pub fn timer_set_values(
        &self,
        id: TimerId,
        expiry_time: Ticks,
        period_time: Ticks,
    ) -> Result<()> {
        if expiry_time == 0 {
            return Err(KernelError::InvalidParam);
        }

        let mut g = self.lock();
        let st = &mut *g;
        if !st.timers.contains(id.0) {
            return Err(KernelError::InvalidParam);
        }
        st.ready.lock_scheduler();

        if let Some(node) = st.timers[id.0].timeout.node.take() {
            st.timeouts.remove(node);
        }
        let t = &mut st.timers[id.0];
        t.running = false;
        t.expired = false;
        t.expiry_time = expiry_time;
        t.period_time = period_time;
        t.periodic = period_time != 0;

        st.ready.unlock_scheduler();
        Ok(())
    }

    /// Whether a one-shot timer has fired since it was last started.
    pub fn timer_is_expired(&self, id: TimerId) -> Result<bool> {
        let g = self.lock();
        g.timers
            .get(id.0)
            .map(|t| t.expired)
            .ok_or(KernelError::InvalidParam)
    }

    /// Disarm and free the timer.
    pub fn timer_delete(&self, id: TimerId) -> Result<()> {
        let mut g = self.lock();
        let st = &mut *g;
        if !st.timers.contains(id.0) {
            return Err(KernelError::InvalidParam);
        }
        st.ready.lock_scheduler();

        if let Some(node) = st.timers[id.0].timeout.node.take() {
            st.timeouts.remove(node);
        }
        st.timers.deallocate(id.0);

        st.ready.unlock_scheduler();
        Ok(())
    }
}
