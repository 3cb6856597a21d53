//! Kernel result codes
use core::fmt;

/// The macro to define [`KernelError`] together with its short-name `Debug`
/// representation.
macro_rules! define_error_code {
    (
        $( #[$meta:meta] )*
        pub enum KernelError {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum KernelError {
            $(
                $( #[$vmeta] )*
                $vname
            ),*
        }

        impl KernelError {
            /// Get the short name of the error code.
            ///
            /// # Examples
            ///
            /// ```
            /// use tegu_kernel::KernelError;
            /// assert_eq!(KernelError::BufferFull.as_str(), "BufferFull");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }
        }

        impl fmt::Debug for KernelError {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_error_code! {
    /// Error codes returned by the kernel API.
    ///
    /// Parameter and contention errors are returned to the immediate caller
    /// and never escalate. [`InvalidKernelState`] indicates an internal
    /// invariant violation or an operation issued from a context that forbids
    /// it; it is fatal to the caller's path but not necessarily to the whole
    /// system.
    ///
    /// [`InvalidKernelState`]: KernelError::InvalidKernelState
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub enum KernelError {
        /// A null, zero, or out-of-range argument was rejected before any
        /// side effect took place.
        InvalidParam,
        /// The message queue has no free slot.
        BufferFull,
        /// The message queue holds no message.
        BufferEmpty,
        /// A bounded wait elapsed without the awaited event occurring.
        Timeout,
        /// A blocking operation was issued from interrupt context.
        InsideInterrupt,
        /// The kernel object allocator is exhausted.
        NotEnoughKernelMemory,
        /// The timer is not running.
        TimerNotRunning,
        /// The scheduler produced no candidate, or an operation was invoked
        /// from a context that forbids it.
        InvalidKernelState,
        /// The mutex is held by another task.
        MutexAlreadyTaken,
        /// The semaphore holds no unit and the caller declined to wait.
        SemaphoreUnavailable,
        /// The task is already suspended.
        TaskAlreadySuspended,
        /// The task is not suspended.
        TaskAlreadyResumed,
        /// Only the owning task may unlock a mutex.
        InvalidMutexOwner,
        /// No task is eligible to run.
        NothingToSchedule,
        /// The kernel object was deleted while the caller was waiting on it.
        ObjectDeleted,
    }
}

/// The result type of kernel operations.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Why a blocked task was woken. Stored in the task control block by the
/// waker and examined by the blocking call when it resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeCause {
    /// The awaited resource was handed to this task.
    Delivered,
    /// The wait's timeout expired.
    TimedOut,
    /// The object waited on was deleted.
    ObjectDeleted,
}

impl WakeCause {
    pub(crate) fn into_result(self) -> Result<()> {
        match self {
            WakeCause::Delivered => Ok(()),
            WakeCause::TimedOut => Err(KernelError::Timeout),
            WakeCause::ObjectDeleted => Err(KernelError::ObjectDeleted),
        }
    }
}
