//! The subscription-lifecycle timer service, modeled as an injected
//! interface so the FSM core stays testable without real sleeps.
//!
//! Timers are identified by a stable [`TimerHandle`]; setting a timer
//! replaces any prior arming for that handle, and removal is idempotent —
//! both match the semantics the process-wide timer service is assumed to
//! provide (see the concurrency notes on shared resources).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Which of a subscription's two timers a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// RFC 6665 Timer N: bounds the wait for the first authoritative NOTIFY.
    N,
    /// Subscription-expiry timer, armed from `Expires` or `Subscription-State`.
    Expires,
}

/// Stable identity for one of a subscription's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub subscription: Uuid,
    pub kind: TimerKind,
}

impl TimerHandle {
    pub fn new(subscription: Uuid, kind: TimerKind) -> Self {
        Self { subscription, kind }
    }
}

/// Invoked by a [`TimerService`] when a timer fires, on the service's own
/// execution context (never synchronously inside `set_timer`).
pub trait TimerFireHandler: Send + Sync {
    fn fire(&self, handle: TimerHandle);
}

/// Arms and cancels subscription-lifecycle timers.
pub trait TimerService: Send + Sync {
    /// Arm `handle` for `duration`, replacing any existing arming for the
    /// same handle. On expiry, `callback.fire(handle)` is invoked.
    fn set_timer(&self, handle: TimerHandle, duration: Duration, callback: Arc<dyn TimerFireHandler>);

    /// Cancel `handle`. A no-op if it was not armed. Must guarantee that no
    /// in-flight `fire()` callback remains once this returns, so destroying
    /// the owning subscription immediately afterward is safe.
    fn remove_timer(&self, handle: TimerHandle);
}

/// Production [`TimerService`] backed by `tokio::spawn` + `JoinHandle::abort`,
/// grounded on the teacher crate's use of spawned tasks for scheduled
/// transaction termination.
#[derive(Default)]
pub struct TokioTimerService {
    handles: DashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioTimerService {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }
}

impl TimerService for TokioTimerService {
    fn set_timer(&self, handle: TimerHandle, duration: Duration, callback: Arc<dyn TimerFireHandler>) {
        if let Some((_, old)) = self.handles.remove(&handle) {
            old.abort();
        }
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            callback.fire(handle);
        });
        self.handles.insert(handle, task);
    }

    fn remove_timer(&self, handle: TimerHandle) {
        if let Some((_, old)) = self.handles.remove(&handle) {
            old.abort();
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! A manual-fire [`TimerService`] test double: arming just records the
    //! callback, and tests invoke [`ManualTimerService::fire`] deterministically
    //! instead of waiting on real time.
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct ManualTimerService {
        armed: Mutex<HashMap<TimerHandle, Arc<dyn TimerFireHandler>>>,
    }

    impl ManualTimerService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_armed(&self, handle: TimerHandle) -> bool {
            self.armed.lock().contains_key(&handle)
        }

        /// Simulate `handle` expiring: invokes its callback and clears the arming.
        pub fn fire(&self, handle: TimerHandle) {
            let callback = self.armed.lock().remove(&handle);
            if let Some(callback) = callback {
                callback.fire(handle);
            }
        }
    }

    impl TimerService for ManualTimerService {
        fn set_timer(&self, handle: TimerHandle, _duration: Duration, callback: Arc<dyn TimerFireHandler>) {
            self.armed.lock().insert(handle, callback);
        }

        fn remove_timer(&self, handle: TimerHandle) {
            self.armed.lock().remove(&handle);
        }
    }
}
