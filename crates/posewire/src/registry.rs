// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named, cooperatively cancellable worker threads.
//!
//! Each registered role gets one OS thread running a poll loop:
//!
//! ```text
//!   Registered --start_all--> Running --request_stop--> StopRequested
//!                                |                           |
//!                                +------ loop exits ---------+--> Stopped
//! ```
//!
//! The loop calls [`Worker::tick`], then pauses for the role's poll interval.
//! A stop request is observed at the top of the next iteration and also
//! cuts the pause short, so the exit latency is at most one poll interval
//! plus whatever the current tick blocks on. A tick blocked in a socket read
//! only returns once the socket is shut down.
//!
//! By convention the first registered role is the control role. `join_all`
//! joins it first, then every other role in registration order.
//!
//! Per-role state is one atomic, and the role table sits behind a
//! `parking_lot` lock, so workers, the control role and outside callers can
//! all touch it concurrently.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{Error, Result};

// ============================================================================
// State
// ============================================================================

/// Lifecycle of one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadState {
    Registered = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ThreadState::Registered,
            1 => ThreadState::Running,
            2 => ThreadState::StopRequested,
            _ => ThreadState::Stopped,
        }
    }

    /// Whether the role's loop should keep going.
    pub fn is_alive(self) -> bool {
        matches!(self, ThreadState::Registered | ThreadState::Running)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadState::Registered => write!(f, "registered"),
            ThreadState::Running => write!(f, "running"),
            ThreadState::StopRequested => write!(f, "stop-requested"),
            ThreadState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Pause for the poll interval and run again.
    Continue,
    /// Leave the loop now.
    Break,
}

/// Work run by a registered role.
pub trait Worker: Send + 'static {
    /// One loop iteration.
    fn tick(&mut self, ctx: &KeepAlive) -> Tick;

    /// Called once after the loop exits, before the role is marked stopped.
    fn finish(&mut self, _ctx: &KeepAlive) {}
}

impl<F> Worker for F
where
    F: FnMut(&KeepAlive) -> Tick + Send + 'static,
{
    fn tick(&mut self, ctx: &KeepAlive) -> Tick {
        self(ctx)
    }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug)]
struct Slot {
    name: String,
    poll_interval: Duration,
    state: AtomicU8,
    ticks: AtomicU64,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl Slot {
    fn new(name: String, poll_interval: Duration) -> Self {
        Self {
            name,
            poll_interval,
            state: AtomicU8::new(ThreadState::Registered as u8),
            ticks: AtomicU64::new(0),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Registered/Running -> StopRequested. Returns `true` on transition.
    fn request_stop(&self) -> bool {
        let changed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                ThreadState::from_u8(s)
                    .is_alive()
                    .then_some(ThreadState::StopRequested as u8)
            })
            .is_ok();
        if changed {
            let _guard = self.wake_lock.lock();
            self.wake.notify_all();
        }
        changed
    }
}

/// Marks the slot stopped when the worker thread unwinds or returns.
struct StoppedOnDrop(Arc<Slot>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.set_state(ThreadState::Stopped);
    }
}

#[derive(Debug, Default)]
struct Shared {
    slots: RwLock<Vec<Arc<Slot>>>,
}

impl Shared {
    fn find(&self, name: &str) -> Option<Arc<Slot>> {
        self.slots.read().iter().find(|s| s.name == name).cloned()
    }

    fn request_stop_all(&self) {
        for slot in self.slots.read().iter() {
            if slot.request_stop() {
                log::debug!("[registry] stop requested for '{}'", slot.name);
            }
        }
    }
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Handle a worker uses to observe its own liveness and the other roles.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    slot: Arc<Slot>,
    shared: Arc<Shared>,
}

impl KeepAlive {
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    pub fn poll_interval(&self) -> Duration {
        self.slot.poll_interval
    }

    /// `false` once a stop has been requested for this role.
    pub fn is_alive(&self) -> bool {
        self.slot.state().is_alive()
    }

    /// Sleep for the poll interval, waking early on a stop request.
    ///
    /// Returns [`KeepAlive::is_alive`] after waking.
    pub fn pause(&self) -> bool {
        self.pause_for(self.slot.poll_interval)
    }

    /// Like [`KeepAlive::pause`] with an explicit duration.
    pub fn pause_for(&self, dur: Duration) -> bool {
        if dur.is_zero() {
            return self.is_alive();
        }
        let mut guard = self.slot.wake_lock.lock();
        if self.is_alive() {
            let _ = self.slot.wake.wait_for(&mut guard, dur);
        }
        drop(guard);
        self.is_alive()
    }

    /// Ask this role to stop.
    pub fn request_stop(&self) {
        self.slot.request_stop();
    }

    /// Ask every role in the registry to stop.
    pub fn request_stop_all(&self) {
        self.shared.request_stop_all();
    }

    /// State of another role.
    pub fn state_of(&self, name: &str) -> Option<ThreadState> {
        self.shared.find(name).map(|s| s.state())
    }

    /// Names of roles other than this one that have already stopped.
    pub fn stopped_peers(&self) -> Vec<String> {
        self.shared
            .slots
            .read()
            .iter()
            .filter(|s| !Arc::ptr_eq(s, &self.slot) && s.state() == ThreadState::Stopped)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Whether every other role is no longer alive.
    pub fn peers_done(&self) -> bool {
        self.shared
            .slots
            .read()
            .iter()
            .filter(|s| !Arc::ptr_eq(s, &self.slot))
            .all(|s| !s.state().is_alive())
    }
}

// ============================================================================
// ThreadRegistry
// ============================================================================

/// Point-in-time view of one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: String,
    pub state: ThreadState,
    pub poll_interval: Duration,
    pub ticks: u64,
}

/// Registry of named worker roles.
pub struct ThreadRegistry {
    prefix: String,
    shared: Arc<Shared>,
    pending: Mutex<Vec<(Arc<Slot>, Box<dyn Worker>)>>,
    handles: Mutex<Vec<(Arc<Slot>, JoinHandle<()>)>>,
    started: AtomicBool,
}

impl ThreadRegistry {
    /// Empty registry. OS thread names are `"{prefix}-{role}"`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            shared: Arc::new(Shared::default()),
            pending: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register a role. Fails if the name is taken or the registry already started.
    ///
    /// A rejected registration leaves the existing role untouched.
    pub fn register<W: Worker>(&self, name: &str, poll_interval: Duration, worker: W) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(Error::AlreadyStarted);
        }

        let mut slots = self.shared.slots.write();
        if slots.iter().any(|s| s.name == name) {
            return Err(Error::DuplicateRegistration(name.to_string()));
        }

        let slot = Arc::new(Slot::new(name.to_string(), poll_interval));
        slots.push(Arc::clone(&slot));
        self.pending.lock().push((slot, Box::new(worker)));
        log::debug!("[registry] registered '{}' ({:?})", name, poll_interval);
        Ok(())
    }

    /// Spawn one thread per registered role, in registration order.
    ///
    /// If a spawn fails, the roles already running are asked to stop and
    /// the error is returned.
    pub fn start_all(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let pending = std::mem::take(&mut *self.pending.lock());
        let mut handles = self.handles.lock();
        for (slot, worker) in pending {
            // A stop that arrived before start wins.
            if slot
                .state
                .compare_exchange(
                    ThreadState::Registered as u8,
                    ThreadState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                slot.set_state(ThreadState::Stopped);
                continue;
            }

            let ctx = KeepAlive {
                slot: Arc::clone(&slot),
                shared: Arc::clone(&self.shared),
            };
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.prefix, slot.name))
                .spawn(move || run_worker(ctx, worker));

            match spawned {
                Ok(handle) => handles.push((slot, handle)),
                Err(e) => {
                    slot.set_state(ThreadState::Stopped);
                    self.shared.request_stop_all();
                    return Err(Error::ThreadSpawn(format!("{}: {}", slot.name, e)));
                }
            }
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Ask every role to stop. Roles observe it on their next iteration.
    pub fn request_stop_all(&self) {
        self.shared.request_stop_all();
    }

    /// Ask one role to stop. Returns `false` for an unknown or finished role.
    pub fn request_stop(&self, name: &str) -> bool {
        self.shared.find(name).is_some_and(|s| s.request_stop())
    }

    /// Join every started role: the first registered one first, then the rest
    /// in registration order.
    ///
    /// Join failures (a panicking worker) are logged and do not stop the
    /// remaining joins. Returns the names of roles that panicked. Roles that
    /// were never started are marked stopped.
    pub fn join_all(&self) -> Vec<String> {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut panicked = Vec::new();

        for (slot, handle) in handles {
            if handle.join().is_err() {
                log::error!("[registry] role '{}' panicked", slot.name);
                panicked.push(slot.name.clone());
            }
            slot.set_state(ThreadState::Stopped);
        }

        for (slot, _worker) in std::mem::take(&mut *self.pending.lock()) {
            slot.set_state(ThreadState::Stopped);
        }

        panicked
    }

    /// Request stop on everything, then join.
    pub fn shutdown(&self) -> Vec<String> {
        self.request_stop_all();
        self.join_all()
    }

    /// State of one role.
    pub fn state(&self, name: &str) -> Option<ThreadState> {
        self.shared.find(name).map(|s| s.state())
    }

    /// Every role, in registration order.
    pub fn states(&self) -> Vec<ThreadInfo> {
        self.shared
            .slots
            .read()
            .iter()
            .map(|s| ThreadInfo {
                name: s.name.clone(),
                state: s.state(),
                poll_interval: s.poll_interval,
                ticks: s.ticks.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.shared
            .slots
            .read()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every role has reached `Stopped`.
    pub fn all_stopped(&self) -> bool {
        self.shared
            .slots
            .read()
            .iter()
            .all(|s| s.state() == ThreadState::Stopped)
    }
}

impl fmt::Debug for ThreadRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRegistry")
            .field("prefix", &self.prefix)
            .field("roles", &self.states())
            .finish()
    }
}

impl Drop for ThreadRegistry {
    fn drop(&mut self) {
        if !self.handles.lock().is_empty() {
            self.shutdown();
        }
    }
}

fn run_worker(ctx: KeepAlive, mut worker: Box<dyn Worker>) {
    let _stopped = StoppedOnDrop(Arc::clone(&ctx.slot));
    log::debug!("[registry] '{}' running", ctx.name());

    while ctx.is_alive() {
        ctx.slot.ticks.fetch_add(1, Ordering::Relaxed);
        if worker.tick(&ctx) == Tick::Break {
            break;
        }
        ctx.pause();
    }

    worker.finish(&ctx);
    log::debug!("[registry] '{}' exited", ctx.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn counting(counter: Arc<AtomicUsize>) -> impl Worker {
        move |_ctx: &KeepAlive| {
            counter.fetch_add(1, Ordering::SeqCst);
            Tick::Continue
        }
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let reg = ThreadRegistry::new("test");
        let first = Arc::new(AtomicUsize::new(0));
        reg.register("send", Duration::from_millis(1), counting(Arc::clone(&first)))
            .unwrap();

        let err = reg
            .register("send", Duration::from_secs(9), |_: &KeepAlive| Tick::Break)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration(ref n) if n == "send"));

        let info = reg.states();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].poll_interval, Duration::from_millis(1));
        assert_eq!(info[0].state, ThreadState::Registered);

        reg.start_all().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        reg.shutdown();
        assert!(first.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_stop_all_reaches_stopped() {
        let reg = ThreadRegistry::new("test");
        let interval = Duration::from_millis(5);
        for name in ["control", "send", "receive"] {
            reg.register(name, interval, counting(Arc::new(AtomicUsize::new(0))))
                .unwrap();
        }
        reg.start_all().unwrap();
        for name in ["control", "send", "receive"] {
            assert_eq!(reg.state(name), Some(ThreadState::Running));
        }

        let t0 = Instant::now();
        reg.request_stop_all();
        for name in ["control", "send", "receive"] {
            assert!(!reg.state(name).unwrap().is_alive());
        }
        assert!(reg.join_all().is_empty());
        assert!(t0.elapsed() < Duration::from_secs(1));
        assert!(reg.all_stopped());
    }

    #[test]
    fn test_stop_cuts_long_pause_short() {
        let reg = ThreadRegistry::new("test");
        reg.register("slow", Duration::from_secs(30), |_: &KeepAlive| Tick::Continue)
            .unwrap();
        reg.start_all().unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let t0 = Instant::now();
        reg.shutdown();
        assert!(t0.elapsed() < Duration::from_secs(5));
        assert_eq!(reg.state("slow"), Some(ThreadState::Stopped));
    }

    #[test]
    fn test_break_marks_stopped_and_control_sees_it() {
        let reg = ThreadRegistry::new("test");
        let saw_peer_stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_peer_stop);

        reg.register("control", Duration::from_millis(2), move |ctx: &KeepAlive| {
            if ctx.state_of("receive") == Some(ThreadState::Stopped) {
                flag.store(true, Ordering::SeqCst);
                ctx.request_stop_all();
            }
            Tick::Continue
        })
        .unwrap();
        reg.register("receive", Duration::from_millis(1), |_: &KeepAlive| Tick::Break)
            .unwrap();

        reg.start_all().unwrap();
        reg.join_all();
        assert!(saw_peer_stop.load(Ordering::SeqCst));
        assert!(reg.all_stopped());
    }

    #[test]
    fn test_register_after_start_fails() {
        let reg = ThreadRegistry::new("test");
        reg.start_all().unwrap();
        let err = reg
            .register("late", Duration::ZERO, |_: &KeepAlive| Tick::Break)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
        assert!(matches!(reg.start_all(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let reg = ThreadRegistry::new("test");
        reg.register("boom", Duration::ZERO, |_: &KeepAlive| -> Tick {
            panic!("worker failure")
        })
        .unwrap();
        reg.register("fine", Duration::from_millis(1), |_: &KeepAlive| Tick::Break)
            .unwrap();
        reg.start_all().unwrap();
        let panicked = reg.join_all();
        assert_eq!(panicked, vec!["boom".to_string()]);
        assert!(reg.all_stopped());
    }

    #[test]
    fn test_stop_before_start() {
        let reg = ThreadRegistry::new("test");
        let ran = Arc::new(AtomicUsize::new(0));
        reg.register("idle", Duration::ZERO, counting(Arc::clone(&ran)))
            .unwrap();
        assert!(reg.request_stop("idle"));
        reg.start_all().unwrap();
        reg.join_all();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(reg.state("idle"), Some(ThreadState::Stopped));
    }

    #[test]
    fn test_finish_runs_once() {
        struct Once {
            finished: Arc<AtomicUsize>,
        }
        impl Worker for Once {
            fn tick(&mut self, _ctx: &KeepAlive) -> Tick {
                Tick::Break
            }
            fn finish(&mut self, _ctx: &KeepAlive) {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
        }

        let finished = Arc::new(AtomicUsize::new(0));
        let reg = ThreadRegistry::new("test");
        reg.register(
            "once",
            Duration::ZERO,
            Once {
                finished: Arc::clone(&finished),
            },
        )
        .unwrap();
        reg.start_all().unwrap();
        reg.join_all();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
