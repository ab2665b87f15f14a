//! Per-location read/write locks owned by a single task.
//!
//! Every lock-state transition (create-if-absent, grant, release, eviction) happens inside one
//! spawned task that owns the lock table; callers talk to it through a command channel and only
//! ever hold a [`LockGuard`]. Routing all transitions through one owner is a correctness
//! requirement: it is what keeps two racing first acquisitions from creating two distinct locks
//! for the same location, and it lets a guard be released from any task or thread (including
//! `Drop` on a runtime worker different from the one that acquired it) without the lock ever
//! being unlocked by anything but its owner.
//!
//! A pending writer blocks readers that arrive after it, so writers cannot be starved by a steady
//! flow of readers. Grants are delivered as guards, so a grant that races with an abandoned
//! acquisition is released as soon as the undelivered guard is dropped.
//!
//! Entries unused for the idle timeout are evicted, but only when nobody holds or waits for them.
//! Locking is process-local: several processes sharing one root are not coordinated.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ErrorResponse;
use crate::storage::location::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "read"),
            LockMode::Write => write!(f, "write"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock manager is shut down")]
    Shutdown,
}

impl From<LockError> for ErrorResponse {
    fn from(err: LockError) -> Self {
        ErrorResponse::internal(err.to_string())
    }
}

enum Command {
    Acquire {
        location: Location,
        mode: LockMode,
        reply: oneshot::Sender<LockGuard>,
    },
    Release {
        location: Location,
        mode: LockMode,
    },
    Tracked {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Scoped handle on a granted lock. The lock is released exactly once: by [`LockGuard::release`]
/// or when the guard is dropped, whichever comes first.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    location: Location,
    mode: LockMode,
    commands: mpsc::UnboundedSender<Command>,
    released: bool,
}

impl LockGuard {
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let command = Command::Release {
            location: self.location.clone(),
            mode: self.mode,
        };
        if self.commands.send(command).is_err() {
            debug!(location = %self.location, "lock manager already stopped, nothing to release");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Cloneable handle on the lock-owning task.
#[derive(Clone, Debug)]
pub struct LockManager {
    commands: mpsc::UnboundedSender<Command>,
}

impl LockManager {
    /// Spawns the owning task on the current tokio runtime.
    pub fn new(idle_timeout: Duration, eviction_interval: Duration) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let table = LockTable {
            entries: HashMap::new(),
            commands: commands.downgrade(),
            idle_timeout,
        };
        tokio::spawn(table.run(receiver, eviction_interval));
        info!(
            idle_timeout_secs = idle_timeout.as_secs(),
            "lock manager started"
        );
        Self { commands }
    }

    /// Waits until `mode` can be held on `location`.
    pub async fn acquire(
        &self,
        location: &Location,
        mode: LockMode,
    ) -> Result<LockGuard, LockError> {
        let (reply, granted) = oneshot::channel();
        self.commands
            .send(Command::Acquire {
                location: location.clone(),
                mode,
                reply,
            })
            .map_err(|_| LockError::Shutdown)?;
        granted.await.map_err(|_| LockError::Shutdown)
    }

    pub async fn read(&self, location: &Location) -> Result<LockGuard, LockError> {
        self.acquire(location, LockMode::Read).await
    }

    pub async fn write(&self, location: &Location) -> Result<LockGuard, LockError> {
        self.acquire(location, LockMode::Write).await
    }

    /// Number of locations currently present in the lock table.
    pub async fn tracked_locations(&self) -> Result<usize, LockError> {
        let (reply, count) = oneshot::channel();
        self.commands
            .send(Command::Tracked { reply })
            .map_err(|_| LockError::Shutdown)?;
        count.await.map_err(|_| LockError::Shutdown)
    }

    /// Stops the owning task. Pending and future acquisitions fail with [`LockError::Shutdown`];
    /// outstanding guards can still be dropped safely.
    pub async fn shutdown(&self) {
        let (done, stopped) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = stopped.await;
        }
    }
}

struct Waiter {
    mode: LockMode,
    reply: oneshot::Sender<LockGuard>,
}

struct LockEntry {
    readers: usize,
    writer: bool,
    waiters: VecDeque<Waiter>,
    last_access: Instant,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            readers: 0,
            writer: false,
            waiters: VecDeque::new(),
            last_access: Instant::now(),
        }
    }

    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer,
            LockMode::Write => !self.writer && self.readers == 0,
        }
    }

    fn hold(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => self.writer = true,
        }
    }

    fn unhold(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers = self.readers.saturating_sub(1),
            LockMode::Write => self.writer = false,
        }
    }

    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.waiters.is_empty()
    }

    fn prune_abandoned(&mut self) {
        self.waiters.retain(|waiter| !waiter.reply.is_closed());
    }
}

struct LockTable {
    entries: HashMap<Location, LockEntry>,
    // Weak, so the task stops on its own once every manager handle and guard is gone.
    commands: mpsc::WeakUnboundedSender<Command>,
    idle_timeout: Duration,
}

impl LockTable {
    async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        eviction_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(eviction_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        // Dropping the table and the receiver fails every pending acquisition.
                        self.entries.clear();
                        receiver.close();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = ticker.tick() => self.evict_idle(),
            }
        }
        info!("lock manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Acquire {
                location,
                mode,
                reply,
            } => {
                let entry = self
                    .entries
                    .entry(location.clone())
                    .or_insert_with(LockEntry::new);
                entry.last_access = Instant::now();
                entry.prune_abandoned();

                if entry.waiters.is_empty() && entry.admits(mode) {
                    grant(&self.commands, &location, entry, mode, reply);
                } else {
                    debug!(
                        %location,
                        %mode,
                        queued = entry.waiters.len() + 1,
                        "lock busy, queueing"
                    );
                    entry.waiters.push_back(Waiter { mode, reply });
                }
            }
            Command::Release { location, mode } => match self.entries.get_mut(&location) {
                Some(entry) => {
                    entry.unhold(mode);
                    entry.last_access = Instant::now();
                    debug!(%location, %mode, "lock released");
                    drain(&self.commands, &location, entry);
                }
                None => warn!(%location, %mode, "release for untracked location"),
            },
            Command::Tracked { reply } => {
                let _ = reply.send(self.entries.len());
            }
            // Handled by the run loop.
            Command::Shutdown { .. } => {}
        }
    }

    fn evict_idle(&mut self) {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout;
        let commands = &self.commands;

        self.entries.retain(|location, entry| {
            drain(commands, location, entry);
            let expired = now.duration_since(entry.last_access) >= idle_timeout;
            if expired && entry.is_idle() {
                debug!(%location, "evicting idle lock");
                return false;
            }
            true
        });
    }
}

/// Grants queued waiters in arrival order for as long as the head of the queue is admissible.
fn drain(
    commands: &mpsc::WeakUnboundedSender<Command>,
    location: &Location,
    entry: &mut LockEntry,
) {
    entry.prune_abandoned();
    while entry
        .waiters
        .front()
        .is_some_and(|waiter| entry.admits(waiter.mode))
    {
        let Some(waiter) = entry.waiters.pop_front() else {
            break;
        };
        grant(commands, location, entry, waiter.mode, waiter.reply);
    }
}

fn grant(
    commands: &mpsc::WeakUnboundedSender<Command>,
    location: &Location,
    entry: &mut LockEntry,
    mode: LockMode,
    reply: oneshot::Sender<LockGuard>,
) {
    // No strong sender left means nobody can observe the grant; dropping `reply` fails the waiter.
    let Some(commands) = commands.upgrade() else {
        return;
    };

    entry.hold(mode);
    let guard = LockGuard {
        location: location.clone(),
        mode,
        commands,
        released: false,
    };
    match reply.send(guard) {
        Ok(()) => debug!(%location, %mode, readers = entry.readers, "lock granted"),
        Err(mut guard) => {
            // The caller gave up waiting; roll the grant back in place.
            guard.released = true;
            entry.unhold(mode);
            debug!(%location, %mode, "acquisition abandoned, grant rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(50);

    fn manager() -> LockManager {
        LockManager::new(Duration::from_secs(180), Duration::from_secs(30))
    }

    fn location(raw: &str) -> Location {
        Location::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn readers_share_the_lock() {
        let locks = manager();
        let loc = location("a/b.jar");

        let first = locks.read(&loc).await.unwrap();
        let second = tokio::time::timeout(SHORT, locks.read(&loc))
            .await
            .expect("second reader must not wait")
            .unwrap();
        assert_eq!(first.mode(), LockMode::Read);
        assert_eq!(second.location(), &loc);
    }

    #[tokio::test]
    async fn writer_waits_for_readers() {
        let locks = manager();
        let loc = location("a/b.jar");

        let reader = locks.read(&loc).await.unwrap();
        let pending = {
            let locks = locks.clone();
            let loc = loc.clone();
            tokio::spawn(async move { locks.write(&loc).await })
        };

        tokio::time::sleep(SHORT).await;
        assert!(!pending.is_finished(), "writer must wait for the reader");

        reader.release();
        let writer = pending.await.unwrap().unwrap();
        assert_eq!(writer.mode(), LockMode::Write);
    }

    #[tokio::test]
    async fn pending_writer_blocks_new_readers() {
        let locks = manager();
        let loc = location("a");

        let reader = locks.read(&loc).await.unwrap();
        let writer = {
            let locks = locks.clone();
            let loc = loc.clone();
            tokio::spawn(async move { locks.write(&loc).await.map(|guard| guard.mode()) })
        };
        tokio::time::sleep(SHORT).await;

        assert!(
            tokio::time::timeout(SHORT, locks.read(&loc)).await.is_err(),
            "a reader arriving after a queued writer must wait"
        );

        drop(reader);
        assert_eq!(writer.await.unwrap().unwrap(), LockMode::Write);
        locks.read(&loc).await.unwrap().release();
    }

    #[tokio::test]
    async fn abandoned_acquisition_does_not_leak() {
        let locks = manager();
        let loc = location("a");

        let writer = locks.write(&loc).await.unwrap();
        assert!(tokio::time::timeout(SHORT, locks.write(&loc)).await.is_err());
        drop(writer);

        let _guard = tokio::time::timeout(SHORT, locks.write(&loc))
            .await
            .expect("abandoned waiter must not keep the lock")
            .unwrap();
    }

    #[tokio::test]
    async fn locations_are_independent() {
        let locks = manager();
        let _a = locks.write(&location("a")).await.unwrap();
        let _b = tokio::time::timeout(SHORT, locks.write(&location("b")))
            .await
            .expect("other locations must not contend")
            .unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent_across_threads() {
        let locks = manager();
        let loc = location("shared");

        let guard = locks.write(&loc).await.unwrap();
        std::thread::spawn(move || drop(guard)).join().unwrap();

        let again = tokio::time::timeout(SHORT, locks.write(&loc))
            .await
            .expect("guard dropped on another thread must release")
            .unwrap();
        again.release();
        locks.read(&loc).await.unwrap().release();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_first_acquisitions_create_one_lock() {
        let locks = manager();
        let loc = location("contended");
        let active = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks = (0..16)
            .map(|_| {
                let locks = locks.clone();
                let loc = loc.clone();
                let active = active.clone();
                tokio::spawn(async move {
                    let _guard = locks.write(&loc).await.unwrap();
                    let before = active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    assert_eq!(before, 0, "two writers held the same location");
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(locks.tracked_locations().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_evicted() {
        let locks = manager();
        locks.write(&location("a")).await.unwrap().release();
        assert_eq!(locks.tracked_locations().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(240)).await;
        assert_eq!(locks.tracked_locations().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_entries_survive_the_idle_window() {
        let locks = manager();
        let loc = location("long/lived");
        let guard = locks.write(&loc).await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(locks.tracked_locations().await.unwrap(), 1);

        // Still the same lock: a new writer waits until the old guard goes away.
        assert!(tokio::time::timeout(SHORT, locks.write(&loc)).await.is_err());
        drop(guard);
        locks.write(&loc).await.unwrap().release();
    }

    #[tokio::test]
    async fn shutdown_fails_pending_and_future_acquisitions() {
        let locks = manager();
        let loc = location("a");
        let guard = locks.write(&loc).await.unwrap();

        let pending = {
            let locks = locks.clone();
            let loc = loc.clone();
            tokio::spawn(async move { locks.read(&loc).await.map(|_| ()) })
        };
        tokio::time::sleep(SHORT).await;

        locks.shutdown().await;
        assert_eq!(pending.await.unwrap(), Err(LockError::Shutdown));
        assert_eq!(locks.read(&loc).await.unwrap_err(), LockError::Shutdown);

        drop(guard);
        locks.shutdown().await;
    }
}
