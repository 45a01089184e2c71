use std::collections::{HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::backend::{Session, SessionFactory};
use crate::errors::{Error, Result};
use crate::shared_types::SessionId;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// The server refuses more than this many connections from one client.
pub const POOL_MAX: usize = 10;

// -----------------------------------------------------------------------------
// ----- PoolConfig ------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min: usize,
    /// Clamped to `1..=POOL_MAX`.
    pub max: usize,
    pub acquire_timeout: Duration,
    /// Idle sessions older than this are closed by the sweeper.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: POOL_MAX,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub min: usize,
    pub max: usize,
    pub idle: usize,
    pub in_use: usize,
    pub creating: usize,
    pub available: usize,
    pub closed: bool,
}

// -----------------------------------------------------------------------------
// ----- Pool ------------------------------------------------------------------

/// Bounded set of ready sessions.
///
/// Every live session, and every session still being created, holds one
/// permit of `slots`, which caps the total at `max`. Bookkeeping lives in a
/// single mutex that is never held across an `.await`.
#[derive(Debug)]
pub struct Pool {
    factory: SessionFactory,
    config: PoolConfig,

    slots: Arc<Semaphore>,
    state: Mutex<PoolState>,

    // Signalled when a session goes idle or a slot frees up.
    available: Notify,
    // Signalled whenever `in_use` or `creating` shrinks.
    drained: Notify,

    maintenance: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<IdleSession>,
    in_use: HashSet<SessionId>,
    creating: usize,
    closed: bool,

    // Sessions returned after close; destroyed by `drain_and_clear`.
    retired: Vec<Session>,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.creating
    }
}

#[derive(Debug)]
struct IdleSession {
    session: Session,
    permit: OwnedSemaphorePermit,
    since: Instant,
}

// -----------------------------------------------------------------------------
// ----- Pool: Static ----------------------------------------------------------

impl Pool {
    /// Build the pool and start its maintenance task, which warms up to `min`
    /// sessions right away. Must be called from within a tokio runtime.
    pub fn new(factory: SessionFactory, mut config: PoolConfig) -> Arc<Self> {
        config.max = config.max.clamp(1, POOL_MAX);
        config.min = config.min.min(config.max);

        let pool = Arc::new(Self {
            factory,
            slots: Arc::new(Semaphore::new(config.max)),
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            drained: Notify::new(),
            maintenance: Mutex::new(None),
            config,
        });

        let handle = spawn_maintenance(Arc::downgrade(&pool), pool.config.sweep_interval);
        *pool.maintenance.lock() = Some(handle);

        pool
    }
}

// -----------------------------------------------------------------------------
// ----- Pool: Public ----------------------------------------------------------

impl Pool {
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            min: self.config.min,
            max: self.config.max,
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            creating: state.creating,
            available: self.slots.available_permits(),
            closed: state.closed,
        }
    }

    /// Check out a session: an idle one if any, else a new one while under
    /// `max`, else wait for a release. `acquire_timeout` bounds the whole
    /// call, session creation included.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledSession> {
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            // Register interest before looking, so a release in between
            // still wakes us.
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();

            if let Some(idle) = self.pop_idle()? {
                trace!(session = %idle.session.id(), "reusing idle session");
                return Ok(PooledSession::new(self.clone(), idle.session, idle.permit));
            }

            if let Ok(permit) = self.slots.clone().try_acquire_owned() {
                return match timeout_at(deadline, self.open_checked_out(permit)).await {
                    Ok(res) => res,
                    Err(_) => {
                        // The cancelled creation gave back its ticket and slot.
                        self.available.notify_one();
                        Err(Error::AcquireTimeout(self.config.acquire_timeout))
                    }
                };
            }

            if timeout_at(deadline, notified).await.is_err() {
                return Err(Error::AcquireTimeout(self.config.acquire_timeout));
            }
        }
    }

    /// Return a session. Only a `Ready` session of an open pool goes back to
    /// the idle set; anything else is closed.
    pub async fn release(&self, mut pooled: PooledSession) {
        let Some((session, permit)) = pooled.take() else {
            return;
        };

        if let Some(broken) = self.check_in(session, permit) {
            self.discard(broken).await;
        }
    }

    /// Close the pool: wait for every checked-out session to come back, then
    /// close all sessions. Later `acquire` calls fail with `PoolClosed`.
    ///
    /// Returns once no session is left open, including ones being closed in
    /// the background. The first failed close is returned.
    pub async fn drain_and_clear(&self) -> Result<()> {
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if first {
            info!("draining session pool");
        }

        // Parked acquirers wake up and see `closed`.
        self.available.notify_waiters();

        loop {
            let mut notified = pin!(self.drained.notified());
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if state.in_use.is_empty() && state.creating == 0 {
                    break;
                }
                debug!(
                    in_use = state.in_use.len(),
                    creating = state.creating,
                    "waiting for sessions to be released"
                );
            }

            notified.await;
        }

        let doomed: Vec<(Session, Option<OwnedSemaphorePermit>)> = {
            let mut state = self.state.lock();
            let mut doomed: Vec<_> = state
                .idle
                .drain(..)
                .map(|idle| (idle.session, Some(idle.permit)))
                .collect();
            doomed.extend(state.retired.drain(..).map(|session| (session, None)));
            doomed
        };

        let count = doomed.len();
        let mut failure = None;
        for (session, permit) in doomed {
            if let Err(err) = self.factory.destroy(session).await {
                failure.get_or_insert(err);
            }
            drop(permit);
        }

        // Sessions being discarded or evicted in the background still hold
        // their slot until they are closed.
        let reclaimed = self.slots.acquire_many(self.config.max as u32).await;

        // With every slot back the maintenance task is between ticks.
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        self.slots.close();
        drop(reclaimed);

        if first {
            info!("session pool drained; closed {count} sessions");
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Pool: Private ---------------------------------------------------------

impl Pool {
    fn pop_idle(&self) -> Result<Option<IdleSession>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }

        // Most recently used first, so the oldest age out under low load.
        let Some(idle) = state.idle.pop_back() else {
            return Ok(None);
        };
        state.in_use.insert(idle.session.id().clone());
        Ok(Some(idle))
    }

    async fn open_checked_out(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Result<PooledSession> {
        let ticket = CreationTicket::issue(self)?;

        let session = match self.factory.create().await {
            Ok(session) => session,
            Err(err) => {
                drop(ticket);
                drop(permit);
                self.available.notify_one();
                return Err(err);
            }
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                state.retired.push(session);
                drop(state);
                drop(ticket);
                return Err(Error::PoolClosed);
            }
            state.in_use.insert(session.id().clone());
        }
        drop(ticket);

        Ok(PooledSession::new(self.clone(), session, permit))
    }

    /// Synchronous half of a release. Returns the session back when the
    /// caller has to close it.
    fn check_in(
        &self,
        session: Session,
        permit: OwnedSemaphorePermit,
    ) -> Option<(Session, OwnedSemaphorePermit)> {
        let mut went_idle = false;

        let rejected = {
            let mut state = self.state.lock();
            state.in_use.remove(session.id());

            if state.closed {
                state.retired.push(session);
                None
            } else if session.is_reusable() {
                trace!(session = %session.id(), "session back to idle");
                state.idle.push_back(IdleSession {
                    session,
                    permit,
                    since: Instant::now(),
                });
                went_idle = true;
                None
            } else {
                Some((session, permit))
            }
        };

        if went_idle {
            self.available.notify_one();
        }
        self.drained.notify_waiters();
        rejected
    }

    async fn discard(&self, (session, permit): (Session, OwnedSemaphorePermit)) {
        warn!(
            session = %session.id(),
            state = %session.state(),
            "discarding broken session"
        );
        // Failures are logged by the factory; the caller already has the
        // error that broke the session.
        let _ = self.factory.destroy(session).await;
        drop(permit);
        self.available.notify_one();
    }

    async fn evict_idle(&self) {
        let expired: Vec<IdleSession> = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut removable = state.total().saturating_sub(self.config.min);
            let mut expired = Vec::new();

            // Front of the deque is the longest idle.
            while removable > 0 {
                match state.idle.front() {
                    Some(idle) if now.duration_since(idle.since) >= self.config.idle_timeout => {
                        if let Some(idle) = state.idle.pop_front() {
                            expired.push(idle);
                        }
                        removable -= 1;
                    }
                    _ => break,
                }
            }
            expired
        };

        for idle in expired {
            debug!(session = %idle.session.id(), "evicting idle session");
            let _ = self.factory.destroy(idle.session).await;
            drop(idle.permit);
            self.available.notify_one();
        }
    }

    async fn top_up(&self) {
        loop {
            let deficit = {
                let state = self.state.lock();
                if state.closed {
                    return;
                }
                self.config.min.saturating_sub(state.total())
            };
            if deficit == 0 {
                return;
            }

            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                return;
            };
            let Ok(ticket) = CreationTicket::issue(self) else {
                return;
            };

            debug!(deficit, "opening session to keep pool at minimum");
            let created = match timeout(self.config.acquire_timeout, self.factory.create()).await {
                Ok(created) => created,
                Err(_) => Err(Error::AcquireTimeout(self.config.acquire_timeout)),
            };
            match created {
                Ok(session) => {
                    let mut state = self.state.lock();
                    if state.closed {
                        state.retired.push(session);
                        return;
                    }
                    state.idle.push_back(IdleSession {
                        session,
                        permit,
                        since: Instant::now(),
                    });
                    drop(state);
                    drop(ticket);
                    self.available.notify_one();
                }
                Err(err) => {
                    warn!("failed to open session for pool minimum: {err}");
                    return;
                }
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.abort();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Maintenance -----------------------------------------------------------

fn spawn_maintenance(pool: Weak<Pool>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick fires immediately: that is the warm-up.
            ticker.tick().await;

            let Some(pool) = pool.upgrade() else {
                break;
            };
            if pool.is_closed() {
                break;
            }

            pool.evict_idle().await;
            pool.top_up().await;
        }
    })
}

// -----------------------------------------------------------------------------
// ----- CreationTicket --------------------------------------------------------

/// Counts a session under construction until dropped, so a drain waits for
/// it even if the creating future is cancelled.
struct CreationTicket<'a> {
    pool: &'a Pool,
}

impl<'a> CreationTicket<'a> {
    fn issue(pool: &'a Pool) -> Result<Self> {
        let mut state = pool.state.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        state.creating += 1;
        Ok(Self { pool })
    }
}

impl Drop for CreationTicket<'_> {
    fn drop(&mut self) {
        self.pool.state.lock().creating -= 1;
        self.pool.drained.notify_waiters();
    }
}

// -----------------------------------------------------------------------------
// ----- PooledSession ---------------------------------------------------------

/// A checked-out session. Hand it back with [`Pool::release`]; if it is
/// dropped instead, the same rules apply and closing happens in the
/// background.
#[derive(Debug)]
pub struct PooledSession {
    pool: Arc<Pool>,
    session: Option<Session>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledSession {
    fn new(pool: Arc<Pool>, session: Session, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            session: Some(session),
            permit: Some(permit),
        }
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
            .as_mut()
            .expect("pooled session missing session")
    }

    fn take(&mut self) -> Option<(Session, OwnedSemaphorePermit)> {
        let session = self.session.take()?;
        let permit = self.permit.take()?;
        Some((session, permit))
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some((session, permit)) = self.take() else {
            return;
        };

        let Some(broken) = self.pool.check_in(session, permit) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = self.pool.clone();
                runtime.spawn(async move {
                    pool.discard(broken).await;
                });
            }
            Err(_) => {
                // No runtime left to close it gracefully; dropping the
                // transport still closes the socket.
                drop(broken);
                self.pool.available.notify_one();
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
