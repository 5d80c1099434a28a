// ── Device session pool ──
//
// Bounds how many sessions touch one switch at a time. Sessions are opaque
// to the pool: a factory opens them, the guard hands them back on drop, and
// a guard marked with `discard()` drops its session instead so the next
// acquire opens a fresh one.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::error::CoreError;

/// Opens new sessions to one switch.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + 'static;

    async fn connect(&self) -> Result<Self::Session, CoreError>;
}

/// Hands out clones of a stateless HTTP client. The pool still bounds how
/// many requests run against one switch at a time.
#[derive(Debug, Clone)]
pub struct ClientFactory<C>(pub C);

#[async_trait]
impl<C> SessionFactory for ClientFactory<C>
where
    C: Clone + Send + Sync + 'static,
{
    type Session = C;

    async fn connect(&self) -> Result<C, CoreError> {
        Ok(self.0.clone())
    }
}

/// Bounded pool of sessions to a single switch.
pub struct SessionPool<F: SessionFactory> {
    switch: String,
    factory: F,
    permits: Semaphore,
    idle: Mutex<Vec<F::Session>>,
    max_sessions: usize,
    acquire_timeout: Duration,
}

impl<F: SessionFactory> std::fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("switch", &self.switch)
            .field("max_sessions", &self.max_sessions)
            .field("available", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> SessionPool<F> {
    pub fn new(
        switch: impl Into<String>,
        factory: F,
        max_sessions: usize,
        acquire_timeout: Duration,
    ) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            switch: switch.into(),
            factory,
            permits: Semaphore::new(max_sessions),
            idle: Mutex::new(Vec::with_capacity(max_sessions)),
            max_sessions,
            acquire_timeout,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Sessions currently parked for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or_default()
    }

    /// Wait (bounded) for a slot, then reuse an idle session or open one.
    pub async fn acquire(&self) -> Result<PooledSession<'_, F>, CoreError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| CoreError::SessionPoolExhausted {
                switch: self.switch.clone(),
                max_sessions: self.max_sessions,
                timeout_secs: self.acquire_timeout.as_secs(),
            })?
            .map_err(|_| CoreError::Validation {
                message: format!("session pool for {} is closed", self.switch),
            })?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let session = match reused {
            Some(session) => session,
            None => {
                debug!(switch = %self.switch, "opening new device session");
                self.factory.connect().await?
            }
        };

        Ok(PooledSession {
            pool: self,
            session: Some(session),
            discard: false,
            _permit: permit,
        })
    }

    fn give_back(&self, session: F::Session) {
        match self.idle.lock() {
            Ok(mut idle) => idle.push(session),
            Err(_) => warn!(switch = %self.switch, "session pool poisoned; dropping session"),
        }
    }
}

/// A checked-out session. Returned to the pool when dropped.
pub struct PooledSession<'a, F: SessionFactory> {
    pool: &'a SessionPool<F>,
    session: Option<F::Session>,
    discard: bool,
    _permit: SemaphorePermit<'a>,
}

impl<F: SessionFactory> std::fmt::Debug for PooledSession<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> PooledSession<'_, F> {
    /// Drop the session instead of returning it; the slot is freed.
    pub fn discard(mut self) {
        self.discard = true;
    }

    /// Mark the session for discard if `err` means it can't be reused.
    pub fn discard_if(&mut self, err: &switchboard_api::Error) {
        if err.is_session_fatal() {
            debug!(switch = %self.pool.switch, error = %err, "discarding broken session");
            self.discard = true;
        }
    }
}

impl<F: SessionFactory> Deref for PooledSession<'_, F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        match &self.session {
            Some(s) => s,
            None => unreachable!("session taken before drop"),
        }
    }
}

impl<F: SessionFactory> DerefMut for PooledSession<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.session {
            Some(s) => s,
            None => unreachable!("session taken before drop"),
        }
    }
}

impl<F: SessionFactory> Drop for PooledSession<'_, F> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if !self.discard {
                self.pool.give_back(session);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingFactory {
        opened: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        type Session = usize;

        async fn connect(&self) -> Result<usize, CoreError> {
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn pool(max: usize) -> SessionPool<CountingFactory> {
        SessionPool::new("leaf1", CountingFactory::default(), max, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn released_sessions_are_reused() {
        let pool = pool(2);
        {
            let s = pool.acquire().await.unwrap();
            assert_eq!(*s, 0);
        }
        let s = pool.acquire().await.unwrap();
        assert_eq!(*s, 0);
        assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn discarded_sessions_are_replaced() {
        let pool = pool(1);
        pool.acquire().await.unwrap().discard();
        assert_eq!(pool.idle_count(), 0);

        let s = pool.acquire().await.unwrap();
        assert_eq!(*s, 1);
    }

    #[tokio::test]
    async fn fatal_transport_errors_mark_for_discard() {
        let pool = pool(1);
        {
            let mut s = pool.acquire().await.unwrap();
            s.discard_if(&switchboard_api::Error::Authentication {
                message: "denied".into(),
            });
        }
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out() {
        let pool = pool(1);
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::SessionPoolExhausted { max_sessions: 1, timeout_secs: 2, .. }
        ));
        assert!(err.is_contention());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_proceeds_once_a_session_is_released() {
        let pool = pool(1);
        let held = pool.acquire().await.unwrap();

        let (second, ()) = tokio::join!(pool.acquire(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(held);
        });
        assert_eq!(*second.unwrap(), 0);
    }
}
