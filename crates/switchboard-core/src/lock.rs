// ── Distributed operation lock ──
//
// Each switch namespace owns `pool_size` lock slots named `<namespace>/<i>`.
// An acquire walks the slots round-robin until one is free or the timeout
// passes. Slots carry a lease TTL so a crashed worker cannot wedge a switch
// forever; a live holder renews its lease every third of the TTL and the
// operation fails if the lease is lost. With no coordination backend
// configured the lock is a no-op, which is only correct for a single worker
// process.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redis::aio::ConnectionManager;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;

const RELEASE_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

const RENEW_SCRIPT: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
";

/// Storage for lock slots shared by every worker.
#[async_trait]
pub trait CoordinationBackend: Send + Sync + fmt::Debug {
    /// Claim `key` for `owner` unless someone else holds an unexpired lease.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError>;

    /// Push the lease on `key` out to `ttl` from now. `false` means `owner`
    /// no longer holds it.
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError>;

    /// Release `key` if `owner` still holds it.
    async fn release(&self, key: &str, owner: &str) -> Result<(), CoreError>;
}

// ── In-process backend ──────────────────────────────────────────────

#[derive(Debug)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Slots kept in process memory (`memory://`). Serializes tasks inside
/// one worker only.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: DashMap<String, Lease>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|l| l.expires_at > now).count()
    }
}

#[async_trait]
impl CoordinationBackend for MemoryBackend {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError> {
        let now = Instant::now();
        let lease = Lease {
            owner: owner.to_owned(),
            expires_at: now + ttl,
        };
        Ok(match self.slots.entry(key.to_owned()) {
            Entry::Occupied(mut e) if e.get().expires_at <= now => {
                e.insert(lease);
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(lease);
                true
            }
        })
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError> {
        let now = Instant::now();
        Ok(match self.slots.get_mut(key) {
            Some(mut lease) if lease.owner == owner && lease.expires_at > now => {
                lease.expires_at = now + ttl;
                true
            }
            _ => false,
        })
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), CoreError> {
        self.slots.remove_if(key, |_, lease| lease.owner == owner);
        Ok(())
    }
}

// ── Redis backend ───────────────────────────────────────────────────

/// Slots stored as Redis keys with `SET NX PX`, released by an atomic
/// compare-and-delete.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend").finish_non_exhaustive()
    }
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CoordinationBackend for RedisBackend {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(acquired)
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            debug!(key, "lock slot already expired or taken over");
        }
        Ok(())
    }
}

// ── OperationLock ───────────────────────────────────────────────────

/// Timing for lock acquisition.
#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    pub acquire_timeout: Duration,
    pub lease_ttl: Duration,
    pub retry_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(120),
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Per-switch slot lock over a coordination backend.
#[derive(Debug, Clone)]
pub struct OperationLock {
    backend: Option<Arc<dyn CoordinationBackend>>,
    settings: LockSettings,
}

impl OperationLock {
    pub fn new(backend: Arc<dyn CoordinationBackend>, settings: LockSettings) -> Self {
        Self {
            backend: Some(backend),
            settings,
        }
    }

    /// No backend: every acquire succeeds immediately.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            settings: LockSettings::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn settings(&self) -> LockSettings {
        self.settings
    }

    /// Take one of `pool_size` slots in `namespace`, waiting up to the
    /// acquire timeout.
    pub async fn acquire(&self, namespace: &str, pool_size: usize) -> Result<LockGuard, CoreError> {
        let Some(backend) = self.backend.clone() else {
            return Ok(LockGuard::noop());
        };

        let pool_size = pool_size.max(1);
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.settings.acquire_timeout;
        let mut slot = 0;

        loop {
            let key = slot_key(namespace, slot);
            if backend.try_acquire(&key, &owner, self.settings.lease_ttl).await? {
                debug!(namespace, slot, "lock slot acquired");
                return Ok(LockGuard {
                    held: Some(Held {
                        backend,
                        key,
                        owner,
                    }),
                });
            }

            slot = (slot + 1) % pool_size;
            if slot == 0 {
                if Instant::now() >= deadline {
                    return Err(CoreError::LockAcquisitionTimeout {
                        namespace: namespace.to_owned(),
                        pool_size,
                        timeout_secs: self.settings.acquire_timeout.as_secs(),
                    });
                }
                tokio::time::sleep(self.settings.retry_interval).await;
            }
        }
    }

    /// Run `op` while holding a slot, renewing its lease until `op` ends.
    /// The slot is released whether `op` succeeds or fails; if the future
    /// is dropped mid-flight the guard's `Drop` releases it in the
    /// background. Losing the lease abandons `op` with
    /// [`CoreError::LockLeaseLost`].
    pub async fn with_lock<T, Fut>(
        &self,
        namespace: &str,
        pool_size: usize,
        op: impl FnOnce() -> Fut,
    ) -> Result<T, CoreError>
    where
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let guard = self.acquire(namespace, pool_size).await?;
        let result = tokio::select! {
            result = op() => result,
            lost = guard.keep_alive(self.settings.lease_ttl) => Err(lost),
        };
        guard.release().await;
        result
    }
}

fn slot_key(namespace: &str, slot: usize) -> String {
    format!("{namespace}/{slot}")
}

struct Held {
    backend: Arc<dyn CoordinationBackend>,
    key: String,
    owner: String,
}

/// A held lock slot.
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct LockGuard {
    held: Option<Held>,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.held.as_ref().map(|h| h.key.as_str()))
            .finish()
    }
}

impl LockGuard {
    fn noop() -> Self {
        Self { held: None }
    }

    pub fn key(&self) -> Option<&str> {
        self.held.as_ref().map(|h| h.key.as_str())
    }

    /// Renew the lease every third of `ttl`. Resolves only once the lease
    /// is gone; a guard without a backend never resolves.
    async fn keep_alive(&self, ttl: Duration) -> CoreError {
        let Some(held) = &self.held else {
            return std::future::pending().await;
        };
        let period = (ttl / 3).max(Duration::from_millis(1));
        let mut expires_at = Instant::now() + ttl;

        loop {
            tokio::time::sleep(period).await;
            match held.backend.renew(&held.key, &held.owner, ttl).await {
                Ok(true) => expires_at = Instant::now() + ttl,
                Ok(false) => break,
                Err(e) => {
                    warn!(key = %held.key, error = %e, "failed to renew lock lease");
                    if Instant::now() + period >= expires_at {
                        break;
                    }
                }
            }
        }
        warn!(key = %held.key, "lock lease lost");
        CoreError::LockLeaseLost {
            key: held.key.clone(),
        }
    }

    /// Release now and wait for the backend to confirm.
    pub async fn release(mut self) {
        if let Some(held) = self.held.take() {
            if let Err(e) = held.backend.release(&held.key, &held.owner).await {
                warn!(key = %held.key, error = %e, "failed to release lock slot; lease will expire");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = held.backend.release(&held.key, &held.owner).await {
                        warn!(key = %held.key, error = %e, "failed to release lock slot; lease will expire");
                    }
                });
            }
            Err(_) => warn!(key = %held.key, "no runtime to release lock slot; lease will expire"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lock(backend: &Arc<MemoryBackend>, timeout_ms: u64) -> OperationLock {
        OperationLock::new(
            backend.clone(),
            LockSettings {
                acquire_timeout: Duration::from_millis(timeout_ms),
                lease_ttl: Duration::from_secs(60),
                retry_interval: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn pool_size_bounds_concurrent_holders() {
        let backend = Arc::new(MemoryBackend::new());
        let lock = lock(&backend, 500);

        let a = lock.acquire("10.0.0.1", 2).await.unwrap();
        let b = lock.acquire("10.0.0.1", 2).await.unwrap();
        assert_ne!(a.key(), b.key());
        assert_eq!(backend.held(), 2);

        let err = lock.acquire("10.0.0.1", 2).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::LockAcquisitionTimeout { pool_size: 2, .. }
        ));
        assert_eq!(backend.held(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn extra_acquire_blocks_until_release() {
        let backend = Arc::new(MemoryBackend::new());
        let lock = lock(&backend, 5_000);

        let first = lock.acquire("sw", 1).await.unwrap();
        let (second, ()) = tokio::join!(lock.acquire("sw", 1), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            first.release().await;
        });
        let second = second.unwrap();
        assert_eq!(second.key(), Some("sw/0"));
    }

    #[tokio::test(start_paused = true)]
    async fn different_switches_never_contend() {
        let backend = Arc::new(MemoryBackend::new());
        let lock = lock(&backend, 100);

        let _a = lock.acquire("sw-a", 1).await.unwrap();
        let b = lock.acquire("sw-b", 1).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn with_lock_releases_on_error() {
        let backend = Arc::new(MemoryBackend::new());
        let lock = lock(&backend, 100);

        let result: Result<(), _> = lock
            .with_lock("sw", 1, || async {
                Err(CoreError::Device {
                    message: "boom".into(),
                    status: None,
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(backend.held(), 0);
    }

    #[tokio::test]
    async fn dropped_guard_is_released_in_background() {
        let backend = Arc::new(MemoryBackend::new());
        let lock = lock(&backend, 100);

        drop(lock.acquire("sw", 1).await.unwrap());
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.held(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_can_be_taken_over() {
        let backend = MemoryBackend::new();
        assert!(backend.try_acquire("k", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!backend.try_acquire("k", "b", Duration::from_secs(1)).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.try_acquire("k", "b", Duration::from_secs(1)).await.unwrap());

        // A stale owner must not release the new holder's slot.
        backend.release("k", "a").await.unwrap();
        assert_eq!(backend.held(), 1);
    }

    #[test]
    fn slot_keys_never_alias_across_namespaces() {
        assert_ne!(slot_key("sw1", 10), slot_key("sw11", 0));
        assert_eq!(slot_key("10.0.0.1", 2), "10.0.0.1/2");
    }

    #[tokio::test(start_paused = true)]
    async fn lease_is_renewed_while_the_operation_runs() {
        let backend = Arc::new(MemoryBackend::new());
        let lock = OperationLock::new(
            backend.clone(),
            LockSettings {
                acquire_timeout: Duration::from_millis(100),
                lease_ttl: Duration::from_millis(300),
                retry_interval: Duration::from_millis(10),
            },
        );

        let (held, contender) = tokio::join!(
            lock.with_lock("sw", 1, || async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(())
            }),
            async {
                // Well past the first lease.
                tokio::time::sleep(Duration::from_secs(1)).await;
                lock.acquire("sw", 1).await
            }
        );
        held.unwrap();
        assert!(matches!(
            contender.unwrap_err(),
            CoreError::LockAcquisitionTimeout { .. }
        ));
        assert_eq!(backend.held(), 0);
    }

    /// Grants slots but never renews them.
    #[derive(Debug)]
    struct NoRenewal(MemoryBackend);

    #[async_trait]
    impl CoordinationBackend for NoRenewal {
        async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, CoreError> {
            self.0.try_acquire(key, owner, ttl).await
        }

        async fn renew(&self, _: &str, _: &str, _: Duration) -> Result<bool, CoreError> {
            Ok(false)
        }

        async fn release(&self, key: &str, owner: &str) -> Result<(), CoreError> {
            self.0.release(key, owner).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_fails_the_operation() {
        let lock = OperationLock::new(
            Arc::new(NoRenewal(MemoryBackend::new())),
            LockSettings {
                acquire_timeout: Duration::from_millis(100),
                lease_ttl: Duration::from_millis(300),
                retry_interval: Duration::from_millis(10),
            },
        );

        let finished = std::sync::atomic::AtomicBool::new(false);
        let err = lock
            .with_lock("sw", 1, || async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                finished.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LockLeaseLost { ref key } if key == "sw/0"), "{err:?}");
        assert!(err.is_unknown_outcome());
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn disabled_lock_never_blocks() {
        let lock = OperationLock::disabled();
        let _a = lock.acquire("sw", 1).await.unwrap();
        let b = lock.acquire("sw", 1).await.unwrap();
        assert_eq!(b.key(), None);
    }
}
