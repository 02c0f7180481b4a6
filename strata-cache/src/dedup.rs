//! In-flight fetch deduplication.
//!
//! At most one fetch operation per key runs at a time; every concurrent
//! caller for that key observes the same result (or the same error) from
//! that single execution.
//!
//! # Type erasure contract
//!
//! The registry stores a heterogeneous collection of in-flight operations,
//! which forces type erasure of the result type. Each handle therefore
//! carries the `TypeId` of the value its future produces, and that tag is
//! checked at attach time BEFORE any waiter ever sees the payload: a
//! mismatch fails fast with [`CacheError::TypeMismatch`] rather than
//! silently returning garbage or silently skipping deduplication.
//!
//! # Lifecycle
//!
//! A registration is created atomically with the miss check (both happen
//! under the registry lock, so two callers can never both observe "no
//! in-flight request" and both start a fetch). The operation is spawned on
//! the runtime, so one waiter cancelling its wait never cancels the shared
//! work, and the spawned task removes its own registry entry exactly once
//! when the operation settles.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use strata_core::{CacheError, CacheKey, CacheResult};
use tokio::sync::Mutex;
use tracing::{debug, error};

type SharedPayload = Arc<dyn Any + Send + Sync>;
type SharedOutput = Result<SharedPayload, CacheError>;
type InflightFuture = Shared<BoxFuture<'static, SharedOutput>>;

struct InflightHandle {
    type_id: TypeId,
    type_name: &'static str,
    future: InflightFuture,
}

/// A typed view onto a shared in-flight fetch.
///
/// Dropping a waiter cancels only this observer; the underlying operation
/// and all other waiters are unaffected.
pub struct InflightWaiter<V> {
    key: String,
    registered: &'static str,
    future: InflightFuture,
    _marker: PhantomData<fn() -> V>,
}

// Manual impl: the shared future is opaque, so only the identifying
// fields are shown.
impl<V> fmt::Debug for InflightWaiter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflightWaiter")
            .field("key", &self.key)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl<V> InflightWaiter<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Await the shared fetch and recover the typed value.
    pub async fn wait(self) -> CacheResult<V> {
        match self.future.await {
            Ok(payload) => match payload.downcast::<V>() {
                Ok(value) => Ok(value.as_ref().clone()),
                // Unreachable when the tag check passed, but the contract
                // is to surface a mismatch, never to panic.
                Err(_) => Err(CacheError::TypeMismatch {
                    key: self.key,
                    registered: self.registered,
                    requested: std::any::type_name::<V>(),
                }),
            },
            Err(err) => Err(err),
        }
    }
}

/// Outcome of an atomic register attempt.
pub enum Registration<V> {
    /// This caller registered the fetch; its future now drives the work.
    Leader(InflightWaiter<V>),
    /// Another fetch for the key was already in flight; the supplied
    /// operation was discarded unexecuted.
    Follower(InflightWaiter<V>),
}

/// Tracks one in-flight fetch per key, regardless of result type.
pub struct Deduplicator {
    inflight: Arc<Mutex<HashMap<String, InflightHandle>>>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn typed_waiter<V: 'static>(
        key: String,
        handle: &InflightHandle,
    ) -> CacheResult<InflightWaiter<V>> {
        if handle.type_id != TypeId::of::<V>() {
            error!(
                key = %key,
                registered = handle.type_name,
                requested = std::any::type_name::<V>(),
                "deduplication type mismatch"
            );
            return Err(CacheError::TypeMismatch {
                key,
                registered: handle.type_name,
                requested: std::any::type_name::<V>(),
            });
        }
        Ok(InflightWaiter {
            key,
            registered: handle.type_name,
            future: handle.future.clone(),
            _marker: PhantomData,
        })
    }

    /// Attach to the in-flight fetch for `key`, if one exists.
    ///
    /// Fails with [`CacheError::TypeMismatch`] if the registered fetch
    /// produces a different type than `V`.
    pub async fn attach<V>(&self, key: &CacheKey) -> CacheResult<Option<InflightWaiter<V>>>
    where
        V: Clone + Send + Sync + 'static,
    {
        let rendered = key.render();
        let inflight = self.inflight.lock().await;
        match inflight.get(&rendered) {
            Some(handle) => Self::typed_waiter(rendered.clone(), handle).map(Some),
            None => Ok(None),
        }
    }

    /// Register a fetch for `key`, or attach if one is already in flight.
    ///
    /// The in-flight check and the registration are a single atomic step
    /// under the registry lock, which is what prevents a cache stampede.
    /// The operation future is lazy: a `Follower` outcome means it was
    /// dropped without ever executing.
    pub async fn register<V, Fut>(
        &self,
        key: &CacheKey,
        operation: Fut,
    ) -> CacheResult<Registration<V>>
    where
        V: Clone + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        let rendered = key.render();
        let mut inflight = self.inflight.lock().await;

        if let Some(handle) = inflight.get(&rendered) {
            return Self::typed_waiter(rendered.clone(), handle).map(Registration::Follower);
        }

        let registry = Arc::clone(&self.inflight);
        let task_key = rendered.clone();
        let task = tokio::spawn(async move {
            let output: SharedOutput = match operation.await {
                Ok(value) => Ok(Arc::new(value) as SharedPayload),
                Err(err) => Err(err),
            };
            // Exactly-once unregistration, after the operation settles,
            // regardless of how many waiters attached or were cancelled.
            registry.lock().await.remove(&task_key);
            output
        });
        let future: InflightFuture = async move {
            match task.await {
                Ok(output) => output,
                Err(join_err) => Err(CacheError::upstream(join_err)),
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            rendered.clone(),
            InflightHandle {
                type_id: TypeId::of::<V>(),
                type_name: std::any::type_name::<V>(),
                future: future.clone(),
            },
        );
        debug!(key = %rendered, "registered in-flight fetch");

        Ok(Registration::Leader(InflightWaiter {
            key: rendered,
            registered: std::any::type_name::<V>(),
            future,
            _marker: PhantomData,
        }))
    }

    /// Drop any registration for `key`.
    ///
    /// Normally unnecessary (registrations remove themselves on settle);
    /// exposed for explicit cleanup paths.
    pub async fn unregister(&self, key: &CacheKey) {
        self.inflight.lock().await.remove(&key.render());
    }

    /// Number of fetches currently in flight.
    pub async fn inflight_len(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use strata_core::DataSource;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("upstream down")]
    struct UpstreamDown;

    fn key() -> CacheKey {
        CacheKey::Activities {
            source: DataSource::Strava,
            days: 7,
        }
    }

    #[tokio::test]
    async fn test_leader_runs_operation_once() {
        let dedup = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&calls);
        let registration = dedup
            .register(&key(), async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok("y".to_string())
            })
            .await
            .expect("register");

        let Registration::Leader(waiter) = registration else {
            panic!("first registration should lead");
        };
        assert_eq!(waiter.wait().await.expect("wait"), "y");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn test_follower_discards_its_operation() {
        let dedup = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let counted = Arc::clone(&calls);
        let leader = match dedup
            .register(&key(), async move {
                counted.fetch_add(1, Ordering::SeqCst);
                release_rx.await.ok();
                Ok(7u64)
            })
            .await
            .expect("register")
        {
            Registration::Leader(w) => w,
            Registration::Follower(_) => panic!("first registration should lead"),
        };

        let counted = Arc::clone(&calls);
        let follower = match dedup
            .register(&key(), async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(99u64)
            })
            .await
            .expect("register")
        {
            Registration::Follower(w) => w,
            Registration::Leader(_) => panic!("second registration should follow"),
        };

        release_tx.send(()).expect("release leader");
        assert_eq!(leader.wait().await.expect("leader"), 7);
        assert_eq!(follower.wait().await.expect("follower"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attach_checks_type_tag() {
        let dedup = Deduplicator::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = match dedup
            .register(&key(), async move {
                release_rx.await.ok();
                Ok("string result".to_string())
            })
            .await
            .expect("register")
        {
            Registration::Leader(w) => w,
            Registration::Follower(_) => panic!("should lead"),
        };

        let err = dedup
            .attach::<u64>(&key())
            .await
            .expect_err("wrong type must fail fast");
        assert!(matches!(err, CacheError::TypeMismatch { .. }));

        // The mismatch is fatal only to that waiter.
        let ok = dedup
            .attach::<String>(&key())
            .await
            .expect("attach")
            .expect("in flight");
        release_tx.send(()).expect("release");
        assert_eq!(leader.wait().await.expect("leader"), "string result");
        assert_eq!(ok.wait().await.expect("waiter"), "string result");
    }

    #[tokio::test]
    async fn test_waiter_debug_shows_key_and_type() {
        // Results holding waiters are unwrapped with expect/expect_err in
        // tests, which needs this Debug output.
        let dedup = Deduplicator::new();
        let waiter = match dedup
            .register(&key(), async { Ok(5u64) })
            .await
            .expect("register")
        {
            Registration::Leader(w) => w,
            Registration::Follower(_) => panic!("should lead"),
        };
        let rendered = format!("{waiter:?}");
        assert!(rendered.contains("strava:activities:7"));
        assert!(rendered.contains("u64"));
    }

    #[tokio::test]
    async fn test_attach_absent_returns_none() {
        let dedup = Deduplicator::new();
        assert!(dedup
            .attach::<String>(&key())
            .await
            .expect("attach")
            .is_none());
    }

    #[tokio::test]
    async fn test_all_waiters_see_the_same_error() {
        let dedup = Deduplicator::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = match dedup
            .register(&key(), async move {
                release_rx.await.ok();
                Err::<u64, _>(CacheError::upstream(UpstreamDown))
            })
            .await
            .expect("register")
        {
            Registration::Leader(w) => w,
            Registration::Follower(_) => panic!("should lead"),
        };
        let waiter = dedup
            .attach::<u64>(&key())
            .await
            .expect("attach")
            .expect("in flight");

        release_tx.send(()).expect("release");
        let leader_err = leader.wait().await.expect_err("leader error");
        let waiter_err = waiter.wait().await.expect_err("waiter error");
        assert!(format!("{leader_err}").contains("upstream down"));
        assert!(format!("{waiter_err}").contains("upstream down"));
        assert_eq!(dedup.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_operation() {
        let dedup = Deduplicator::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = match dedup
            .register(&key(), async move {
                release_rx.await.ok();
                Ok(1u32)
            })
            .await
            .expect("register")
        {
            Registration::Leader(w) => w,
            Registration::Follower(_) => panic!("should lead"),
        };
        // The registering caller walks away; the work keeps running.
        drop(leader);

        let waiter = dedup
            .attach::<u32>(&key())
            .await
            .expect("attach")
            .expect("in flight");
        release_tx.send(()).expect("release");
        assert_eq!(waiter.wait().await.expect("waiter"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_single_execution() {
        let dedup = Arc::new(Deduplicator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedup = Arc::clone(&dedup);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let registration = dedup
                    .register(&key(), async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("y".to_string())
                    })
                    .await
                    .expect("register");
                match registration {
                    Registration::Leader(w) | Registration::Follower(w) => {
                        w.wait().await.expect("wait")
                    }
                }
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.expect("join"), "y");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
