//! Authorization engine
//!
//! Answers "may this identity access this item" and "under which
//! conditions" against the store's current snapshot, caching the resolved
//! decisions per identity.
//!
//! ```text
//! check_access ─→ snapshot ─→ [identity cache] ─→ GrantResolver ─→ grants
//!                                   ↑
//!                     store `changed` purges everything
//! ```

mod identity_cache;
mod resolver;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use self::identity_cache::IdentityCache;
use self::resolver::GrantResolver;
use crate::codec::PayloadCodec;
use crate::error::Result;
use crate::lifecycle::{Clock, SystemClock};
use crate::store::{SecurityStore, Snapshot, SubscriptionId};
use crate::types::{IdentityKey, ItemKey};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Re-check recorded life cycles on every cache hit
    pub revalidate_life_cycles: bool,

    /// Upper bound on cached identities, least recently used evicted
    /// first; 0 disables the bound
    pub max_cached_identities: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            revalidate_life_cycles: true,
            max_cached_identities: 10_000,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    pub(crate) cache_builds: AtomicU64,
    lifecycle_evictions: AtomicU64,
    capacity_evictions: AtomicU64,
    purges: AtomicU64,
    resolver_builds: AtomicU64,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub cached_identities: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    /// Per-identity decision sets actually computed
    pub cache_builds: u64,
    /// Cached identities dropped because a life cycle changed its verdict
    pub lifecycle_evictions: u64,
    pub capacity_evictions: u64,
    pub purges: u64,
    pub resolver_builds: u64,
}

struct CacheState<C: PayloadCodec> {
    generation: u64,
    resolver: Option<Arc<GrantResolver<C>>>,
    caches: LruCache<IdentityKey, Arc<IdentityCache<C>>>,
}

impl<C: PayloadCodec> CacheState<C> {
    fn new(generation: u64, capacity: usize) -> Self {
        let caches = match NonZeroUsize::new(capacity) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            generation,
            resolver: None,
            caches,
        }
    }

    fn clear(&mut self) {
        self.resolver = None;
        self.caches.clear();
    }
}

struct EngineInner<C: PayloadCodec> {
    store: SecurityStore<C>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
    state: Mutex<CacheState<C>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl<C: PayloadCodec> EngineInner<C> {
    fn purge(&self) {
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.caches.len();
            state.clear();
            dropped
        };
        self.counters.purges.fetch_add(1, Ordering::Relaxed);
        info!(identities = dropped, "Authorization caches purged");
    }

    /// Cache for `identity` matching `snapshot`, created if needed
    fn cache_for(
        &self,
        identity: &IdentityKey,
        snapshot: Arc<Snapshot<C>>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Arc<IdentityCache<C>> {
        let mut state = self.state.lock();

        if snapshot.generation() < state.generation {
            // Caller raced a rebuild; answer from its own snapshot, uncached
            drop(state);
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            debug!(
                identity = %identity,
                generation = snapshot.generation(),
                "Serving stale snapshot without caching"
            );
            let resolver = Arc::new(GrantResolver::new(snapshot));
            return Arc::new(IdentityCache::new(
                identity.clone(),
                resolver,
                Arc::clone(&self.counters),
            ));
        }

        if snapshot.generation() > state.generation {
            state.clear();
            state.generation = snapshot.generation();
        }

        // `get` marks the identity as most recently used
        if let Some(cache) = state.caches.get(identity).cloned() {
            if !self.config.revalidate_life_cycles || cache.life_cycles_valid(now) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return cache;
            }
            state.caches.pop(identity);
            self.counters.lifecycle_evictions.fetch_add(1, Ordering::Relaxed);
            debug!(identity = %identity, "Life cycle changed, rebuilding identity cache");
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let resolver = match state.resolver.clone() {
            Some(resolver) => resolver,
            None => {
                let resolver = Arc::new(GrantResolver::new(snapshot));
                self.counters.resolver_builds.fetch_add(1, Ordering::Relaxed);
                state.resolver = Some(Arc::clone(&resolver));
                resolver
            }
        };

        let cache = Arc::new(IdentityCache::new(
            identity.clone(),
            resolver,
            Arc::clone(&self.counters),
        ));
        if let Some((evicted, _)) = state.caches.push(identity.clone(), Arc::clone(&cache)) {
            if evicted != *identity {
                self.counters.capacity_evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %evicted, "Identity cache capacity reached");
            }
        }
        cache
    }
}

impl<C: PayloadCodec> Drop for EngineInner<C> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get_mut().take() {
            self.store.changed().unsubscribe(id);
        }
    }
}

/// Decision facade over a `SecurityStore`
///
/// Cloning is cheap; clones share caches and statistics.
pub struct AuthorizationEngine<C: PayloadCodec> {
    inner: Arc<EngineInner<C>>,
}

impl<C: PayloadCodec> Clone for AuthorizationEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PayloadCodec> AuthorizationEngine<C> {
    pub fn new(store: SecurityStore<C>, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Engine evaluating life cycles against `clock`
    pub fn with_clock(store: SecurityStore<C>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let state = CacheState::new(store.generation(), config.max_cached_identities);
        let inner = Arc::new(EngineInner {
            store,
            config,
            clock,
            counters: Arc::new(Counters::default()),
            state: Mutex::new(state),
            subscription: Mutex::new(None),
        });

        let weak: Weak<EngineInner<C>> = Arc::downgrade(&inner);
        let id = inner.store.changed().subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                inner.purge();
            }
        });
        *inner.subscription.lock() = Some(id);

        info!(
            generation = inner.state.lock().generation,
            max_cached_identities = inner.config.max_cached_identities,
            "AuthorizationEngine initialized"
        );
        Self { inner }
    }

    /// Whether `identity` may access `item`
    ///
    /// Unknown identities and items, and identities without grants, are
    /// denied.
    pub fn check_access(&self, identity: &IdentityKey, item: &ItemKey) -> Result<bool> {
        let now = self.inner.clock.now();
        let cache = self.inner.cache_for(identity, self.inner.store.snapshot(), now);
        let allowed = cache.check_access(item, now)?;
        debug!(identity = %identity, item = %item, allowed, "Access checked");
        Ok(allowed)
    }

    /// Conditions attached to `item` and its structural parents for
    /// `identity`
    pub fn conditions(&self, identity: &IdentityKey, item: &ItemKey) -> Result<Vec<C::Condition>> {
        let now = self.inner.clock.now();
        let cache = self.inner.cache_for(identity, self.inner.store.snapshot(), now);
        cache.conditions(item, now)
    }

    /// Every item `identity` may access, in hierarchy order
    pub fn authorized_items(&self, identity: &IdentityKey) -> Result<Vec<ItemKey>> {
        let now = self.inner.clock.now();
        let cache = self.inner.cache_for(identity, self.inner.store.snapshot(), now);
        cache.allowed_items(now)
    }

    /// Drops every cached decision
    pub fn purge(&self) {
        self.inner.purge();
    }

    pub fn stats(&self) -> EngineStats {
        let counters = &self.inner.counters;
        let cached_identities = self.inner.state.lock().caches.len();
        let hits = counters.cache_hits.load(Ordering::Relaxed);
        let misses = counters.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        EngineStats {
            cached_identities,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate,
            cache_builds: counters.cache_builds.load(Ordering::Relaxed),
            lifecycle_evictions: counters.lifecycle_evictions.load(Ordering::Relaxed),
            capacity_evictions: counters.capacity_evictions.load(Ordering::Relaxed),
            purges: counters.purges.load(Ordering::Relaxed),
            resolver_builds: counters.resolver_builds.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &SecurityStore<C> {
        &self.inner.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl<C: PayloadCodec> fmt::Debug for AuthorizationEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl<C: PayloadCodec> SecurityStore<C> {
    /// Engine over this store with the default configuration
    pub fn engine(&self) -> AuthorizationEngine<C> {
        AuthorizationEngine::new(self.clone(), EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DefaultCodec;
    use crate::lifecycle::{ManualClock, TimeWindow};
    use crate::store::MemoryPolicy;
    use crate::types::StorageAuthorization;
    use chrono::{Duration, TimeZone, Utc};

    fn policy() -> MemoryPolicy {
        let policy = MemoryPolicy::new();
        for user in ["alice", "bob", "carol"] {
            policy.add_user(user);
        }
        policy.items.add_edge("operation", "task");
        policy
            .authorizations
            .grant(StorageAuthorization::allow("alice", "task"));
        policy
    }

    #[test]
    fn test_cache_hit_after_first_check() {
        let policy = policy();
        let store = SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap();
        let engine = store.engine();

        assert!(engine.check_access(&"alice".into(), &"operation".into()).unwrap());
        assert!(engine.check_access(&"alice".into(), &"task".into()).unwrap());

        let stats = engine.stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_builds, 1);
        assert_eq!(stats.resolver_builds, 1);
        assert_eq!(stats.cached_identities, 1);
    }

    #[test]
    fn test_store_change_purges() {
        let policy = policy();
        let store = SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap();
        let engine = store.engine();
        assert!(engine.check_access(&"alice".into(), &"operation".into()).unwrap());

        policy
            .authorizations
            .grant(StorageAuthorization::deny("alice", "operation"));

        assert_eq!(engine.stats().purges, 1);
        assert_eq!(engine.stats().cached_identities, 0);
        assert!(!engine.check_access(&"alice".into(), &"operation".into()).unwrap());
    }

    #[test]
    fn test_capacity_eviction() {
        let policy = policy();
        let store = SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap();
        let config = EngineConfig {
            max_cached_identities: 2,
            ..EngineConfig::default()
        };
        let engine = AuthorizationEngine::new(store, config);

        for user in ["alice", "bob", "carol"] {
            engine.check_access(&user.into(), &"task".into()).unwrap();
        }

        let stats = engine.stats();
        assert_eq!(stats.cached_identities, 2);
        assert_eq!(stats.capacity_evictions, 1);
    }

    #[test]
    fn test_capacity_eviction_keeps_recently_used() {
        let policy = policy();
        let store = SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap();
        let config = EngineConfig {
            max_cached_identities: 2,
            ..EngineConfig::default()
        };
        let engine = AuthorizationEngine::new(store, config);
        let check = |user: &str| engine.check_access(&user.into(), &"task".into()).unwrap();

        check("alice");
        check("bob");
        for _ in 0..5 {
            assert!(check("alice"));
        }
        check("carol");
        assert_eq!(engine.stats().cache_builds, 3);

        // bob went, alice stayed
        assert!(check("alice"));
        assert_eq!(engine.stats().cache_builds, 3);
        check("bob");
        assert_eq!(engine.stats().cache_builds, 4);
        assert_eq!(engine.stats().capacity_evictions, 2);
    }

    #[test]
    fn test_older_snapshot_answered_without_caching() {
        let policy = policy();
        let store = SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap();
        let engine = store.engine();
        let alice: IdentityKey = "alice".into();
        let operation: ItemKey = "operation".into();
        let old = store.snapshot();

        policy
            .authorizations
            .grant(StorageAuthorization::deny("alice", "operation"));
        assert!(!engine.check_access(&alice, &operation).unwrap());

        let (current_resolver, current_cache) = {
            let state = engine.inner.state.lock();
            assert_eq!(state.generation, 2);
            (
                state.resolver.clone().unwrap(),
                state.caches.peek(&alice).cloned().unwrap(),
            )
        };

        let now = engine.inner.clock.now();
        let stale = engine.inner.cache_for(&alice, old, now);
        assert!(stale.check_access(&operation, now).unwrap());
        assert!(!Arc::ptr_eq(&stale, &current_cache));

        let state = engine.inner.state.lock();
        assert_eq!(state.generation, 2);
        assert_eq!(state.caches.len(), 1);
        assert!(Arc::ptr_eq(state.resolver.as_ref().unwrap(), &current_resolver));
        assert!(Arc::ptr_eq(state.caches.peek(&alice).unwrap(), &current_cache));
        assert_eq!(current_resolver.snapshot().generation(), 2);
        drop(state);

        assert!(!engine.check_access(&alice, &operation).unwrap());
        assert_eq!(engine.stats().cache_builds, 2);
    }

    #[test]
    fn test_expiring_life_cycle_rebuilds_cache() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let codec = DefaultCodec::new();

        let policy = policy();
        policy.authorizations.grant(
            StorageAuthorization::allow("bob", "task").with_life_cycle(
                codec
                    .encode_life_cycle(&TimeWindow::until(start + Duration::hours(1)))
                    .unwrap(),
            ),
        );
        let store = SecurityStore::new(policy.providers(), codec).unwrap();
        let engine = AuthorizationEngine::with_clock(store, EngineConfig::default(), clock.clone());

        assert!(engine.check_access(&"bob".into(), &"task".into()).unwrap());
        clock.advance(Duration::hours(2));
        assert!(!engine.check_access(&"bob".into(), &"task".into()).unwrap());

        let stats = engine.stats();
        assert_eq!(stats.lifecycle_evictions, 1);
        assert_eq!(stats.cache_builds, 2);
    }

    #[test]
    fn test_drop_unsubscribes_from_store() {
        let policy = policy();
        let store = SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap();
        let engine = store.engine();
        assert_eq!(store.changed().listener_count(), 1);

        drop(engine);
        assert_eq!(store.changed().listener_count(), 0);
    }
}
