//! Security store: providers in, immutable snapshots out
//!
//! The store reads every provider into a `Snapshot` and republishes a new
//! one whenever a provider signals a change. Readers grab the current
//! `Arc<Snapshot>` once and work against it; a rebuild never disturbs a
//! snapshot already handed out.

mod memory;
mod provider;
mod snapshot;

pub use memory::{
    MemoryAuthorizationProvider, MemoryGranteeProvider, MemoryIdentityProvider,
    MemoryItemProvider, MemoryPolicy,
};
pub use provider::{
    AuthorisableItemProvider, AuthorizationProvider, ChangeSignal, Providers,
    SecurityIdentityProvider, SecurityItemProvider, SubscriptionId,
};
pub use snapshot::{Authorization, SecurityItem, Snapshot};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{error, info};

use crate::codec::PayloadCodec;
use crate::error::Result;

/// Store validation settings
///
/// Both checks are off by default: grantee members may come from another
/// identity source, and the delegator is provenance only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Reject grantees whose members are not known identities
    pub validate_memberships: bool,

    /// Reject grants delegated by unknown identities
    pub validate_delegations: bool,
}

struct StoreInner<C: PayloadCodec> {
    providers: Providers,
    codec: Arc<C>,
    config: StoreConfig,
    current: RwLock<Arc<Snapshot<C>>>,
    rebuild_lock: Mutex<()>,
    changed: ChangeSignal,
    // One per entry of `providers.signals()`, same order
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl<C: PayloadCodec> StoreInner<C> {
    fn rebuild(&self) -> Result<u64> {
        let _guard = self.rebuild_lock.lock();

        let generation = self.current.read().generation() + 1;
        let snapshot = Snapshot::build(generation, &self.providers, self.codec.as_ref(), &self.config)?;
        *self.current.write() = Arc::new(snapshot);

        info!(generation, "Policy snapshot published");
        Ok(generation)
    }

    fn on_provider_changed(&self) {
        match self.rebuild() {
            Ok(_) => self.changed.notify(),
            Err(err) => {
                let generation = self.current.read().generation();
                error!(
                    generation,
                    "Policy rebuild failed, keeping previous snapshot: {}", err
                );
            }
        }
    }
}

impl<C: PayloadCodec> Drop for StoreInner<C> {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(self.subscriptions.get_mut());
        for (signal, id) in self.providers.signals().into_iter().zip(subscriptions) {
            signal.unsubscribe(id);
        }
    }
}

/// Shared handle to the policy store
///
/// Cloning is cheap; clones share the same snapshot and change signal.
pub struct SecurityStore<C: PayloadCodec> {
    inner: Arc<StoreInner<C>>,
}

impl<C: PayloadCodec> Clone for SecurityStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: PayloadCodec> SecurityStore<C> {
    /// Builds the first snapshot with the default `StoreConfig`
    pub fn new(providers: Providers, codec: C) -> Result<Self> {
        Self::with_config(providers, codec, StoreConfig::default())
    }

    /// Builds the first snapshot and starts following provider changes
    ///
    /// # Errors
    ///
    /// Any configuration, cycle or provider error of the initial build.
    pub fn with_config(providers: Providers, codec: C, config: StoreConfig) -> Result<Self> {
        let snapshot = Snapshot::build(1, &providers, &codec, &config)?;
        info!(generation = 1u64, "Policy snapshot published");

        let inner = Arc::new(StoreInner {
            providers,
            codec: Arc::new(codec),
            config,
            current: RwLock::new(Arc::new(snapshot)),
            rebuild_lock: Mutex::new(()),
            changed: ChangeSignal::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let ids: Vec<SubscriptionId> = inner
            .providers
            .signals()
            .into_iter()
            .map(|signal| {
                let weak: Weak<StoreInner<C>> = Arc::downgrade(&inner);
                signal.subscribe(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_provider_changed();
                    }
                })
            })
            .collect();
        *inner.subscriptions.lock() = ids;

        Ok(Self { inner })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot<C>> {
        Arc::clone(&self.inner.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.inner.current.read().generation()
    }

    /// Rebuilds from the providers and signals `changed` on success
    ///
    /// On failure the previous snapshot stays current.
    pub fn rebuild(&self) -> Result<u64> {
        let generation = self.inner.rebuild()?;
        self.inner.changed.notify();
        Ok(generation)
    }

    /// Fires once per published snapshot, after it became current
    pub fn changed(&self) -> &ChangeSignal {
        &self.inner.changed
    }

    pub fn codec(&self) -> &C {
        self.inner.codec.as_ref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

impl<C: PayloadCodec> fmt::Debug for SecurityStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityStore")
            .field("generation", &self.generation())
            .field("providers", &self.inner.providers)
            .field("config", &self.inner.config)
            .finish()
    }
}
