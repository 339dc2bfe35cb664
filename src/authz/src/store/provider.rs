//! Provider SPI consumed by the store, and the change signal they fire

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::types::{AuthorisableItem, IdentityKey, ItemKey, SecurityHierarchy, StorageAuthorization};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by `ChangeSignal::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous "something changed" notification
///
/// Listeners run on the notifying thread, outside the listener lock, so a
/// listener may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct ChangeSignal {
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener();
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Supplies the known security identities
pub trait SecurityIdentityProvider: Send + Sync {
    fn provide(&self) -> Result<Vec<IdentityKey>>;

    fn changed(&self) -> &ChangeSignal;
}

/// Supplies security item keys and the `(child, parent)` edges between them
pub trait SecurityItemProvider: Send + Sync {
    fn provide_items(&self) -> Result<Vec<ItemKey>>;

    fn provide_hierarchies(&self) -> Result<Vec<SecurityHierarchy>>;

    fn changed(&self) -> &ChangeSignal;
}

/// Supplies grantees together with their member identities
pub trait AuthorisableItemProvider: Send + Sync {
    fn provide(&self) -> Result<Vec<AuthorisableItem>>;

    fn changed(&self) -> &ChangeSignal;
}

/// Supplies raw grant records
pub trait AuthorizationProvider: Send + Sync {
    fn provide(&self) -> Result<Vec<StorageAuthorization>>;

    fn changed(&self) -> &ChangeSignal;
}

/// Every provider a store reads from
///
/// Several providers of the same kind are merged.
#[derive(Clone, Default)]
pub struct Providers {
    pub identities: Vec<Arc<dyn SecurityIdentityProvider>>,
    pub items: Vec<Arc<dyn SecurityItemProvider>>,
    pub grantees: Vec<Arc<dyn AuthorisableItemProvider>>,
    pub authorizations: Vec<Arc<dyn AuthorizationProvider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identities(mut self, provider: Arc<dyn SecurityIdentityProvider>) -> Self {
        self.identities.push(provider);
        self
    }

    pub fn with_items(mut self, provider: Arc<dyn SecurityItemProvider>) -> Self {
        self.items.push(provider);
        self
    }

    pub fn with_grantees(mut self, provider: Arc<dyn AuthorisableItemProvider>) -> Self {
        self.grantees.push(provider);
        self
    }

    pub fn with_authorizations(mut self, provider: Arc<dyn AuthorizationProvider>) -> Self {
        self.authorizations.push(provider);
        self
    }

    /// Change signals of every provider, in a stable order
    pub(crate) fn signals(&self) -> Vec<&ChangeSignal> {
        let identities = self.identities.iter().map(|p| p.changed());
        let items = self.items.iter().map(|p| p.changed());
        let grantees = self.grantees.iter().map(|p| p.changed());
        let authorizations = self.authorizations.iter().map(|p| p.changed());
        identities
            .chain(items)
            .chain(grantees)
            .chain(authorizations)
            .collect()
    }
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers")
            .field("identities", &self.identities.len())
            .field("items", &self.items.len())
            .field("grantees", &self.grantees.len())
            .field("authorizations", &self.authorizations.len())
            .finish()
    }
}
