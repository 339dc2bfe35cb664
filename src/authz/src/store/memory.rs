//! In-memory providers for embedding and tests
//!
//! Every mutation reports whether it changed anything and fires the
//! provider's `ChangeSignal` only when it did. The signal fires after the
//! write lock is released, so listeners may read the provider back.

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::sync::Arc;

use super::provider::{
    AuthorisableItemProvider, AuthorizationProvider, ChangeSignal, Providers,
    SecurityIdentityProvider, SecurityItemProvider,
};
use crate::error::Result;
use crate::hierarchy::HierarchyIndex;
use crate::types::{
    AuthorisableItem, AuthorizationKey, GranteeKey, IdentityKey, ItemKey, SecurityHierarchy,
    StorageAuthorization,
};

fn signal_if(changed: bool, signal: &ChangeSignal) -> bool {
    if changed {
        signal.notify();
    }
    changed
}

/// Identity set held in memory
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    identities: RwLock<IndexSet<IdentityKey>>,
    changed: ChangeSignal,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, identity: impl Into<IdentityKey>) -> bool {
        let added = self.identities.write().insert(identity.into());
        signal_if(added, &self.changed)
    }

    pub fn remove(&self, identity: &IdentityKey) -> bool {
        let removed = self.identities.write().shift_remove(identity);
        signal_if(removed, &self.changed)
    }

    pub fn contains(&self, identity: &IdentityKey) -> bool {
        self.identities.read().contains(identity)
    }
}

impl SecurityIdentityProvider for MemoryIdentityProvider {
    fn provide(&self) -> Result<Vec<IdentityKey>> {
        Ok(self.identities.read().iter().cloned().collect())
    }

    fn changed(&self) -> &ChangeSignal {
        &self.changed
    }
}

/// Resource hierarchy held in memory
#[derive(Debug, Default)]
pub struct MemoryItemProvider {
    hierarchy: RwLock<HierarchyIndex<ItemKey>>,
    changed: ChangeSignal,
}

impl MemoryItemProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, item: impl Into<ItemKey>) -> bool {
        let added = self.hierarchy.write().add_node(item.into());
        signal_if(added, &self.changed)
    }

    /// Adds a `child -> parent` edge, creating missing items
    ///
    /// Cycles are not rejected here; the next store build reports them.
    pub fn add_edge(&self, child: impl Into<ItemKey>, parent: impl Into<ItemKey>) -> bool {
        let added = self.hierarchy.write().add_edge(child.into(), parent.into());
        signal_if(added, &self.changed)
    }

    pub fn remove_edge(&self, child: &ItemKey, parent: &ItemKey) -> bool {
        let removed = self.hierarchy.write().remove_edge(child, parent);
        signal_if(removed, &self.changed)
    }

    /// Removes an item along with its edges
    pub fn remove_item(&self, item: &ItemKey) -> bool {
        let removed = self.hierarchy.write().remove_node(item);
        signal_if(removed, &self.changed)
    }
}

impl SecurityItemProvider for MemoryItemProvider {
    fn provide_items(&self) -> Result<Vec<ItemKey>> {
        Ok(self
            .hierarchy
            .read()
            .nodes()
            .map(|node| node.key().clone())
            .collect())
    }

    fn provide_hierarchies(&self) -> Result<Vec<SecurityHierarchy>> {
        let hierarchy = self.hierarchy.read();
        let edges = hierarchy
            .nodes()
            .flat_map(|node| {
                node.parents().map(move |parent| SecurityHierarchy {
                    item: node.key().clone(),
                    parent: parent.clone(),
                })
            })
            .collect();
        Ok(edges)
    }

    fn changed(&self) -> &ChangeSignal {
        &self.changed
    }
}

/// Grantees and their memberships held in memory
#[derive(Debug, Default)]
pub struct MemoryGranteeProvider {
    grantees: RwLock<IndexMap<GranteeKey, AuthorisableItem>>,
    changed: ChangeSignal,
}

impl MemoryGranteeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single-user grantee keyed like the identity
    pub fn add_user(&self, identity: impl Into<IdentityKey>) -> bool {
        self.add(AuthorisableItem::user(identity))
    }

    pub fn add_group<I, K>(&self, key: impl Into<GranteeKey>, members: I) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<IdentityKey>,
    {
        self.add(AuthorisableItem::group(key, members))
    }

    /// Inserts or replaces a grantee
    pub fn add(&self, grantee: AuthorisableItem) -> bool {
        let changed = {
            let mut grantees = self.grantees.write();
            match grantees.get(&grantee.key) {
                Some(existing) if *existing == grantee => false,
                _ => {
                    grantees.insert(grantee.key.clone(), grantee);
                    true
                }
            }
        };
        signal_if(changed, &self.changed)
    }

    pub fn add_member(&self, grantee: &GranteeKey, identity: impl Into<IdentityKey>) -> bool {
        let added = self
            .grantees
            .write()
            .get_mut(grantee)
            .map_or(false, |g| g.members.insert(identity.into()));
        signal_if(added, &self.changed)
    }

    pub fn remove_member(&self, grantee: &GranteeKey, identity: &IdentityKey) -> bool {
        let removed = self
            .grantees
            .write()
            .get_mut(grantee)
            .map_or(false, |g| g.members.shift_remove(identity));
        signal_if(removed, &self.changed)
    }

    pub fn remove(&self, grantee: &GranteeKey) -> bool {
        let removed = self.grantees.write().shift_remove(grantee).is_some();
        signal_if(removed, &self.changed)
    }

    pub fn get(&self, grantee: &GranteeKey) -> Option<AuthorisableItem> {
        self.grantees.read().get(grantee).cloned()
    }
}

impl AuthorisableItemProvider for MemoryGranteeProvider {
    fn provide(&self) -> Result<Vec<AuthorisableItem>> {
        Ok(self.grantees.read().values().cloned().collect())
    }

    fn changed(&self) -> &ChangeSignal {
        &self.changed
    }
}

/// Grant records held in memory, in insertion order
#[derive(Debug, Default)]
pub struct MemoryAuthorizationProvider {
    authorizations: RwLock<IndexMap<AuthorizationKey, StorageAuthorization>>,
    changed: ChangeSignal,
}

impl MemoryAuthorizationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a grant, returning its key
    ///
    /// Replacing a grant with an identical record changes nothing and does
    /// not signal.
    pub fn grant(&self, authorization: StorageAuthorization) -> AuthorizationKey {
        let key = authorization.key.clone();
        let changed = {
            let mut authorizations = self.authorizations.write();
            match authorizations.get(&key) {
                Some(existing) if *existing == authorization => false,
                _ => {
                    authorizations.insert(key.clone(), authorization);
                    true
                }
            }
        };
        signal_if(changed, &self.changed);
        key
    }

    pub fn revoke(&self, key: &AuthorizationKey) -> bool {
        let removed = self.authorizations.write().shift_remove(key).is_some();
        signal_if(removed, &self.changed)
    }

    pub fn get(&self, key: &AuthorizationKey) -> Option<StorageAuthorization> {
        self.authorizations.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.authorizations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.authorizations.read().is_empty()
    }
}

impl AuthorizationProvider for MemoryAuthorizationProvider {
    fn provide(&self) -> Result<Vec<StorageAuthorization>> {
        Ok(self.authorizations.read().values().cloned().collect())
    }

    fn changed(&self) -> &ChangeSignal {
        &self.changed
    }
}

/// One in-memory provider of each kind
#[derive(Debug, Clone, Default)]
pub struct MemoryPolicy {
    pub identities: Arc<MemoryIdentityProvider>,
    pub items: Arc<MemoryItemProvider>,
    pub grantees: Arc<MemoryGranteeProvider>,
    pub authorizations: Arc<MemoryAuthorizationProvider>,
}

impl MemoryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an identity together with its single-user grantee
    pub fn add_user(&self, identity: impl Into<IdentityKey>) -> bool {
        let identity = identity.into();
        let added = self.identities.add(identity.clone());
        self.grantees.add_user(identity) || added
    }

    pub fn providers(&self) -> Providers {
        Providers::new()
            .with_identities(self.identities.clone())
            .with_items(self.items.clone())
            .with_grantees(self.grantees.clone())
            .with_authorizations(self.authorizations.clone())
    }
}
