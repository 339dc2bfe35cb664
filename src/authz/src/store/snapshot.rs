//! One immutable, fully resolved generation of policy data

use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::provider::Providers;
use super::StoreConfig;
use crate::codec::PayloadCodec;
use crate::error::{AuthzError, EntityKind, Result};
use crate::hierarchy::{HierarchyIndex, HierarchyNode};
use crate::types::{
    AuthorisableItem, AuthorizationKey, AuthorizationType, GranteeKey, IdentityKey, ItemKey,
    StorageAuthorization,
};

/// A node of the resource hierarchy as seen by one snapshot
pub type SecurityItem = HierarchyNode<ItemKey>;

/// A grant whose references were resolved and payloads decoded
#[derive(Debug)]
pub struct Authorization<C: PayloadCodec> {
    key: AuthorizationKey,
    grantee: GranteeKey,
    item: ItemKey,
    kind: AuthorizationType,
    life_cycle: Option<C::LifeCycle>,
    conditions: Vec<C::Condition>,
    delegated_by: Option<IdentityKey>,
    payload_error: Option<String>,
}

impl<C: PayloadCodec> Authorization<C> {
    /// Decodes the opaque payloads of `record`
    ///
    /// A payload that fails to decode does not fail the snapshot: the grant
    /// is kept with its error recorded and is treated as never valid.
    fn decode(record: StorageAuthorization, codec: &C) -> Self {
        let mut payload_error = None;

        let life_cycle = match record.life_cycle.as_deref().map(|p| codec.decode_life_cycle(p)) {
            Some(Ok(life_cycle)) => Some(life_cycle),
            Some(Err(err)) => {
                payload_error = Some(format!("life cycle: {}", err));
                None
            }
            None => None,
        };

        let mut conditions = Vec::with_capacity(record.conditions.len());
        for payload in &record.conditions {
            match codec.decode_condition(payload) {
                Ok(condition) => conditions.push(condition),
                Err(err) => {
                    payload_error.get_or_insert_with(|| format!("condition: {}", err));
                }
            }
        }

        if let Some(reason) = &payload_error {
            warn!(
                authorization = %record.key,
                "Undecodable payload, grant will be treated as invalid: {}",
                reason
            );
        }

        Self {
            key: record.key,
            grantee: record.grantee,
            item: record.item,
            kind: record.kind,
            life_cycle,
            conditions,
            delegated_by: record.delegated_by,
            payload_error,
        }
    }

    pub fn key(&self) -> &AuthorizationKey {
        &self.key
    }

    pub fn grantee(&self) -> &GranteeKey {
        &self.grantee
    }

    pub fn item(&self) -> &ItemKey {
        &self.item
    }

    pub fn kind(&self) -> AuthorizationType {
        self.kind
    }

    pub fn life_cycle(&self) -> Option<&C::LifeCycle> {
        self.life_cycle.as_ref()
    }

    pub fn conditions(&self) -> &[C::Condition] {
        &self.conditions
    }

    /// Identity that handed out this grant; provenance only
    pub fn delegated_by(&self) -> Option<&IdentityKey> {
        self.delegated_by.as_ref()
    }

    pub fn payload_error(&self) -> Option<&str> {
        self.payload_error.as_deref()
    }

    pub fn is_decoded(&self) -> bool {
        self.payload_error.is_none()
    }
}

/// Immutable policy view assembled from every provider at one instant
#[derive(Debug)]
pub struct Snapshot<C: PayloadCodec> {
    generation: u64,
    items: HierarchyIndex<ItemKey>,
    identities: IndexSet<IdentityKey>,
    grantees: IndexMap<GranteeKey, AuthorisableItem>,
    authorizations: IndexMap<AuthorizationKey, Arc<Authorization<C>>>,
}

impl<C: PayloadCodec> Snapshot<C> {
    /// Reads every provider and resolves all cross references
    ///
    /// # Errors
    ///
    /// - `UnknownReference` for dangling edge, member, grant or delegation keys
    /// - `DuplicateKey` for repeated grantee or grant keys
    /// - `CircularHierarchy` for a cyclic item hierarchy
    /// - `Provider` for provider failures
    pub(crate) fn build(
        generation: u64,
        providers: &Providers,
        codec: &C,
        config: &StoreConfig,
    ) -> Result<Self> {
        let items = Self::build_items(providers)?;
        let identities = Self::build_identities(providers)?;
        let grantees = Self::build_grantees(providers, &identities, config)?;
        let authorizations =
            Self::build_authorizations(providers, codec, &items, &identities, &grantees, config)?;

        debug!(
            generation,
            items = items.len(),
            identities = identities.len(),
            grantees = grantees.len(),
            authorizations = authorizations.len(),
            "Policy snapshot built"
        );

        Ok(Self {
            generation,
            items,
            identities,
            grantees,
            authorizations,
        })
    }

    fn build_items(providers: &Providers) -> Result<HierarchyIndex<ItemKey>> {
        let mut items = HierarchyIndex::new();
        let mut edges = Vec::new();

        for provider in &providers.items {
            for key in provider.provide_items()? {
                items.add_node(key);
            }
            edges.extend(provider.provide_hierarchies()?);
        }

        for edge in edges {
            for key in [&edge.item, &edge.parent] {
                if !items.contains(key) {
                    return Err(AuthzError::UnknownReference {
                        kind: EntityKind::SecurityItem,
                        key: key.to_string(),
                        referenced_by: format!("hierarchy edge '{}' -> '{}'", edge.item, edge.parent),
                    });
                }
            }
            items.add_edge(edge.item, edge.parent);
        }

        items.detect_cycles()?;
        Ok(items)
    }

    fn build_identities(providers: &Providers) -> Result<IndexSet<IdentityKey>> {
        let mut identities = IndexSet::new();
        for provider in &providers.identities {
            identities.extend(provider.provide()?);
        }
        Ok(identities)
    }

    fn build_grantees(
        providers: &Providers,
        identities: &IndexSet<IdentityKey>,
        config: &StoreConfig,
    ) -> Result<IndexMap<GranteeKey, AuthorisableItem>> {
        let mut grantees = IndexMap::new();

        for provider in &providers.grantees {
            for grantee in provider.provide()? {
                if let Some(member) = grantee.members.iter().find(|m| !identities.contains(*m)) {
                    if config.validate_memberships {
                        return Err(AuthzError::UnknownReference {
                            kind: EntityKind::SecurityIdentity,
                            key: member.to_string(),
                            referenced_by: format!("authorisable item '{}'", grantee.key),
                        });
                    }
                    debug!(
                        grantee = %grantee.key,
                        member = %member,
                        "Grantee lists a member outside the identity providers"
                    );
                }

                if grantees.contains_key(&grantee.key) {
                    return Err(AuthzError::DuplicateKey {
                        kind: EntityKind::AuthorisableItem,
                        key: grantee.key.to_string(),
                    });
                }
                grantees.insert(grantee.key.clone(), grantee);
            }
        }

        Ok(grantees)
    }

    fn build_authorizations(
        providers: &Providers,
        codec: &C,
        items: &HierarchyIndex<ItemKey>,
        identities: &IndexSet<IdentityKey>,
        grantees: &IndexMap<GranteeKey, AuthorisableItem>,
        config: &StoreConfig,
    ) -> Result<IndexMap<AuthorizationKey, Arc<Authorization<C>>>> {
        let mut authorizations = IndexMap::new();

        for provider in &providers.authorizations {
            for record in provider.provide()? {
                let referenced_by = format!("authorization '{}'", record.key);

                if !items.contains(&record.item) {
                    return Err(AuthzError::UnknownReference {
                        kind: EntityKind::SecurityItem,
                        key: record.item.to_string(),
                        referenced_by,
                    });
                }
                if !grantees.contains_key(&record.grantee) {
                    return Err(AuthzError::UnknownReference {
                        kind: EntityKind::AuthorisableItem,
                        key: record.grantee.to_string(),
                        referenced_by,
                    });
                }
                if let Some(delegator) = &record.delegated_by {
                    if config.validate_delegations && !identities.contains(delegator) {
                        return Err(AuthzError::UnknownReference {
                            kind: EntityKind::SecurityIdentity,
                            key: delegator.to_string(),
                            referenced_by,
                        });
                    }
                }
                if authorizations.contains_key(&record.key) {
                    return Err(AuthzError::DuplicateKey {
                        kind: EntityKind::Authorization,
                        key: record.key.to_string(),
                    });
                }

                let key = record.key.clone();
                authorizations.insert(key, Arc::new(Authorization::decode(record, codec)));
            }
        }

        Ok(authorizations)
    }

    /// Monotonic build counter, starting at 1
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hierarchy(&self) -> &HierarchyIndex<ItemKey> {
        &self.items
    }

    pub fn item(&self, key: &ItemKey) -> Option<&SecurityItem> {
        self.items.node(key)
    }

    pub fn items(&self) -> impl Iterator<Item = &SecurityItem> {
        self.items.nodes()
    }

    pub fn identity(&self, key: &IdentityKey) -> Option<&IdentityKey> {
        self.identities.get(key)
    }

    pub fn identities(&self) -> impl Iterator<Item = &IdentityKey> {
        self.identities.iter()
    }

    pub fn grantee(&self, key: &GranteeKey) -> Option<&AuthorisableItem> {
        self.grantees.get(key)
    }

    pub fn grantees(&self) -> impl Iterator<Item = &AuthorisableItem> {
        self.grantees.values()
    }

    pub fn authorization(&self, key: &AuthorizationKey) -> Option<&Arc<Authorization<C>>> {
        self.authorizations.get(key)
    }

    /// Every grant, in provider order
    pub fn authorizations(&self) -> impl Iterator<Item = &Arc<Authorization<C>>> {
        self.authorizations.values()
    }
}
