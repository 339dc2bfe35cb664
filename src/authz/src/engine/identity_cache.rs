//! Per-identity decision cache
//!
//! Holds, for one identity and one snapshot, the set of items the identity
//! may access together with the conditions attached to each of them. The
//! set is computed once, on first use, and read lock-free afterwards.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::resolver::GrantResolver;
use super::Counters;
use crate::codec::PayloadCodec;
use crate::error::{AuthzError, Result};
use crate::lifecycle::LifeCycle;
use crate::store::{Authorization, Snapshot};
use crate::types::{AuthorizationType, IdentityKey, ItemKey};

struct Decisions<C: PayloadCodec> {
    allowed: HashMap<ItemKey, Vec<C::Condition>>,
    // Every life cycle consulted during the build and what it said
    life_cycles: Vec<(Arc<Authorization<C>>, bool)>,
}

pub(crate) struct IdentityCache<C: PayloadCodec> {
    identity: IdentityKey,
    resolver: Arc<GrantResolver<C>>,
    counters: Arc<Counters>,
    build_lock: Mutex<()>,
    decisions: OnceLock<Decisions<C>>,
}

impl<C: PayloadCodec> IdentityCache<C> {
    pub(crate) fn new(
        identity: IdentityKey,
        resolver: Arc<GrantResolver<C>>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            identity,
            resolver,
            counters,
            build_lock: Mutex::new(()),
            decisions: OnceLock::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_built(&self) -> bool {
        self.decisions.get().is_some()
    }

    /// Whether `item` is in the allowed set
    pub(crate) fn check_access(&self, item: &ItemKey, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.decisions(now)?.allowed.contains_key(item))
    }

    /// Conditions of `item`, followed by those of every structural parent
    ///
    /// Parents contribute whether or not they are allowed themselves. An
    /// ancestor reached through several paths contributes once per path.
    pub(crate) fn conditions(&self, item: &ItemKey, now: DateTime<Utc>) -> Result<Vec<C::Condition>> {
        let decisions = self.decisions(now)?;
        let snapshot = self.resolver.snapshot();

        let mut conditions = Vec::new();
        collect_conditions(snapshot, decisions, item, &mut conditions)?;
        Ok(conditions)
    }

    /// Every allowed item
    pub(crate) fn allowed_items(&self, now: DateTime<Utc>) -> Result<Vec<ItemKey>> {
        let decisions = self.decisions(now)?;
        let snapshot = self.resolver.snapshot();

        // Hierarchy order
        Ok(snapshot
            .items()
            .map(|node| node.key())
            .filter(|key| decisions.allowed.contains_key(*key))
            .cloned()
            .collect())
    }

    /// Re-evaluates every recorded life cycle at `now`
    ///
    /// An unbuilt cache is trivially valid.
    pub(crate) fn life_cycles_valid(&self, now: DateTime<Utc>) -> bool {
        let Some(decisions) = self.decisions.get() else {
            return true;
        };
        decisions
            .life_cycles
            .iter()
            .all(|(authorization, was_valid)| evaluate(authorization, now) == *was_valid)
    }

    fn decisions(&self, now: DateTime<Utc>) -> Result<&Decisions<C>> {
        if let Some(decisions) = self.decisions.get() {
            return Ok(decisions);
        }

        let _guard = self.build_lock.lock();
        if let Some(decisions) = self.decisions.get() {
            return Ok(decisions);
        }

        let built = self.build(now)?;
        self.counters.cache_builds.fetch_add(1, Ordering::Relaxed);
        Ok(self.decisions.get_or_init(move || built))
    }

    fn build(&self, now: DateTime<Utc>) -> Result<Decisions<C>> {
        let snapshot = self.resolver.snapshot();
        let grants = self.resolver.resolve(&self.identity);

        let mut life_cycles = Vec::new();
        let mut denied: HashSet<ItemKey> = HashSet::new();
        let mut accepted: Vec<&Arc<Authorization<C>>> = Vec::new();

        for authorization in grants {
            if authorization.kind() == AuthorizationType::Neutral {
                continue;
            }
            if !authorization.is_decoded() {
                continue;
            }
            if authorization.life_cycle().is_some() {
                let valid = evaluate(authorization, now);
                life_cycles.push((Arc::clone(authorization), valid));
                if !valid {
                    continue;
                }
            }

            match authorization.kind() {
                AuthorizationType::Deny => {
                    denied.insert(authorization.item().clone());
                    denied.extend(snapshot.hierarchy().descendants(authorization.item())?);
                }
                _ => accepted.push(authorization),
            }
        }

        let mut allowed: HashMap<ItemKey, Vec<C::Condition>> = HashMap::new();
        for authorization in &accepted {
            let target = authorization.item();
            if denied.contains(target) || allowed.contains_key(target) {
                continue;
            }
            let ancestors = snapshot.hierarchy().ancestors(target)?;
            if ancestors.iter().any(|ancestor| denied.contains(ancestor)) {
                continue;
            }

            allowed.entry(target.clone()).or_default();
            for descendant in snapshot.hierarchy().descendants(target)? {
                if !denied.contains(&descendant) {
                    allowed.entry(descendant).or_default();
                }
            }
        }

        for authorization in &accepted {
            if authorization.conditions().is_empty() {
                continue;
            }
            if let Some(conditions) = allowed.get_mut(authorization.item()) {
                conditions.extend(authorization.conditions().iter().cloned());
            }
        }

        debug!(
            identity = %self.identity,
            generation = snapshot.generation(),
            grants = grants.len(),
            allowed = allowed.len(),
            denied = denied.len(),
            "Identity decisions built"
        );

        Ok(Decisions {
            allowed,
            life_cycles,
        })
    }
}

/// Life cycle verdict of `authorization` at `now`; evaluation errors count
/// as invalid
fn evaluate<C: PayloadCodec>(authorization: &Authorization<C>, now: DateTime<Utc>) -> bool {
    let Some(life_cycle) = authorization.life_cycle() else {
        return true;
    };
    match life_cycle.is_valid_at(now) {
        Ok(valid) => valid,
        Err(err) => {
            warn!(
                authorization = %authorization.key(),
                "Life cycle evaluation failed, grant treated as invalid: {}",
                err
            );
            false
        }
    }
}

/// Own conditions of `item`, then those of each parent chain in parent
/// order, walked with an explicit stack
fn collect_conditions<C: PayloadCodec>(
    snapshot: &Snapshot<C>,
    decisions: &Decisions<C>,
    item: &ItemKey,
    out: &mut Vec<C::Condition>,
) -> Result<()> {
    let hierarchy = snapshot.hierarchy();
    let own = |key: &ItemKey, out: &mut Vec<C::Condition>| {
        if let Some(conditions) = decisions.allowed.get(key) {
            out.extend(conditions.iter().cloned());
        }
    };

    own(item, out);
    let mut stack = vec![(item, hierarchy.parents(item))];
    let mut on_path: HashSet<&ItemKey> = HashSet::from([item]);

    while let Some((_, pending)) = stack.last_mut() {
        let Some(parent) = pending.next() else {
            if let Some((done, _)) = stack.pop() {
                on_path.remove(done);
            }
            continue;
        };

        if on_path.contains(parent) {
            let mut cycle: Vec<String> = stack.iter().map(|(key, _)| key.to_string()).collect();
            cycle.push(parent.to_string());
            return Err(AuthzError::CircularHierarchy { path: cycle });
        }

        own(parent, out);
        on_path.insert(parent);
        stack.push((parent, hierarchy.parents(parent)));
    }

    Ok(())
}
