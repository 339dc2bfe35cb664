//! Identity -> grants index over one snapshot

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::codec::PayloadCodec;
use crate::store::{Authorization, Snapshot};
use crate::types::IdentityKey;

type GrantIndex<C> = HashMap<IdentityKey, Vec<Arc<Authorization<C>>>>;

/// Expands grantees to their member identities, once, on first use
#[derive(Debug)]
pub(crate) struct GrantResolver<C: PayloadCodec> {
    snapshot: Arc<Snapshot<C>>,
    index: OnceLock<GrantIndex<C>>,
}

impl<C: PayloadCodec> GrantResolver<C> {
    pub(crate) fn new(snapshot: Arc<Snapshot<C>>) -> Self {
        Self {
            snapshot,
            index: OnceLock::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> &Arc<Snapshot<C>> {
        &self.snapshot
    }

    #[cfg(test)]
    pub(crate) fn is_built(&self) -> bool {
        self.index.get().is_some()
    }

    /// Grants that apply to `identity`, in provider order
    pub(crate) fn resolve(&self, identity: &IdentityKey) -> &[Arc<Authorization<C>>] {
        self.index()
            .get(identity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn index(&self) -> &GrantIndex<C> {
        self.index.get_or_init(|| {
            let mut index: GrantIndex<C> = HashMap::new();
            for authorization in self.snapshot.authorizations() {
                let Some(grantee) = self.snapshot.grantee(authorization.grantee()) else {
                    continue;
                };
                for member in &grantee.members {
                    index
                        .entry(member.clone())
                        .or_default()
                        .push(Arc::clone(authorization));
                }
            }

            debug!(
                generation = self.snapshot.generation(),
                identities = index.len(),
                "Grant index built"
            );
            index
        })
    }
}
