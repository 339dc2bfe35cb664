//! Core policy records shared by providers, the store and the engine

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! policy_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_string())
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

policy_key!(
    /// Key of a node in the resource hierarchy (operation, task, role, ...)
    ItemKey
);

policy_key!(
    /// Key of an atomic subject such as a user
    IdentityKey
);

policy_key!(
    /// Key of a grantee: a single user or a group of users
    GranteeKey
);

policy_key!(
    /// Key of a single grant record
    AuthorizationKey
);

impl AuthorizationKey {
    /// Generates a fresh random key
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl From<&IdentityKey> for GranteeKey {
    fn from(identity: &IdentityKey) -> Self {
        Self(identity.0.clone())
    }
}

/// Effect of a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorizationType {
    /// Grants access to the item and everything below it
    Allow,
    /// Revokes access to the item and everything below it
    Deny,
    /// Stored but ignored during resolution
    Neutral,
}

/// A single `(child, parent)` edge of the resource hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityHierarchy {
    pub item: ItemKey,
    pub parent: ItemKey,
}

impl SecurityHierarchy {
    pub fn new(item: impl Into<ItemKey>, parent: impl Into<ItemKey>) -> Self {
        Self {
            item: item.into(),
            parent: parent.into(),
        }
    }
}

/// A grantee and the identities it resolves to
///
/// A single-user grantee lists only itself; a group lists its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorisableItem {
    pub key: GranteeKey,
    pub members: IndexSet<IdentityKey>,
}

impl AuthorisableItem {
    /// Grantee standing for exactly one identity, keyed like that identity
    pub fn user(identity: impl Into<IdentityKey>) -> Self {
        let identity = identity.into();
        let mut members = IndexSet::new();
        members.insert(identity.clone());
        Self {
            key: GranteeKey::from(&identity),
            members,
        }
    }

    /// Grantee standing for a set of member identities
    pub fn group<I, K>(key: impl Into<GranteeKey>, members: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<IdentityKey>,
    {
        Self {
            key: key.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Raw grant record as supplied by an authorization provider
///
/// Life cycle and condition payloads stay opaque here; the store decodes
/// them through its `PayloadCodec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAuthorization {
    pub key: AuthorizationKey,
    pub grantee: GranteeKey,
    pub item: ItemKey,
    pub kind: AuthorizationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life_cycle: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<IdentityKey>,
}

impl StorageAuthorization {
    pub fn new(
        kind: AuthorizationType,
        grantee: impl Into<GranteeKey>,
        item: impl Into<ItemKey>,
    ) -> Self {
        Self {
            key: AuthorizationKey::generate(),
            grantee: grantee.into(),
            item: item.into(),
            kind,
            life_cycle: None,
            conditions: Vec::new(),
            delegated_by: None,
        }
    }

    pub fn allow(grantee: impl Into<GranteeKey>, item: impl Into<ItemKey>) -> Self {
        Self::new(AuthorizationType::Allow, grantee, item)
    }

    pub fn deny(grantee: impl Into<GranteeKey>, item: impl Into<ItemKey>) -> Self {
        Self::new(AuthorizationType::Deny, grantee, item)
    }

    pub fn neutral(grantee: impl Into<GranteeKey>, item: impl Into<ItemKey>) -> Self {
        Self::new(AuthorizationType::Neutral, grantee, item)
    }

    pub fn with_key(mut self, key: impl Into<AuthorizationKey>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_life_cycle(mut self, payload: Vec<u8>) -> Self {
        self.life_cycle = Some(payload);
        self
    }

    pub fn with_condition(mut self, payload: Vec<u8>) -> Self {
        self.conditions.push(payload);
        self
    }

    pub fn delegated_by(mut self, identity: impl Into<IdentityKey>) -> Self {
        self.delegated_by = Some(identity.into());
        self
    }
}
