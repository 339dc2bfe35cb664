//! # Simple Authorization (simple-authz)
//!
//! Hierarchical allow/deny authorization engine with support for:
//! - Resource hierarchies where grants propagate to descendants
//! - Deny-overrides on an item and everything below it
//! - Group grantees expanding to their member identities
//! - Time-bounded grants through pluggable life cycles
//! - Opaque conditions handed back to the caller
//! - Per-identity decision caching, purged on every policy change
//!
//! ## Example
//!
//! ```rust
//! use simple_authz::{DefaultCodec, MemoryPolicy, SecurityStore, StorageAuthorization};
//!
//! # fn example() -> simple_authz::Result<()> {
//! let policy = MemoryPolicy::new();
//! policy.add_user("alice");
//! policy.items.add_edge("approve_invoice", "accounting");
//! policy
//!     .authorizations
//!     .grant(StorageAuthorization::allow("alice", "accounting"));
//!
//! let store = SecurityStore::new(policy.providers(), DefaultCodec::new())?;
//! let engine = store.engine();
//!
//! assert!(engine.check_access(&"alice".into(), &"approve_invoice".into())?);
//! assert!(!engine.check_access(&"bob".into(), &"approve_invoice".into())?);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod lifecycle;
pub mod store;
pub mod types;

pub use codec::{BincodeCodec, CodecError, DefaultCodec, JsonCodec, PayloadCodec};
pub use engine::{AuthorizationEngine, EngineConfig, EngineStats};
pub use error::{AuthzError, EntityKind, Result};
pub use hierarchy::{HierarchyIndex, HierarchyNode};
pub use lifecycle::{Clock, LifeCycle, ManualClock, SystemClock, TimeWindow};
pub use store::{
    AuthorisableItemProvider, Authorization, AuthorizationProvider, ChangeSignal,
    MemoryAuthorizationProvider, MemoryGranteeProvider, MemoryIdentityProvider,
    MemoryItemProvider, MemoryPolicy, Providers, SecurityIdentityProvider, SecurityItem,
    SecurityItemProvider, SecurityStore, Snapshot, StoreConfig, SubscriptionId,
};
pub use types::{
    AuthorisableItem, AuthorizationKey, AuthorizationType, GranteeKey, IdentityKey, ItemKey,
    SecurityHierarchy, StorageAuthorization,
};
