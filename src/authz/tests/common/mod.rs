//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use simple_authz::{
    AuthorizationEngine, DefaultCodec, EngineConfig, ManualClock, MemoryPolicy, PayloadCodec,
    SecurityStore, StorageAuthorization, TimeWindow,
};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Installs an `EnvFilter` subscriber once per test binary (`RUST_LOG`)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Role -> Task1 -> Operation1_{1,2}, Role -> Task2 -> Operation2_{1,2}
pub fn task_hierarchy() -> MemoryPolicy {
    init_tracing();
    let policy = MemoryPolicy::new();
    policy.add_user("user");
    policy.add_user("other");
    policy.items.add_edge("Task1", "Role");
    policy.items.add_edge("Task2", "Role");
    policy.items.add_edge("Operation1_1", "Task1");
    policy.items.add_edge("Operation1_2", "Task1");
    policy.items.add_edge("Operation2_1", "Task2");
    policy.items.add_edge("Operation2_2", "Task2");
    policy
}

pub fn store(policy: &MemoryPolicy) -> SecurityStore<DefaultCodec> {
    SecurityStore::new(policy.providers(), DefaultCodec::new()).unwrap()
}

/// Engine over `policy` whose clock starts at `noon()`
pub fn engine_at_noon(policy: &MemoryPolicy) -> (AuthorizationEngine<DefaultCodec>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(noon()));
    let engine = AuthorizationEngine::with_clock(store(policy), EngineConfig::default(), clock.clone());
    (engine, clock)
}

pub fn allow(grantee: &str, item: &str) -> StorageAuthorization {
    StorageAuthorization::allow(grantee, item)
}

pub fn deny(grantee: &str, item: &str) -> StorageAuthorization {
    StorageAuthorization::deny(grantee, item)
}

pub fn with_window(record: StorageAuthorization, window: &TimeWindow) -> StorageAuthorization {
    let payload = DefaultCodec::new().encode_life_cycle(window).unwrap();
    record.with_life_cycle(payload)
}

pub fn with_condition(record: StorageAuthorization, condition: serde_json::Value) -> StorageAuthorization {
    let payload = DefaultCodec::new().encode_condition(&condition).unwrap();
    record.with_condition(payload)
}

pub fn check(engine: &AuthorizationEngine<DefaultCodec>, identity: &str, item: &str) -> bool {
    engine.check_access(&identity.into(), &item.into()).unwrap()
}
