//! Shared fixtures for unit tests.

use meshstage_store::{MemoryConfigStore, StageStateStore};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::fake::FakeBackend;

pub const LOCAL: &str = "111122223333";
pub const SENDER: &str = "444455556666";

pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.policy.local_account = LOCAL.to_string();
    config.policy.stage_names = vec!["alpha".into(), "beta".into(), "prod".into()];
    config.policy.allowed_accounts = vec![SENDER.to_string()];
    config.sharing.principals = vec![LOCAL.to_string()];
    config
}

pub async fn context_with<F>(setup: F) -> (EngineContext, Arc<FakeBackend>)
where
    F: FnOnce(&FakeBackend),
{
    context_with_config(test_config(), setup).await
}

pub async fn context_with_config<F>(config: EngineConfig, setup: F) -> (EngineContext, Arc<FakeBackend>)
where
    F: FnOnce(&FakeBackend),
{
    let fake = Arc::new(FakeBackend::new(&config.policy.local_account));
    setup(&fake);

    let state = StageStateStore::new(
        Arc::new(MemoryConfigStore::new()),
        config.store.registry_key.clone(),
        config.store.pointer_prefix.clone(),
    );
    let ctx = EngineContext::new(config, fake.clone(), fake.clone(), state)
        .expect("test config is valid");
    (ctx, fake)
}
