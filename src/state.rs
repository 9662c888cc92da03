use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, engine::AttemptEngine, exam::SessionRegistry, store::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub config: Config,
    pub engine: AttemptEngine,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        let engine = AttemptEngine::new(store.clone(), config.exam_grace_secs);
        Self {
            store,
            config,
            engine,
            sessions: SessionRegistry::new(),
        }
    }
}

impl FromRef<AppState> for Arc<dyn DocumentStore> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for AttemptEngine {
    fn from_ref(state: &AppState) -> Self {
        state.engine.clone()
    }
}

impl FromRef<AppState> for SessionRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}
