use std::sync::Arc;

use crate::{auth::Keys, config::Config, database::Store};

pub struct AppState<S> {
    pub config: Config,
    pub store: S,
    pub keys: Keys,
}

impl<S: Store> AppState<S> {
    pub fn new(config: Config, store: S) -> Arc<Self> {
        let keys = Keys::new(&config.jwt_secret);

        Arc::new(Self {
            config,
            store,
            keys,
        })
    }

    /// Link a player can open to join the battle with `code`.
    pub fn join_url(&self, code: &str) -> String {
        format!(
            "{}/api/battles/join/{code}",
            self.config.public_url.trim_end_matches('/')
        )
    }
}
