pub mod rest;

use crate::config::Config;
use crate::db::DbPool;
use crate::storage::{BackendRegistry, PlacementService, PlacementSettings};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    /// Backend registration, health probing and transports
    pub registry: BackendRegistry,
    /// Background placement of uploaded items
    pub placement: PlacementService,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Self {
        let registry = BackendRegistry::new(db.clone(), config.probe_timeout(), config.upload_timeout());
        let placement = PlacementService::new(
            db.clone(),
            registry.clone(),
            PlacementSettings::from(&config),
        );
        Self {
            db,
            config,
            registry,
            placement,
        }
    }
}
