use std::sync::Arc;

use lazy_static::lazy_static;

use crate::groups;

/// All configuration groups of the engine.
#[derive(Debug, Clone, Default)]
pub struct ClutConfig {
    pub reconstruction: groups::reconstruction::ConfigValues,
    pub client: groups::client::ConfigValues,
    pub sink: groups::sink::ConfigValues,
    pub log: groups::log::ConfigValues,
}

impl ClutConfig {
    /// Defaults with environment overrides applied; equivalent to `ClutConfig::default().with_env_overrides()`.
    pub fn new() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `CLUT_<GROUP>_<FIELD>` environment overrides to every group.
    pub fn with_env_overrides(mut self) -> Self {
        self.reconstruction.apply_env_overrides();
        self.client.apply_env_overrides();
        self.sink.apply_env_overrides();
        self.log.apply_env_overrides();
        self
    }
}

lazy_static! {
    static ref GLOBAL_CONFIG: Arc<ClutConfig> = Arc::new(ClutConfig::new());
}

/// The process-wide configuration, read from the environment on first use.
pub fn clut_config() -> Arc<ClutConfig> {
    GLOBAL_CONFIG.clone()
}
