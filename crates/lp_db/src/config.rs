use std::time::Duration;

/// Engine-wide configuration: table name overrides, pool sizing, and
/// timeouts.
///
/// A plain struct with a builder, not a process-wide singleton: everything
/// is configurable, nothing is read from a global.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub branch_metadata_table: String,
    pub module_registry_table: String,
    pub migrations_table: String,
    pub seeds_table: String,
    pub pool_max_size: u32,
    pub drain_timeout: Duration,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            branch_metadata_table: "lp_branch_metadata".to_string(),
            module_registry_table: "lp_module_registry".to_string(),
            migrations_table: "lp_migrations".to_string(),
            seeds_table: "lp_seeds".to_string(),
            pool_max_size: 20,
            drain_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch_metadata_table(mut self, name: impl Into<String>) -> Self {
        self.branch_metadata_table = name.into();
        self
    }

    pub fn with_module_registry_table(mut self, name: impl Into<String>) -> Self {
        self.module_registry_table = name.into();
        self
    }

    pub fn with_migrations_table(mut self, name: impl Into<String>) -> Self {
        self.migrations_table = name.into();
        self
    }

    pub fn with_seeds_table(mut self, name: impl Into<String>) -> Self {
        self.seeds_table = name.into();
        self
    }

    pub fn with_pool_max_size(mut self, size: u32) -> Self {
        self.pool_max_size = size;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_names_use_lp_prefix() {
        let config = EngineConfig::default();
        assert_eq!(config.branch_metadata_table, "lp_branch_metadata");
        assert_eq!(config.migrations_table, "lp_migrations");
        assert_eq!(config.seeds_table, "lp_seeds");
    }

    #[test]
    fn builder_overrides_table_names() {
        let config = EngineConfig::new().with_migrations_table("custom_migrations");
        assert_eq!(config.migrations_table, "custom_migrations");
        assert_eq!(config.seeds_table, "lp_seeds");
    }
}
