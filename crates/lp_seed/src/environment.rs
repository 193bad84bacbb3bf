/// Ambient deployment environment, read once by the caller and handed to
/// `SeedRunner` explicitly rather than consulted ad hoc from inside the
/// runner — the same "everything configurable, nothing global" stance as
/// `lp_db::EngineConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
    Other,
}

impl Environment {
    /// Reads `APP_ENV`, falling back to `NODE_ENV`, defaulting to
    /// `Development` if neither is set or recognized.
    pub fn from_ambient() -> Self {
        let raw = std::env::var("APP_ENV")
            .or_else(|_| std::env::var("NODE_ENV"))
            .unwrap_or_default();
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            "" | "development" | "dev" => Environment::Development,
            _ => Environment::Other,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_defaults_to_development() {
        assert_eq!(Environment::parse(""), Environment::Development);
    }

    #[test]
    fn recognizes_production_aliases() {
        assert!(Environment::parse("production").is_production());
        assert!(Environment::parse("PROD").is_production());
        assert!(!Environment::parse("staging").is_production());
    }
}
