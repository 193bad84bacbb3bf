use std::sync::Arc;

use lp_core::{DbError, Dialect, DriverBackend, Value};

use crate::model::ModuleDefinition;

/// Registry of `lp_module_registry` rows: validates that
/// `template`-scoped migrations declare a `templateKey` that matches a
/// registered module, and that `migrationPrefix` values don't collide.
pub struct ModuleRegistry {
    driver: Arc<dyn DriverBackend>,
    dialect: Dialect,
    table: String,
}

impl ModuleRegistry {
    pub fn new(driver: Arc<dyn DriverBackend>, dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            driver,
            dialect,
            table: table.into(),
        }
    }

    fn table_ref(&self) -> String {
        self.dialect.quote_identifier(&self.table)
    }

    fn ph(&self, n: usize) -> String {
        match self.dialect.placeholder_style() {
            lp_core::PlaceholderStyle::DollarNumber => format!("${n}"),
            lp_core::PlaceholderStyle::QuestionMark => "?".to_string(),
        }
    }

    pub async fn ensure_table(&self) -> Result<(), DbError> {
        let table = self.table_ref();
        let create = self.dialect.create_table_if_not_exists();
        let sql = format!(
            "{create} {table} (\
                name TEXT PRIMARY KEY, \
                display_name TEXT NOT NULL, \
                description TEXT, \
                version TEXT NOT NULL, \
                dependencies TEXT NOT NULL, \
                migration_prefix TEXT NOT NULL UNIQUE\
            )"
        );
        self.driver.execute(&sql, &[]).await?;
        Ok(())
    }

    /// Register a module, rejecting a `migration_prefix` collision with an
    /// already-registered module.
    pub async fn register(&self, module: &ModuleDefinition) -> Result<(), DbError> {
        if let Some(existing) = self.find_by_prefix(&module.migration_prefix).await? {
            if existing.name != module.name {
                return Err(DbError::config(format!(
                    "migration prefix '{}' is already used by module '{}'",
                    module.migration_prefix, existing.name
                )));
            }
        }

        let table = self.table_ref();
        let sql = format!(
            "INSERT INTO {table} (name, display_name, description, version, dependencies, migration_prefix) \
             VALUES ({}, {}, {}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5),
            self.ph(6),
        );
        let dependencies = serde_json::to_string(&module.dependencies)
            .map_err(|e| DbError::config(format!("failed to encode dependencies: {e}")))?;
        self.driver
            .execute(
                &sql,
                &[
                    Value::Text(module.name.clone()),
                    Value::Text(module.display_name.clone()),
                    module.description.clone().map(Value::Text).unwrap_or(Value::Null),
                    Value::Text(module.version.clone()),
                    Value::Text(dependencies),
                    Value::Text(module.migration_prefix.clone()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<ModuleDefinition>, DbError> {
        let table = self.table_ref();
        let sql = format!(
            "SELECT name, display_name, description, version, dependencies, migration_prefix \
             FROM {table} WHERE name = {}",
            self.ph(1)
        );
        let result = self.driver.query(&sql, &[Value::Text(name.to_string())]).await?;
        result.rows.first().map(row_to_module).transpose()
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ModuleDefinition>, DbError> {
        let table = self.table_ref();
        let sql = format!(
            "SELECT name, display_name, description, version, dependencies, migration_prefix \
             FROM {table} WHERE migration_prefix = {}",
            self.ph(1)
        );
        let result = self.driver.query(&sql, &[Value::Text(prefix.to_string())]).await?;
        result.rows.first().map(row_to_module).transpose()
    }

    /// Validate that `template_key` refers to a registered module. Used by
    /// `MigrationRunner::up` before applying any `scope=template`
    /// migration.
    pub async fn validate_template_key(&self, template_key: &str) -> Result<(), DbError> {
        match self.get(template_key).await? {
            Some(_) => Ok(()),
            None => Err(DbError::config(format!(
                "no registered module for template key '{template_key}'"
            ))),
        }
    }
}

fn row_to_module(row: &Vec<Value>) -> Result<ModuleDefinition, DbError> {
    let name = match row.first() {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let display_name = match row.get(1) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let description = match row.get(2) {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    };
    let version = match row.get(3) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    let dependencies = match row.get(4) {
        Some(Value::Text(s)) => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    };
    let migration_prefix = match row.get(5) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    };
    Ok(ModuleDefinition {
        name,
        display_name,
        description,
        version,
        dependencies,
        migration_prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lp_core::{ColumnMeta, QueryResult};
    use lp_test_support::FakeDriverBackend;

    fn sample() -> ModuleDefinition {
        ModuleDefinition {
            name: "billing".into(),
            display_name: "Billing".into(),
            description: None,
            version: "1.0.0".into(),
            dependencies: vec![],
            migration_prefix: "billing_".into(),
        }
    }

    #[tokio::test]
    async fn register_inserts_when_prefix_is_free() {
        let fake = FakeDriverBackend::new()
            .with_result(
                "SELECT name, display_name, description, version, dependencies, migration_prefix FROM \"lp_module_registry\" WHERE migration_prefix = $1",
                QueryResult::empty(),
            )
            .with_default_rows_affected(1);
        let registry = ModuleRegistry::new(Arc::new(fake), Dialect::Postgres, "lp_module_registry");
        registry.register(&sample()).await.unwrap();
    }

    #[tokio::test]
    async fn register_rejects_prefix_collision_with_different_module() {
        let fake = FakeDriverBackend::new().with_result(
            "SELECT name, display_name, description, version, dependencies, migration_prefix FROM \"lp_module_registry\" WHERE migration_prefix = $1",
            QueryResult {
                columns: vec![
                    ColumnMeta { name: "name".into(), type_name: "text".into(), nullable: false },
                    ColumnMeta { name: "display_name".into(), type_name: "text".into(), nullable: false },
                    ColumnMeta { name: "description".into(), type_name: "text".into(), nullable: true },
                    ColumnMeta { name: "version".into(), type_name: "text".into(), nullable: false },
                    ColumnMeta { name: "dependencies".into(), type_name: "text".into(), nullable: false },
                    ColumnMeta { name: "migration_prefix".into(), type_name: "text".into(), nullable: false },
                ],
                rows: vec![vec![
                    Value::Text("other".into()),
                    Value::Text("Other".into()),
                    Value::Null,
                    Value::Text("1.0.0".into()),
                    Value::Text("[]".into()),
                    Value::Text("billing_".into()),
                ]],
                row_count: 1,
            },
        );
        let registry = ModuleRegistry::new(Arc::new(fake), Dialect::Postgres, "lp_module_registry");
        let err = registry.register(&sample()).await.unwrap_err();
        assert!(matches!(err, DbError::ConfigError(_)));
    }
}
