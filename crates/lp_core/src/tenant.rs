use crate::error::DbError;

/// Tenant identity attached to a tenant-scoped query.
///
/// Required for any tenant-scoped operation; both ids must be non-empty
/// after trimming whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub app_id: String,
    pub organization_id: String,
    pub user_id: Option<String>,
}

impl TenantContext {
    pub fn new(app_id: impl Into<String>, organization_id: impl Into<String>) -> Result<Self, DbError> {
        Self::with_user(app_id, organization_id, None::<String>)
    }

    pub fn with_user(
        app_id: impl Into<String>,
        organization_id: impl Into<String>,
        user_id: Option<impl Into<String>>,
    ) -> Result<Self, DbError> {
        let app_id = app_id.into();
        let organization_id = organization_id.into();
        if app_id.trim().is_empty() {
            return Err(DbError::config("tenant context: appId must not be empty"));
        }
        if organization_id.trim().is_empty() {
            return Err(DbError::config(
                "tenant context: organizationId must not be empty",
            ));
        }
        Ok(Self {
            app_id,
            organization_id,
            user_id: user_id.map(Into::into),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_app_id() {
        assert!(TenantContext::new("   ", "org-1").is_err());
    }

    #[test]
    fn rejects_blank_organization_id() {
        assert!(TenantContext::new("app-1", "").is_err());
    }

    #[test]
    fn accepts_trimmed_non_empty_ids_with_optional_user() {
        let ctx = TenantContext::with_user("app-1", "org-1", Some("user-1")).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("user-1"));
    }
}
