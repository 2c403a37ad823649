//! Builder pattern for constructing Tollgate instances
//!
//! This module provides a type-safe builder for creating [`Tollgate`]
//! instances with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate::{SecurityConfig, TollgateBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_config(SecurityConfig::new(b"secret".to_vec()))
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or build without auto-migration and run manually
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_config(SecurityConfig::new(b"secret".to_vec()))
//!         .build()
//!         .await?;
//!     tollgate.migrate().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tollgate_core::{
    AuditSink, CounterStore, MemoryCounterStore, RepositoryProvider, TracingAuditSink,
};

use crate::{SecurityConfig, Tollgate};

/// Errors that can occur when building a Tollgate instance.
#[derive(Debug, thiserror::Error)]
pub enum TollgateBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`TollgateBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

/// A type-safe builder for constructing [`Tollgate`] instances.
///
/// Storage must be configured before [`TollgateBuilder::build`] becomes
/// available.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build
///
/// # Defaults
///
/// - Counter store: [`MemoryCounterStore`]
/// - Audit sink: the backend's own sink where it has one, otherwise
///   [`TracingAuditSink`]
/// - Configuration: [`SecurityConfig::from_env`]
/// - Apply migrations: false
pub struct TollgateBuilder<Storage> {
    storage: Storage,
    store: Option<Arc<dyn CounterStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: Option<SecurityConfig>,
    apply_migrations: bool,
}

impl Default for TollgateBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl TollgateBuilder<NoStorage> {
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            store: None,
            audit: None,
            config: None,
            apply_migrations: false,
        }
    }

    /// Use an already constructed repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> TollgateBuilder<WithStorage<R>> {
        TollgateBuilder {
            storage: WithStorage { repositories },
            store: self.store,
            audit: self.audit,
            config: self.config,
            apply_migrations: self.apply_migrations,
        }
    }
}

#[cfg(feature = "sqlite")]
impl TollgateBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// Audit events go to the database's `audit_events` table unless another
    /// sink is set.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<TollgateBuilder<WithStorage<crate::SqliteRepositoryProvider>>, TollgateBuilderError>
    {
        let pool = sqlx::SqlitePool::connect(url)
            .await
            .map_err(|e| TollgateBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_sqlite_pool(pool))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - An existing SQLite connection pool
    pub fn with_sqlite_pool(
        mut self,
        pool: sqlx::SqlitePool,
    ) -> TollgateBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        if self.audit.is_none() {
            self.audit = Some(Arc::new(crate::SqliteAuditSink::new(pool.clone())));
        }
        let repositories = Arc::new(crate::SqliteRepositoryProvider::new(pool));
        self.with_repositories(repositories)
    }
}

impl<Storage> TollgateBuilder<Storage> {
    /// Shared counter store for rate limits, lockouts and 2FA state.
    ///
    /// Default: a new [`MemoryCounterStore`]
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Destination for audit events.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Service settings.
    ///
    /// Default: [`SecurityConfig::from_env`] at build time
    pub fn with_config(mut self, config: SecurityConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl<R: RepositoryProvider> TollgateBuilder<WithStorage<R>> {
    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the Tollgate instance.
    ///
    /// # Errors
    ///
    /// - [`TollgateBuilderError::InvalidConfiguration`] if no configuration
    ///   was given and the environment does not provide one
    /// - [`TollgateBuilderError::Migration`] if migrations were requested and
    ///   failed
    pub async fn build(self) -> Result<Tollgate<R>, TollgateBuilderError> {
        let config = match self.config {
            Some(config) => config,
            None => SecurityConfig::from_env()
                .map_err(|e| TollgateBuilderError::InvalidConfiguration(e.to_string()))?,
        };
        if config.csrf.secret.is_empty() {
            return Err(TollgateBuilderError::InvalidConfiguration(
                "CSRF secret must not be empty".to_string(),
            ));
        }

        let repositories = self.storage.repositories;
        if self.apply_migrations {
            repositories
                .migrate()
                .await
                .map_err(|e| TollgateBuilderError::Migration(e.to_string()))?;
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCounterStore::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));

        tracing::debug!(
            shared_csrf_cache = config.shared_csrf_cache,
            "Tollgate built"
        );

        Ok(Tollgate::new(repositories, store, audit, config))
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::{MemoryAuditSink, RateLimitAction};

    #[tokio::test]
    async fn test_build_with_sqlite_and_migrations() {
        let tollgate = TollgateBuilder::new()
            .with_sqlite("sqlite::memory:")
            .await
            .unwrap()
            .with_config(SecurityConfig::new(b"secret".to_vec()))
            .apply_migrations(true)
            .build()
            .await
            .unwrap();

        tollgate.health_check().await.unwrap();
        assert_eq!(
            tollgate.config().login_rate_limit,
            RateLimitAction::Login.default_config()
        );
    }

    #[tokio::test]
    async fn test_empty_secret_is_rejected() {
        let result = TollgateBuilder::new()
            .with_sqlite("sqlite::memory:")
            .await
            .unwrap()
            .with_config(SecurityConfig::new(Vec::new()))
            .build()
            .await;

        assert!(matches!(
            result,
            Err(TollgateBuilderError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_explicit_audit_sink_wins_over_sqlite_default() {
        let sink = Arc::new(MemoryAuditSink::new());
        let tollgate = TollgateBuilder::new()
            .with_audit_sink(sink.clone())
            .with_sqlite("sqlite::memory:")
            .await
            .unwrap()
            .with_config(SecurityConfig::new(b"secret".to_vec()))
            .apply_migrations(true)
            .build()
            .await
            .unwrap();

        let ctx = crate::RequestContext::default();
        assert!(!tollgate.validate_csrf_token("garbage", None, &ctx).await);
        assert_eq!(sink.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_url_is_a_connection_error() {
        let result = TollgateBuilder::new()
            .with_sqlite("sqlite://missing-dir/nested/tollgate.db")
            .await;
        assert!(matches!(
            result,
            Err(TollgateBuilderError::StorageConnection(_))
        ));
    }
}
