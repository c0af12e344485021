//! Pooled connections and transaction-scoped tenant context.

use crate::error::classify;
use brainstore_types::config::StoreConfig;
use brainstore_types::error::{require_tenant, StoreError, StoreResult};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sets both RLS settings for the current transaction only (`is_local = true`).
const SET_TENANT_CONTEXT_SQL: &str = "SELECT set_config('app.current_tenant', $1, true), \
     set_config('app.current_user', $2, true)";

/// Shared handle to the connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    config: Arc<StoreConfig>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle or in use.
    pub size: u32,
    pub idle: usize,
    pub max_size: u32,
}

impl Database {
    /// Validate the config, open the pool and establish the minimum connections.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let pool = pool_options(&config)
            .connect(&config.database_url)
            .await
            .map_err(classify)?;
        info!(
            schema = %config.schema,
            min = config.pool_min_size,
            max = config.pool_max_size,
            "Database pool opened"
        );
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Validate the config and build a pool that connects on first use.
    pub fn connect_lazy(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let pool = pool_options(&config)
            .connect_lazy(&config.database_url)
            .map_err(|e| StoreError::Config(format!("invalid database_url: {e}")))?;
        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_size: self.config.pool_max_size,
        }
    }

    /// Open a transaction carrying the tenant (and optional user) RLS context.
    ///
    /// Fails with a validation error, before touching the pool, when
    /// `tenant_id` is empty. `"*"` requests cross-tenant admin visibility from
    /// the RLS policies. If the context cannot be set the transaction is still
    /// returned; every query filters on `tenant_id` explicitly.
    pub async fn tenant_connection(
        &self,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> StoreResult<TenantConnection> {
        require_tenant(tenant_id)?;
        let mut tx = self.pool.begin().await.map_err(classify)?;
        apply_tenant_context(&mut tx, tenant_id, user_id).await;
        Ok(TenantConnection {
            tx,
            tenant_id: tenant_id.to_string(),
            user_id: user_id.map(str::to_string),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn pool_options(config: &StoreConfig) -> PgPoolOptions {
    let search_path = format!("SET search_path TO {}, public", config.schema);
    PgPoolOptions::new()
        .min_connections(config.pool_min_size)
        .max_connections(config.pool_max_size)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .after_connect(move |conn, _meta| {
            let sql = search_path.clone();
            Box::pin(async move {
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&sql)).await?;
                Ok(())
            })
        })
}

/// Set the RLS settings inside a savepoint so a failure leaves the outer
/// transaction usable.
async fn apply_tenant_context(conn: &mut PgConnection, tenant_id: &str, user_id: Option<&str>) {
    let mut savepoint = match Connection::begin(conn).await {
        Ok(sp) => sp,
        Err(e) => {
            warn!(tenant_id, error = %e, "Could not open savepoint for RLS context");
            return;
        }
    };

    let result = sqlx::query(SET_TENANT_CONTEXT_SQL)
        .bind(tenant_id)
        .bind(user_id.unwrap_or(""))
        .execute(&mut *savepoint)
        .await;

    match result {
        Ok(_) => {
            if let Err(e) = savepoint.commit().await {
                warn!(tenant_id, error = %e, "Failed to release RLS savepoint");
            } else {
                debug!(tenant_id, user_id, "RLS tenant context set");
            }
        }
        Err(e) => {
            warn!(
                tenant_id,
                error = %e,
                "Failed to set RLS tenant context; application-level tenant filtering still active"
            );
            if let Err(e) = savepoint.rollback().await {
                warn!(tenant_id, error = %e, "Failed to roll back RLS savepoint");
            }
        }
    }
}

/// A pooled connection inside an open transaction, scoped to one tenant.
///
/// Dropping it without [`commit`](Self::commit) rolls the transaction back.
pub struct TenantConnection {
    tx: Transaction<'static, Postgres>,
    tenant_id: String,
    user_id: Option<String>,
}

impl TenantConnection {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// The underlying connection, for issuing queries.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(classify)
    }

    pub async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await.map_err(classify)
    }
}
