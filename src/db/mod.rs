//! Site database access.
//!
//! The pipeline only touches the site database through `SiteDatabase`, so
//! discovery and dump tests can run against a stub.

pub mod dump;

use crate::error::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use std::path::Path;

pub use dump::DumpOptions;

#[async_trait]
pub trait SiteDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// Character set configured for the site, when known.
    fn charset(&self) -> Option<&str>;

    async fn table_names(&self) -> Result<Vec<String>>;

    async fn view_names(&self) -> Result<Vec<String>>;

    /// Whether the connected user holds every named privilege.
    async fn has_privileges(&self, privileges: &[&str]) -> Result<bool>;

    /// Stream a logical dump (schema + data) to `path`.
    async fn dump_to(&self, path: &Path, options: &DumpOptions) -> Result<()>;
}

pub struct MySqlSiteDatabase {
    pool: MySqlPool,
    name: String,
    charset: Option<String>,
}

impl MySqlSiteDatabase {
    pub async fn connect(url: &str, name: &str, charset: Option<String>) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await?;
        Ok(Self {
            pool,
            name: name.to_string(),
            charset,
        })
    }
}

#[async_trait]
impl SiteDatabase for MySqlSiteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
            .collect()
    }

    async fn view_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SHOW FULL TABLES WHERE Table_type = 'VIEW'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Into::into))
            .collect()
    }

    async fn has_privileges(&self, privileges: &[&str]) -> Result<bool> {
        let rows = sqlx::query("SHOW GRANTS FOR CURRENT_USER()")
            .fetch_all(&self.pool)
            .await?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in &rows {
            grants.push(row.try_get::<String, _>(0)?.to_uppercase());
        }

        Ok(privileges.iter().all(|privilege| {
            let needle = privilege.to_uppercase();
            grants
                .iter()
                .any(|g| g.contains("ALL PRIVILEGES") || g.contains(&needle))
        }))
    }

    async fn dump_to(&self, path: &Path, options: &DumpOptions) -> Result<()> {
        dump::dump(&self.pool, path, options).await
    }
}
