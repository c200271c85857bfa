/*!
The migration runner: an ordered, append-only registry of schema upgrades
applied to a [StateStore](crate::state_store::StateStore).

Migrations are NOT transactional across the whole sequence — each one must
be individually idempotent so a crash mid-run can simply resume from
`get_versions`.
*/

use once_cell::sync::Lazy;
use tracing::info;

use crate::error::Result;
use crate::versions::Versions;

/// A single named schema upgrade. The registry only records identity here;
/// the mutation itself is applied by a store-specific [Migrator]
/// implementation, since "mutate the store's schema" means something
/// different for every concrete backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Position in the registry; also this migration's resulting `schema_version`.
    pub id: u32,
    /// A short, stable name for logging and idempotency bookkeeping.
    pub name: &'static str,
}

/// The process-wide, immutable migration registry. `schema_version` is
/// defined as `MIGRATIONS.len()`.
pub static MIGRATIONS: Lazy<Vec<Migration>> = Lazy::new(|| {
    vec![
        Migration {
            id: 0,
            name: "initial_snapshots_and_environments",
        },
        Migration {
            id: 1,
            name: "add_dev_intervals_column",
        },
        Migration {
            id: 2,
            name: "add_environment_expiration_ts",
        },
    ]
});

/// The minimal surface a [StateStore](crate::state_store::StateStore)
/// implementation exposes so the generic runner in [migrate] can drive it.
#[async_trait::async_trait]
pub trait Migrator: Send + Sync {
    /// Read the currently recorded versions row, if any.
    async fn read_versions(&self) -> Result<Option<Versions>>;
    /// Apply a single migration's schema mutation. Must be idempotent.
    async fn apply_migration(&self, migration: &Migration) -> Result<()>;
    /// Re-serialize persisted snapshots/environments under the new schema.
    async fn migrate_rows(&self) -> Result<()>;
    /// Persist the post-migration versions row.
    async fn write_versions(&self, versions: Versions) -> Result<()>;
}

/// Drive `store` through every pending migration in order, then rewrite
/// rows and update the versions record. Returns immediately if the store is
/// already at the current schema and parser minor version.
pub async fn migrate(store: &dyn Migrator) -> Result<()> {
    let current = Versions::current();
    let stored = store.read_versions().await?;

    if let Some(stored) = &stored {
        if stored.schema_version >= current.schema_version
            && stored.parser_version == current.parser_version
        {
            return Ok(());
        }
    }

    let applied_so_far = stored.as_ref().map(|v| v.schema_version).unwrap_or(0);
    for migration in MIGRATIONS.iter().filter(|m| m.id >= applied_so_far) {
        info!(migration = migration.name, "applying migration");
        store.apply_migration(migration).await?;
    }

    store.migrate_rows().await?;
    store.write_versions(current).await?;
    Ok(())
}
