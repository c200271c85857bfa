/*!
The `_versions` row: a single `(schema_version, parser_version)` pair the
store uses to gate startup against an out-of-date build or an un-migrated
store.
*/

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::migration::MIGRATIONS;

/// This build's parser version. Compared against the store's recorded
/// version using semver-style `(major, minor)` rules.
pub const PARSER_VERSION: &str = "1.4.0";

/// The schema version this build expects, derived once from the length of
/// the migration registry and never mutated afterwards.
pub static SCHEMA_VERSION: Lazy<u32> = Lazy::new(|| MIGRATIONS.len() as u32);

/// `(schema_version, parser_version)`, as persisted in `_versions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    /// The number of migrations that have been applied.
    pub schema_version: u32,
    /// The parser version active when the store was last migrated.
    pub parser_version: String,
}

impl Versions {
    /// The versions row matching this build, as it would be written by a
    /// fresh `migrate()`.
    pub fn current() -> Self {
        Versions {
            schema_version: *SCHEMA_VERSION,
            parser_version: PARSER_VERSION.to_string(),
        }
    }

    fn minor(version: &str) -> (u32, u32) {
        let mut parts = version.split('.').filter_map(|p| p.parse::<u32>().ok());
        (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
    }

    /// Gate startup: fail if the stored schema version requires migration in
    /// either direction, or if the stored parser is ahead of this build on
    /// either the major or minor component (an upgrade is required).
    pub fn validate(&self) -> Result<()> {
        let local = *SCHEMA_VERSION;
        if local < self.schema_version {
            return Err(CoreError::state(format!(
                "local schema version {local} is behind stored version {}; upgrade this build",
                self.schema_version
            )));
        }
        if local > self.schema_version {
            return Err(CoreError::state(format!(
                "local schema version {local} is ahead of stored version {}; run migrations",
                self.schema_version
            )));
        }
        let local = Self::minor(PARSER_VERSION);
        let stored = Self::minor(&self.parser_version);
        if local < stored {
            return Err(CoreError::state(format!(
                "local parser {PARSER_VERSION} is older than stored parser {}; upgrade required",
                self.parser_version
            )));
        }
        Ok(())
    }
}
