//! Schema bootstrap SQL.

use std::borrow::Cow;
use std::path::Path;

use log::info;

use crate::error_handling::DatabaseError;

/// The schema shipped with the binary.
pub const BUNDLED_SCHEMA: &str = include_str!("../../sql/db_schema.sql");

/// Returns the schema to run at bootstrap.
///
/// Uses the file at `path` when one is configured, the bundled schema
/// otherwise.
///
/// # Errors
///
/// Returns `DatabaseError::SchemaFileError` if a configured file can't be
/// read. A missing schema file is fatal; there is no fallback.
pub fn load_schema(path: Option<&Path>) -> Result<Cow<'static, str>, DatabaseError> {
    match path {
        None => Ok(Cow::Borrowed(BUNDLED_SCHEMA)),
        Some(path) => {
            let sql = std::fs::read_to_string(path).map_err(|source| {
                DatabaseError::SchemaFileError {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            info!("Loaded schema from {}", path.display());
            Ok(Cow::Owned(sql))
        }
    }
}
