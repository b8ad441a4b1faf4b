//! `schema_version` tolerance rules: readers accept any record
//! whose major version matches a build's supported set and ignore unknown
//! minor-version fields (handled by `serde`'s `#[serde(default)]` on new
//! fields); an unknown major version is rejected.

use crate::error::{CoreError, Result};

/// Schema version emitted by this build for every persisted record type.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0";

/// Major versions this build can read.
const SUPPORTED_MAJORS: &[&str] = &["1"];

/// Parse and validate a `schema_version` string of the form `MAJOR.MINOR`.
pub fn check_schema_version(version: &str) -> Result<()> {
    let major = version
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::MalformedSchemaVersion(version.to_string()))?;

    if SUPPORTED_MAJORS.contains(&major) {
        Ok(())
    } else {
        Err(CoreError::UnsupportedSchemaVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_current_version() {
        assert!(check_schema_version(CURRENT_SCHEMA_VERSION).is_ok());
    }

    #[test]
    fn accepts_unknown_minor() {
        assert!(check_schema_version("1.99").is_ok());
    }

    #[test]
    fn rejects_unknown_major() {
        assert!(check_schema_version("2.0").is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert!(check_schema_version("").is_err());
    }
}
