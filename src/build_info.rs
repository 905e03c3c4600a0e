//! Build identity
//!
//! The collector protocol is versioned by `json_version`, and events are
//! attributed to a collector build. Both come from `build-info.toml`, which
//! is embedded at compile time. Failing to read it is fatal for agent
//! initialisation: nothing downstream can be framed without it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Build metadata embedded in the binary
pub const EMBEDDED_BUILD_INFO: &str = include_str!("../build-info.toml");

#[derive(Error, Debug)]
pub enum BuildInfoError {
    #[error("unable to parse build info: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("build info field `{0}` is blank")]
    Blank(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub collector_version: String,
    pub json_version: String,
    #[serde(default)]
    pub build_time: String,
    #[serde(default)]
    pub commit: String,
}

impl BuildInfo {
    /// Parse build metadata from TOML text
    pub fn parse(text: &str) -> Result<Self, BuildInfoError> {
        let info: BuildInfo = toml::from_str(text)?;
        if info.collector_version.trim().is_empty() {
            return Err(BuildInfoError::Blank("collector_version"));
        }
        if info.json_version.trim().is_empty() {
            return Err(BuildInfoError::Blank("json_version"));
        }
        Ok(info)
    }

    /// Build metadata compiled into this binary
    pub fn embedded() -> Result<Self, BuildInfoError> {
        Self::parse(EMBEDDED_BUILD_INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_build_info_is_valid() {
        let info = BuildInfo::embedded().unwrap();
        assert_eq!(info.collector_version, env!("CARGO_PKG_VERSION"));
        assert!(!info.json_version.is_empty());
    }

    #[test]
    fn test_missing_field_is_error() {
        assert!(matches!(
            BuildInfo::parse("collector_version = \"1.0\""),
            Err(BuildInfoError::Parse(_))
        ));
    }

    #[test]
    fn test_blank_version_is_error() {
        let err = BuildInfo::parse("collector_version = \" \"\njson_version = \"1\"").unwrap_err();
        assert!(matches!(err, BuildInfoError::Blank("collector_version")));
    }

    #[test]
    fn test_optional_fields_default() {
        let info = BuildInfo::parse("collector_version = \"1\"\njson_version = \"2\"").unwrap();
        assert!(info.commit.is_empty());
    }
}
