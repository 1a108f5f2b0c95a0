//! Optional TOML defaults for the CLI. Flags given on the command line win.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub encode: EncodeSection,
    pub log: LogSection,
}

/// `[encode]` section.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeSection {
    pub chunk_size: Option<usize>,
    /// `"self"`, `"whole-image"` or a 32 hex digit digest.
    pub anchor: Option<String>,
    /// `"all"` or `"skip-anchor"`.
    pub digest_list: Option<String>,
    pub img_type: Option<String>,
    pub ota_version: Option<u32>,
}

/// `[log]` section.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub level: Option<String>,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p).with_context(|| format!("read config {}", p.display()))?;
                Self::from_toml(&content).with_context(|| format!("parse config {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        assert_eq!(CliConfig::from_toml("").unwrap(), CliConfig::default());
    }

    #[test]
    fn parses_sections() {
        let cfg = CliConfig::from_toml(
            r#"
            [encode]
            chunk_size = 4096
            anchor = "whole-image"
            digest_list = "skip-anchor"
            ota_version = 3

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.encode.chunk_size, Some(4096));
        assert_eq!(cfg.encode.anchor.as_deref(), Some("whole-image"));
        assert_eq!(cfg.encode.digest_list.as_deref(), Some("skip-anchor"));
        assert_eq!(cfg.encode.img_type, None);
        assert_eq!(cfg.encode.ota_version, Some(3));
        assert_eq!(cfg.log.level.as_deref(), Some("debug"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(CliConfig::from_toml("[encode]\nchunk = 1\n").is_err());
    }
}
