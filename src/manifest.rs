//! Provenance attached to every JSON result bundle.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config;

pub const SCHEMA_VERSION: &str = "1.0.0";
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub schema_version: String,
    pub tool_version: String,
    pub study: String,
    pub study_version: String,
    pub timestamp_utc: String,
    pub platform: String,
    pub config_hash: String,
    pub config_snapshot: config::Root,
}

/// SHA-256 of the raw config text, hex encoded.
pub fn config_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Manifest {
    pub fn new(cfg: &config::Root, cfg_text: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            tool_version: TOOL_VERSION.to_string(),
            study: cfg.study.name.clone(),
            study_version: cfg.study.version.clone(),
            timestamp_utc: timestamp(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            config_hash: config_digest(cfg_text),
            config_snapshot: cfg.clone(),
        }
    }
}

/// A stage report wrapped with its manifest.
#[derive(Debug, Serialize)]
pub struct Bundle<'a, T: Serialize> {
    pub manifest: Manifest,
    pub stage: &'static str,
    pub report: &'a T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            config_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(config_digest("a = 1"), config_digest("a = 2"));
    }

    #[test]
    fn test_manifest_fields() {
        let cfg = config::sample(Path::new("/tmp/x"));
        let m = Manifest::new(&cfg, "text");
        assert_eq!(m.study, "indentation");
        assert_eq!(m.config_hash.len(), 64);
        assert!(m.timestamp_utc.ends_with('Z'));

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["config_snapshot"]["study"]["name"], "indentation");
    }
}
