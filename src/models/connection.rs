//! Connection profiles: named S3-compatible endpoints with their credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A stored connection profile as exposed to the UI.
///
/// Secrets are never part of this view; `has_credentials` only tells the UI
/// whether a key pair is on file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub id: Uuid,

    /// Human label, unique across profiles.
    pub name: String,

    /// Endpoint URI, e.g. `http://localhost:9000`.
    pub endpoint: String,

    pub region: String,

    /// Use `endpoint/bucket/key` addressing instead of virtual-hosted buckets.
    pub force_path_style: bool,

    /// At most one profile is active at any time.
    pub is_active: bool,

    pub has_credentials: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload for a connection profile.
#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInput {
    pub name: String,
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Left blank on update to keep the stored key.
    #[serde(default)]
    pub access_key: String,

    /// Left blank on update to keep the stored secret.
    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,
}

impl fmt::Debug for ConnectionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInput")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

/// Fully resolved, decrypted settings used to build one backend client.
///
/// This is a point-in-time snapshot: it is taken once per gateway call and
/// never shared as mutable state.
#[derive(Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub endpoint: String,

    #[serde(default = "default_region")]
    pub region: String,

    pub access_key: String,
    pub secret_key: String,

    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_secret() {
        let cfg = ConnectionConfig {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            access_key: "minioadmin".into(),
            secret_key: "super-secret".into(),
            force_path_style: true,
        };
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn input_defaults_region_and_path_style() {
        let input: ConnectionInput =
            serde_json::from_str(r#"{"name":"local","endpoint":"http://localhost:9000"}"#)
                .unwrap();
        assert_eq!(input.region, "us-east-1");
        assert!(input.force_path_style);
        assert!(input.access_key.is_empty());
    }
}
