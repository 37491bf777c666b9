//! Capsule configuration records.
//!
//! A capsule is a network-reachable service hosting one role of an agent,
//! optionally backed by a hosted inference API. The registry that stores
//! these records lives behind [`crate::registry::CapsuleRegistry`]; this
//! module only defines the record shape the engine consumes and produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a battle a capsule plays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Attack,
    Defense,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Attack => write!(f, "attack"),
            Role::Defense => write!(f, "defense"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "attack" => Ok(Role::Attack),
            "defense" => Ok(Role::Defense),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One versioned capsule configuration.
///
/// Records are immutable once created: mutation always produces a new
/// record with a bumped version and a `mutant` tag, preserving the
/// original as lineage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapsuleRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub role: Role,

    /// Container image used when the capsule is spawned locally.
    pub image: String,
    pub entrypoint: Option<String>,

    /// Environment injected into spawned instances.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Tunables (sampling temperature and friends) the evolution engine
    /// mutates.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub tags: Vec<String>,
    pub enabled: bool,
    pub owner: Option<String>,
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CapsuleRecord {
    /// Create a new enabled capsule record with a fresh id.
    pub fn new(name: impl Into<String>, role: Role, image: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            version: "v1".to_string(),
            role,
            image: image.into(),
            entrypoint: None,
            env: BTreeMap::new(),
            config: serde_json::Map::new(),
            tags: Vec::new(),
            enabled: true,
            owner: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Service endpoint resolution used when pairing from the registry.
    ///
    /// Priority: `config.service_url`, then `env.SERVICE_URL`, then the
    /// conventional `http://{name}:9000`.
    pub fn service_endpoint(&self) -> String {
        if let Some(url) = self.config.get("service_url").and_then(|v| v.as_str()) {
            return url.to_string();
        }
        if let Some(url) = self.env.get("SERVICE_URL") {
            return url.clone();
        }
        format!("http://{}:9000", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!("attack".parse::<Role>().unwrap(), Role::Attack);
        assert_eq!(Role::Defense.to_string(), "defense");
        assert!("judge".parse::<Role>().is_err());
    }

    #[test]
    fn test_service_endpoint_priority() {
        let mut capsule = CapsuleRecord::new("guard", Role::Defense, "img:latest");
        assert_eq!(capsule.service_endpoint(), "http://guard:9000");

        capsule
            .env
            .insert("SERVICE_URL".into(), "http://env-host:9100".into());
        assert_eq!(capsule.service_endpoint(), "http://env-host:9100");

        capsule.config.insert(
            "service_url".into(),
            serde_json::Value::String("http://cfg-host:9200".into()),
        );
        assert_eq!(capsule.service_endpoint(), "http://cfg-host:9200");
    }
}
