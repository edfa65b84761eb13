//! Node configuration.
//!
//! One JSON config file describes every node in the cluster; the role a
//! given process plays is the `node_role` field, overridable through
//! `KALDB_NODE_ROLE` so one deployment artifact can serve all roles.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeRole {
    Index,
    Query,
    Cache,
    Manager,
    Recovery,
    Preprocessor,
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(role: &str) -> Result<Self> {
        match role.to_uppercase().as_str() {
            "INDEX" => Ok(NodeRole::Index),
            "QUERY" => Ok(NodeRole::Query),
            "CACHE" => Ok(NodeRole::Cache),
            "MANAGER" => Ok(NodeRole::Manager),
            "RECOVERY" => Ok(NodeRole::Recovery),
            "PREPROCESSOR" => Ok(NodeRole::Preprocessor),
            role => Err(Error::Config(format!("unknown node role: {role}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// `host:port` broker addresses.
    pub bootstrap_servers: Vec<String>,
    pub topic: String,
    pub client_group: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataStoreConfig {
    pub connect_string: String,
    /// Root path under which all entity directories live.
    pub path_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_schedule_period_mins")]
    pub schedule_period_mins: u64,
    #[serde(default = "default_snapshot_lifespan_mins")]
    pub snapshot_lifespan_mins: u64,
}

fn default_schedule_period_mins() -> u64 {
    15
}

fn default_snapshot_lifespan_mins() -> u64 {
    // Two weeks.
    60 * 24 * 14
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// How far the indexer may fall behind the partition head before a
    /// recovery task is written for the skipped range.
    #[serde(default = "default_max_offset_delay_messages")]
    pub max_offset_delay_messages: i64,
}

fn default_max_offset_delay_messages() -> i64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct KaldbConfig {
    pub node_role: NodeRole,
    /// Unique name for this node's metadata entry. Defaults to
    /// `<role>-<hostname>`.
    #[serde(default)]
    pub node_name: Option<String>,
    pub kafka: KafkaConfig,
    pub blob_store: BlobStoreConfig,
    pub metadata_store: MetadataStoreConfig,
    #[serde(default = "default_manager_config")]
    pub manager: ManagerConfig,
    #[serde(default = "default_indexer_config")]
    pub indexer: IndexerConfig,
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
}

fn default_manager_config() -> ManagerConfig {
    ManagerConfig {
        schedule_period_mins: default_schedule_period_mins(),
        snapshot_lifespan_mins: default_snapshot_lifespan_mins(),
    }
}

fn default_indexer_config() -> IndexerConfig {
    IndexerConfig {
        max_offset_delay_messages: default_max_offset_delay_messages(),
    }
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        port: default_server_port(),
        log_level: default_log_level(),
    }
}

impl KaldbConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading {}: {err}", path.display())))?;
        let mut config: KaldbConfig = serde_json::from_str(&raw)
            .map_err(|err| Error::Config(format!("parsing {}: {err}", path.display())))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(role) = env::var("KALDB_NODE_ROLE") {
            self.node_role = role.parse()?;
        }
        if let Ok(port) = env::var("KALDB_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("KALDB_PORT not a port: {port}")))?;
        }
        if let Ok(level) = env::var("KALDB_LOG_LEVEL") {
            self.server.log_level = level;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(Error::Config("no Kafka bootstrap servers".to_string()));
        }
        if self.blob_store.bucket.is_empty() {
            return Err(Error::Config("blob store bucket is empty".to_string()));
        }
        if self.metadata_store.path_prefix.is_empty() {
            return Err(Error::Config("metadata path prefix is empty".to_string()));
        }
        Ok(())
    }

    pub fn node_name(&self) -> String {
        match &self.node_name {
            Some(name) => name.clone(),
            None => {
                let host = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
                format!("{:?}-{host}", self.node_role).to_lowercase()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_config_json() -> &'static str {
        r#"{
            "node_role": "RECOVERY",
            "kafka": {
                "bootstrap_servers": ["localhost:9092"],
                "topic": "test-topic-1",
                "client_group": "kaldb-test-client1"
            },
            "blob_store": { "bucket": "test-s3-bucket" },
            "metadata_store": {
                "connect_string": "localhost:2181",
                "path_prefix": "/kaldb"
            }
        }"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_config_json().as_bytes()).unwrap();

        let config = KaldbConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_role, NodeRole::Recovery);
        assert_eq!(config.kafka.topic, "test-topic-1");
        assert_eq!(config.manager.schedule_period_mins, 15);
        assert_eq!(config.indexer.max_offset_delay_messages, 10_000);
        assert_eq!(config.server.port, 8080);
        assert!(config.node_name().starts_with("recovery-"));
    }

    #[test]
    fn rejects_unknown_role() {
        assert!("COORDINATOR".parse::<NodeRole>().is_err());
        assert_eq!("manager".parse::<NodeRole>().unwrap(), NodeRole::Manager);
    }

    #[test]
    fn rejects_empty_bootstrap_servers() {
        let raw = minimal_config_json().replace("[\"localhost:9092\"]", "[]");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();
        assert!(KaldbConfig::from_file(file.path()).is_err());
    }
}
