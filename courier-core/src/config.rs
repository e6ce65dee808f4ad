//! # Pipeline Configuration
//!
//! [`PipelineConfig`] is plain data deserialized from JSON with camelCase keys:
//!
//! ```rust
//! use courier_core::config::{PipelineConfig, TransportMode};
//!
//! let config = PipelineConfig::from_json(r#"{
//!     "baseUrl": "https://pubsub.googleapis.com",
//!     "projectId": "{{projectId}}",
//!     "maxRetries": 2,
//!     "clientInfo": { "name": "pubsub", "version": "1.2.3" },
//!     "protosDir": "protos",
//!     "protoServices": {
//!         "Publisher": { "path": "google/pubsub/v1/pubsub.bin", "service": "pubsub.v1" },
//!         "Operations": "google/longrunning/operations.bin"
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(config.max_retries, 2);
//! assert_eq!(config.mode(), TransportMode::Live);
//! assert_eq!(config.channel_options().user_agent.as_deref(), Some("pubsub/1.2.3"));
//! ```
use crate::{retry, stub::ChannelOptions};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

/// Metadata key carrying the client library identification.
pub const API_CLIENT_HEADER: &str = "x-goog-api-client";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': '{source}'", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config: '{0}'")]
    Parse(#[from] serde_json::Error),
}

/// Whether calls reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Live,
    /// Every entry point short-circuits with a fixed sentinel and never touches
    /// credentials or stubs.
    Sandboxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Where a service's descriptors live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProtoServiceEntry {
    /// Descriptor file path relative to `protosDir`.
    Path(PathBuf),
    #[serde(rename_all = "camelCase")]
    Detailed {
        path: PathBuf,
        /// Dotted package of the service relative to `google`, e.g. `pubsub.v1`.
        #[serde(default)]
        service: Option<String>,
        /// Endpoint used for this service instead of the pipeline's `baseUrl`.
        #[serde(default)]
        base_url: Option<String>,
    },
}

impl ProtoServiceEntry {
    pub fn path(&self) -> &Path {
        match self {
            ProtoServiceEntry::Path(path) | ProtoServiceEntry::Detailed { path, .. } => path,
        }
    }

    pub fn package(&self) -> Option<&str> {
        match self {
            ProtoServiceEntry::Path(_) => None,
            ProtoServiceEntry::Detailed { service, .. } => service.as_deref(),
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        match self {
            ProtoServiceEntry::Path(_) => None,
            ProtoServiceEntry::Detailed { base_url, .. } => base_url.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub base_url: String,
    pub project_id: Option<String>,
    pub max_retries: u32,
    /// Local or emulator endpoint: plaintext, no auth collaborator.
    pub custom_endpoint: bool,
    /// Extra metadata sent with every call.
    pub metadata: BTreeMap<String, String>,
    pub client_info: Option<ClientInfo>,
    pub protos_dir: PathBuf,
    pub proto_services: BTreeMap<String, ProtoServiceEntry>,
    pub sandbox: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            project_id: None,
            max_retries: retry::defaults::MAX_RETRIES,
            custom_endpoint: false,
            metadata: BTreeMap::new(),
            client_info: None,
            protos_dir: PathBuf::new(),
            proto_services: BTreeMap::new(),
            sandbox: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn mode(&self) -> TransportMode {
        if self.sandbox {
            TransportMode::Sandboxed
        } else {
            TransportMode::Live
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            user_agent: self
                .client_info
                .as_ref()
                .map(|info| format!("{}/{}", info.name, info.version)),
            ..ChannelOptions::default()
        }
    }

    /// Metadata attached to every call: the client identification header first, then the
    /// configured pairs.
    pub fn request_metadata(&self) -> Vec<(String, String)> {
        let client = self.client_info.as_ref().map(|info| {
            let value = format!(
                "gl-rust gccl/{} courier/{}",
                info.version,
                env!("CARGO_PKG_VERSION")
            );
            (API_CLIENT_HEADER.to_owned(), value)
        });

        client
            .into_iter()
            .chain(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    /// Per-service base URL overrides.
    pub fn base_url_overrides(&self) -> HashMap<String, String> {
        self.proto_services
            .iter()
            .filter_map(|(name, entry)| entry.base_url().map(|url| (name.clone(), url.to_owned())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = PipelineConfig::from_json("{}").unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.mode(), TransportMode::Live);
        assert!(config.request_metadata().is_empty());
    }

    #[test]
    fn proto_service_entries_accept_both_shapes() {
        let config = PipelineConfig::from_json(
            r#"{
                "protoServices": {
                    "Operations": "google/longrunning/operations.bin",
                    "Publisher": {
                        "path": "google/pubsub/v1/pubsub.bin",
                        "service": "pubsub.v1",
                        "baseUrl": "https://eu.pubsub.example"
                    }
                }
            }"#,
        )
        .unwrap();

        let operations = &config.proto_services["Operations"];
        assert_eq!(
            operations.path(),
            Path::new("google/longrunning/operations.bin")
        );
        assert_eq!(operations.package(), None);

        let publisher = &config.proto_services["Publisher"];
        assert_eq!(publisher.package(), Some("pubsub.v1"));
        assert_eq!(
            config.base_url_overrides(),
            HashMap::from([(
                "Publisher".to_owned(),
                "https://eu.pubsub.example".to_owned()
            )])
        );
    }

    #[test]
    fn client_info_feeds_metadata_and_user_agent() {
        let config = PipelineConfig::from_json(
            r#"{
                "clientInfo": { "name": "storage", "version": "2.0.0" },
                "metadata": { "x-goog-request-params": "bucket=b" },
                "sandbox": true
            }"#,
        )
        .unwrap();

        let metadata = config.request_metadata();
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata[0].0, API_CLIENT_HEADER);
        assert!(metadata[0].1.contains("gccl/2.0.0"));
        assert_eq!(
            metadata[1],
            ("x-goog-request-params".to_owned(), "bucket=b".to_owned())
        );

        let options = config.channel_options();
        assert_eq!(options.user_agent.as_deref(), Some("storage/2.0.0"));
        assert_eq!(options.max_send_message_size, None);
        assert_eq!(config.mode(), TransportMode::Sandboxed);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            PipelineConfig::from_json("{ \"maxRetries\": \"many\" }"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            PipelineConfig::load("/nonexistent/courier.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
