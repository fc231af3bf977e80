use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mocksmith_proto_catalog::SyncConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub api_manager: ApiManagerConfig,
    pub http_mock_server: HttpMockServerConfig,
    pub grpc_mock_server: GrpcMockServerConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiManagerConfig {
    /// Management gRPC listener; empty disables it.
    pub grpc_address: String,
    /// Management REST gateway; empty disables it.
    pub http_address: String,
}

impl Default for ApiManagerConfig {
    fn default() -> Self {
        Self {
            grpc_address: "0.0.0.0:30000".to_string(),
            http_address: "0.0.0.0:30001".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpMockServerConfig {
    pub enable: bool,
    pub address: String,
}

impl Default for HttpMockServerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            address: "0.0.0.0:30003".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrpcMockServerConfig {
    pub enable: bool,
    pub address: String,
    pub proto_manager: ProtoManagerConfig,
}

impl Default for GrpcMockServerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            address: "0.0.0.0:30002".to_string(),
            proto_manager: ProtoManagerConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtoManagerConfig {
    pub proto_dir: PathBuf,
    pub proto_import_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<SyncConfig>,
}

impl Default for ProtoManagerConfig {
    fn default() -> Self {
        Self {
            proto_dir: PathBuf::from("./"),
            proto_import_paths: Vec::new(),
            synchronization: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    /// Key namespace in the backing store.
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: "/mocksmith/".to_string(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.api_manager.grpc_address.is_empty() && self.api_manager.http_address.is_empty() {
            bail!("apiManager grpcAddress and httpAddress cannot be empty at the same time");
        }
        if self.http_mock_server.enable && self.http_mock_server.address.is_empty() {
            bail!("the address of the http mock server is required");
        }
        if self.grpc_mock_server.enable {
            if self.grpc_mock_server.address.is_empty() {
                bail!("the address of the gRPC mock server is required");
            }
            if self.grpc_mock_server.proto_manager.proto_dir.as_os_str().is_empty() {
                bail!("protoDir is required when the gRPC mock server is enabled");
            }
        }
        Ok(())
    }
}

pub fn load(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: Config =
                serde_yaml::from_str(&content).context("failed to parse config file")?;
            info!("loaded configuration from: {}", path.display());
            config
        }
        None => {
            warn!("no config file provided, using defaults");
            Config::default()
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_expose_all_four_listeners() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api_manager.grpc_address, "0.0.0.0:30000");
        assert_eq!(config.api_manager.http_address, "0.0.0.0:30001");
        assert_eq!(config.grpc_mock_server.address, "0.0.0.0:30002");
        assert_eq!(config.http_mock_server.address, "0.0.0.0:30003");
        assert_eq!(config.storage.prefix, "/mocksmith/");
    }

    #[test]
    fn both_management_listeners_disabled_is_invalid() {
        let mut config = Config::default();
        config.api_manager.grpc_address.clear();
        config.api_manager.http_address.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_config_overrides_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
apiManager:
  grpcAddress: "127.0.0.1:40000"
httpMockServer:
  enable: false
grpcMockServer:
  protoManager:
    protoDir: ./protos
    protoImportPaths:
      - ./vendor
"#,
        )
        .unwrap();
        assert_eq!(config.api_manager.grpc_address, "127.0.0.1:40000");
        assert_eq!(config.api_manager.http_address, "0.0.0.0:30001");
        assert!(!config.http_mock_server.enable);
        assert_eq!(
            config.grpc_mock_server.proto_manager.proto_dir,
            PathBuf::from("./protos")
        );
        assert_eq!(
            config.grpc_mock_server.proto_manager.proto_import_paths,
            vec![PathBuf::from("./vendor")]
        );
    }
}
