use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::sync::{SyncConfig, Synchronizer};

const SYNC_PERIOD: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    /// Directory walked for `.proto` files.
    pub proto_dir: PathBuf,
    /// Extra import paths handed to the parser; the proto dir itself is
    /// always the first import path.
    pub proto_import_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<SyncConfig>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("proto dir is required")]
    MissingProtoDir,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("git {command} failed: {detail}")]
    Git { command: String, detail: String },
}

/// Read-mostly index of gRPC method descriptors keyed by the fully
/// qualified path `/{package.Service}/{Method}`.
///
/// Loading is best-effort per file: a malformed `.proto` is logged and
/// skipped so a single bad file cannot disable the catalog. The index is
/// rebuilt wholesale and swapped atomically on reload.
#[derive(Debug)]
pub struct ProtoCatalog {
    cfg: CatalogConfig,
    methods: RwLock<Arc<HashMap<String, MethodDescriptor>>>,
    synchronizer: Option<Synchronizer>,
}

impl ProtoCatalog {
    pub async fn new(cfg: CatalogConfig) -> Result<Arc<Self>, CatalogError> {
        if cfg.proto_dir.as_os_str().is_empty() {
            return Err(CatalogError::MissingProtoDir);
        }
        let synchronizer = cfg.synchronization.clone().map(Synchronizer::new);
        let catalog = Arc::new(Self {
            cfg,
            methods: RwLock::new(Arc::new(HashMap::new())),
            synchronizer,
        });
        if let Some(synchronizer) = &catalog.synchronizer {
            synchronizer.synchronize().await;
        }
        catalog.load_protos();
        Ok(catalog)
    }

    /// Returns the descriptor registered for the given gRPC path.
    pub fn get_method(&self, path: &str) -> Option<MethodDescriptor> {
        self.methods.read().get(path).cloned()
    }

    /// Launches the periodic repository synchronization loop, when
    /// configured. Descriptors are reloaded only after a repository
    /// actually changed.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.synchronizer.is_none() {
            return;
        }
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SYNC_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        info!("start to synchronize proto repositories");
                        if let Some(synchronizer) = catalog.synchronizer.as_ref() {
                            if synchronizer.synchronize().await {
                                catalog.load_protos();
                            }
                        }
                        info!("proto synchronization finished");
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn load_protos(&self) {
        let proto_dir = &self.cfg.proto_dir;
        let mut import_paths = vec![proto_dir.clone()];
        import_paths.extend(self.cfg.proto_import_paths.iter().cloned());
        info!(dir = %proto_dir.display(), "starting to load protos");

        let mut files = Vec::new();
        collect_proto_files(proto_dir, proto_dir, &mut files);

        let mut methods: HashMap<String, MethodDescriptor> = HashMap::new();
        let mut count = 0usize;
        for relative in files {
            let name = relative.to_string_lossy().replace('\\', "/");
            let descriptors = match protox::compile([&name], &import_paths) {
                Ok(descriptors) => descriptors,
                Err(err) => {
                    error!(file = %name, %err, "failed to parse proto file");
                    continue;
                }
            };
            let pool = match DescriptorPool::from_file_descriptor_set(descriptors) {
                Ok(pool) => pool,
                Err(err) => {
                    error!(file = %name, %err, "failed to index proto file");
                    continue;
                }
            };
            let Some(file) = pool.get_file_by_name(&name) else {
                continue;
            };
            for service in file.services() {
                for method in service.methods() {
                    let path = grpc_path(service.full_name(), method.name());
                    if methods.contains_key(&path) {
                        warn!(name = %path, "method already exists, keeping first");
                        continue;
                    }
                    debug!(name = %path, "method indexed");
                    methods.insert(path, method);
                    count += 1;
                }
            }
        }

        info!(total = count, dir = %proto_dir.display(), "proto methods loaded");
        *self.methods.write() = Arc::new(methods);
    }
}

/// `/{package.Service}/{Method}` — the path form gRPC puts on the wire.
pub fn grpc_path(service_full_name: &str, method_name: &str) -> String {
    format!("/{service_full_name}/{method_name}")
}

fn collect_proto_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "failed to read proto dir");
            return;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.is_dir() {
            collect_proto_files(root, &path, out);
        } else if path.extension().is_some_and(|ext| ext == "proto") {
            match path.strip_prefix(root) {
                Ok(relative) => out.push(relative.to_path_buf()),
                Err(_) => warn!(file = %path.display(), "proto file outside root, skipped"),
            }
        }
    }
}
