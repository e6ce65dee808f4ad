//! # Proto Descriptors
//!
//! Services are described by protobuf descriptors loaded at runtime. A [`ProtoLoader`]
//! turns a `(root, file)` pair into a [`DescriptorPool`]; the [`ProtoCache`] makes sure each
//! `(root, file, package)` combination is loaded at most once per process, however many
//! pipelines share it.
//!
//! Service lookup mirrors the Google API layout: a service registered as `Publisher` with
//! package `pubsub.v1` resolves to `google.pubsub.v1.Publisher`, falling back to
//! `pubsub.v1.Publisher` for non-Google packages.
use parking_lot::Mutex;
use prost_reflect::{DescriptorError, DescriptorPool, ServiceDescriptor};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtoLoadError {
    #[error("Failed to read descriptor set '{}': '{source}'", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decode descriptor set: '{0}'")]
    Descriptor(#[from] DescriptorError),
    #[error("Service '{service}' not found in '{}'", path.display())]
    ServiceNotFound { service: String, path: PathBuf },
}

/// Loads the descriptors of one proto file.
pub trait ProtoLoader: Send + Sync {
    fn load(&self, root: &Path, file: &Path) -> Result<DescriptorPool, ProtoLoadError>;
}

/// Reads an encoded `FileDescriptorSet` (as produced by `protoc --descriptor_set_out`) from
/// `root/file`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorSetLoader;

impl ProtoLoader for DescriptorSetLoader {
    fn load(&self, root: &Path, file: &Path) -> Result<DescriptorPool, ProtoLoadError> {
        let path = root.join(file);
        let bytes = std::fs::read(&path).map_err(|source| ProtoLoadError::Io { path, source })?;
        Ok(DescriptorPool::decode(bytes.as_slice())?)
    }
}

/// Serves a descriptor set compiled into the binary, whatever file is asked for.
#[derive(Debug, Clone)]
pub struct EmbeddedDescriptorLoader {
    pool: DescriptorPool,
}

impl EmbeddedDescriptorLoader {
    pub fn new(file_descriptor_set: &[u8]) -> Result<Self, ProtoLoadError> {
        Ok(Self {
            pool: DescriptorPool::decode(file_descriptor_set)?,
        })
    }
}

impl ProtoLoader for EmbeddedDescriptorLoader {
    fn load(&self, _root: &Path, _file: &Path) -> Result<DescriptorPool, ProtoLoadError> {
        Ok(self.pool.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProtoKey {
    root: PathBuf,
    file: PathBuf,
    package: Option<String>,
}

/// Process-wide memo of loaded proto files.
pub struct ProtoCache {
    loader: Arc<dyn ProtoLoader>,
    loaded: Mutex<HashMap<ProtoKey, DescriptorPool>>,
}

impl Default for ProtoCache {
    fn default() -> Self {
        Self::new(Arc::new(DescriptorSetLoader))
    }
}

impl ProtoCache {
    pub fn new(loader: Arc<dyn ProtoLoader>) -> Self {
        Self {
            loader,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves service `name` from `root/file`, loading the file on first use.
    pub fn service(
        &self,
        root: &Path,
        file: &Path,
        package: Option<&str>,
        name: &str,
    ) -> Result<ServiceDescriptor, ProtoLoadError> {
        let key = ProtoKey {
            root: root.to_path_buf(),
            file: file.to_path_buf(),
            package: package.map(str::to_owned),
        };

        let pool = {
            let mut loaded = self.loaded.lock();
            match loaded.get(&key) {
                Some(pool) => pool.clone(),
                None => {
                    tracing::debug!(file = %file.display(), "loading proto descriptors");
                    let pool = self.loader.load(root, file)?;
                    loaded.insert(key, pool.clone());
                    pool
                }
            }
        };

        candidates(package, name)
            .iter()
            .find_map(|full_name| pool.get_service_by_name(full_name))
            .ok_or_else(|| ProtoLoadError::ServiceNotFound {
                service: name.to_owned(),
                path: root.join(file),
            })
    }

    /// Number of distinct proto files loaded so far.
    pub fn len(&self) -> usize {
        self.loaded.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn candidates(package: Option<&str>, name: &str) -> Vec<String> {
    match package {
        Some(package) => vec![
            format!("google.{package}.{name}"),
            format!("{package}.{name}"),
        ],
        None => vec![format!("google.{name}"), name.to_owned()],
    }
}
