use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use particle_vm::{Program, ProgramError};
use thiserror::Error;
use tracing::{debug, instrument};

/// A material owned by the resource layer. Emitters only ever hold the handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::From, derive_more::Display)]
#[display("material#{_0}")]
pub struct MaterialHandle(pub u32);

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("no particle program at `{0}`")]
    NotFound(String),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to load `{path}`: {source}")]
    Load {
        path: String,
        #[source]
        source: ProgramError,
    },
}

/// The resource layer as seen by emitters
pub trait ResourceManager: Send + Sync {
    fn load_program(&self, path: &str) -> Result<Arc<Program>, ResourceError>;
    /// [None] while the material is missing or still loading
    fn material(&self, path: &str) -> Option<MaterialHandle>;
}

/// An in-memory [ResourceManager], optionally backed by a directory of program files.
///
/// Programs are loaded once and shared by every emitter that binds them.
#[derive(Debug, Default)]
pub struct ResourceCache {
    root: Option<PathBuf>,
    programs: RwLock<HashMap<String, Arc<Program>>>,
    materials: RwLock<HashMap<String, MaterialHandle>>,
}

impl ResourceCache {
    /// Programs missing from the cache are read from files under `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    pub fn insert_program(&self, program: Program) -> Arc<Program> {
        let program = Arc::new(program);
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(program.path().to_string(), Arc::clone(&program));
        program
    }

    /// Parse a program resource and cache it under `path`
    pub fn insert_bytes(&self, path: &str, bytes: &[u8]) -> Result<Arc<Program>, ResourceError> {
        let program = Program::from_bytes(path, bytes).map_err(|source| ResourceError::Load {
            path: path.to_string(),
            source,
        })?;
        Ok(self.insert_program(program))
    }

    /// Register a material under `path`, returning its handle
    pub fn insert_material(&self, path: &str) -> MaterialHandle {
        let mut materials = self.materials.write().unwrap_or_else(PoisonError::into_inner);
        let next = MaterialHandle(materials.len() as u32);
        *materials.entry(path.to_string()).or_insert(next)
    }

    fn cached(&self, path: &str) -> Option<Arc<Program>> {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

impl ResourceManager for ResourceCache {
    #[instrument(level = "debug", skip(self))]
    fn load_program(&self, path: &str) -> Result<Arc<Program>, ResourceError> {
        if let Some(program) = self.cached(path) {
            return Ok(program);
        }
        let Some(root) = &self.root else {
            return Err(ResourceError::NotFound(path.to_string()));
        };

        let file = root.join(path);
        let bytes = fs::read(&file).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ResourceError::NotFound(path.to_string()),
            _ => ResourceError::Io {
                path: path.to_string(),
                source,
            },
        })?;
        debug!(file = %file.display(), "reading particle program");
        self.insert_bytes(path, &bytes)
    }

    fn material(&self, path: &str) -> Option<MaterialHandle> {
        self.materials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use particle_lang::prelude::*;

    use super::*;

    #[test]
    fn test_programs_are_shared() {
        let cache = ResourceCache::default();
        let bytes = ProgramBuilder::default().channel("life").to_bytes().unwrap();
        let inserted = cache.insert_bytes("fx/a.pvm", &bytes).unwrap();
        let loaded = cache.load_program("fx/a.pvm").unwrap();
        assert!(Arc::ptr_eq(&inserted, &loaded));
        assert_eq!(loaded.path(), "fx/a.pvm");
    }

    #[test]
    fn test_bad_bytes_are_a_load_error() {
        let cache = ResourceCache::default();
        let err = cache.insert_bytes("fx/bad.pvm", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ResourceError::Load { .. }));
        assert!(matches!(cache.load_program("fx/bad.pvm"), Err(ResourceError::NotFound(_))));
    }

    #[test]
    fn test_loads_from_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("fx")).unwrap();
        let bytes = ProgramBuilder::default().channel("life").to_bytes().unwrap();
        fs::write(dir.path().join("fx/a.pvm"), bytes).unwrap();

        let cache = ResourceCache::with_root(dir.path());
        let program = cache.load_program("fx/a.pvm").unwrap();
        assert_eq!(program.channels_count(), 1);
        assert!(matches!(cache.load_program("fx/none.pvm"), Err(ResourceError::NotFound(_))));
    }

    #[test]
    fn test_materials() {
        let cache = ResourceCache::default();
        assert_eq!(cache.material("m.mat"), None);
        let handle = cache.insert_material("m.mat");
        assert_eq!(cache.insert_material("m.mat"), handle);
        assert_eq!(cache.material("m.mat"), Some(handle));
    }
}
