//! Module loader for the DOM engine.
//!
//! The engine is a single ES module entry file; it may import siblings from
//! its own directory and nothing else. Remote, `data:`, `blob:`, `node:` and
//! `npm:` specifiers are rejected, as is anything that is not `.js`/`.mjs`.

use crate::error::BridgeError;
use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

/// Confines module resolution to the directory holding the engine entry.
pub struct EngineLoader {
    allowed_dir: PathBuf,
    entry: ModuleSpecifier,
}

impl EngineLoader {
    /// Create a loader for the engine entry module at `engine_path`.
    ///
    /// Fails if the path does not exist, is not a `.js`/`.mjs` file, or
    /// cannot be canonicalized.
    pub fn new(engine_path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let engine_path = engine_path.as_ref();
        let invalid = |reason: String| BridgeError::EnginePath {
            path: engine_path.to_path_buf(),
            reason,
        };

        let canonical = engine_path
            .canonicalize()
            .map_err(|e| invalid(e.to_string()))?;

        if !canonical.is_file() {
            return Err(invalid("not a file".into()));
        }

        if !Self::is_extension_allowed(&canonical) {
            return Err(invalid("only .js and .mjs files can be loaded".into()));
        }

        let allowed_dir = canonical
            .parent()
            .ok_or_else(|| invalid("engine has no parent directory".into()))?
            .to_path_buf();

        let entry = ModuleSpecifier::from_file_path(&canonical)
            .map_err(|_| invalid("cannot be expressed as a file URL".into()))?;

        Ok(Self { allowed_dir, entry })
    }

    /// `file://` specifier of the engine entry module.
    pub fn entry(&self) -> &ModuleSpecifier {
        &self.entry
    }

    /// Check if a path is within the engine directory.
    /// Uses canonicalization to resolve symlinks and prevent traversal.
    fn is_path_allowed(&self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => canonical.starts_with(&self.allowed_dir),
            Err(_) => false,
        }
    }

    fn is_extension_allowed(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs")
        )
    }
}

const FORBIDDEN_SCHEMES: &[&str] = &["http://", "https://", "data:", "blob:", "node:", "npm:"];

impl EngineLoader {
    /// Turn an import specifier into a URL without checking where it points.
    fn locate(&self, specifier: &str, referrer: &str) -> Result<ModuleSpecifier, Error> {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let base = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("DOM engine import from bad referrer '{referrer}': {e}"))?;
            return base
                .join(specifier)
                .map_err(|e| anyhow!("DOM engine import '{specifier}' cannot be resolved: {e}"));
        }
        if specifier.starts_with("file://") {
            return ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("DOM engine import '{specifier}' is not a valid URL: {e}"));
        }
        // Bare names are files at the engine directory root, which is where
        // bundlers put shared chunks.
        let path = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            self.allowed_dir.join(specifier)
        };
        ModuleSpecifier::from_file_path(&path)
            .map_err(|_| anyhow!("DOM engine import '{specifier}' is not a valid path"))
    }

    /// The on-disk path of `specifier`, if the engine may load it.
    fn engine_file(&self, specifier: &ModuleSpecifier) -> Result<PathBuf, Error> {
        let path = specifier
            .to_file_path()
            .map_err(|_| anyhow!("DOM engine modules must be file:// URLs, got: {specifier}"))?;

        if !self.is_path_allowed(&path) {
            return Err(anyhow!(
                "Access denied: '{}' is outside the DOM engine directory",
                path.display()
            ));
        }
        if !Self::is_extension_allowed(&path) {
            return Err(anyhow!(
                "DOM engine modules must be .js or .mjs files, got: {}",
                path.display()
            ));
        }
        Ok(path)
    }

    fn read_module(&self, specifier: &ModuleSpecifier) -> Result<ModuleSource, Error> {
        let path = self.engine_file(specifier)?;
        let code = std::fs::read_to_string(&path)
            .map_err(|e| anyhow!("Cannot read DOM engine module '{}': {e}", path.display()))?;

        tracing::debug!(module = %specifier, bytes = code.len(), "loaded engine module");

        Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(code.into()),
            specifier,
            None,
        ))
    }
}

impl ModuleLoader for EngineLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if let Some(scheme) = FORBIDDEN_SCHEMES.iter().find(|s| specifier.starts_with(*s)) {
            return Err(anyhow!(
                "Import of '{}' is forbidden: {} modules are not available to the DOM engine",
                specifier,
                scheme.trim_end_matches(['/', ':'])
            ));
        }

        let resolved = self.locate(specifier, referrer)?;
        self.engine_file(&resolved)?;
        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        ModuleLoadResponse::Sync(self.read_module(module_specifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn engine_dir() -> (tempfile::TempDir, EngineLoader) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("engine.js"), "export class JSDOM {}").unwrap();
        let loader = EngineLoader::new(dir.path().join("engine.js")).unwrap();
        (dir, loader)
    }

    #[test]
    fn test_entry_is_file_url() {
        let (dir, loader) = engine_dir();
        let expected = dir.path().join("engine.js").canonicalize().unwrap();

        assert_eq!(loader.entry().scheme(), "file");
        assert_eq!(loader.entry().to_file_path().unwrap(), expected);
    }

    #[test]
    fn test_rejects_missing_engine() {
        let dir = tempdir().unwrap();
        let err = EngineLoader::new(dir.path().join("missing.js")).err().unwrap();
        assert!(matches!(err, BridgeError::EnginePath { .. }));
    }

    #[test]
    fn test_rejects_non_js_engine() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("engine.txt"), "nope").unwrap();

        let err = EngineLoader::new(dir.path().join("engine.txt")).err().unwrap();
        assert!(err.to_string().contains("only .js and .mjs"));
    }

    #[test]
    fn test_rejects_directory_engine() {
        let dir = tempdir().unwrap();
        let err = EngineLoader::new(dir.path()).err().unwrap();
        assert!(err.to_string().contains("not a file"));
    }

    #[test]
    fn test_blocks_remote_and_builtin_modules() {
        let (_dir, loader) = engine_dir();
        let referrer = loader.entry().to_string();

        for specifier in ["https://evil.com/payload.js", "node:fs", "npm:jsdom", "data:text/javascript,1"] {
            let result = loader.resolve(specifier, &referrer, ResolutionKind::Import);
            assert!(result.unwrap_err().to_string().contains("is forbidden"), "{specifier}");
        }
    }

    #[test]
    fn test_blocks_path_traversal() {
        let (_dir, loader) = engine_dir();
        let referrer = loader.entry().to_string();

        let result = loader.resolve("../../../etc/passwd", &referrer, ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_allows_sibling_chunks() {
        let (dir, loader) = engine_dir();
        fs::write(dir.path().join("chunk.mjs"), "export default 1;").unwrap();
        let referrer = loader.entry().to_string();

        assert!(loader.resolve("./chunk.mjs", &referrer, ResolutionKind::Import).is_ok());
        assert!(loader.resolve("chunk.mjs", &referrer, ResolutionKind::Import).is_ok());
    }

    #[test]
    fn test_dynamic_import_from_extension_referrer() {
        let (_dir, loader) = engine_dir();
        let entry = loader.entry().to_string();

        let resolved = loader
            .resolve(&entry, "ext:dom_bridge_host/bootstrap.js", ResolutionKind::DynamicImport)
            .unwrap();
        assert_eq!(&resolved, loader.entry());
    }

    #[test]
    fn test_load_reads_engine_source() {
        let (_dir, loader) = engine_dir();
        assert!(loader.read_module(loader.entry()).is_ok());
    }

    #[test]
    fn test_load_rechecks_location() {
        let (_dir, loader) = engine_dir();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("stray.js"), "export default 1;").unwrap();
        let stray_path = outside.path().join("stray.js").canonicalize().unwrap();
        let stray = ModuleSpecifier::from_file_path(stray_path).unwrap();

        let err = loader.read_module(&stray).unwrap_err();
        assert!(err.to_string().contains("outside the DOM engine directory"), "{err}");
    }

    #[test]
    fn test_blocks_non_js_siblings() {
        let (dir, loader) = engine_dir();
        fs::write(dir.path().join("data.json"), "{}").unwrap();
        let referrer = loader.entry().to_string();

        let result = loader.resolve("./data.json", &referrer, ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("must be .js or .mjs"));
    }
}
