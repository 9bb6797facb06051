//! Partial stores consulted when an imported partial was not declared in the template.

use crate::error::{Result, TemplateError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tessera_ast::{validate_partial_name, Document, TokenizerOptions};
use tracing::debug;

/// File extension of partials loaded by [`FilePartialStore`].
pub const PARTIAL_EXTENSION: &str = "tsr";

/// Source of externally supplied partials.
pub trait PartialStore: Send + Sync {
    /// Load and parse the partial called `name`. `Ok(None)` when the store has no such partial.
    fn load(&self, name: &str, options: &TokenizerOptions) -> Result<Option<Arc<Document>>>;
}

/// Parse partial source, turning error diagnostics into [`TemplateError::InvalidTemplate`].
pub fn parse_partial(source: &str, options: &TokenizerOptions) -> Result<Arc<Document>> {
    let parsed = tessera_ast::parse(source, options)?;
    match parsed.document {
        Some(document) => Ok(Arc::new(document)),
        None => Err(TemplateError::InvalidTemplate {
            diagnostics: parsed.diagnostics,
        }),
    }
}

/// Parsed-document cache shared by the stores.
#[derive(Default)]
struct DocumentCache {
    documents: RwLock<HashMap<String, Arc<Document>>>,
}

impl DocumentCache {
    fn get_or_parse(
        &self,
        name: &str,
        options: &TokenizerOptions,
        source: impl FnOnce() -> Result<Option<String>>,
    ) -> Result<Option<Arc<Document>>> {
        if let Ok(documents) = self.documents.read() {
            if let Some(document) = documents.get(name) {
                return Ok(Some(Arc::clone(document)));
            }
        }
        let Some(source) = source()? else {
            return Ok(None);
        };
        let document = parse_partial(&source, options)?;
        debug!(partial = name, items = document.len(), "parsed external partial");
        if let Ok(mut documents) = self.documents.write() {
            documents.insert(name.to_string(), Arc::clone(&document));
        }
        Ok(Some(document))
    }
}

/// Partials kept in memory, keyed by name.
#[derive(Default)]
pub struct MemoryPartialStore {
    sources: HashMap<String, String>,
    cache: DocumentCache,
}

impl MemoryPartialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        let name = name.into();
        if let Ok(documents) = self.cache.documents.get_mut() {
            documents.remove(&name);
        }
        self.sources.insert(name, source.into());
        self
    }
}

impl PartialStore for MemoryPartialStore {
    fn load(&self, name: &str, options: &TokenizerOptions) -> Result<Option<Arc<Document>>> {
        self.cache
            .get_or_parse(name, options, || Ok(self.sources.get(name).cloned()))
    }
}

/// Partials loaded from `<root>/<name>.tsr`.
pub struct FilePartialStore {
    root: PathBuf,
    cache: DocumentCache,
}

impl FilePartialStore {
    /// Create a store rooted at an existing directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().canonicalize().map_err(|e| {
            TemplateError::Custom(format!(
                "Invalid partial root '{}': {e}",
                root.as_ref().display()
            ))
        })?;
        Ok(Self {
            root,
            cache: DocumentCache::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        validate_partial_name(name).map_err(TemplateError::Custom)?;
        let mut path = self.root.clone();
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.set_extension(PARTIAL_EXTENSION);
        self.ensure_within_root(&path)?;
        Ok(path)
    }

    fn ensure_within_root(&self, path: &Path) -> Result<()> {
        let candidate = canonicalize_candidate(path)?;
        if candidate.starts_with(&self.root) {
            return Ok(());
        }
        Err(TemplateError::Custom(format!(
            "Path traversal detected: {}",
            path.display()
        )))
    }
}

impl PartialStore for FilePartialStore {
    fn load(&self, name: &str, options: &TokenizerOptions) -> Result<Option<Arc<Document>>> {
        let path = self.resolve_path(name)?;
        self.cache.get_or_parse(name, options, || {
            if !path.is_file() {
                return Ok(None);
            }
            Ok(Some(fs::read_to_string(&path)?))
        })
    }
}

/// Canonicalize the longest existing prefix of `path` and re-append the missing tail.
fn canonicalize_candidate(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.canonicalize()?);
    }
    let mut cursor = path.to_path_buf();
    let mut missing = Vec::new();
    while !cursor.exists() {
        let Some(name) = cursor.file_name().map(|s| s.to_os_string()) else {
            break;
        };
        missing.push(name);
        let Some(parent) = cursor.parent().map(Path::to_path_buf) else {
            break;
        };
        cursor = parent;
    }
    let mut resolved = cursor.canonicalize()?;
    for segment in missing.into_iter().rev() {
        resolved.push(segment);
    }
    Ok(resolved)
}
