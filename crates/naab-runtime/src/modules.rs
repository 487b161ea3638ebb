//! Module resolution, loading and the parse-once registry.
//!
//! Search order for an import specifier: relative paths (`./`, `../`),
//! a `naab_modules` directory walking up to the filesystem root,
//! `.naabrc` extra paths, the user-scope modules directory, then the
//! system-scope one. Canonical paths key the registry, so a module is
//! parsed and executed at most once; hitting a module that is still
//! `Executing` is a circular import and reports the whole chain.

use crate::config::NaabRc;
use indexmap::IndexMap;
use naab_core::{ErrorKind, NaabError, StructDef, Value};
use naab_parser::ast::Program;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maximum module source size (same cap as the lexer's).
pub const MAX_MODULE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Parsing,
    Executing,
    Ready,
}

/// One loaded module.
pub struct Module {
    pub canonical_path: PathBuf,
    pub state: Mutex<ModuleState>,
    pub exports: Mutex<IndexMap<String, Value>>,
    pub struct_exports: Mutex<FxHashMap<String, Arc<StructDef>>>,
    pub deps: Mutex<Vec<PathBuf>>,
}

impl Module {
    fn new(canonical_path: PathBuf) -> Self {
        Self {
            canonical_path,
            state: Mutex::new(ModuleState::Parsing),
            exports: Mutex::new(IndexMap::new()),
            struct_exports: Mutex::new(FxHashMap::default()),
            deps: Mutex::new(Vec::new()),
        }
    }
}

/// Outputs of evaluating one module's top level.
pub struct ModuleOutputs {
    pub exports: IndexMap<String, Value>,
    pub struct_exports: FxHashMap<String, Arc<StructDef>>,
}

/// Callback the evaluator supplies to run a parsed module's top level
/// in a fresh module-local environment.
pub type ModuleEvaluator<'a> =
    &'a mut dyn FnMut(&Program, &Path) -> Result<ModuleOutputs, NaabError>;

pub struct ModuleRegistry {
    modules: Mutex<FxHashMap<PathBuf, Arc<Module>>>,
    /// Import chain of modules currently executing, outermost first
    loading_stack: Mutex<Vec<PathBuf>>,
    rc: NaabRc,
    rc_base: PathBuf,
}

impl ModuleRegistry {
    /// Create a registry, discovering `.naabrc` from `project_dir`.
    pub fn new(project_dir: &Path) -> Result<Self, NaabError> {
        let rc = NaabRc::discover(project_dir)?;
        Ok(Self {
            modules: Mutex::new(FxHashMap::default()),
            loading_stack: Mutex::new(Vec::new()),
            rc,
            rc_base: project_dir.to_path_buf(),
        })
    }

    /// Resolve an import specifier against the search order.
    pub fn resolve(&self, specifier: &str, importer_dir: &Path) -> Result<PathBuf, NaabError> {
        // Aliases substitute before anything else
        let specifier = self
            .rc
            .aliases
            .get(specifier)
            .cloned()
            .unwrap_or_else(|| specifier.to_string());

        let mut searched = Vec::new();

        if specifier.starts_with("./") || specifier.starts_with("../") {
            if let Some(found) = try_candidates(&importer_dir.join(&specifier), &mut searched) {
                return canonicalize(&found);
            }
        } else {
            // naab_modules, walking up from the importer
            let mut dir = Some(importer_dir);
            while let Some(current) = dir {
                let base = current.join("naab_modules").join(&specifier);
                if let Some(found) = try_candidates(&base, &mut searched) {
                    return canonicalize(&found);
                }
                dir = current.parent();
            }
            // .naabrc extra paths
            for extra in self.rc.extra_paths(&self.rc_base) {
                if let Some(found) = try_candidates(&extra.join(&specifier), &mut searched) {
                    return canonicalize(&found);
                }
            }
            // user scope, then system scope
            if let Some(home) = dirs::home_dir() {
                let base = home.join(".naab/modules").join(&specifier);
                if let Some(found) = try_candidates(&base, &mut searched) {
                    return canonicalize(&found);
                }
            }
            let base = Path::new("/usr/lib/naab/modules").join(&specifier);
            if let Some(found) = try_candidates(&base, &mut searched) {
                return canonicalize(&found);
            }
        }

        Err(NaabError::new(
            ErrorKind::Import,
            format!(
                "cannot resolve module '{}'. Searched:\n  {}",
                specifier,
                searched
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join("\n  ")
            ),
        ))
    }

    /// Load (or fetch) the module at `specifier`. `evaluate` runs the
    /// parsed top level when the module is new.
    pub fn load(
        &self,
        specifier: &str,
        importer_dir: &Path,
        evaluate: ModuleEvaluator<'_>,
    ) -> Result<Arc<Module>, NaabError> {
        let path = self.resolve(specifier, importer_dir)?;

        {
            let modules = self.modules.lock();
            if let Some(module) = modules.get(&path) {
                let state = *module.state.lock();
                if state == ModuleState::Ready {
                    return Ok(module.clone());
                }
                // Parsing/Executing: we came back around to a module
                // still on the loading stack
                let mut chain: Vec<String> = self
                    .loading_stack
                    .lock()
                    .iter()
                    .map(|p| file_name(p))
                    .collect();
                chain.push(file_name(&path));
                return Err(NaabError::new(
                    ErrorKind::CircularImport,
                    format!("circular import detected: [{}]", chain.join(", ")),
                ));
            }
        }

        // Record this module as a dependency of its importer
        if let Some(parent) = self.loading_stack.lock().last() {
            if let Some(parent_module) = self.modules.lock().get(parent) {
                parent_module.deps.lock().push(path.clone());
            }
        }

        let module = Arc::new(Module::new(path.clone()));
        self.modules.lock().insert(path.clone(), module.clone());
        self.loading_stack.lock().push(path.clone());

        let result = (|| {
            let metadata = std::fs::metadata(&path)?;
            if metadata.len() > MAX_MODULE_BYTES {
                return Err(NaabError::new(
                    ErrorKind::InputSize,
                    format!(
                        "{} exceeds the {} byte module size cap",
                        path.display(),
                        MAX_MODULE_BYTES
                    ),
                ));
            }
            let source = std::fs::read_to_string(&path)?;
            let program = naab_parser::parse_source(&source).map_err(|errors| {
                let rendered = naab_parser::diagnostics::render_parse_errors(
                    &path.display().to_string(),
                    &source,
                    &errors,
                    false,
                );
                NaabError::new(
                    ErrorKind::Parse,
                    format!("{} parse errors in module:\n{}", errors.len(), rendered),
                )
            })?;

            *module.state.lock() = ModuleState::Executing;
            let outputs = evaluate(&program, &path)?;
            *module.exports.lock() = outputs.exports;
            *module.struct_exports.lock() = outputs.struct_exports;
            *module.state.lock() = ModuleState::Ready;
            Ok(())
        })();

        self.loading_stack.lock().pop();

        if let Err(e) = result {
            // No partially-executed module stays registered
            self.modules.lock().remove(&path);
            return Err(e);
        }
        Ok(module)
    }

    /// The module previously loaded for `path`, if any. Used by the
    /// idempotency tests.
    pub fn get(&self, path: &Path) -> Option<Arc<Module>> {
        self.modules.lock().get(path).cloned()
    }

    pub fn loaded_count(&self) -> usize {
        self.modules.lock().len()
    }
}

fn try_candidates(base: &Path, searched: &mut Vec<PathBuf>) -> Option<PathBuf> {
    let with_ext = if base.extension().is_none() {
        Some(base.with_extension("naab"))
    } else {
        None
    };
    for candidate in [Some(base.to_path_buf()), with_ext].into_iter().flatten() {
        if candidate.is_file() {
            return Some(candidate);
        }
        searched.push(candidate);
    }
    None
}

fn canonicalize(path: &Path) -> Result<PathBuf, NaabError> {
    std::fs::canonicalize(path).map_err(|e| {
        NaabError::new(
            ErrorKind::Import,
            format!("cannot canonicalize {}: {}", path.display(), e),
        )
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
