// src/entry.rs

//! Program entry points and the internal packages each one reaches.

use crate::error::{Error, Result};
use crate::syntax::{self, GoSource};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// One `package main` directory and its closed set of reachable internal
/// package directories (repository-relative, `""` for the root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub dir: String,
    pub main_file: String,
    pub packages: BTreeSet<String>,
}

pub trait EntryPointProvider {
    fn entry_points(&self) -> Result<Vec<EntryPoint>>;
}

/// A fixed list, for callers that already know their entry points
#[derive(Debug, Clone, Default)]
pub struct StaticEntryPoints(pub Vec<EntryPoint>);

impl EntryPointProvider for StaticEntryPoints {
    fn entry_points(&self) -> Result<Vec<EntryPoint>> {
        Ok(self.0.clone())
    }
}

/// Directory part of a repository-relative file path
pub fn package_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Module path declared by `<root>/go.mod`, if any
pub fn read_module_path(root: &Path) -> Result<Option<String>> {
    let path = root.join("go.mod");
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    Ok(text.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        let module = rest.trim().trim_matches('"');
        (!module.is_empty() && rest.starts_with(char::is_whitespace)).then(|| module.to_string())
    }))
}

#[derive(Debug, Default)]
struct PackageInfo {
    is_main: bool,
    main_file: Option<String>,
    imports: BTreeSet<String>,
}

/// Discovers entry points by scanning a Go module on disk.
pub struct GoModuleScanner {
    root: std::path::PathBuf,
    module_path: String,
}

impl GoModuleScanner {
    pub fn new(root: &Path, module_path: impl Into<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            module_path: module_path.into(),
        }
    }

    fn scan_packages(&self) -> Result<BTreeMap<String, PackageInfo>> {
        let mut packages: BTreeMap<String, PackageInfo> = BTreeMap::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));
        for entry in walker {
            let entry = entry.map_err(|e| Error::Config(format!("walking module: {e}")))?;
            let name = entry.file_name().to_string_lossy();
            if !entry.file_type().is_file() || !name.ends_with(".go") || name.ends_with("_test.go") {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            let text = fs::read_to_string(entry.path()).map_err(|e| Error::io(entry.path(), e))?;
            let Some(source) = GoSource::parse_lenient(&rel, text) else {
                warn!(path = %rel, "could not parse file while scanning imports");
                continue;
            };
            let info = packages.entry(package_dir(&rel)).or_default();
            let (package, has_main, imports) = file_facts(&source);
            if package == "main" && has_main {
                info.is_main = true;
                info.main_file.get_or_insert(rel.clone());
            }
            info.imports.extend(imports);
        }
        Ok(packages)
    }

    /// Internal package directory for an import path, if it belongs to the module
    fn internal_dir(&self, import: &str) -> Option<String> {
        if import == self.module_path {
            return Some(String::new());
        }
        import
            .strip_prefix(&self.module_path)?
            .strip_prefix('/')
            .map(str::to_string)
    }
}

impl EntryPointProvider for GoModuleScanner {
    fn entry_points(&self) -> Result<Vec<EntryPoint>> {
        let packages = self.scan_packages()?;
        let mut entries = Vec::new();
        for (dir, info) in packages.iter().filter(|(_, info)| info.is_main) {
            let mut reachable = BTreeSet::new();
            let mut queue = VecDeque::from([dir.clone()]);
            while let Some(current) = queue.pop_front() {
                if !reachable.insert(current.clone()) {
                    continue;
                }
                let Some(pkg) = packages.get(&current) else { continue };
                for import in &pkg.imports {
                    if let Some(next) = self.internal_dir(import) {
                        if packages.contains_key(&next) && !reachable.contains(&next) {
                            queue.push_back(next);
                        }
                    }
                }
            }
            let name = if dir.is_empty() {
                crate::config::package_name(&self.module_path).to_string()
            } else {
                dir.clone()
            };
            debug!(entry = %name, packages = reachable.len(), "found entry point");
            entries.push(EntryPoint {
                name,
                dir: dir.clone(),
                main_file: info.main_file.clone().unwrap_or_default(),
                packages: reachable,
            });
        }
        Ok(entries)
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_dir() && (name.starts_with('.') || name == "vendor" || name == "testdata")
}

/// Package name, whether the file declares `func main`, and its import paths
fn file_facts(source: &GoSource) -> (String, bool, Vec<String>) {
    let mut package = String::new();
    let mut has_main = false;
    let mut imports = Vec::new();
    syntax::walk_tree(source.root(), |node| match node.kind() {
        "source_file" | "import_declaration" | "import_spec_list" => true,
        "package_clause" => {
            let mut cursor = node.walk();
            if let Some(name) = node.named_children(&mut cursor).find(|n| n.kind() == "package_identifier") {
                package = source.node_text(name).to_string();
            }
            false
        }
        "import_spec" => {
            if let Some(path) = node.child_by_field_name("path") {
                imports.push(source.node_text(path).trim_matches(|c| c == '"' || c == '`').to_string());
            }
            false
        }
        "function_declaration" => {
            let is_main = node
                .child_by_field_name("name")
                .is_some_and(|n| source.node_text(n) == "main");
            has_main |= is_main;
            false
        }
        _ => false,
    });
    (package, has_main, imports)
}
