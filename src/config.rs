// src/config.rs

use crate::error::{Error, Result};
use crate::model::{DiffStrategy, Granularity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Project config file, looked up at the repository root. Changes to it do
/// not count as a dirty working tree.
pub const CONFIG_FILE: &str = ".canary-track.toml";

/// Name of the generated support file inside `generated_dir`
pub const GENERATED_FILE: &str = "canary_track.go";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub granularity: Granularity,
    pub strategy: DiffStrategy,
    pub threads: usize,
    /// Repository-relative directory of the generated package
    pub generated_dir: String,
    /// Import path of the generated package; derived from go.mod when unset
    pub generated_package: Option<String>,
    /// Import alias used by probes; the package name when unset
    pub alias: Option<String>,
    /// Extra regex patterns matched against repository-relative paths
    pub exclude: Vec<String>,
    pub gofmt: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            strategy: DiffStrategy::default(),
            threads: 1,
            generated_dir: "canarytrack".to_string(),
            generated_package: None,
            alias: None,
            exclude: Vec::new(),
            gofmt: None,
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub granularity: Option<Granularity>,
    pub strategy: Option<DiffStrategy>,
    pub threads: Option<usize>,
}

impl Config {
    /// Loads `path`, or `<root>/.canary-track.toml` when no path is given.
    /// A missing default file yields the defaults.
    pub fn load(root: &Path, path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = root.join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(granularity) = overrides.granularity {
            self.granularity = granularity;
        }
        if let Some(strategy) = overrides.strategy {
            self.strategy = strategy;
        }
        if let Some(threads) = overrides.threads {
            self.threads = threads;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("threads must be at least 1".to_string()));
        }
        if self.generated_dir.trim_matches('/').is_empty() {
            return Err(Error::Config("generated_dir must not be empty".to_string()));
        }
        if let Some(alias) = &self.alias {
            if !is_identifier(alias) {
                return Err(Error::Config(format!("alias `{alias}` is not a Go identifier")));
            }
        }
        match &self.generated_package {
            Some(package) => check_package_name(package)?,
            None => check_package_name(&self.generated_dir)?,
        }
        self.file_filter().map(|_| ())
    }

    /// Import path of the generated package, given the module path from go.mod.
    pub fn generated_import_path(&self, module_path: Option<&str>) -> Result<String> {
        let import_path = match &self.generated_package {
            Some(package) => package.clone(),
            None => {
                let module = module_path.ok_or_else(|| {
                    Error::Config("generated_package is unset and no go.mod module path was found".to_string())
                })?;
                format!("{}/{}", module.trim_end_matches('/'), self.generated_dir.trim_matches('/'))
            }
        };
        check_package_name(&import_path)?;
        Ok(import_path)
    }

    pub fn alias_for(&self, import_path: &str) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| package_name(import_path).to_string())
    }

    pub fn generated_file(&self, root: &Path) -> PathBuf {
        root.join(self.generated_dir.trim_matches('/')).join(GENERATED_FILE)
    }

    pub fn file_filter(&self) -> Result<FileFilter> {
        FileFilter::new(&self.generated_dir, &self.exclude)
    }
}

/// Last element of an import path
pub fn package_name(import_path: &str) -> &str {
    import_path.rsplit('/').next().unwrap_or(import_path)
}

/// The generated package is declared, and by default imported, under this name.
fn check_package_name(import_path: &str) -> Result<()> {
    let name = package_name(import_path.trim_end_matches('/'));
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "package name `{name}` of `{import_path}` is not a Go identifier"
        )))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Compiled eligibility rules for source files.
#[derive(Debug, Clone)]
pub struct FileFilter {
    source: Regex,
    test: Regex,
    generated: Regex,
    exclude: Vec<Regex>,
}

impl FileFilter {
    pub fn new(generated_dir: &str, exclude: &[String]) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("bad pattern `{pattern}`: {e}")))
        };
        Ok(Self {
            source: compile(r"\.go$")?,
            test: compile(r"_test\.go$")?,
            generated: compile(&format!(
                r"(^|/){}/",
                regex::escape(generated_dir.trim_matches('/'))
            ))?,
            exclude: exclude.iter().map(|p| compile(p)).collect::<Result<_>>()?,
        })
    }

    /// Whether a repository-relative path should be instrumented.
    pub fn is_eligible(&self, path: &str) -> bool {
        self.source.is_match(path)
            && !self.test.is_match(path)
            && !self.generated.is_match(path)
            && !path.starts_with("vendor/")
            && !self.exclude.iter().any(|re| re.is_match(path))
    }
}
