// src/instrument.rs

//! Drives a whole run: changes in, rewritten sources and the generated
//! support file out.

use crate::component::map_components;
use crate::config::{package_name, Config};
use crate::diff::RevisionDiffer;
use crate::entry::{read_module_path, EntryPointProvider, GoModuleScanner};
use crate::error::{Error, Result, Stage};
use crate::generated::TrackFileBuilder;
use crate::model::{Component, FileChange, IntervalMap, TrackIdxInterval};
use crate::planner;
use crate::pool::WorkerPool;
use crate::rewrite::{assign_ids, insert_placeholders, reformat};
use crate::scope;
use crate::syntax::GoSource;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of one instrumentation run
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Every input file, including the ones that received no probe
    pub intervals: IntervalMap,
    pub total_probes: u32,
    pub components: Vec<Component>,
    /// Path of the generated file, or `None` when it was removed
    pub generated_file: Option<PathBuf>,
}

impl Report {
    pub fn instrumented_files(&self) -> usize {
        self.intervals.values().filter(|i| !i.is_empty()).count()
    }
}

/// A file after planning and placeholder insertion. `text` is `None` when
/// nothing was planned for it.
#[derive(Debug)]
struct Staged {
    path: String,
    text: Option<String>,
}

pub struct Instrumenter<'a> {
    root: &'a Path,
    config: &'a Config,
    pool: &'a WorkerPool,
    import_path: String,
    alias: String,
}

impl<'a> Instrumenter<'a> {
    pub fn new(root: &'a Path, config: &'a Config, pool: &'a WorkerPool, import_path: impl Into<String>) -> Self {
        let import_path = import_path.into();
        let alias = config.alias_for(&import_path);
        Self {
            root,
            config,
            pool,
            import_path,
            alias,
        }
    }

    /// Instruments every changed file in place and writes (or removes) the
    /// generated support file.
    pub fn instrument(&self, changes: &[FileChange], provider: &dyn EntryPointProvider) -> Result<Report> {
        let mut changes = changes.to_vec();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes.dedup_by(|a, b| a.path == b.path);

        let staged = self
            .pool
            .run("Inserting placeholders", &changes, |change| self.stage(change))?;

        // IDs are only handed out once every file is planned, in path order.
        let mut next_id = 1;
        let mut intervals = IntervalMap::new();
        let mut rewritten = Vec::new();
        for file in staged {
            let interval = match file.text {
                Some(text) => {
                    let (text, interval) =
                        assign_ids(&file.path, &text, &mut next_id, &self.alias, &self.import_path)?;
                    if !interval.is_empty() {
                        debug!(path = %file.path, start = interval.start, end = interval.end, "assigned ids");
                        rewritten.push((self.root.join(&file.path), text));
                    }
                    interval
                }
                None => TrackIdxInterval::empty_at(next_id),
            };
            intervals.insert(file.path, interval);
        }
        let total_probes = next_id - 1;

        let entries = provider.entry_points()?;
        let components = map_components(&intervals, &entries);

        // Sources are only touched once the generated file is in place.
        let generated = self.config.generated_file(self.root);
        let mut builder = TrackFileBuilder::new(package_name(&self.import_path), self.import_path.as_str());
        let generated_file = if total_probes == 0 {
            builder.remove(&generated)?;
            None
        } else {
            builder.add_track_ids(1..=total_probes);
            for component in &components {
                builder.add_component(component.id, component.name.as_str(), &component.track_ids);
            }
            builder.save(&generated)?;
            Some(generated)
        };
        for (target, text) in rewritten {
            fs::write(&target, text).map_err(|e| Error::io(target, e))?;
        }

        let report = Report {
            intervals,
            total_probes,
            components,
            generated_file,
        };
        info!(
            "Inserted {} probes into {} of {} files",
            report.total_probes,
            report.instrumented_files(),
            report.intervals.len()
        );
        Ok(report)
    }

    fn stage(&self, change: &FileChange) -> Result<Staged> {
        let full = self.root.join(&change.path);
        let text = fs::read_to_string(&full).map_err(|e| Error::io(full, e))?;
        let source = GoSource::parse(&change.path, text, Stage::Placeholder)?;
        let scopes = scope::analyze(&source);
        let plan = planner::plan(&source, &scopes, &change.line_changes, self.config.granularity);
        if plan.is_empty() {
            return Ok(Staged {
                path: change.path.clone(),
                text: None,
            });
        }
        debug!(path = %change.path, positions = plan.count(), "planned probes");
        let text = insert_placeholders(&source, &plan.positions);
        let text = reformat(&change.path, text, self.config.gofmt.as_deref())?;
        Ok(Staged {
            path: change.path.clone(),
            text: Some(text),
        })
    }
}

pub fn load_changes(path: &Path) -> Result<Vec<FileChange>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn save_changes(path: &Path, changes: &[FileChange]) -> Result<()> {
    let text = serde_json::to_string_pretty(changes)?;
    fs::write(path, text).map_err(|e| Error::io(path, e))
}

/// Where the changes of a run come from, and where they go
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repo: PathBuf,
    pub base: Option<String>,
    pub target: String,
    /// Read changes from this record instead of diffing the repository
    pub changes: Option<PathBuf>,
    pub emit_changes: Option<PathBuf>,
}

/// Diffs (or loads) the changes, then instruments them.
pub fn run(options: &RunOptions, config: &Config) -> Result<Report> {
    let filter = config.file_filter()?;
    let pool = WorkerPool::new(config.threads)?;

    let (root, changes) = match &options.changes {
        Some(record) => {
            let changes: Vec<FileChange> = load_changes(record)?
                .into_iter()
                .filter(|change| {
                    let eligible = filter.is_eligible(&change.path);
                    if !eligible {
                        warn!(path = %change.path, "skipping ineligible file from change record");
                    }
                    eligible
                })
                .collect();
            (options.repo.clone(), changes)
        }
        None => {
            let differ = RevisionDiffer::open(&options.repo, &filter, config.strategy, &pool)?;
            let changes = differ.diff(options.base.as_deref(), &options.target)?;
            (differ.workdir().to_path_buf(), changes)
        }
    };
    if let Some(out) = &options.emit_changes {
        save_changes(out, &changes)?;
        info!("Wrote change record to {}", out.display());
    }

    let module_path = read_module_path(&root)?;
    let import_path = config.generated_import_path(module_path.as_deref())?;
    let scanner = GoModuleScanner::new(&root, module_path.unwrap_or_default());
    Instrumenter::new(&root, config, &pool, import_path).instrument(&changes, &scanner)
}
