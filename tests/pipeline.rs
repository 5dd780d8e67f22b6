// tests/pipeline.rs

use canary_track::config::Config;
use canary_track::entry::{EntryPoint, StaticEntryPoints};
use canary_track::model::{Component, DiffStrategy, FileChange, Granularity, LineChanges, TrackIdxInterval};
use canary_track::pool::WorkerPool;
use canary_track::{Instrumenter, RunOptions};
use git2::{Commit, IndexAddOption, Oid, Repository, Signature, Time};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

const IMPORT: &str = "example.com/m/canarytrack";

fn changes(path: &str, lines: &[u32]) -> FileChange {
    let mut line_changes = LineChanges::new();
    for line in lines {
        line_changes.push(*line, 1);
    }
    FileChange {
        path: path.to_string(),
        line_changes,
    }
}

fn root_entry(name: &str) -> StaticEntryPoints {
    StaticEntryPoints(vec![EntryPoint {
        name: name.to_string(),
        dir: String::new(),
        main_file: "main.go".to_string(),
        packages: BTreeSet::from([String::new()]),
    }])
}

#[test]
fn test_ids_are_contiguous_across_files_with_and_without_probes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let a = "package a\n\nfunc A() int {\n\tx := 1\n\treturn x\n}\n";
    let b = "package a\n\nfunc B() int {\n\treturn 2\n}\n";
    fs::write(root.join("a.go"), a).unwrap();
    fs::write(root.join("b.go"), b).unwrap();

    let config = Config {
        granularity: Granularity::Func,
        ..Config::default()
    };
    let pool = WorkerPool::new(4).unwrap();
    let report = Instrumenter::new(root, &config, &pool, IMPORT)
        .instrument(&[changes("b.go", &[]), changes("a.go", &[4])], &root_entry("a"))
        .unwrap();

    assert_eq!(report.total_probes, 1);
    assert_eq!(report.intervals["a.go"], TrackIdxInterval { start: 1, end: 1 });
    assert!(report.intervals["b.go"].is_empty());
    assert_eq!(report.intervals["b.go"].start, 2);
    assert_eq!(
        fs::read_to_string(root.join("a.go")).unwrap(),
        "package a\nimport canarytrack \"example.com/m/canarytrack\"\n\nfunc A() int {\n\tcanarytrack.Track(canarytrack.ID1)\n\tx := 1\n\treturn x\n}\n"
    );
    assert_eq!(fs::read_to_string(root.join("b.go")).unwrap(), b);
    assert_eq!(
        report.components,
        vec![Component {
            id: 1,
            name: "a".to_string(),
            track_ids: vec![1],
        }]
    );
    let generated = fs::read_to_string(root.join("canarytrack/canary_track.go")).unwrap();
    assert!(generated.contains("\tID1 TrackID = 1"));
}

#[test]
fn test_no_probes_removes_stale_generated_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.go"), "package a\n\nvar X = 1\n").unwrap();
    let config = Config::default();
    let stale = config.generated_file(root);
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "package canarytrack\n").unwrap();

    let pool = WorkerPool::new(1).unwrap();
    let report = Instrumenter::new(root, &config, &pool, IMPORT)
        .instrument(&[changes("a.go", &[3])], &StaticEntryPoints::default())
        .unwrap();
    assert_eq!(report.total_probes, 0);
    assert_eq!(report.generated_file, None);
    assert!(!stale.exists());
}

#[test]
fn test_ids_follow_path_order_not_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("pkg")).unwrap();
    let text = "package p\n\nfunc F() {\n\tg()\n\th()\n}\n";
    for path in ["z.go", "pkg/m.go", "a.go"] {
        fs::write(root.join(path), text).unwrap();
    }
    let config = Config {
        granularity: Granularity::Line,
        alias: Some("ct".to_string()),
        ..Config::default()
    };
    let pool = WorkerPool::new(3).unwrap();
    let report = Instrumenter::new(root, &config, &pool, IMPORT)
        .instrument(
            &[changes("z.go", &[4, 5]), changes("pkg/m.go", &[5]), changes("a.go", &[4, 5])],
            &StaticEntryPoints::default(),
        )
        .unwrap();
    assert_eq!(report.total_probes, 5);
    assert_eq!(report.intervals["a.go"], TrackIdxInterval { start: 1, end: 2 });
    assert_eq!(report.intervals["pkg/m.go"], TrackIdxInterval { start: 3, end: 3 });
    assert_eq!(report.intervals["z.go"], TrackIdxInterval { start: 4, end: 5 });
    let z = fs::read_to_string(root.join("z.go")).unwrap();
    assert!(z.contains("import ct \"example.com/m/canarytrack\""));
    assert!(z.find("ct.Track(ct.ID4)").unwrap() < z.find("ct.Track(ct.ID5)").unwrap());
}

fn commit_all(repo: &Repository, message: &str, time: i64) -> Oid {
    let mut index = repo.index().unwrap();
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::new("Dev", "dev@example.com", &Time::new(time, 0)).unwrap();
    let parents: Vec<Commit> = repo.head().ok().and_then(|h| h.peel_to_commit().ok()).into_iter().collect();
    let parents: Vec<&Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents).unwrap()
}

fn write(root: &Path, rel: &str, text: &str) {
    fs::write(root.join(rel), text).unwrap();
}

#[test]
fn test_end_to_end_from_git_history() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let repo = Repository::init(root).unwrap();
    write(root, "go.mod", "module example.com/hello\n\ngo 1.21\n");
    write(root, "main.go", "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hi\")\n}\n");
    let base = commit_all(&repo, "initial", 1_700_000_000);
    write(
        root,
        "main.go",
        "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"hi\")\n\tif len(greet()) > 0 {\n\t\tfmt.Println(\"ok\")\n\t}\n}\n\nfunc greet() string {\n\treturn \"hello\"\n}\n",
    );
    commit_all(&repo, "greet", 1_700_000_100);

    for strategy in [DiffStrategy::Blame, DiffStrategy::Patch] {
        let config = Config {
            strategy,
            threads: 2,
            ..Config::default()
        };
        let options = RunOptions {
            repo: root.to_path_buf(),
            base: Some(base.to_string()),
            target: "HEAD".to_string(),
            changes: None,
            emit_changes: None,
        };
        let report = canary_track::run(&options, &config).unwrap();
        assert_eq!(report.total_probes, 2, "strategy {strategy:?}");
        assert_eq!(report.intervals["main.go"], TrackIdxInterval { start: 1, end: 2 });
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.components[0].name, "hello");
        assert_eq!(report.components[0].track_ids, vec![1, 2]);

        let main = fs::read_to_string(root.join("main.go")).unwrap();
        assert!(main.contains("import canarytrack \"example.com/hello/canarytrack\""));
        assert!(main.contains("\tif len(greet()) > 0 {\n\t\tcanarytrack.Track(canarytrack.ID1)\n"));
        assert!(main.contains("\tcanarytrack.Track(canarytrack.ID2)\n\treturn \"hello\""));
        assert!(root.join("canarytrack/canary_track.go").exists());

        // restore the checked out state so the next run sees a clean tree
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))
            .unwrap();
        fs::remove_dir_all(root.join("canarytrack")).unwrap();
    }
}

#[test]
fn test_change_record_drives_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "go.mod", "module example.com/rec\n");
    write(root, "lib.go", "package rec\n\nfunc A() {\n\tb()\n}\n");
    write(root, "lib_test.go", "package rec\n\nfunc TestA() {\n\tb()\n}\n");
    let record = root.join("changes.json");
    write(
        root,
        "changes.json",
        r#"[{"path":"lib.go","line_changes":[{"start":4,"lines":1}]},{"path":"lib_test.go","line_changes":[{"start":4,"lines":1}]}]"#,
    );
    let options = RunOptions {
        repo: root.to_path_buf(),
        base: None,
        target: "HEAD".to_string(),
        changes: Some(record),
        emit_changes: None,
    };
    let report = canary_track::run(&options, &Config::default()).unwrap();
    assert_eq!(report.total_probes, 1);
    assert_eq!(report.intervals.keys().map(String::as_str).collect::<Vec<_>>(), vec!["lib.go"]);
    assert!(!fs::read_to_string(root.join("lib_test.go")).unwrap().contains("Track("));
    assert!(report.components.is_empty());
}
