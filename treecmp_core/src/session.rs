use crate::comparison::{ComparatorOptions, ContentComparator};
use crate::list::{match_trees, ComparisonList, ReconcileSummary};
use crate::matcher::NameMatcher;
use crate::scanner::{ScanResult, TreeScanner};
use crate::scheduler::{ComparisonScheduler, CompletedComparison, VisibilityFilter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use treecmp_common::{AppConfig, RelPath, Side, TreeCmpError};

/// A live comparison of two directory trees.
///
/// Owns both scans, the comparison list and the background scheduler. All
/// list mutation happens through this type; the scheduler's worker only ever
/// sees copies of the paths it compares.
pub struct TreeComparison {
    left: ScanResult,
    right: ScanResult,
    scanner: TreeScanner,
    matcher: NameMatcher,
    max_depth: usize,
    list: ComparisonList,
    scheduler: ComparisonScheduler,
}

impl TreeComparison {
    /// Scan both trees, match them and start comparing contents
    pub fn open(left: &Path, right: &Path, config: &AppConfig) -> Result<Self, TreeCmpError> {
        let matcher = NameMatcher::from_rules(&config.match_rules)?;
        let scanner = TreeScanner::new(config);
        let max_depth = config.max_depth;

        let left_root = canonical_root(left)?;
        let right_root = canonical_root(right)?;

        info!("Scanning left tree: {:?}", left_root);
        let left = scanner.scan(&left_root, max_depth)?;
        info!("Scanning right tree: {:?}", right_root);
        let right = scanner.scan(&right_root, max_depth)?;

        let list = ComparisonList::build(&left, &right, &matcher);
        info!(
            "Matched {} left files and {} right files into {} entries",
            left.files.len(),
            right.files.len(),
            list.len()
        );

        let comparator = ContentComparator::new(ComparatorOptions::from_config(config));
        let mut scheduler = ComparisonScheduler::new(&left_root, &right_root, comparator)?;
        scheduler.restart(&list);

        Ok(Self {
            left,
            right,
            scanner,
            matcher,
            max_depth,
            list,
            scheduler,
        })
    }

    pub fn left_root(&self) -> &Path {
        &self.left.root
    }

    pub fn right_root(&self) -> &Path {
        &self.right.root
    }

    pub fn list(&self) -> &ComparisonList {
        &self.list
    }

    pub fn scan(&self, side: Side) -> &ScanResult {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn scheduler(&self) -> &ComparisonScheduler {
        &self.scheduler
    }

    /// Directories of both trees whose changes should be reported back
    /// through `path_changed`
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.left.watch_dirs();
        dirs.extend(self.right.watch_dirs());
        dirs
    }

    /// React to a change notification for the directory `dir`.
    ///
    /// The covering directory is rescanned in every tree that contains it and
    /// the list is reconciled for that scope. Paths outside both trees or
    /// below the depth limit change nothing.
    pub fn path_changed(&mut self, dir: &Path) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for side in [Side::Left, Side::Right] {
            let Some(scope) = self.covering_scope(side, dir) else {
                continue;
            };
            debug!("Rescanning {} in the {:?} tree", scope, side);

            let root = self.scan(side).root.clone();
            let subtree = self.scanner.scan_subtree(&root, &scope, self.max_depth);
            match side {
                Side::Left => self.left.replace_subtree(&scope, subtree),
                Side::Right => self.right.replace_subtree(&scope, subtree),
            }
            summary.merge(self.reconcile(&scope));
        }
        self.restart_after(summary);
        summary
    }

    /// Rescan both trees completely and reconcile the whole list
    pub fn rescan(&mut self) -> Result<ReconcileSummary, TreeCmpError> {
        info!("Rescanning both trees");
        let left = self.scanner.scan(&self.left.root, self.max_depth)?;
        let right = self.scanner.scan(&self.right.root, self.max_depth)?;
        self.left = left;
        self.right = right;

        let summary = self.reconcile(&RelPath::root());
        self.restart_after(summary);
        Ok(summary)
    }

    /// Discard every comparison result and compare again
    pub fn refresh(&mut self) {
        info!("Forgetting all comparison results");
        self.list.forget();
        self.scheduler.restart(&self.list);
    }

    /// Returns true if the flag changed
    pub fn set_ignore(&mut self, index: usize, ignore: bool) -> bool {
        let changed = self.list.set_ignore(index, ignore);
        if changed && !ignore {
            self.scheduler.restart(&self.list);
        }
        changed
    }

    pub fn set_visibility_filter(&mut self, filter: Option<VisibilityFilter>) {
        self.scheduler.set_visibility_filter(filter);
    }

    pub fn poll(&mut self) -> Vec<CompletedComparison> {
        self.scheduler.poll(&mut self.list)
    }

    pub fn run_until_idle(&mut self) -> Vec<CompletedComparison> {
        self.scheduler.run_until_idle(&mut self.list)
    }

    pub fn run_until_idle_with(&mut self, on_complete: impl FnMut(&CompletedComparison)) {
        self.scheduler.run_until_idle_with(&mut self.list, on_complete);
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    fn reconcile(&mut self, scope: &RelPath) -> ReconcileSummary {
        let fresh = match_trees(&self.left, &self.right, &self.matcher, scope);
        self.list.reconcile(scope, fresh)
    }

    fn restart_after(&mut self, summary: ReconcileSummary) {
        if summary.added > 0 || summary.invalidated > 0 {
            self.scheduler.restart(&self.list);
        }
    }

    /// The directory to rescan on `side` for a change reported at `dir`: the
    /// nearest directory at or above it that was read during scanning
    fn covering_scope(&self, side: Side, dir: &Path) -> Option<RelPath> {
        let scan = self.scan(side);
        let relative = relative_to(&scan.root, dir)?;
        if relative.components().len() > self.max_depth {
            debug!("Ignoring change below the depth limit: {:?}", dir);
            return None;
        }

        let mut scope = relative;
        while !scan.dirs.contains(&scope) {
            scope = scope.parent()?;
        }
        Some(scope)
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf, TreeCmpError> {
    fs::canonicalize(path).map_err(|source| TreeCmpError::ScanRoot {
        path: path.to_path_buf(),
        source,
    })
}

/// `dir` relative to `root`, trying the path as given and then its canonical
/// form, which only exists if the directory still does
fn relative_to(root: &Path, dir: &Path) -> Option<RelPath> {
    if let Ok(stripped) = dir.strip_prefix(root) {
        return RelPath::from_path(stripped);
    }
    let canonical = fs::canonicalize(dir).ok()?;
    RelPath::from_path(canonical.strip_prefix(root).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;
    use treecmp_common::{CompareStatus, MatchRule};

    struct Trees {
        left: TempDir,
        right: TempDir,
    }

    impl Trees {
        fn new() -> Self {
            Self {
                left: TempDir::new().unwrap(),
                right: TempDir::new().unwrap(),
            }
        }

        fn write(&self, side: Side, path: &str, contents: &str) -> PathBuf {
            let root = match side {
                Side::Left => self.left.path(),
                Side::Right => self.right.path(),
            };
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&full, contents).unwrap();
            full
        }

        fn both(&self, path: &str, contents: &str) {
            self.write(Side::Left, path, contents);
            self.write(Side::Right, path, contents);
        }

        fn open(&self) -> TreeComparison {
            self.open_with(&AppConfig::default())
        }

        fn open_with(&self, config: &AppConfig) -> TreeComparison {
            TreeComparison::open(self.left.path(), self.right.path(), config).unwrap()
        }
    }

    fn rows(session: &TreeComparison) -> Vec<(String, String, CompareStatus)> {
        session
            .list()
            .iter()
            .map(|e| {
                (
                    e.left().map(ToString::to_string).unwrap_or_default(),
                    e.right().map(ToString::to_string).unwrap_or_default(),
                    e.status(),
                )
            })
            .collect()
    }

    fn row(left: &str, right: &str, status: CompareStatus) -> (String, String, CompareStatus) {
        (left.to_string(), right.to_string(), status)
    }

    #[test]
    fn test_open_and_compare() {
        let trees = Trees::new();
        trees.both("a.txt", "same");
        trees.write(Side::Left, "b.txt", "left");
        trees.write(Side::Right, "c.txt", "right");
        trees.write(Side::Left, "sub/d.txt", "one");
        trees.write(Side::Right, "sub/d.txt", "two");

        let mut session = trees.open();
        session.run_until_idle();

        assert_eq!(
            rows(&session),
            vec![
                row("sub/d.txt", "sub/d.txt", CompareStatus::Different),
                row("a.txt", "a.txt", CompareStatus::Same),
                row("b.txt", "", CompareStatus::NotCompared),
                row("", "c.txt", CompareStatus::NotCompared),
            ]
        );
        assert_eq!(session.watch_dirs().len(), 4);
    }

    #[test]
    fn test_open_missing_root_fails() {
        let trees = Trees::new();
        let missing = trees.left.path().join("missing");
        let result = TreeComparison::open(&missing, trees.right.path(), &AppConfig::default());
        assert!(matches!(result, Err(TreeCmpError::ScanRoot { .. })));
    }

    #[test]
    fn test_open_rejects_invalid_rules() {
        let trees = Trees::new();
        let config = AppConfig {
            match_rules: vec![MatchRule::new("(unclosed", "x", 1)],
            ..AppConfig::default()
        };
        let result = TreeComparison::open(trees.left.path(), trees.right.path(), &config);
        assert!(matches!(result, Err(TreeCmpError::InvalidRule { .. })));
    }

    #[test]
    fn test_fuzzy_rule_with_gunzip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let trees = Trees::new();
        trees.write(Side::Left, "report.csv", "a,b\n1,2\n");
        let packed = trees.right.path().join("report.csv.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&packed).unwrap(), Compression::default());
        encoder.write_all(b"a,b\n1,2\n").unwrap();
        encoder.finish().unwrap();

        let config = AppConfig {
            match_rules: vec![MatchRule::new(r"(.*)\.gz$", r"\1", 2)
                .with_commands(Some("gunzip".to_string()), None)],
            ..AppConfig::default()
        };
        let mut session = trees.open_with(&config);
        session.run_until_idle();

        assert_eq!(
            rows(&session),
            vec![row("report.csv", "report.csv.gz", CompareStatus::Same)]
        );
    }

    #[test]
    fn test_path_changed_picks_up_new_and_deleted_files() {
        let trees = Trees::new();
        trees.both("keep.txt", "k");
        trees.both("sub/old.txt", "o");

        let mut session = trees.open();
        session.run_until_idle();

        fs::remove_file(trees.left.path().join("sub/old.txt")).unwrap();
        trees.write(Side::Left, "sub/new.txt", "n");
        let summary = session.path_changed(&trees.left.path().join("sub"));
        session.run_until_idle();

        assert_eq!(summary.added, 2);
        assert_eq!(summary.removed, 1);
        assert_eq!(
            rows(&session),
            vec![
                row("sub/new.txt", "", CompareStatus::NotCompared),
                row("", "sub/old.txt", CompareStatus::NotCompared),
                row("keep.txt", "keep.txt", CompareStatus::Same),
            ]
        );
        assert!(session.list().is_sorted());
    }

    #[test]
    fn test_path_changed_new_directory_rescans_parent() {
        let trees = Trees::new();
        trees.both("top.txt", "t");
        trees.write(Side::Right, "fresh/x.txt", "x");

        let mut session = trees.open();
        session.run_until_idle();
        assert_eq!(rows(&session)[0], row("", "fresh/x.txt", CompareStatus::NotCompared));

        // the directory did not exist on the left when it was scanned
        trees.write(Side::Left, "fresh/x.txt", "x");
        session.path_changed(&trees.left.path().join("fresh"));
        session.run_until_idle();

        assert_eq!(
            rows(&session),
            vec![
                row("fresh/x.txt", "fresh/x.txt", CompareStatus::Same),
                row("top.txt", "top.txt", CompareStatus::Same),
            ]
        );
    }

    #[test]
    fn test_path_changed_detects_modification() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");
        let mut session = trees.open();
        session.run_until_idle();
        assert_eq!(session.list()[0].status(), CompareStatus::Same);

        let path = trees.write(Side::Right, "a.txt", "abd");
        set_file_mtime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
        let summary = session.path_changed(trees.right.path());
        assert_eq!(summary.invalidated, 1);

        session.run_until_idle();
        assert_eq!(session.list()[0].status(), CompareStatus::Different);
    }

    #[test]
    fn test_path_changed_recreated_file_drops_running_result() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");

        // open() hands a.txt to the worker; let that comparison finish
        // without applying it
        let mut session = trees.open();
        std::thread::sleep(std::time::Duration::from_millis(200));

        let path = trees.left.path().join("a.txt");
        fs::remove_file(&path).unwrap();
        let summary = session.path_changed(trees.left.path());
        assert_eq!((summary.added, summary.removed), (1, 1));

        trees.write(Side::Left, "a.txt", "abd");
        set_file_mtime(&path, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
        let summary = session.path_changed(trees.left.path());
        assert_eq!((summary.added, summary.removed), (1, 1));

        session.run_until_idle();
        assert_eq!(rows(&session), vec![row("a.txt", "a.txt", CompareStatus::Different)]);
    }

    #[test]
    fn test_ignore_while_comparing_keeps_entry_uncompared() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");

        let mut session = trees.open();
        assert!(session.set_ignore(0, true));
        session.run_until_idle();

        assert!(session.list()[0].is_ignored());
        assert_eq!(session.list()[0].status(), CompareStatus::NotCompared);
    }

    #[test]
    fn test_path_changed_outside_trees_is_noop() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");
        let mut session = trees.open();
        session.run_until_idle();

        let elsewhere = TempDir::new().unwrap();
        assert!(session.path_changed(elsewhere.path()).is_empty());
    }

    #[test]
    fn test_path_changed_below_depth_limit_is_noop() {
        let trees = Trees::new();
        trees.both("a/b/c/deep.txt", "d");
        let config = AppConfig {
            max_depth: 1,
            ..AppConfig::default()
        };
        let mut session = trees.open_with(&config);
        assert!(session.list().is_empty());

        let summary = session.path_changed(&trees.left.path().join("a/b/c"));
        assert!(summary.is_empty());
        assert!(session.list().is_empty());
    }

    #[test]
    fn test_ignore_survives_rescan() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");
        trees.both("b.txt", "abc");

        let mut session = trees.open();
        session.stop();
        session.run_until_idle();
        assert!(session.set_ignore(1, true));

        trees.write(Side::Left, "c.txt", "new");
        let summary = session.rescan().unwrap();
        assert_eq!(summary.added, 1);
        assert!(session.list()[1].is_ignored());

        session.run_until_idle();
        assert_eq!(session.list()[1].status(), CompareStatus::NotCompared);
    }

    #[test]
    fn test_unignore_restarts_comparison() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");
        trees.both("b.txt", "abc");

        let mut session = trees.open();
        session.stop();
        session.run_until_idle();
        assert_eq!(session.list()[1].status(), CompareStatus::NotCompared);

        session.set_ignore(1, true);
        session.set_ignore(1, false);
        session.run_until_idle();

        assert_eq!(session.list()[1].status(), CompareStatus::Same);
    }

    #[test]
    fn test_refresh_compares_again() {
        let trees = Trees::new();
        trees.both("a.txt", "abc");
        let mut session = trees.open();
        session.run_until_idle();
        let before = session.scheduler().comparator().bytes_read();

        session.refresh();
        let completed = session.run_until_idle();

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, CompareStatus::Same);
        assert!(session.scheduler().comparator().bytes_read() > before);
    }
}
