use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use treecmp_common::{AppConfig, FileStamp, RelPath, TreeCmpError};

/// Files and directories found under one tree root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub root: PathBuf,
    /// Every listed file, relative to `root`
    pub files: BTreeMap<RelPath, FileStamp>,
    /// Directories whose contents were read; the root is the empty path
    pub dirs: BTreeSet<RelPath>,
}

impl ScanResult {
    pub fn empty(root: PathBuf) -> Self {
        Self {
            root,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
        }
    }

    /// Absolute paths of the directories a change watcher should observe
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        self.dirs.iter().map(|dir| dir.under(&self.root)).collect()
    }

    /// Replace everything at or below `scope` with the contents of `subtree`,
    /// which must already be rooted at the same tree root.
    pub fn replace_subtree(&mut self, scope: &RelPath, subtree: ScanResult) {
        self.files.retain(|path, _| !path.starts_with(scope));
        self.dirs.retain(|dir| !dir.starts_with(scope));
        self.files.extend(subtree.files);
        self.dirs.extend(subtree.dirs);
    }
}

/// Depth-bounded directory scanner using jwalk
pub struct TreeScanner {
    show_hidden: bool,
    follow_symlinks: bool,
    name_filters: Vec<glob::Pattern>,
    custom_ignore: Option<Gitignore>,
}

impl TreeScanner {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            show_hidden: config.show_hidden,
            follow_symlinks: config.follow_symlinks,
            name_filters: Self::build_name_filters(config),
            custom_ignore: Self::build_custom_ignore(config),
        }
    }

    fn build_name_filters(config: &AppConfig) -> Vec<glob::Pattern> {
        config
            .name_filter_patterns()
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!("Ignoring invalid name filter '{}': {}", pattern, e);
                    None
                }
            })
            .collect()
    }

    /// Build a Gitignore from custom ignore patterns in config
    fn build_custom_ignore(config: &AppConfig) -> Option<Gitignore> {
        if config.ignore_patterns.is_empty() {
            return None;
        }

        let mut builder = GitignoreBuilder::new("");
        for pattern in &config.ignore_patterns {
            if let Err(err) = builder.add_line(None, pattern) {
                warn!("Failed to add ignore pattern '{}': {}", pattern, err);
            } else {
                debug!("Added custom ignore pattern: {}", pattern);
            }
        }

        match builder.build() {
            Ok(ignore) => Some(ignore),
            Err(e) => {
                warn!("Failed to build custom ignore: {}", e);
                None
            }
        }
    }

    /// Scan `root` down to `max_depth` (0 lists only the entries directly
    /// inside `root`). Fails only if `root` itself cannot be read.
    pub fn scan(&self, root: &Path, max_depth: usize) -> Result<ScanResult, TreeCmpError> {
        fs::read_dir(root).map_err(|source| TreeCmpError::ScanRoot {
            path: root.to_path_buf(),
            source,
        })?;

        let mut result = ScanResult::empty(root.to_path_buf());
        self.walk(root, &RelPath::root(), max_depth, &mut result);
        debug!(
            "Scanned {} files in {} directories from {:?}",
            result.files.len(),
            result.dirs.len(),
            root
        );
        Ok(result)
    }

    /// Rescan the directory `rel` below `root` with whatever depth budget is
    /// left at that level. A missing or unreadable directory yields an empty
    /// result, which is how deletions show up.
    pub fn scan_subtree(&self, root: &Path, rel: &RelPath, max_depth: usize) -> ScanResult {
        let mut result = ScanResult::empty(root.to_path_buf());
        let level = rel.components().len();
        if level > max_depth {
            debug!("Skipping rescan of {} beyond depth limit {}", rel, max_depth);
            return result;
        }

        let dir = rel.under(root);
        if let Err(e) = fs::read_dir(&dir) {
            debug!("Treating unreadable directory {:?} as empty: {}", dir, e);
            return result;
        }

        self.walk(&dir, rel, max_depth - level, &mut result);
        result
    }

    fn walk(&self, dir: &Path, base: &RelPath, max_depth: usize, result: &mut ScanResult) {
        result.dirs.insert(base.clone());

        let walker = WalkDir::new(dir)
            .sort(true)
            .max_depth(max_depth + 1)
            .skip_hidden(!self.show_hidden)
            .follow_links(self.follow_symlinks);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {:?}: {}", dir, e);
                    continue;
                }
            };

            if entry.depth == 0 {
                continue;
            }

            let path = entry.path();
            let Some(relative) = path.strip_prefix(dir).ok().and_then(RelPath::from_path) else {
                debug!("Skipping non UTF-8 path {:?}", path);
                continue;
            };
            let relative = base.concat(&relative);
            let is_dir = entry.file_type().is_dir();

            if self.should_ignore_with_parents(&relative, is_dir) {
                continue;
            }

            if is_dir {
                if let Some(ref e) = entry.read_children_error {
                    debug!("Treating unreadable directory {:?} as empty: {}", path, e);
                    continue;
                }
                if entry.depth <= max_depth {
                    result.dirs.insert(relative);
                }
                continue;
            }

            if entry.file_type().is_symlink() && path.is_dir() {
                debug!("Not following directory link {:?}", path);
                continue;
            }

            if !self.passes_name_filters(&relative) {
                continue;
            }

            let stamp = match entry.metadata() {
                Ok(metadata) => FileStamp {
                    size: metadata.len(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                },
                Err(e) => {
                    debug!("Skipping {:?}, metadata unavailable: {}", path, e);
                    continue;
                }
            };

            result.files.insert(relative, stamp);
        }
    }

    fn passes_name_filters(&self, path: &RelPath) -> bool {
        if self.name_filters.is_empty() {
            return true;
        }
        let name = path.file_name().unwrap_or_default();
        self.name_filters.iter().any(|pattern| pattern.matches(name))
    }

    /// Check if a path or any of its parent directories should be ignored
    fn should_ignore_with_parents(&self, path: &RelPath, is_dir: bool) -> bool {
        let Some(ref custom_ignore) = self.custom_ignore else {
            return false;
        };

        if custom_ignore.matched(path.to_path_buf(), is_dir).is_ignore() {
            return true;
        }

        let mut current = path.parent();
        while let Some(parent) = current {
            if parent.is_root() {
                break;
            }
            if custom_ignore.matched(parent.to_path_buf(), true).is_ignore() {
                return true;
            }
            current = parent.parent();
        }
        false
    }
}
