//! The sorted list of (left, right) pairs covering two trees.
//!
//! Entries are built from two scans level by level: files in directories
//! present on both sides are paired by name (exact first, then fuzzy rules),
//! files in directories present on one side only become one-sided entries.
//! After a rescan, `reconcile` merges a freshly matched scope into the list
//! without disturbing the rest of it.

use crate::matcher::NameMatcher;
use crate::scanner::ScanResult;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Index;
use tracing::debug;
use treecmp_common::{CompareStatus, FileStamp, MatchCommands, RelPath, Side};

type PairKey = (Option<RelPath>, Option<RelPath>);

/// One row of the comparison: a matched pair or an item on one side only
#[derive(Debug, Clone)]
pub struct ComparisonEntry {
    left: Option<RelPath>,
    right: Option<RelPath>,
    status: CompareStatus,
    ignore: bool,
    commands: MatchCommands,
    left_stamp: Option<FileStamp>,
    right_stamp: Option<FileStamp>,
    revision: u64,
}

impl ComparisonEntry {
    pub fn matched(left: RelPath, right: RelPath, commands: MatchCommands) -> Self {
        Self::with_sides(Some(left), Some(right), commands)
    }

    pub fn left_only(path: RelPath) -> Self {
        Self::with_sides(Some(path), None, MatchCommands::none())
    }

    pub fn right_only(path: RelPath) -> Self {
        Self::with_sides(None, Some(path), MatchCommands::none())
    }

    fn with_sides(left: Option<RelPath>, right: Option<RelPath>, commands: MatchCommands) -> Self {
        Self {
            left,
            right,
            status: CompareStatus::NotCompared,
            ignore: false,
            commands,
            left_stamp: None,
            right_stamp: None,
            revision: 0,
        }
    }

    pub fn with_stamps(mut self, left: Option<FileStamp>, right: Option<FileStamp>) -> Self {
        self.left_stamp = left;
        self.right_stamp = right;
        self
    }

    pub fn left(&self) -> Option<&RelPath> {
        self.left.as_ref()
    }

    pub fn right(&self) -> Option<&RelPath> {
        self.right.as_ref()
    }

    pub fn path(&self, side: Side) -> Option<&RelPath> {
        match side {
            Side::Left => self.left(),
            Side::Right => self.right(),
        }
    }

    pub fn stamp(&self, side: Side) -> Option<FileStamp> {
        match side {
            Side::Left => self.left_stamp,
            Side::Right => self.right_stamp,
        }
    }

    /// The path used for ordering: left if present, otherwise right
    pub fn primary(&self) -> Option<&RelPath> {
        self.left.as_ref().or(self.right.as_ref())
    }

    /// Directory level the entry was matched at
    pub fn level(&self) -> RelPath {
        self.primary()
            .and_then(RelPath::parent)
            .unwrap_or_default()
    }

    pub fn status(&self) -> CompareStatus {
        self.status
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    pub fn commands(&self) -> &MatchCommands {
        &self.commands
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_matched(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    pub fn is_left_only(&self) -> bool {
        self.left.is_some() && self.right.is_none()
    }

    pub fn is_right_only(&self) -> bool {
        self.left.is_none() && self.right.is_some()
    }

    /// A matched, non-ignored pair that still needs a content comparison
    pub fn is_pending(&self) -> bool {
        self.is_matched() && !self.ignore && self.status == CompareStatus::NotCompared
    }

    fn key(&self) -> PairKey {
        (self.left.clone(), self.right.clone())
    }

    fn cmp_entry(&self, other: &ComparisonEntry) -> Ordering {
        cmp_pair(self.left(), self.right(), other.left(), other.right())
    }

    fn reset(&mut self, revision: u64) {
        self.status = CompareStatus::NotCompared;
        self.revision = revision;
    }

    /// Take stamps and commands from a freshly matched copy of this pair.
    /// Returns true if anything changed, in which case the status is reset
    /// under `revision`.
    fn refresh_from(&mut self, fresh: ComparisonEntry, revision: u64) -> bool {
        let changed = self.left_stamp != fresh.left_stamp
            || self.right_stamp != fresh.right_stamp
            || self.commands != fresh.commands;
        if changed {
            self.left_stamp = fresh.left_stamp;
            self.right_stamp = fresh.right_stamp;
            self.commands = fresh.commands;
            self.reset(revision);
        }
        changed
    }
}

/// Order entries by primary path, then left, then right; a missing side
/// sorts before a present one
fn cmp_pair(
    a_left: Option<&RelPath>,
    a_right: Option<&RelPath>,
    b_left: Option<&RelPath>,
    b_right: Option<&RelPath>,
) -> Ordering {
    a_left
        .or(a_right)
        .cmp(&b_left.or(b_right))
        .then_with(|| a_left.cmp(&b_left))
        .then_with(|| a_right.cmp(&b_right))
}

/// A matched pair waiting for content comparison, as handed to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingComparison {
    pub left: RelPath,
    pub right: RelPath,
    pub commands: MatchCommands,
    pub revision: u64,
}

/// What a reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    pub invalidated: usize,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.invalidated == 0
    }

    pub fn merge(&mut self, other: ReconcileSummary) {
        self.added += other.added;
        self.removed += other.removed;
        self.invalidated += other.invalidated;
    }
}

/// Comparison entries for two trees, kept sorted.
///
/// Revisions come from one counter for the whole list, so a pair that is
/// removed and later matched again never gets a revision it had before.
#[derive(Debug, Clone, Default)]
pub struct ComparisonList {
    entries: Vec<ComparisonEntry>,
    last_revision: u64,
}

impl ComparisonList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match two complete scans and sort the result
    pub fn build(left: &ScanResult, right: &ScanResult, matcher: &NameMatcher) -> Self {
        let mut entries = match_trees(left, right, matcher, &RelPath::root());
        entries.sort_by(ComparisonEntry::cmp_entry);
        for (revision, entry) in (1..).zip(entries.iter_mut()) {
            entry.revision = revision;
        }
        debug!("Built comparison list with {} entries", entries.len());
        Self {
            last_revision: entries.len() as u64,
            entries,
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ComparisonEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ComparisonEntry> {
        self.entries.iter()
    }

    /// Insert at the sorted position under a fresh revision. If the pair
    /// already exists its position is returned with `false` and the
    /// existing entry is kept.
    pub fn insert(&mut self, mut entry: ComparisonEntry) -> (usize, bool) {
        match self.entries.binary_search_by(|e| e.cmp_entry(&entry)) {
            Ok(pos) => (pos, false),
            Err(pos) => {
                entry.revision = self.next_revision();
                self.entries.insert(pos, entry);
                (pos, true)
            }
        }
    }

    pub fn erase(&mut self, index: usize) -> ComparisonEntry {
        self.entries.remove(index)
    }

    /// Position of the entry with exactly this path pair
    pub fn find(&self, left: Option<&RelPath>, right: Option<&RelPath>) -> Option<usize> {
        self.entries
            .binary_search_by(|e| cmp_pair(e.left(), e.right(), left, right))
            .ok()
    }

    /// Reset every entry to `NotCompared`
    pub fn forget(&mut self) {
        for entry in &mut self.entries {
            self.last_revision += 1;
            entry.reset(self.last_revision);
        }
    }

    /// Returns true if the flag changed
    pub fn set_ignore(&mut self, index: usize, ignore: bool) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if entry.ignore != ignore => {
                entry.ignore = ignore;
                true
            }
            _ => false,
        }
    }

    /// Drop one side of an entry. The entry is removed once no side is left,
    /// otherwise it moves to its new sorted position, which is returned.
    pub fn clear_side(&mut self, index: usize, side: Side) -> Option<usize> {
        let mut entry = self.entries.remove(index);
        match side {
            Side::Left => {
                entry.left = None;
                entry.left_stamp = None;
            }
            Side::Right => {
                entry.right = None;
                entry.right_stamp = None;
            }
        }
        if entry.primary().is_none() {
            return None;
        }
        entry.commands = MatchCommands::none();
        entry.status = CompareStatus::NotCompared;
        let (pos, _) = self.insert(entry);
        Some(pos)
    }

    /// Snapshot of the pairs that still need comparing, in list order
    pub fn pending(&self) -> Vec<PendingComparison> {
        self.entries
            .iter()
            .filter(|e| e.is_pending())
            .filter_map(|e| {
                Some(PendingComparison {
                    left: e.left.clone()?,
                    right: e.right.clone()?,
                    commands: e.commands.clone(),
                    revision: e.revision,
                })
            })
            .collect()
    }

    /// Store a comparison result, unless the entry disappeared, changed or
    /// was ignored since the comparison was issued. Returns whether it was
    /// applied.
    pub fn apply_result(
        &mut self,
        left: &RelPath,
        right: &RelPath,
        revision: u64,
        status: CompareStatus,
    ) -> bool {
        let Some(index) = self.find(Some(left), Some(right)) else {
            return false;
        };
        let entry = &mut self.entries[index];
        if entry.ignore
            || entry.revision != revision
            || entry.status != CompareStatus::NotCompared
        {
            return false;
        }
        entry.status = status;
        true
    }

    /// Merge freshly matched entries for everything at or below `scope`.
    ///
    /// Entries in scope that are missing from `fresh` are removed, new ones
    /// are inserted, and entries present in both keep their status and
    /// ignore flag unless a file stamp changed.
    pub fn reconcile(&mut self, scope: &RelPath, fresh: Vec<ComparisonEntry>) -> ReconcileSummary {
        let mut incoming: HashMap<PairKey, ComparisonEntry> =
            fresh.into_iter().map(|e| (e.key(), e)).collect();
        let mut summary = ReconcileSummary::default();
        let mut ignored_left: HashSet<RelPath> = HashSet::new();
        let mut ignored_right: HashSet<RelPath> = HashSet::new();
        let mut last_revision = self.last_revision;

        self.entries.retain_mut(|entry| {
            if !entry.level().starts_with(scope) {
                return true;
            }
            match incoming.remove(&entry.key()) {
                Some(update) => {
                    if entry.refresh_from(update, last_revision + 1) {
                        last_revision += 1;
                        summary.invalidated += 1;
                    }
                    true
                }
                None => {
                    if entry.ignore {
                        ignored_left.extend(entry.left.clone());
                        ignored_right.extend(entry.right.clone());
                    }
                    summary.removed += 1;
                    false
                }
            }
        });
        self.last_revision = last_revision;

        for (_, mut entry) in incoming {
            let keeps_left = entry.left.as_ref().is_some_and(|p| ignored_left.contains(p));
            let keeps_right = entry.right.as_ref().is_some_and(|p| ignored_right.contains(p));
            entry.ignore = keeps_left || keeps_right;
            if self.insert(entry).1 {
                summary.added += 1;
            }
        }

        debug!(
            "Reconciled scope '{}': {} added, {} removed, {} invalidated",
            scope, summary.added, summary.removed, summary.invalidated
        );
        summary
    }

    /// True if entries are strictly increasing under the list order
    pub fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].cmp_entry(&w[1]) == Ordering::Less)
    }
}

impl Index<usize> for ComparisonList {
    type Output = ComparisonEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl<'a> IntoIterator for &'a ComparisonList {
    type Item = &'a ComparisonEntry;
    type IntoIter = std::slice::Iter<'a, ComparisonEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

type Level<'a> = Vec<(&'a RelPath, FileStamp)>;

fn group_by_level<'a>(scan: &'a ScanResult, scope: &RelPath) -> BTreeMap<RelPath, Level<'a>> {
    let mut levels: BTreeMap<RelPath, Level<'a>> = BTreeMap::new();
    for (path, stamp) in &scan.files {
        let Some(parent) = path.parent() else {
            continue;
        };
        if parent.starts_with(scope) {
            levels.entry(parent).or_default().push((path, *stamp));
        }
    }
    levels
}

/// Match every file at or below `scope`. The result is unsorted.
pub fn match_trees(
    left: &ScanResult,
    right: &ScanResult,
    matcher: &NameMatcher,
    scope: &RelPath,
) -> Vec<ComparisonEntry> {
    let mut left_levels = group_by_level(left, scope);
    let mut right_levels = group_by_level(right, scope);
    let all_levels: BTreeSet<RelPath> = left_levels
        .keys()
        .chain(right_levels.keys())
        .cloned()
        .collect();

    let mut entries = Vec::new();
    for level in all_levels {
        let left_files = left_levels.remove(&level).unwrap_or_default();
        let right_files = right_levels.remove(&level).unwrap_or_default();

        if left.dirs.contains(&level) && right.dirs.contains(&level) {
            match_level(left_files, right_files, matcher, &mut entries);
        } else {
            entries.extend(
                left_files
                    .into_iter()
                    .map(|(p, s)| ComparisonEntry::left_only(p.clone()).with_stamps(Some(s), None)),
            );
            entries.extend(
                right_files
                    .into_iter()
                    .map(|(p, s)| ComparisonEntry::right_only(p.clone()).with_stamps(None, Some(s))),
            );
        }
    }
    entries
}

fn file_name(path: &RelPath) -> &str {
    path.file_name().unwrap_or_default()
}

/// Pair the files of one directory level present in both trees
fn match_level(
    left: Level<'_>,
    right: Level<'_>,
    matcher: &NameMatcher,
    out: &mut Vec<ComparisonEntry>,
) {
    let mut left_only = Vec::new();
    let mut right_only = Vec::new();
    let mut l = left.into_iter().peekable();
    let mut r = right.into_iter().peekable();

    loop {
        let order = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => file_name(a.0).cmp(file_name(b.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Equal => {
                if let (Some((lp, ls)), Some((rp, rs))) = (l.next(), r.next()) {
                    out.push(
                        ComparisonEntry::matched(lp.clone(), rp.clone(), MatchCommands::none())
                            .with_stamps(Some(ls), Some(rs)),
                    );
                }
            }
            Ordering::Less => left_only.extend(l.next()),
            Ordering::Greater => right_only.extend(r.next()),
        }
    }

    if matcher.is_fuzzy() {
        for (lp, ls) in left_only {
            let mut best: Option<(usize, u32, MatchCommands)> = None;
            for (idx, (rp, _)) in right_only.iter().enumerate() {
                let Some(outcome) = matcher.compare(file_name(lp), file_name(rp)) else {
                    continue;
                };
                if best.as_ref().map_or(true, |(_, w, _)| outcome.weight < *w) {
                    best = Some((idx, outcome.weight, outcome.commands));
                }
            }

            match best {
                Some((idx, weight, commands)) => {
                    let (rp, rs) = right_only.remove(idx);
                    debug!("Fuzzy matched {} with {} (weight {})", lp, rp, weight);
                    out.push(
                        ComparisonEntry::matched(lp.clone(), rp.clone(), commands)
                            .with_stamps(Some(ls), Some(rs)),
                    );
                }
                None => out.push(ComparisonEntry::left_only(lp.clone()).with_stamps(Some(ls), None)),
            }
        }
    } else {
        out.extend(
            left_only
                .into_iter()
                .map(|(p, s)| ComparisonEntry::left_only(p.clone()).with_stamps(Some(s), None)),
        );
    }

    out.extend(
        right_only
            .into_iter()
            .map(|(p, s)| ComparisonEntry::right_only(p.clone()).with_stamps(None, Some(s))),
    );
}
